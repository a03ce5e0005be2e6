//! Network transport for the hosted platform: procedure and table calls over
//! HTTP, push notifications over one shared realtime socket.

pub mod config;
pub mod realtime;
pub mod rest;
pub mod transport;

pub use config::RemoteConfig;
pub use transport::RemoteTransport;
