//! One mailbox abstraction over the portal's four message stores.
//!
//! A [`SyncEngine`] binds to one channel at a time: it resolves the channel
//! to its store, loads the thread, keeps it fresh from push notifications and
//! sends optimistically.

pub mod binding;
pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod realtime;
pub mod send;
pub mod transport;

pub use binding::{ChannelBinding, TransportStrategy, resolve};
pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncSnapshot};
pub use error::{ConfigurationError, MalformedRecordError, SendError, SyncError, TransportError};
pub use realtime::ConnectionStatus;
pub use send::{SendMetadata, SendOutcome};
pub use transport::{
    Subscription, SubscriptionEvent, SubscriptionFilter, SubscriptionId, TableQuery, Transport,
};
