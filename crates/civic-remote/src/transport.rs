use std::sync::OnceLock;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use civic_sync::{
    Subscription, SubscriptionFilter, SubscriptionId, TableQuery, Transport, TransportError,
};
use civic_types::api::RpcEnvelope;

use crate::config::RemoteConfig;
use crate::realtime::RealtimeClient;
use crate::rest::RestClient;

/// Transport for the hosted platform. The realtime socket is opened on the
/// first subscription and shared by all later ones.
pub struct RemoteTransport {
    config: RemoteConfig,
    rest: RestClient,
    realtime: OnceLock<RealtimeClient>,
}

impl RemoteTransport {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            rest: RestClient::new(&config.api_url, config.api_key.clone()),
            config,
            realtime: OnceLock::new(),
        }
    }

    fn realtime(&self) -> &RealtimeClient {
        self.realtime.get_or_init(|| {
            debug!("Starting realtime client for {}", self.config.realtime_url);
            RealtimeClient::start(self.config.clone())
        })
    }
}

#[async_trait]
impl Transport for RemoteTransport {
    async fn call(&self, procedure: &str, params: Value) -> Result<RpcEnvelope, TransportError> {
        self.rest.rpc(procedure, &params).await
    }

    async fn select(&self, query: &TableQuery) -> Result<Vec<Value>, TransportError> {
        self.rest.select(query).await
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), TransportError> {
        self.rest.insert(table, &row).await
    }

    async fn subscribe(&self, filter: SubscriptionFilter) -> Result<Subscription, TransportError> {
        self.realtime().join(filter)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
        match self.realtime.get() {
            Some(client) => client.leave(id),
            None => Ok(()),
        }
    }
}
