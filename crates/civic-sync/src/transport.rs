//! The seam between the sync engine and a backing platform.
//!
//! One transport client is shared by every engine in the process; each
//! engine opens its own subscriptions on it and tears them down on its own.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use civic_types::api::RpcEnvelope;
use civic_types::events::topic_for;

use crate::error::TransportError;

/// A filtered, ordered read against one backing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
    pub table: String,
    /// Projection including nested author joins, e.g. `*,staff:profiles(full_name)`.
    pub select: String,
    pub filter_column: String,
    pub filter_value: String,
    /// Always ascending.
    pub order_column: String,
}

/// Scope of one push subscription: inserts on `table` where `column = value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionFilter {
    pub table: String,
    pub column: String,
    pub value: String,
}

impl SubscriptionFilter {
    pub fn topic(&self) -> String {
        topic_for(&self.table, &self.column, &self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscription reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// The transport is (re)trying to establish the subscription.
    Reconnecting,
    /// The subscription is live.
    Established,
    /// A row was inserted. The payload is not required to carry the message.
    Insert { table: String, record: Option<Value> },
    /// The subscription dropped (socket closed, server error).
    Closed { reason: Option<String> },
}

/// A live subscription. Dropping the receiver does not unsubscribe; callers
/// must go through [`Transport::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Invoke a named remote procedure.
    async fn call(&self, procedure: &str, params: Value) -> Result<RpcEnvelope, TransportError>;

    /// Read every row matching the query, ordered ascending.
    async fn select(&self, query: &TableQuery) -> Result<Vec<Value>, TransportError>;

    /// Append one row.
    async fn insert(&self, table: &str, row: Value) -> Result<(), TransportError>;

    /// Open a push subscription for inserts matching `filter`.
    async fn subscribe(&self, filter: SubscriptionFilter) -> Result<Subscription, TransportError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError>;
}
