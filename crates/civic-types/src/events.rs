use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Builds the realtime topic name for a filtered table subscription.
pub fn topic_for(table: &str, column: &str, value: &str) -> String {
    format!("realtime:{}:{}=eq.{}", table, column, value)
}

/// Events sent FROM the realtime endpoint TO the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeEvent {
    /// The topic is live; inserts will be delivered from now on.
    JoinAck { topic: String },

    /// The server refused the topic.
    JoinError { topic: String, reason: String },

    /// A row was inserted into the table behind the topic.
    /// The record is informational only; clients reload instead of merging it.
    Insert {
        topic: String,
        table: String,
        #[serde(default)]
        record: Option<Value>,
    },

    /// The server dropped the topic on its side.
    TopicClosed { topic: String, reason: Option<String> },

    /// Reply to a client heartbeat.
    HeartbeatAck,
}

impl RealtimeEvent {
    /// Returns the topic if this event is scoped to one.
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::JoinAck { topic }
            | Self::JoinError { topic, .. }
            | Self::Insert { topic, .. }
            | Self::TopicClosed { topic, .. } => Some(topic),
            Self::HeartbeatAck => None,
        }
    }
}

/// Commands sent FROM the client TO the realtime endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeCommand {
    /// Start receiving inserts on `table` where `filter_column = filter_value`.
    Join {
        topic: String,
        table: String,
        filter_column: String,
        filter_value: String,
    },

    /// Stop receiving inserts for a topic.
    Leave { topic: String },

    /// Keep-alive; answered with `HeartbeatAck`.
    Heartbeat,
}
