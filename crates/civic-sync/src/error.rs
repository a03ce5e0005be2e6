use civic_types::models::UnknownChannelType;
use thiserror::Error;

/// The channel cannot be bound to a backing store. Programmer error: not retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error(transparent)]
    UnknownChannelType(#[from] UnknownChannelType),

    #[error("channel id is empty for {0}")]
    EmptyChannelId(String),
}

/// A raw record that cannot become a minimally valid message.
/// Recovered locally: the record is dropped and logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed record {}: {reason}", record_id.as_deref().unwrap_or("<no id>"))]
pub struct MalformedRecordError {
    pub record_id: Option<String>,
    pub reason: String,
}

impl MalformedRecordError {
    pub fn new(record_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            record_id,
            reason: reason.into(),
        }
    }
}

/// A read, write or subscribe call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("remote returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The call went through but the envelope reported `success: false`.
    #[error("remote rejected the request: {0}")]
    Rejected(String),

    #[error("could not decode remote response: {0}")]
    Decode(String),

    #[error("transport closed")]
    Closed,
}

/// A send that failed at the transport. The draft has already been restored
/// to `draft` by the time this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("message was not sent: {source}")]
pub struct SendError {
    pub draft: String,
    #[source]
    pub source: TransportError,
}

/// Everything the sync engine can surface to a UI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Send(#[from] SendError),

    /// The append went through but the thread could not be loaded again.
    /// The draft holds `draft` so the text is not lost; reload before
    /// resending it.
    #[error("message was sent but the thread could not be refreshed: {source}")]
    Unconfirmed {
        draft: String,
        #[source]
        source: TransportError,
    },

    #[error("no channel is attached")]
    NotAttached,
}

impl SyncError {
    /// Transport-level failures can be retried by the user; configuration
    /// failures cannot.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Send(_) | Self::Unconfirmed { .. }
        )
    }
}
