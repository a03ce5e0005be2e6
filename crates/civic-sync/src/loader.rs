//! Full snapshot reads for one channel.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use civic_types::api::{ListMessagesParams, RpcEnvelope};
use civic_types::models::UnifiedMessage;

use crate::binding::{ChannelBinding, TransportStrategy};
use crate::error::{MalformedRecordError, TransportError};
use crate::transport::Transport;

/// Result of one load: the authoritative list plus every record that was
/// dropped on the way.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub messages: Vec<UnifiedMessage>,
    pub rejected: Vec<MalformedRecordError>,
}

/// Fetch and normalize a channel's complete message list.
///
/// The returned list replaces whatever the caller holds. On error the caller
/// must keep its previous list.
pub async fn load(
    transport: &dyn Transport,
    binding: &ChannelBinding,
) -> Result<Snapshot, TransportError> {
    let records = fetch_records(transport, binding).await?;
    let snapshot = normalize_records(binding, records);

    debug!(
        "Loaded {} messages for {} ({} rejected)",
        snapshot.messages.len(),
        binding.key(),
        snapshot.rejected.len()
    );
    Ok(snapshot)
}

async fn fetch_records(
    transport: &dyn Transport,
    binding: &ChannelBinding,
) -> Result<Vec<Value>, TransportError> {
    match binding.transport {
        TransportStrategy::Procedure { read, .. } => {
            let params = serde_json::to_value(ListMessagesParams {
                channel_id: binding.channel_id.clone(),
            })
            .map_err(|e| TransportError::Decode(e.to_string()))?;

            let envelope = transport.call(read, params).await?;
            records_from_envelope(envelope)
        }
        TransportStrategy::FilteredTable => transport.select(&binding.table_query()).await,
    }
}

/// Unwraps a procedure envelope. `success: false` is an error in its own right.
pub fn records_from_envelope(envelope: RpcEnvelope) -> Result<Vec<Value>, TransportError> {
    if !envelope.success {
        return Err(TransportError::Rejected(
            envelope.error.unwrap_or_else(|| "unspecified error".to_string()),
        ));
    }

    match envelope.data {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(TransportError::Decode(format!(
            "expected an array of records, got {}",
            json_kind(&other)
        ))),
    }
}

fn normalize_records(binding: &ChannelBinding, records: Vec<Value>) -> Snapshot {
    let mut snapshot = Snapshot::default();
    let mut seen = HashSet::new();

    for raw in &records {
        match binding.shape.normalize(raw) {
            Ok(msg) => {
                if seen.insert(msg.id.clone()) {
                    snapshot.messages.push(msg);
                } else {
                    debug!("Duplicate message id '{}' in {}, keeping first", msg.id, binding.key());
                }
            }
            Err(e) => {
                warn!("Dropping record from {}: {}", binding.key(), e);
                snapshot.rejected.push(e);
            }
        }
    }

    // Stores already order by created_at; this keeps the invariant when they don't.
    snapshot.messages.sort_by_key(|m| m.created_at);
    snapshot
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
