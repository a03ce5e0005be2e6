//! Optimistic send: show the message locally, append remotely, then reconcile
//! against a fresh snapshot or roll back.

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use civic_types::api::{DirectMessageInsert, InternalNoteInsert, OfficialNoteInsert, PostMessageParams};
use civic_types::models::{Identity, UnifiedMessage, Visibility};

use crate::binding::{ChannelBinding, TransportStrategy};
use crate::error::{SendError, SyncError, TransportError};
use crate::loader;
use crate::normalize::MessageShape;
use crate::transport::Transport;

/// Prefix of every provisional id. Remote ids never carry it.
pub const OPTIMISTIC_PREFIX: &str = "optimistic-";

/// Caller-supplied extras merged into the outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMetadata {
    /// Overrides the channel's default internal flag.
    pub is_internal: Option<bool>,
    /// Official notes only.
    pub tags: Vec<String>,
    /// Official notes only; defaults to staff visibility.
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Appended remotely and reconciled with the authoritative list.
    Delivered,
    /// Blank input; nothing was shown or sent.
    IgnoredBlank,
}

/// One remote append, already shaped for the channel's store.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendRequest {
    Call { procedure: &'static str, params: Value },
    Insert { table: &'static str, row: Value },
}

/// The list the pipeline reconciles against. Implementations must make each
/// call atomic with respect to other writers of the same list.
pub trait PipelineState: Send + Sync {
    /// Show the provisional entry at the end of the list. The draft is
    /// cleared only if it holds the content being sent.
    fn begin_send(&self, provisional: UnifiedMessage);

    /// Replace the whole list, provisional entry included, with `authoritative`.
    fn complete_send(&self, authoritative: Vec<UnifiedMessage>);

    /// Drop the provisional entry and put `draft` back for the user.
    fn rollback_send(&self, provisional_id: &str, draft: &str, error: &TransportError);
}

pub fn is_provisional_id(id: &str) -> bool {
    id.starts_with(OPTIMISTIC_PREFIX)
}

fn default_internal(binding: &ChannelBinding, meta: &SendMetadata) -> bool {
    match binding.shape {
        MessageShape::ComplaintMessage => false,
        MessageShape::OfficialNote => meta.visibility != Some(Visibility::Public),
        MessageShape::InternalNote | MessageShape::DirectMessage => true,
    }
}

fn note_visibility(meta: &SendMetadata) -> Visibility {
    meta.visibility.unwrap_or(Visibility::Staff)
}

/// Local stand-in shown until the authoritative list arrives.
pub fn provisional_message(
    binding: &ChannelBinding,
    identity: &Identity,
    content: &str,
    meta: &SendMetadata,
) -> UnifiedMessage {
    let is_note = binding.shape == MessageShape::OfficialNote;

    UnifiedMessage {
        id: format!("{}{}", OPTIMISTIC_PREFIX, Uuid::new_v4()),
        content: content.to_string(),
        created_at: Utc::now(),
        author_id: identity.user_id.clone(),
        author_name: identity.display_name.clone(),
        author_role: identity.role,
        author_avatar: identity.avatar.clone(),
        is_internal: meta.is_internal.unwrap_or_else(|| default_internal(binding, meta)),
        tags: is_note.then(|| meta.tags.clone()),
        visibility: is_note.then(|| note_visibility(meta)),
        is_optimistic: true,
    }
}

/// Shape the remote append for the channel's store.
pub fn append_request(
    binding: &ChannelBinding,
    identity: &Identity,
    content: &str,
    meta: &SendMetadata,
) -> Result<AppendRequest, TransportError> {
    let is_internal = meta.is_internal.unwrap_or_else(|| default_internal(binding, meta));
    let encode = |v: Result<Value, serde_json::Error>| v.map_err(|e| TransportError::Decode(e.to_string()));

    if let TransportStrategy::Procedure { write, .. } = binding.transport {
        let params = encode(serde_json::to_value(PostMessageParams {
            channel_id: binding.channel_id.clone(),
            content: content.to_string(),
            is_internal,
        }))?;
        return Ok(AppendRequest::Call { procedure: write, params });
    }

    let row = match binding.shape {
        MessageShape::InternalNote => encode(serde_json::to_value(InternalNoteInsert {
            complaint_id: binding.channel_id.clone(),
            staff_id: identity.user_id.clone(),
            note: content.to_string(),
            is_internal,
        }))?,
        MessageShape::OfficialNote => encode(serde_json::to_value(OfficialNoteInsert {
            complaint_id: binding.channel_id.clone(),
            author_id: identity.user_id.clone(),
            body: content.to_string(),
            tags: meta.tags.clone(),
            visibility: note_visibility(meta),
        }))?,
        MessageShape::DirectMessage => encode(serde_json::to_value(DirectMessageInsert {
            conversation_id: binding.channel_id.clone(),
            sender_id: identity.user_id.clone(),
            content: content.to_string(),
        }))?,
        MessageShape::ComplaintMessage => json!({
            binding.filter_column: binding.channel_id,
            "sender_id": identity.user_id,
            "message": content,
            "is_internal": is_internal,
        }),
    };

    Ok(AppendRequest::Insert {
        table: binding.backing_table,
        row,
    })
}

/// Perform the remote append. A procedure envelope with `success: false`
/// counts as a failed append.
pub async fn append(transport: &dyn Transport, request: AppendRequest) -> Result<(), TransportError> {
    match request {
        AppendRequest::Call { procedure, params } => {
            let envelope = transport.call(procedure, params).await?;
            if envelope.success {
                Ok(())
            } else {
                Err(TransportError::Rejected(
                    envelope.error.unwrap_or_else(|| "unspecified error".to_string()),
                ))
            }
        }
        AppendRequest::Insert { table, row } => transport.insert(table, row).await,
    }
}

/// Serializes sends so that at most one provisional entry exists at a time.
#[derive(Default)]
pub struct SendPipeline {
    gate: Mutex<()>,
}

impl SendPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn send(
        &self,
        transport: &dyn Transport,
        binding: &ChannelBinding,
        identity: &Identity,
        state: &dyn PipelineState,
        content: &str,
        meta: &SendMetadata,
    ) -> Result<SendOutcome, SyncError> {
        if content.trim().is_empty() {
            debug!("Ignoring blank send on {}", binding.key());
            return Ok(SendOutcome::IgnoredBlank);
        }

        let request = append_request(binding, identity, content, meta)?;

        let _turn = self.gate.lock().await;

        let provisional = provisional_message(binding, identity, content, meta);
        let provisional_id = provisional.id.clone();
        state.begin_send(provisional);

        if let Err(e) = append(transport, request).await {
            warn!("Send to {} failed, restoring draft: {}", binding.key(), e);
            state.rollback_send(&provisional_id, content, &e);
            return Err(SendError {
                draft: content.to_string(),
                source: e,
            }
            .into());
        }

        // The append does not echo author enrichment back, so the provisional
        // entry is discarded in favour of a fresh snapshot rather than patched.
        match loader::load(transport, binding).await {
            Ok(snapshot) => {
                state.complete_send(snapshot.messages);
                info!("Message delivered to {}", binding.key());
                Ok(SendOutcome::Delivered)
            }
            Err(e) => {
                // The content must end up somewhere visible: back in the draft.
                warn!("Message delivered to {} but reload failed: {}", binding.key(), e);
                state.rollback_send(&provisional_id, content, &e);
                Err(SyncError::Unconfirmed {
                    draft: content.to_string(),
                    source: e,
                })
            }
        }
    }
}
