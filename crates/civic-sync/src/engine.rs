//! The façade UI surfaces bind to: one engine, one channel at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use civic_types::models::{ChannelKey, ChannelType, Identity, UnifiedMessage};

use crate::binding::{self, ChannelBinding};
use crate::config::SyncConfig;
use crate::error::{SyncError, TransportError};
use crate::loader;
use crate::realtime::{ConnectionStatus, RealtimeSink, RealtimeSubscription};
use crate::send::{PipelineState, SendMetadata, SendOutcome, SendPipeline};
use crate::transport::Transport;

/// Everything a surface renders, published on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub channel: Option<ChannelKey>,
    pub messages: Vec<UnifiedMessage>,
    pub is_loading: bool,
    pub is_sending: bool,
    pub status: ConnectionStatus,
    /// Text the user is composing. Restored here when a send fails.
    pub draft: String,
    /// Last transport failure, for a retryable notice.
    pub last_error: Option<String>,
    /// Identifies the attachment that owns this state. Writers holding an
    /// older generation are ignored.
    generation: u64,
}

/// State before the first attach.
impl Default for SyncSnapshot {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            ..Self::detached(0)
        }
    }
}

impl SyncSnapshot {
    fn detached(generation: u64) -> Self {
        Self {
            channel: None,
            messages: Vec::new(),
            is_loading: false,
            is_sending: false,
            status: ConnectionStatus::TornDown,
            draft: String::new(),
            last_error: None,
            generation,
        }
    }

    fn attaching(generation: u64, channel: ChannelKey) -> Self {
        Self {
            channel: Some(channel),
            is_loading: true,
            status: ConnectionStatus::Connecting,
            ..Self::detached(generation)
        }
    }

    pub fn provisional_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_optimistic).count()
    }
}

/// Syncs one channel at a time for one signed-in user.
///
/// Cloning is cheap and clones share the same state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    transport: Arc<dyn Transport>,
    identity: Identity,
    config: SyncConfig,
    state: Arc<watch::Sender<SyncSnapshot>>,
    pipeline: SendPipeline,
    current: Mutex<Option<Attached>>,
    generations: AtomicU64,
}

struct Attached {
    attachment: Attachment,
    realtime: RealtimeSubscription,
}

impl SyncEngine {
    pub fn new(transport: Arc<dyn Transport>, identity: Identity, config: SyncConfig) -> Self {
        let (state, _) = watch::channel(SyncSnapshot::default());

        Self {
            inner: Arc::new(EngineInner {
                transport,
                identity,
                config,
                state: Arc::new(state),
                pipeline: SendPipeline::new(),
                current: Mutex::new(None),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn messages(&self) -> Vec<UnifiedMessage> {
        self.inner.state.borrow().messages.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading
    }

    pub fn is_sending(&self) -> bool {
        self.inner.state.borrow().is_sending
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.state.borrow().status
    }

    pub fn draft(&self) -> String {
        self.inner.state.borrow().draft.clone()
    }

    pub fn channel(&self) -> Option<ChannelKey> {
        self.inner.state.borrow().channel.clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.inner.state.send_modify(|s| s.draft = text);
    }

    /// Attach to a channel by its wire names. See [`SyncEngine::attach_binding`].
    pub async fn attach(&self, channel_type: &str, channel_id: &str) -> Result<(), SyncError> {
        let binding = binding::resolve(channel_type, channel_id)?;
        self.attach_binding(binding).await
    }

    pub async fn attach_typed(&self, channel_type: ChannelType, channel_id: &str) -> Result<(), SyncError> {
        let binding = binding::resolve_typed(channel_type, channel_id)?;
        self.attach_binding(binding).await
    }

    /// Switch to `binding`. Re-attaching to the channel already attached is a
    /// no-op. Otherwise the old subscription is torn down and the old list
    /// discarded before the new subscription opens and the first load runs.
    ///
    /// A failed first load is returned, but the channel stays attached: the
    /// next push notification or [`SyncEngine::reload`] retries it.
    pub async fn attach_binding(&self, binding: ChannelBinding) -> Result<(), SyncError> {
        let attachment = {
            let mut current = self.inner.current.lock().await;

            if let Some(attached) = current.as_ref() {
                if attached.attachment.binding.key() == binding.key() {
                    debug!("Already attached to {}", binding.key());
                    return Ok(());
                }
            }

            let generation = self.next_generation();
            self.inner
                .state
                .send_modify(|s| *s = SyncSnapshot::attaching(generation, binding.key()));

            if let Some(old) = current.take() {
                info!("Detaching from {}", old.attachment.binding.key());
                old.realtime.detach().await;
            }

            info!("Attaching to {}", binding.key());
            let attachment = Attachment {
                generation,
                binding,
                transport: self.inner.transport.clone(),
                state: self.inner.state.clone(),
                config: self.inner.config.clone(),
            };
            let realtime = RealtimeSubscription::attach(
                self.inner.transport.clone(),
                &attachment.binding,
                Arc::new(attachment.clone()),
            )
            .await;

            *current = Some(Attached {
                attachment: attachment.clone(),
                realtime,
            });
            attachment
        };

        attachment.reload(true).await?;
        Ok(())
    }

    /// Tear down the current channel. Work still in flight for it completes
    /// without touching state.
    pub async fn detach(&self) {
        let mut current = self.inner.current.lock().await;
        let generation = self.next_generation();
        self.inner
            .state
            .send_modify(|s| *s = SyncSnapshot::detached(generation));

        if let Some(old) = current.take() {
            info!("Detaching from {}", old.attachment.binding.key());
            old.realtime.detach().await;
        }
    }

    /// Fetch the authoritative list again. Used to retry after a failure.
    pub async fn reload(&self) -> Result<(), SyncError> {
        let attachment = self.current_attachment().await?;
        attachment.reload(true).await?;
        Ok(())
    }

    /// Send `content` on the attached channel.
    ///
    /// On success the list holds the authoritative thread. On a transport
    /// failure the draft holds `content` again and a [`SendError`](crate::SendError) is returned.
    /// If the append went through but the thread could not be reloaded, the
    /// draft is restored too and [`SyncError::Unconfirmed`] is returned.
    ///
    /// The draft is only cleared when it holds `content`.
    pub async fn send(&self, content: &str, meta: SendMetadata) -> Result<SendOutcome, SyncError> {
        let attachment = self.current_attachment().await?;
        self.inner
            .pipeline
            .send(
                self.inner.transport.as_ref(),
                &attachment.binding,
                &self.inner.identity,
                &attachment,
                content,
                &meta,
            )
            .await
    }

    /// Send whatever is in the draft.
    pub async fn send_draft(&self, meta: SendMetadata) -> Result<SendOutcome, SyncError> {
        let content = self.draft();
        self.send(&content, meta).await
    }

    async fn current_attachment(&self) -> Result<Attachment, SyncError> {
        self.inner
            .current
            .lock()
            .await
            .as_ref()
            .map(|a| a.attachment.clone())
            .ok_or(SyncError::NotAttached)
    }

    fn next_generation(&self) -> u64 {
        self.inner.generations.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Writer handle for one attachment. Every write is checked against the
/// generation under the state lock, so a detached attachment cannot touch
/// the state that replaced it.
#[derive(Clone)]
struct Attachment {
    generation: u64,
    binding: ChannelBinding,
    transport: Arc<dyn Transport>,
    state: Arc<watch::Sender<SyncSnapshot>>,
    config: SyncConfig,
}

impl Attachment {
    fn is_current(&self) -> bool {
        self.state.borrow().generation == self.generation
    }

    /// Apply `f` if this attachment still owns the state. Returns whether it did.
    fn update(&self, f: impl FnOnce(&mut SyncSnapshot)) -> bool {
        let generation = self.generation;
        let applied = self.state.send_if_modified(|s| {
            if s.generation != generation {
                return false;
            }
            f(s);
            true
        });
        if !applied {
            debug!("Discarding stale update for {}", self.binding.key());
        }
        applied
    }

    async fn reload(&self, show_loading: bool) -> Result<(), TransportError> {
        if show_loading {
            self.update(|s| s.is_loading = true);
        }

        match loader::load(self.transport.as_ref(), &self.binding).await {
            Ok(snapshot) => {
                self.update(|s| {
                    s.messages = snapshot.messages;
                    s.is_loading = false;
                    s.last_error = None;
                });
                Ok(())
            }
            Err(e) => {
                warn!("Reload of {} failed: {}", self.binding.key(), e);
                let message = e.to_string();
                self.update(|s| {
                    s.is_loading = false;
                    s.last_error = Some(message);
                });
                Err(e)
            }
        }
    }

    /// Background reload; concurrent ones are not serialized, the last to
    /// resolve wins.
    fn spawn_reload(&self) {
        if !self.is_current() {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.reload(false).await;
        });
    }
}

impl RealtimeSink for Attachment {
    fn status_changed(&self, status: ConnectionStatus) {
        self.update(|s| s.status = status);
    }

    fn insert_notified(&self) {
        self.spawn_reload();
    }

    fn reconnected(&self) {
        if self.config.reload_on_reconnect {
            debug!("Reloading {} after reconnect", self.binding.key());
            self.spawn_reload();
        }
    }
}

impl PipelineState for Attachment {
    fn begin_send(&self, provisional: UnifiedMessage) {
        self.update(|s| {
            if s.draft == provisional.content {
                s.draft.clear();
            }
            s.messages.push(provisional);
            s.is_sending = true;
            s.last_error = None;
        });
    }

    fn complete_send(&self, authoritative: Vec<UnifiedMessage>) {
        self.update(|s| {
            s.messages = authoritative;
            s.is_sending = false;
        });
    }

    fn rollback_send(&self, provisional_id: &str, draft: &str, error: &TransportError) {
        self.update(|s| {
            s.messages.retain(|m| m.id != provisional_id);
            s.draft = draft.to_string();
            s.is_sending = false;
            s.last_error = Some(error.to_string());
        });
    }
}
