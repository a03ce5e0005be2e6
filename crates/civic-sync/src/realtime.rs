//! Push subscription per attached channel.
//!
//! The manager only mirrors what the transport reports; reconnecting is the
//! transport's job. Every insert notification is turned into a full reload.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::binding::ChannelBinding;
use crate::transport::{SubscriptionEvent, SubscriptionFilter, SubscriptionId, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    /// Terminal: the channel was detached.
    TornDown,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::TornDown => "torn_down",
        })
    }
}

/// Receives what the subscription observes.
pub trait RealtimeSink: Send + Sync + 'static {
    fn status_changed(&self, status: ConnectionStatus);

    /// Something was inserted into the bound table/filter.
    fn insert_notified(&self);

    /// The subscription came back after having been disconnected.
    fn reconnected(&self) {}
}

struct Shared {
    status: Mutex<ConnectionStatus>,
    torn_down: AtomicBool,
    sink: Arc<dyn RealtimeSink>,
}

impl Shared {
    /// Returns the previous status.
    fn set_status(&self, status: ConnectionStatus) -> ConnectionStatus {
        let previous = {
            let mut current = match self.status.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *current, status)
        };
        if previous != status {
            self.sink.status_changed(status);
        }
        previous
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

/// One live subscription, ended with [`RealtimeSubscription::detach`].
/// Dropping it inside a runtime unsubscribes on a background task.
pub struct RealtimeSubscription {
    transport: Arc<dyn Transport>,
    filter: SubscriptionFilter,
    id: Option<SubscriptionId>,
    pump: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl RealtimeSubscription {
    /// Open the push subscription for `binding`, starting in `connecting`.
    /// A subscribe failure leaves the subscription `disconnected`.
    pub async fn attach(
        transport: Arc<dyn Transport>,
        binding: &ChannelBinding,
        sink: Arc<dyn RealtimeSink>,
    ) -> Self {
        let filter = binding.subscription_filter();
        let shared = Arc::new(Shared {
            status: Mutex::new(ConnectionStatus::Connecting),
            torn_down: AtomicBool::new(false),
            sink,
        });
        shared.sink.status_changed(ConnectionStatus::Connecting);

        let (id, pump) = match transport.subscribe(filter.clone()).await {
            Ok(sub) => {
                info!("Subscribed to {} as {}", filter.topic(), sub.id);
                let pump = tokio::spawn(run_event_pump(sub.events, filter.clone(), shared.clone()));
                (Some(sub.id), Some(pump))
            }
            Err(e) => {
                warn!("Could not subscribe to {}: {}", filter.topic(), e);
                shared.set_status(ConnectionStatus::Disconnected);
                (None, None)
            }
        };

        Self {
            transport,
            filter,
            id,
            pump,
            shared,
        }
    }

    /// Unsubscribe and enter the terminal state. Events already queued are
    /// discarded.
    pub async fn detach(mut self) {
        self.shared.torn_down.store(true, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(id) = self.id.take() {
            if let Err(e) = self.transport.unsubscribe(id).await {
                warn!("Unsubscribe {} from {} failed: {}", id, self.filter.topic(), e);
            }
        }
        self.shared.set_status(ConnectionStatus::TornDown);
        debug!("Realtime subscription on {} torn down", self.filter.topic());
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.shared.torn_down.store(true, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        let Some(id) = self.id.take() else {
            return;
        };
        let topic = self.filter.topic();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Realtime subscription {} on {} dropped, unsubscribing", id, topic);
                let transport = self.transport.clone();
                handle.spawn(async move {
                    if let Err(e) = transport.unsubscribe(id).await {
                        warn!("Unsubscribe {} from {} failed: {}", id, topic, e);
                    }
                });
            }
            Err(_) => warn!("Realtime subscription {} on {} dropped outside a runtime", id, topic),
        }
    }
}

async fn run_event_pump(
    mut events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    filter: SubscriptionFilter,
    shared: Arc<Shared>,
) {
    let mut was_disconnected = false;

    while let Some(event) = events.recv().await {
        if shared.is_torn_down() {
            break;
        }

        match event {
            SubscriptionEvent::Reconnecting => {
                shared.set_status(ConnectionStatus::Connecting);
            }
            SubscriptionEvent::Established => {
                shared.set_status(ConnectionStatus::Connected);
                if was_disconnected {
                    was_disconnected = false;
                    info!("Realtime on {} re-established", filter.topic());
                    shared.sink.reconnected();
                }
            }
            SubscriptionEvent::Closed { reason } => {
                warn!(
                    "Realtime on {} disconnected: {}",
                    filter.topic(),
                    reason.as_deref().unwrap_or("no reason given")
                );
                was_disconnected = true;
                shared.set_status(ConnectionStatus::Disconnected);
            }
            SubscriptionEvent::Insert { table, record } => {
                if table != filter.table || !record_matches(&filter, record.as_ref()) {
                    trace!("Ignoring insert on {} outside {}", table, filter.topic());
                    continue;
                }
                debug!("Insert notified on {}", filter.topic());
                shared.sink.insert_notified();
            }
        }
    }

    debug!("Realtime event stream for {} ended", filter.topic());
}

/// A payload that names a different filter value is not ours. A missing or
/// partial payload still counts: it only has to say that something changed.
fn record_matches(filter: &SubscriptionFilter, record: Option<&Value>) -> bool {
    let Some(value) = record.and_then(|r| r.get(&filter.column)) else {
        return true;
    };
    match value {
        Value::String(s) => *s == filter.value,
        Value::Number(n) => n.to_string() == filter.value,
        _ => true,
    }
}
