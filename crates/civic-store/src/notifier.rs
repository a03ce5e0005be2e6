use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use civic_sync::{Subscription, SubscriptionEvent, SubscriptionFilter, SubscriptionId};

/// Store-wide change feed entry.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Inserted { table: String, record: Value },
    Outage,
    Restored,
}

/// Fans store changes out to filtered subscriptions.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    /// Every subscription task listens here and filters for itself
    broadcast_tx: broadcast::Sender<ChangeEvent>,

    online: AtomicBool,

    next_id: AtomicU64,

    /// Live subscriptions: id -> forwarding task
    subscriptions: RwLock<HashMap<u64, JoinHandle<()>>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(NotifierInner {
                broadcast_tx,
                online: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                subscriptions: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn broadcast(&self, event: ChangeEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Flip the realtime link. Subscribers see `Closed` on outage and
    /// `Reconnecting` then `Established` on restore.
    pub fn set_online(&self, online: bool) {
        let was = self.inner.online.swap(online, Ordering::SeqCst);
        if was == online {
            return;
        }
        debug!("Realtime link {}", if online { "restored" } else { "lost" });
        self.broadcast(if online {
            ChangeEvent::Restored
        } else {
            ChangeEvent::Outage
        });
    }

    /// Open a filtered subscription. While online it is established at once.
    pub async fn open(&self, filter: SubscriptionFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        // Subscribe before spawning so nothing broadcast after open is missed
        let changes = self.inner.broadcast_tx.subscribe();
        if self.is_online() {
            let _ = tx.send(SubscriptionEvent::Established);
        }

        let task = tokio::spawn(forward(id, filter, changes, tx));
        self.inner.subscriptions.write().await.insert(id, task);

        Subscription {
            id: SubscriptionId(id),
            events: rx,
        }
    }

    /// Close a subscription. Returns false if it was not open.
    pub async fn close(&self, id: SubscriptionId) -> bool {
        match self.inner.subscriptions.write().await.remove(&id.0) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub async fn live_count(&self) -> usize {
        self.inner.subscriptions.read().await.len()
    }
}

async fn forward(
    id: u64,
    filter: SubscriptionFilter,
    mut changes: broadcast::Receiver<ChangeEvent>,
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
) {
    loop {
        let events = match changes.recv().await {
            Ok(ChangeEvent::Inserted { table, record }) => {
                if table != filter.table || !column_equals(&record, &filter.column, &filter.value) {
                    continue;
                }
                vec![SubscriptionEvent::Insert {
                    table,
                    record: Some(record),
                }]
            }
            Ok(ChangeEvent::Outage) => vec![SubscriptionEvent::Closed {
                reason: Some("realtime link lost".into()),
            }],
            Ok(ChangeEvent::Restored) => {
                vec![SubscriptionEvent::Reconnecting, SubscriptionEvent::Established]
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                // Missed inserts: cycle the link so the consumer refetches
                warn!("Subscription {} lagged by {} changes", id, n);
                vec![
                    SubscriptionEvent::Closed {
                        reason: Some(format!("lagged by {} changes", n)),
                    },
                    SubscriptionEvent::Established,
                ]
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        for event in events {
            if tx.send(event).is_err() {
                debug!("Subscription {} receiver dropped", id);
                return;
            }
        }
    }
}

fn column_equals(record: &Value, column: &str, expected: &str) -> bool {
    match record.get(column) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Number(n)) => n.to_string() == expected,
        _ => false,
    }
}
