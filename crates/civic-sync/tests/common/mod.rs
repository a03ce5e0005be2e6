//! Scripted in-memory transport for engine tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};

use civic_sync::{
    Subscription, SubscriptionEvent, SubscriptionFilter, SubscriptionId, SyncSnapshot, TableQuery,
    Transport, TransportError,
};
use civic_types::api::RpcEnvelope;
use civic_types::models::{AuthorRole, Identity};

pub const AUTHOR_ID: &str = "u1";

pub fn identity() -> Identity {
    Identity {
        user_id: AUTHOR_ID.into(),
        display_name: "Uma Citizen".into(),
        role: AuthorRole::Citizen,
        avatar: None,
    }
}

/// Timestamp `n` seconds after a fixed origin, as the stores would send it.
pub fn ts(n: u64) -> String {
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    (base + chrono::Duration::seconds(n as i64)).to_rfc3339()
}

#[derive(Default)]
pub struct ScriptedTransport {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    next_id: AtomicU64,
    next_sub: AtomicU64,
    subs: Mutex<HashMap<u64, (SubscriptionFilter, mpsc::UnboundedSender<SubscriptionEvent>)>>,
    pub unsubscribed: Mutex<Vec<SubscriptionId>>,
    pub log: Mutex<Vec<String>>,
    fail_reads: Mutex<Option<TransportError>>,
    reject_reads: Mutex<Option<String>>,
    fail_next_write: Mutex<Option<TransportError>>,
    reject_next_write: Mutex<Option<String>>,
    read_delays: Mutex<VecDeque<Duration>>,
    write_hold: Mutex<Option<oneshot::Receiver<()>>>,
    auto_notify: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, table: &str, row: Value) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn writes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("insert:") || c.starts_with("call:post_"))
            .count()
    }

    pub fn reads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("select:") || c.starts_with("call:get_"))
            .count()
    }

    pub fn fail_reads(&self, error: Option<TransportError>) {
        *self.fail_reads.lock().unwrap() = error;
    }

    pub fn reject_reads(&self, reason: Option<&str>) {
        *self.reject_reads.lock().unwrap() = reason.map(str::to_string);
    }

    pub fn fail_next_write(&self, error: TransportError) {
        *self.fail_next_write.lock().unwrap() = Some(error);
    }

    /// Answer the next procedure write with `success: false`.
    pub fn reject_next_write(&self, reason: &str) {
        *self.reject_next_write.lock().unwrap() = Some(reason.to_string());
    }

    /// Delay the next read by `delay`.
    pub fn delay_next_read(&self, delay: Duration) {
        self.read_delays.lock().unwrap().push_back(delay);
    }

    /// Park the next write until the returned sender fires.
    pub fn hold_next_write(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.write_hold.lock().unwrap() = Some(rx);
        tx
    }

    pub fn set_auto_notify(&self, on: bool) {
        self.auto_notify.store(on, Ordering::SeqCst);
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subs.lock().unwrap().len()
    }

    /// Deliver `event` to every live subscription.
    pub fn emit(&self, event: SubscriptionEvent) {
        for (_, tx) in self.subs.lock().unwrap().values() {
            let _ = tx.send(event.clone());
        }
    }

    /// Store a row and notify subscribers of its table.
    pub fn push_insert(&self, table: &str, row: Value) {
        self.seed(table, row.clone());
        self.emit(SubscriptionEvent::Insert {
            table: table.to_string(),
            record: Some(row),
        });
    }

    fn rows(&self, table: &str, column: &str, value: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.get(column).and_then(Value::as_str) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn before_read(&self) -> Result<(), TransportError> {
        let delay = self.read_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.fail_reads.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn before_write(&self) -> Result<(), TransportError> {
        let hold = self.write_hold.lock().unwrap().take();
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        match self.fail_next_write.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn store_write(&self, table: &str, mut row: Value) {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        if let Value::Object(map) = &mut row {
            map.insert("id".into(), json!(format!("m{}", n)));
            map.insert("created_at".into(), json!(ts(n)));
        }
        if self.auto_notify.load(Ordering::SeqCst) {
            self.push_insert(table, row);
        } else {
            self.seed(table, row);
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(&self, procedure: &str, params: Value) -> Result<RpcEnvelope, TransportError> {
        self.log.lock().unwrap().push(format!("call:{}", procedure));
        let channel_id = params["channelId"].as_str().unwrap_or_default().to_string();

        match procedure {
            "get_complaint_messages" => {
                self.before_read().await?;
                if let Some(reason) = self.reject_reads.lock().unwrap().clone() {
                    return Ok(RpcEnvelope::failed(reason));
                }
                let rows = self.rows("complaint_messages", "complaint_id", &channel_id);
                Ok(RpcEnvelope::ok(Value::Array(rows)))
            }
            "post_complaint_message" => {
                self.before_write().await?;
                if let Some(reason) = self.reject_next_write.lock().unwrap().take() {
                    return Ok(RpcEnvelope::failed(reason));
                }
                self.store_write(
                    "complaint_messages",
                    json!({
                        "complaint_id": channel_id,
                        "message": params["content"],
                        "is_internal": params["isInternal"],
                        "sender_id": AUTHOR_ID,
                        "sender": { "full_name": "Uma Citizen", "role": "citizen" },
                    }),
                );
                Ok(RpcEnvelope::ok(json!({ "ok": true })))
            }
            other => Ok(RpcEnvelope::failed(format!("no procedure {}", other))),
        }
    }

    async fn select(&self, query: &TableQuery) -> Result<Vec<Value>, TransportError> {
        self.log.lock().unwrap().push(format!("select:{}", query.table));
        self.before_read().await?;
        Ok(self.rows(&query.table, &query.filter_column, &query.filter_value))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), TransportError> {
        self.log.lock().unwrap().push(format!("insert:{}", table));
        self.before_write().await?;
        self.store_write(table, row);
        Ok(())
    }

    async fn subscribe(&self, filter: SubscriptionFilter) -> Result<Subscription, TransportError> {
        let id = self.next_sub.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subs.lock().unwrap().insert(id, (filter, tx));
        Ok(Subscription {
            id: SubscriptionId(id),
            events: rx,
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
        self.subs.lock().unwrap().remove(&id.0);
        self.unsubscribed.lock().unwrap().push(id);
        Ok(())
    }
}

/// Wait until `pred` holds for the published snapshot, failing after a second.
pub async fn wait_until(
    rx: &mut watch::Receiver<SyncSnapshot>,
    pred: impl Fn(&SyncSnapshot) -> bool,
) -> SyncSnapshot {
    let waited = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if pred(&snapshot) {
                    return snapshot.clone();
                }
            }
            if rx.changed().await.is_err() {
                panic!("engine dropped while waiting");
            }
        }
    })
    .await;
    waited.expect("condition not reached within 1s")
}
