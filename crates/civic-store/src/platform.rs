use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use civic_sync::{
    Subscription, SubscriptionFilter, SubscriptionId, TableQuery, Transport, TransportError,
};
use civic_types::api::{
    DirectMessageInsert, InternalNoteInsert, ListMessagesParams, OfficialNoteInsert,
    PostMessageParams, RpcEnvelope,
};

use crate::Database;
use crate::notifier::{ChangeEvent, Notifier};
use crate::records;

pub const COMPLAINT_MESSAGES: &str = "complaint_messages";
pub const INTERNAL_NOTES: &str = "complaint_internal_notes";
pub const OFFICIAL_NOTES: &str = "official_notes";
pub const DIRECT_MESSAGES: &str = "direct_messages";

/// SQLite-backed stand-in for the hosted platform, seen from one signed-in
/// user's session. Sessions created with [`LocalPlatform::session`] share
/// the database and the change feed.
#[derive(Clone)]
pub struct LocalPlatform {
    db: Arc<Database>,
    notifier: Notifier,
    user_id: String,
}

impl LocalPlatform {
    pub fn new(db: Arc<Database>, user_id: impl Into<String>) -> Self {
        Self {
            db,
            notifier: Notifier::new(),
            user_id: user_id.into(),
        }
    }

    /// Another user's view of the same store.
    pub fn session(&self, user_id: impl Into<String>) -> Self {
        Self {
            db: self.db.clone(),
            notifier: self.notifier.clone(),
            user_id: user_id.into(),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Simulate losing or regaining the platform. While offline every read
    /// and write fails with a network error and subscriptions report closed.
    pub fn set_online(&self, online: bool) {
        if online {
            info!("Local platform back online");
        } else {
            warn!("Local platform offline");
        }
        self.notifier.set_online(online);
    }

    pub async fn live_subscriptions(&self) -> usize {
        self.notifier.live_count().await
    }

    fn ensure_online(&self) -> Result<(), TransportError> {
        if self.notifier.is_online() {
            Ok(())
        } else {
            Err(TransportError::Network("platform unreachable".into()))
        }
    }

    /// Run a store operation on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, TransportError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| TransportError::Network(format!("store task failed: {}", e)))?
            .map_err(|e| TransportError::Rejected(format!("{:#}", e)))
    }

    /// Row-level check: rows may only be written as the session user.
    fn check_author(&self, author_id: &str) -> Result<(), TransportError> {
        if author_id == self.user_id {
            Ok(())
        } else {
            Err(TransportError::Rejected(
                "new row violates row-level security policy".into(),
            ))
        }
    }

    async fn list_complaint_messages(&self, params: Value) -> RpcEnvelope {
        let params: ListMessagesParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return RpcEnvelope::failed(format!("invalid parameters: {}", e)),
        };
        let listed = self
            .blocking(move |db| db.get_complaint_messages(&params.channel_id))
            .await;
        match listed {
            Ok(rows) => RpcEnvelope::ok(Value::Array(
                rows.iter().map(records::complaint_message).collect(),
            )),
            Err(e) => RpcEnvelope::failed(e.to_string()),
        }
    }

    async fn post_complaint_message(&self, params: Value) -> RpcEnvelope {
        let params: PostMessageParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return RpcEnvelope::failed(format!("invalid parameters: {}", e)),
        };
        let content = params.content.trim().to_string();
        if content.is_empty() {
            return RpcEnvelope::failed("message content is required");
        }

        let id = Uuid::new_v4().to_string();
        let created_at = now();
        let sender_id = self.user_id.clone();
        let record = json!({
            "id": id,
            "complaint_id": params.channel_id,
            "sender_id": sender_id,
            "message": content,
            "is_internal": params.is_internal,
            "created_at": created_at,
        });

        let stored = self
            .blocking(move |db| {
                db.insert_complaint_message(
                    &id,
                    &params.channel_id,
                    &sender_id,
                    &content,
                    params.is_internal,
                    &created_at,
                )
            })
            .await;
        match stored {
            Ok(()) => {
                let id = record["id"].clone();
                self.notify(COMPLAINT_MESSAGES, record);
                RpcEnvelope::ok(json!({ "id": id }))
            }
            Err(e) => RpcEnvelope::failed(e.to_string()),
        }
    }

    fn notify(&self, table: &str, record: Value) {
        debug!("Insert on {} broadcast", table);
        self.notifier.broadcast(ChangeEvent::Inserted {
            table: table.to_string(),
            record,
        });
    }
}

#[async_trait]
impl Transport for LocalPlatform {
    async fn call(&self, procedure: &str, params: Value) -> Result<RpcEnvelope, TransportError> {
        self.ensure_online()?;
        match procedure {
            "get_complaint_messages" => Ok(self.list_complaint_messages(params).await),
            "post_complaint_message" => Ok(self.post_complaint_message(params).await),
            other => Ok(RpcEnvelope::failed(format!("unknown procedure: {}", other))),
        }
    }

    async fn select(&self, query: &TableQuery) -> Result<Vec<Value>, TransportError> {
        self.ensure_online()?;
        let expected = filter_column(&query.table)
            .ok_or_else(|| TransportError::Rejected(format!("unknown table: {}", query.table)))?;
        if query.filter_column != expected {
            return Err(TransportError::Rejected(format!(
                "{} cannot be filtered by {}",
                query.table, query.filter_column
            )));
        }

        let value = query.filter_value.clone();
        let rows: Vec<Value> = match query.table.as_str() {
            INTERNAL_NOTES => self
                .blocking(move |db| db.get_internal_notes(&value))
                .await?
                .iter()
                .map(records::internal_note)
                .collect(),
            OFFICIAL_NOTES => self
                .blocking(move |db| db.get_official_notes(&value))
                .await?
                .iter()
                .map(records::official_note)
                .collect(),
            DIRECT_MESSAGES => self
                .blocking(move |db| db.get_direct_messages(&value))
                .await?
                .iter()
                .map(records::direct_message)
                .collect(),
            _ => self
                .blocking(move |db| db.get_complaint_messages(&value))
                .await?
                .iter()
                .map(records::complaint_message)
                .collect(),
        };
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), TransportError> {
        self.ensure_online()?;
        let id = Uuid::new_v4().to_string();
        let created_at = now();

        let record = match table {
            INTERNAL_NOTES => {
                let row: InternalNoteInsert = decode(row)?;
                self.check_author(&row.staff_id)?;
                let record = json!({
                    "id": id,
                    "complaint_id": row.complaint_id,
                    "staff_id": row.staff_id,
                    "note": row.note,
                    "is_internal": row.is_internal,
                    "created_at": created_at,
                });
                self.blocking(move |db| {
                    db.insert_internal_note(
                        &id,
                        &row.complaint_id,
                        &row.staff_id,
                        &row.note,
                        row.is_internal,
                        &created_at,
                    )
                })
                .await?;
                record
            }
            OFFICIAL_NOTES => {
                let row: OfficialNoteInsert = decode(row)?;
                self.check_author(&row.author_id)?;
                let record = json!({
                    "id": id,
                    "complaint_id": row.complaint_id,
                    "author_id": row.author_id,
                    "body": row.body,
                    "tags": row.tags,
                    "visibility": row.visibility,
                    "created_at": created_at,
                });
                self.blocking(move |db| {
                    db.insert_official_note(
                        &id,
                        &row.complaint_id,
                        &row.author_id,
                        &row.body,
                        &row.tags,
                        row.visibility.as_str(),
                        &created_at,
                    )
                })
                .await?;
                record
            }
            DIRECT_MESSAGES => {
                let row: DirectMessageInsert = decode(row)?;
                self.check_author(&row.sender_id)?;
                let record = json!({
                    "id": id,
                    "conversation_id": row.conversation_id,
                    "sender_id": row.sender_id,
                    "content": row.content,
                    "created_at": created_at,
                });
                self.blocking(move |db| {
                    db.insert_direct_message(
                        &id,
                        &row.conversation_id,
                        &row.sender_id,
                        &row.content,
                        &created_at,
                    )
                })
                .await?;
                record
            }
            other => {
                return Err(TransportError::Rejected(format!(
                    "table {} is not writable",
                    other
                )));
            }
        };

        self.notify(table, record);
        Ok(())
    }

    async fn subscribe(&self, filter: SubscriptionFilter) -> Result<Subscription, TransportError> {
        if filter_column(&filter.table).is_none() {
            return Err(TransportError::Rejected(format!("unknown table: {}", filter.table)));
        }
        let sub = self.notifier.open(filter).await;
        debug!("Opened {}", sub.id);
        Ok(sub)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
        if !self.notifier.close(id).await {
            debug!("{} already closed", id);
        }
        Ok(())
    }
}

fn filter_column(table: &str) -> Option<&'static str> {
    match table {
        COMPLAINT_MESSAGES | INTERNAL_NOTES | OFFICIAL_NOTES => Some("complaint_id"),
        DIRECT_MESSAGES => Some("conversation_id"),
        _ => None,
    }
}

fn decode<T: DeserializeOwned>(row: Value) -> Result<T, TransportError> {
    serde_json::from_value(row).map_err(|e| TransportError::Rejected(format!("invalid row: {}", e)))
}

/// Microsecond precision keeps rapid appends distinct in sort order.
fn now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProfileRow;

    fn platform() -> LocalPlatform {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.upsert_profile(&ProfileRow {
            id: "s1".into(),
            full_name: "Sam Staff".into(),
            display_name: None,
            avatar_url: None,
            role: "staff".into(),
        })
        .unwrap();
        LocalPlatform::new(db, "s1")
    }

    #[tokio::test]
    async fn post_then_list_through_procedures() {
        let platform = platform();
        let posted = platform
            .call(
                "post_complaint_message",
                json!({ "channelId": "C-1", "content": " On our way ", "isInternal": false }),
            )
            .await
            .unwrap();
        assert!(posted.success);

        let listed = platform
            .call("get_complaint_messages", json!({ "channelId": "C-1" }))
            .await
            .unwrap();
        let rows = listed.data.unwrap();
        assert_eq!(rows[0]["message"], "On our way");
        assert_eq!(rows[0]["sender_name"], "Sam Staff");
    }

    #[tokio::test]
    async fn procedure_failures_come_back_in_the_envelope() {
        let platform = platform();
        let blank = platform
            .call(
                "post_complaint_message",
                json!({ "channelId": "C-1", "content": "  ", "isInternal": false }),
            )
            .await
            .unwrap();
        assert!(!blank.success);

        let unknown = platform.call("drop_tables", json!({})).await.unwrap();
        assert_eq!(unknown.error.as_deref(), Some("unknown procedure: drop_tables"));
    }

    #[tokio::test]
    async fn insert_as_someone_else_is_rejected() {
        let platform = platform();
        let err = platform
            .insert(
                DIRECT_MESSAGES,
                json!({ "conversation_id": "D-1", "sender_id": "u9", "content": "hi" }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Rejected(_)));
    }

    #[tokio::test]
    async fn select_checks_the_filter_column() {
        let platform = platform();
        let query = TableQuery {
            table: DIRECT_MESSAGES.into(),
            select: "*".into(),
            filter_column: "complaint_id".into(),
            filter_value: "D-1".into(),
            order_column: "created_at".into(),
        };
        assert!(matches!(
            platform.select(&query).await,
            Err(TransportError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn offline_platform_fails_with_network_errors() {
        let platform = platform();
        platform.set_online(false);
        let err = platform
            .call("get_complaint_messages", json!({ "channelId": "C-1" }))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));

        platform.set_online(true);
        assert!(
            platform
                .call("get_complaint_messages", json!({ "channelId": "C-1" }))
                .await
                .unwrap()
                .success
        );
    }

    #[tokio::test]
    async fn sessions_share_the_change_feed() {
        let staff = platform();
        let citizen = staff.session("u1");
        let mut sub = citizen
            .subscribe(SubscriptionFilter {
                table: INTERNAL_NOTES.into(),
                column: "complaint_id".into(),
                value: "C-1".into(),
            })
            .await
            .unwrap();

        staff
            .insert(
                INTERNAL_NOTES,
                json!({ "complaint_id": "C-1", "staff_id": "s1", "note": "checked", "is_internal": true }),
            )
            .await
            .unwrap();

        let mut saw_insert = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(500), sub.events.recv()).await
        {
            if let civic_sync::SubscriptionEvent::Insert { record, .. } = event {
                assert_eq!(record.unwrap()["note"], "checked");
                saw_insert = true;
                break;
            }
        }
        assert!(saw_insert);
    }
}
