//! Row to JSON conversion, in the shapes the hosted platform returns.
//!
//! Table reads embed the joined profile as a nested object named after the
//! foreign key (`sender`, `staff`, `author`). The complaint procedure returns
//! flat `sender_*` columns instead.

use serde_json::{Map, Value, json};

use crate::models::{
    AuthorJoin, ComplaintMessageRow, DirectMessageRow, InternalNoteRow, OfficialNoteRow,
};

fn author_object(author: &Option<AuthorJoin>) -> Value {
    match author {
        Some(a) => json!({
            "full_name": a.full_name,
            "display_name": a.display_name,
            "avatar_url": a.avatar_url,
            "role": a.role,
        }),
        None => Value::Null,
    }
}

/// Procedure result row for the public complaint thread.
pub fn complaint_message(row: &ComplaintMessageRow) -> Value {
    let mut record = Map::new();
    record.insert("id".into(), json!(row.id));
    record.insert("complaint_id".into(), json!(row.complaint_id));
    record.insert("sender_id".into(), json!(row.sender_id));
    record.insert("message".into(), json!(row.message));
    record.insert("is_internal".into(), json!(row.is_internal));
    record.insert("created_at".into(), json!(row.created_at));
    if let Some(sender) = &row.sender {
        record.insert("sender_name".into(), json!(sender.full_name));
        record.insert("sender_role".into(), json!(sender.role));
        record.insert("sender_avatar".into(), json!(sender.avatar_url));
    }
    Value::Object(record)
}

pub fn internal_note(row: &InternalNoteRow) -> Value {
    json!({
        "id": row.id,
        "complaint_id": row.complaint_id,
        "staff_id": row.staff_id,
        "note": row.note,
        "is_internal": row.is_internal,
        "created_at": row.created_at,
        "staff": author_object(&row.staff),
    })
}

pub fn official_note(row: &OfficialNoteRow) -> Value {
    // Corrupt tag text degrades to an empty list rather than failing the read.
    let tags: Value = serde_json::from_str(&row.tags).unwrap_or_else(|_| json!([]));
    json!({
        "id": row.id,
        "complaint_id": row.complaint_id,
        "author_id": row.author_id,
        "body": row.body,
        "tags": tags,
        "visibility": row.visibility,
        "created_at": row.created_at,
        "author": author_object(&row.author),
    })
}

pub fn direct_message(row: &DirectMessageRow) -> Value {
    json!({
        "id": row.id,
        "conversation_id": row.conversation_id,
        "sender_id": row.sender_id,
        "content": row.content,
        "created_at": row.created_at,
        "sender": author_object(&row.sender),
    })
}
