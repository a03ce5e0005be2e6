//! Raw backing-store records to [`UnifiedMessage`].
//!
//! Each store joins author identity at a different depth, so every shape
//! carries an ordered list of field paths per field. The first path that
//! yields a non-blank value wins.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use civic_types::models::{AuthorRole, UnifiedMessage, Visibility};

use crate::error::MalformedRecordError;

/// Display name used when no identity path resolves.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

type FieldPath = &'static [&'static str];

/// Record shapes of the four backing stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageShape {
    /// `complaint_messages`, read through the complaint procedures.
    ComplaintMessage,
    /// `complaint_internal_notes`.
    InternalNote,
    /// `official_notes`, carries tags and visibility.
    OfficialNote,
    /// `direct_messages`.
    DirectMessage,
}

#[derive(Debug, Clone, Copy)]
enum InternalRule {
    /// Read a boolean; absent means the default.
    Field(&'static [FieldPath], bool),
    /// Every record in the store is staff-only.
    Always,
    /// Internal unless visibility is public.
    FromVisibility,
}

struct ShapeFields {
    id: &'static [FieldPath],
    content: &'static [FieldPath],
    created_at: &'static [FieldPath],
    author_id: &'static [FieldPath],
    author_name: &'static [FieldPath],
    author_avatar: &'static [FieldPath],
    author_role: &'static [FieldPath],
    default_role: AuthorRole,
    internal: InternalRule,
    note_metadata: bool,
}

const ID: &[FieldPath] = &[&["id"], &["message_id"]];
const CREATED_AT: &[FieldPath] = &[&["created_at"], &["inserted_at"]];

const COMPLAINT_MESSAGE: ShapeFields = ShapeFields {
    id: ID,
    content: &[&["message"], &["content"]],
    created_at: CREATED_AT,
    author_id: &[&["sender_id"], &["sender", "id"], &["user_id"]],
    author_name: &[
        &["sender", "full_name"],
        &["sender", "profile", "full_name"],
        &["sender_name"],
        &["profiles", "full_name"],
    ],
    author_avatar: &[&["sender", "avatar_url"], &["sender_avatar"]],
    author_role: &[&["sender_role"], &["sender", "role"]],
    default_role: AuthorRole::Citizen,
    internal: InternalRule::Field(&[&["is_internal"]], false),
    note_metadata: false,
};

const INTERNAL_NOTE: ShapeFields = ShapeFields {
    id: ID,
    content: &[&["note"], &["content"]],
    created_at: CREATED_AT,
    author_id: &[&["staff_id"], &["staff", "id"]],
    author_name: &[
        &["staff", "full_name"],
        &["staff", "profile", "full_name"],
        &["staff_name"],
    ],
    author_avatar: &[&["staff", "avatar_url"], &["staff", "profile", "avatar_url"]],
    author_role: &[&["staff", "role"]],
    default_role: AuthorRole::Staff,
    internal: InternalRule::Always,
    note_metadata: false,
};

const OFFICIAL_NOTE: ShapeFields = ShapeFields {
    id: ID,
    content: &[&["body"], &["content"], &["note"]],
    created_at: CREATED_AT,
    author_id: &[&["author_id"], &["author", "id"]],
    author_name: &[
        &["author", "full_name"],
        &["author", "profile", "full_name"],
        &["author_name"],
    ],
    author_avatar: &[&["author", "avatar_url"], &["author", "profile", "avatar_url"]],
    author_role: &[&["author", "role"], &["author_role"]],
    default_role: AuthorRole::Supervisor,
    internal: InternalRule::FromVisibility,
    note_metadata: true,
};

const DIRECT_MESSAGE: ShapeFields = ShapeFields {
    id: ID,
    content: &[&["content"], &["message"]],
    created_at: CREATED_AT,
    author_id: &[&["sender_id"], &["sender", "id"]],
    author_name: &[
        &["sender", "display_name"],
        &["sender", "full_name"],
        &["sender_name"],
    ],
    author_avatar: &[&["sender", "avatar_url"]],
    author_role: &[&["sender", "role"]],
    default_role: AuthorRole::Staff,
    internal: InternalRule::Always,
    note_metadata: false,
};

impl MessageShape {
    fn fields(&self) -> &'static ShapeFields {
        match self {
            Self::ComplaintMessage => &COMPLAINT_MESSAGE,
            Self::InternalNote => &INTERNAL_NOTE,
            Self::OfficialNote => &OFFICIAL_NOTE,
            Self::DirectMessage => &DIRECT_MESSAGE,
        }
    }

    pub fn normalize(&self, raw: &Value) -> Result<UnifiedMessage, MalformedRecordError> {
        normalize_with(self.fields(), raw)
    }
}

pub fn normalize_complaint_message(raw: &Value) -> Result<UnifiedMessage, MalformedRecordError> {
    MessageShape::ComplaintMessage.normalize(raw)
}

pub fn normalize_internal_note(raw: &Value) -> Result<UnifiedMessage, MalformedRecordError> {
    MessageShape::InternalNote.normalize(raw)
}

pub fn normalize_official_note(raw: &Value) -> Result<UnifiedMessage, MalformedRecordError> {
    MessageShape::OfficialNote.normalize(raw)
}

pub fn normalize_direct_message(raw: &Value) -> Result<UnifiedMessage, MalformedRecordError> {
    MessageShape::DirectMessage.normalize(raw)
}

fn normalize_with(fields: &ShapeFields, raw: &Value) -> Result<UnifiedMessage, MalformedRecordError> {
    if !raw.is_object() {
        return Err(MalformedRecordError::new(None, "record is not an object"));
    }

    let id = first_text(raw, fields.id)
        .ok_or_else(|| MalformedRecordError::new(None, "missing id"))?;

    let content = first_text(raw, fields.content)
        .ok_or_else(|| MalformedRecordError::new(Some(id.clone()), "missing or empty content"))?;

    let created_raw = first_text(raw, fields.created_at)
        .ok_or_else(|| MalformedRecordError::new(Some(id.clone()), "missing created_at"))?;
    let created_at = parse_timestamp(&created_raw).ok_or_else(|| {
        MalformedRecordError::new(
            Some(id.clone()),
            format!("unparseable created_at '{}'", created_raw),
        )
    })?;

    let author_role = first_text(raw, fields.author_role)
        .and_then(|r| AuthorRole::parse_lenient(&r))
        .unwrap_or(fields.default_role);

    let (tags, visibility) = if fields.note_metadata {
        (
            Some(read_tags(raw.get("tags"))),
            raw.get("visibility")
                .and_then(Value::as_str)
                .and_then(Visibility::parse_lenient),
        )
    } else {
        (None, None)
    };

    let is_internal = match fields.internal {
        InternalRule::Field(paths, default) => first_bool(raw, paths).unwrap_or(default),
        InternalRule::Always => true,
        InternalRule::FromVisibility => visibility != Some(Visibility::Public),
    };

    Ok(UnifiedMessage {
        id,
        content,
        created_at,
        author_id: first_text(raw, fields.author_id).unwrap_or_default(),
        author_name: first_text(raw, fields.author_name)
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        author_role,
        author_avatar: first_text(raw, fields.author_avatar),
        is_internal,
        tags,
        visibility,
        is_optimistic: false,
    })
}

/// Follow a path through nested objects. A joined relation delivered as an
/// array is read through its first element.
fn lookup<'a>(raw: &'a Value, path: FieldPath) -> Option<&'a Value> {
    let mut current = raw;
    for key in path {
        if let Value::Array(items) = current {
            current = items.first()?;
        }
        current = current.get(key)?;
    }
    match current {
        Value::Array(items) => items.first(),
        other => Some(other),
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_text(raw: &Value, paths: &[FieldPath]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| lookup(raw, *path).and_then(as_text))
}

fn first_bool(raw: &Value, paths: &[FieldPath]) -> Option<bool> {
    paths.iter().find_map(|path| match lookup(raw, *path)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.as_str() {
            "true" | "t" | "1" => Some(true),
            "false" | "f" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Tags arrive as a JSON array, or as a comma-separated string from stores
/// without array columns.
fn read_tags(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(s) {
                return read_tags(Some(&Value::Array(items)));
            }
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        }
        _ => Vec::new(),
    }
}

/// RFC 3339, or the SQL `YYYY-MM-DD HH:MM:SS[.fff]` form read as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|ndt| ndt.and_utc())
}
