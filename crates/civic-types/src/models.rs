use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four chat-like surfaces of the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    /// Citizen-facing complaint thread.
    ComplaintPublic,
    /// Staff-only notes attached to a complaint.
    ComplaintInternal,
    /// Supervisor notes with tags and visibility.
    OfficialNote,
    /// Staff-to-staff conversation.
    DirectMessage,
}

impl ChannelType {
    pub const ALL: [ChannelType; 4] = [
        ChannelType::ComplaintPublic,
        ChannelType::ComplaintInternal,
        ChannelType::OfficialNote,
        ChannelType::DirectMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ComplaintPublic => "COMPLAINT_PUBLIC",
            Self::ComplaintInternal => "COMPLAINT_INTERNAL",
            Self::OfficialNote => "OFFICIAL_NOTE",
            Self::DirectMessage => "DIRECT_MESSAGE",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown channel type '{0}'")]
pub struct UnknownChannelType(pub String);

impl FromStr for ChannelType {
    type Err = UnknownChannelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| UnknownChannelType(s.to_string()))
    }
}

/// A (type, id) pair naming one logical thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub channel_type: ChannelType,
    pub channel_id: String,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_type, self.channel_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    Citizen,
    Staff,
    Supervisor,
    System,
}

impl AuthorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Citizen => "citizen",
            Self::Staff => "staff",
            Self::Supervisor => "supervisor",
            Self::System => "system",
        }
    }

    /// Lenient parse used on remote records. Platform role names that map onto
    /// a display role are folded in.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "citizen" | "resident" => Some(Self::Citizen),
            "staff" | "employee" | "officer" => Some(Self::Staff),
            "supervisor" | "manager" | "admin" => Some(Self::Supervisor),
            "system" | "bot" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for AuthorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may read an official note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Staff,
    Supervisors,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Staff => "staff",
            Self::Supervisors => "supervisors",
        }
    }

    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Some(Self::Public),
            "staff" | "internal" => Some(Self::Staff),
            "supervisors" | "supervisor" | "private" => Some(Self::Supervisors),
            _ => None,
        }
    }
}

/// Canonical message shown by every surface. Output only: this layer never
/// persists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedMessage {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author_id: String,
    pub author_name: String,
    pub author_role: AuthorRole,
    pub author_avatar: Option<String>,
    pub is_internal: bool,
    pub tags: Option<Vec<String>>,
    pub visibility: Option<Visibility>,
    pub is_optimistic: bool,
}

/// The signed-in user as seen by the sync layer. Authentication itself lives
/// elsewhere; this is only what a provisional entry needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub role: AuthorRole,
    pub avatar: Option<String>,
}
