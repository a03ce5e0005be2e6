/// Database row types. These map directly to SQLite rows and are distinct
/// from civic-types models to keep the store independent.

pub struct ProfileRow {
    pub id: String,
    pub full_name: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: String,
}

/// Author columns joined from `profiles`; absent when the profile is missing.
pub struct AuthorJoin {
    pub full_name: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: String,
}

pub struct ComplaintMessageRow {
    pub id: String,
    pub complaint_id: String,
    pub sender_id: String,
    pub message: String,
    pub is_internal: bool,
    pub created_at: String,
    pub sender: Option<AuthorJoin>,
}

pub struct InternalNoteRow {
    pub id: String,
    pub complaint_id: String,
    pub staff_id: String,
    pub note: String,
    pub is_internal: bool,
    pub created_at: String,
    pub staff: Option<AuthorJoin>,
}

pub struct OfficialNoteRow {
    pub id: String,
    pub complaint_id: String,
    pub author_id: String,
    pub body: String,
    /// JSON array text.
    pub tags: String,
    pub visibility: String,
    pub created_at: String,
    pub author: Option<AuthorJoin>,
}

pub struct DirectMessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: String,
    pub sender: Option<AuthorJoin>,
}
