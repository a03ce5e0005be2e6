use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id              TEXT PRIMARY KEY,
            full_name       TEXT NOT NULL,
            display_name    TEXT,
            avatar_url      TEXT,
            role            TEXT NOT NULL DEFAULT 'citizen'
        );

        CREATE TABLE IF NOT EXISTS complaint_messages (
            id              TEXT PRIMARY KEY,
            complaint_id    TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            message         TEXT NOT NULL,
            is_internal     INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_complaint_messages_complaint
            ON complaint_messages(complaint_id, created_at);

        CREATE TABLE IF NOT EXISTS complaint_internal_notes (
            id              TEXT PRIMARY KEY,
            complaint_id    TEXT NOT NULL,
            staff_id        TEXT NOT NULL,
            note            TEXT NOT NULL,
            is_internal     INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_internal_notes_complaint
            ON complaint_internal_notes(complaint_id, created_at);

        CREATE TABLE IF NOT EXISTS official_notes (
            id              TEXT PRIMARY KEY,
            complaint_id    TEXT NOT NULL,
            author_id       TEXT NOT NULL,
            body            TEXT NOT NULL,
            tags            TEXT NOT NULL DEFAULT '[]',
            visibility      TEXT NOT NULL DEFAULT 'staff',
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_official_notes_complaint
            ON official_notes(complaint_id, created_at);

        CREATE TABLE IF NOT EXISTS direct_messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            content         TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_direct_messages_conversation
            ON direct_messages(conversation_id, created_at);

        -- Author of automated notices
        INSERT OR IGNORE INTO profiles (id, full_name, display_name, role)
            VALUES ('00000000-0000-0000-0000-000000000001', 'City Services', 'City Services', 'system');
        ",
    )?;

    info!("Message store migrations complete");
    Ok(())
}
