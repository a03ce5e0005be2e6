use crate::Database;
use crate::models::{
    AuthorJoin, ComplaintMessageRow, DirectMessageRow, InternalNoteRow, OfficialNoteRow, ProfileRow,
};
use anyhow::Result;
use rusqlite::{Connection, Row};

impl Database {
    // -- Profiles --

    pub fn upsert_profile(&self, profile: &ProfileRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, full_name, display_name, avatar_url, role)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    full_name = excluded.full_name,
                    display_name = excluded.display_name,
                    avatar_url = excluded.avatar_url,
                    role = excluded.role",
                rusqlite::params![
                    profile.id,
                    profile.full_name,
                    profile.display_name,
                    profile.avatar_url,
                    profile.role
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, full_name, display_name, avatar_url, role FROM profiles WHERE id = ?1",
                [id],
                |row| {
                    Ok(ProfileRow {
                        id: row.get(0)?,
                        full_name: row.get(1)?,
                        display_name: row.get(2)?,
                        avatar_url: row.get(3)?,
                        role: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Complaint conversation --

    pub fn insert_complaint_message(
        &self,
        id: &str,
        complaint_id: &str,
        sender_id: &str,
        message: &str,
        is_internal: bool,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO complaint_messages (id, complaint_id, sender_id, message, is_internal, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, complaint_id, sender_id, message, is_internal, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_complaint_messages(&self, complaint_id: &str) -> Result<Vec<ComplaintMessageRow>> {
        self.with_conn(|conn| query_complaint_messages(conn, complaint_id))
    }

    // -- Internal notes --

    pub fn insert_internal_note(
        &self,
        id: &str,
        complaint_id: &str,
        staff_id: &str,
        note: &str,
        is_internal: bool,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO complaint_internal_notes (id, complaint_id, staff_id, note, is_internal, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, complaint_id, staff_id, note, is_internal, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_internal_notes(&self, complaint_id: &str) -> Result<Vec<InternalNoteRow>> {
        self.with_conn(|conn| query_internal_notes(conn, complaint_id))
    }

    // -- Official notes --

    #[allow(clippy::too_many_arguments)]
    pub fn insert_official_note(
        &self,
        id: &str,
        complaint_id: &str,
        author_id: &str,
        body: &str,
        tags: &[String],
        visibility: &str,
        created_at: &str,
    ) -> Result<()> {
        let tags = serde_json::to_string(tags)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO official_notes (id, complaint_id, author_id, body, tags, visibility, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, complaint_id, author_id, body, tags, visibility, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_official_notes(&self, complaint_id: &str) -> Result<Vec<OfficialNoteRow>> {
        self.with_conn(|conn| query_official_notes(conn, complaint_id))
    }

    // -- Direct messages --

    pub fn insert_direct_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO direct_messages (id, conversation_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, conversation_id, sender_id, content, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_direct_messages(&self, conversation_id: &str) -> Result<Vec<DirectMessageRow>> {
        self.with_conn(|conn| query_direct_messages(conn, conversation_id))
    }
}

// Every listing joins the author's profile as the trailing four columns.
const AUTHOR_COLUMNS: &str = "p.full_name, p.display_name, p.avatar_url, p.role";

fn query_complaint_messages(conn: &Connection, complaint_id: &str) -> Result<Vec<ComplaintMessageRow>> {
    let sql = format!(
        "SELECT m.id, m.complaint_id, m.sender_id, m.message, m.is_internal, m.created_at, {}
         FROM complaint_messages m
         LEFT JOIN profiles p ON p.id = m.sender_id
         WHERE m.complaint_id = ?1
         ORDER BY m.created_at ASC, m.rowid ASC",
        AUTHOR_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([complaint_id], |row| {
            Ok(ComplaintMessageRow {
                id: row.get(0)?,
                complaint_id: row.get(1)?,
                sender_id: row.get(2)?,
                message: row.get(3)?,
                is_internal: row.get(4)?,
                created_at: row.get(5)?,
                sender: author_at(row, 6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_internal_notes(conn: &Connection, complaint_id: &str) -> Result<Vec<InternalNoteRow>> {
    let sql = format!(
        "SELECT n.id, n.complaint_id, n.staff_id, n.note, n.is_internal, n.created_at, {}
         FROM complaint_internal_notes n
         LEFT JOIN profiles p ON p.id = n.staff_id
         WHERE n.complaint_id = ?1
         ORDER BY n.created_at ASC, n.rowid ASC",
        AUTHOR_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([complaint_id], |row| {
            Ok(InternalNoteRow {
                id: row.get(0)?,
                complaint_id: row.get(1)?,
                staff_id: row.get(2)?,
                note: row.get(3)?,
                is_internal: row.get(4)?,
                created_at: row.get(5)?,
                staff: author_at(row, 6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_official_notes(conn: &Connection, complaint_id: &str) -> Result<Vec<OfficialNoteRow>> {
    let sql = format!(
        "SELECT n.id, n.complaint_id, n.author_id, n.body, n.tags, n.visibility, n.created_at, {}
         FROM official_notes n
         LEFT JOIN profiles p ON p.id = n.author_id
         WHERE n.complaint_id = ?1
         ORDER BY n.created_at ASC, n.rowid ASC",
        AUTHOR_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([complaint_id], |row| {
            Ok(OfficialNoteRow {
                id: row.get(0)?,
                complaint_id: row.get(1)?,
                author_id: row.get(2)?,
                body: row.get(3)?,
                tags: row.get(4)?,
                visibility: row.get(5)?,
                created_at: row.get(6)?,
                author: author_at(row, 7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_direct_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<DirectMessageRow>> {
    let sql = format!(
        "SELECT m.id, m.conversation_id, m.sender_id, m.content, m.created_at, {}
         FROM direct_messages m
         LEFT JOIN profiles p ON p.id = m.sender_id
         WHERE m.conversation_id = ?1
         ORDER BY m.created_at ASC, m.rowid ASC",
        AUTHOR_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([conversation_id], |row| {
            Ok(DirectMessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
                sender: author_at(row, 5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Reads the joined profile columns starting at `idx`. A LEFT JOIN miss
/// leaves `full_name` NULL.
fn author_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<AuthorJoin>> {
    let full_name: Option<String> = row.get(idx)?;
    let Some(full_name) = full_name else {
        return Ok(None);
    };
    Ok(Some(AuthorJoin {
        full_name,
        display_name: row.get(idx + 1)?,
        avatar_url: row.get(idx + 2)?,
        role: row.get::<_, Option<String>>(idx + 3)?.unwrap_or_default(),
    }))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn profile(id: &str, name: &str, role: &str) -> ProfileRow {
        ProfileRow {
            id: id.into(),
            full_name: name.into(),
            display_name: None,
            avatar_url: None,
            role: role.into(),
        }
    }

    #[test]
    fn messages_join_the_sender_profile() {
        let db = db();
        db.upsert_profile(&profile("u1", "Uma Citizen", "citizen")).unwrap();
        db.insert_complaint_message("a", "C-1", "u1", "hello", false, "2026-01-01 10:00:00.000")
            .unwrap();
        db.insert_complaint_message("b", "C-1", "ghost", "boo", false, "2026-01-01 10:00:01.000")
            .unwrap();
        db.insert_complaint_message("c", "C-2", "u1", "elsewhere", false, "2026-01-01 10:00:02.000")
            .unwrap();

        let rows = db.get_complaint_messages("C-1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sender.as_ref().unwrap().full_name, "Uma Citizen");
        assert!(rows[1].sender.is_none());
    }

    #[test]
    fn listings_are_ordered_by_creation_time() {
        let db = db();
        db.insert_direct_message("late", "D-1", "u1", "second", "2026-01-01 10:00:05.000").unwrap();
        db.insert_direct_message("early", "D-1", "u1", "first", "2026-01-01 10:00:01.000").unwrap();

        let ids: Vec<_> = db
            .get_direct_messages("D-1")
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn official_note_tags_are_stored_as_json() {
        let db = db();
        let tags = vec!["water".to_string(), "urgent".to_string()];
        db.insert_official_note("n1", "C-1", "s1", "Crew dispatched", &tags, "public", "2026-01-01 10:00:00.000")
            .unwrap();

        let rows = db.get_official_notes("C-1").unwrap();
        assert_eq!(rows[0].tags, r#"["water","urgent"]"#);
        assert_eq!(rows[0].visibility, "public");
    }

    #[test]
    fn upsert_profile_replaces_fields() {
        let db = db();
        db.upsert_profile(&profile("s1", "Sam", "staff")).unwrap();
        db.upsert_profile(&profile("s1", "Sam Staff", "supervisor")).unwrap();

        let row = db.get_profile("s1").unwrap().unwrap();
        assert_eq!(row.full_name, "Sam Staff");
        assert_eq!(row.role, "supervisor");
        assert!(db.get_profile("nobody").unwrap().is_none());
    }

    #[test]
    fn migrations_seed_the_system_profile() {
        let db = db();
        let row = db
            .get_profile("00000000-0000-0000-0000-000000000001")
            .unwrap()
            .unwrap();
        assert_eq!(row.role, "system");
    }
}
