use std::collections::HashSet;

use civic_sync::SyncSnapshot;
use civic_types::models::{AuthorRole, UnifiedMessage};

/// One line per message: time, author, role badge, markers, content.
pub fn format_message(message: &UnifiedMessage) -> String {
    let mut line = format!(
        "[{}] {}{}",
        message.created_at.format("%Y-%m-%d %H:%M"),
        message.author_name,
        role_badge(message.author_role),
    );
    if message.is_internal {
        line.push_str(" (internal)");
    }
    if let Some(tags) = message.tags.as_ref().filter(|t| !t.is_empty()) {
        line.push_str(&format!(" #{}", tags.join(" #")));
    }
    if message.is_optimistic {
        line.push_str(" (sending)");
    }
    line.push_str(": ");
    line.push_str(&message.content);
    line
}

fn role_badge(role: AuthorRole) -> &'static str {
    match role {
        AuthorRole::Citizen => "",
        AuthorRole::Staff => " [staff]",
        AuthorRole::Supervisor => " [supervisor]",
        AuthorRole::System => " [system]",
    }
}

/// Tracks what has been printed so each snapshot only adds the new lines.
#[derive(Default)]
pub struct Printer {
    shown: HashSet<String>,
    status: Option<String>,
    error: Option<String>,
}

impl Printer {
    /// Lines to print for `snapshot`, given everything printed before.
    pub fn update(&mut self, snapshot: &SyncSnapshot) -> Vec<String> {
        let mut out = Vec::new();

        let status = snapshot.status.to_string();
        if self.status.as_deref() != Some(status.as_str()) {
            out.push(format!("-- {}", status));
            self.status = Some(status);
        }

        for message in snapshot.messages.iter().filter(|m| !m.is_optimistic) {
            if self.shown.insert(message.id.clone()) {
                out.push(format_message(message));
            }
        }

        if snapshot.last_error != self.error {
            if let Some(error) = &snapshot.last_error {
                out.push(format!("!! {} (type /reload to retry)", error));
            }
            self.error = snapshot.last_error.clone();
        }

        out
    }
}
