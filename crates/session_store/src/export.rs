use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::schema::{Role, Session, Timestamp};

/// Renders a session transcript as markdown, one block per message.
#[must_use]
pub fn export_markdown(session: &Session, user_label: &str, agent_label: &str) -> String {
    session
        .messages
        .iter()
        .map(|message| {
            let who = match message.role {
                Role::User => user_label,
                Role::Assistant => message.agent_name.as_deref().unwrap_or(agent_label),
                Role::System => "System",
            };
            format!(
                "### {who} ({})\n\n{}\n",
                format_timestamp(message.timestamp),
                message.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n\n")
}

/// File name for an exported transcript derived from the session title.
#[must_use]
pub fn export_file_name(title: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "chat.md".to_string()
    } else {
        format!("{stem}.md")
    }
}

fn format_timestamp(timestamp: Timestamp) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp) * 1_000_000)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| timestamp.to_string())
}
