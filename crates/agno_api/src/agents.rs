use serde_json::Value;

pub const DEFAULT_REMOTE_MODEL: &str = "gpt-4o";

/// Agent entry as listed by the remote service, with display fallbacks applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAgent {
    pub id: String,
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub model: String,
}

/// Maps a listing body onto agents.
///
/// Accepts either a bare array or an `{ "agents": [...] }` wrapper. Entries
/// without an id are skipped; positions used for fallback names are 1-based
/// over the raw listing.
pub fn parse_agent_listing(body: &Value) -> Vec<RemoteAgent> {
    let entries = match body {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(fields) => match fields.get("agents") {
            Some(Value::Array(entries)) => entries.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let id = text(entry, "agent_id").or_else(|| text(entry, "id"))?;
            let model = match entry.get("model") {
                Some(Value::String(model)) if !model.trim().is_empty() => model.clone(),
                Some(Value::Object(model)) => model
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or(DEFAULT_REMOTE_MODEL)
                    .to_owned(),
                _ => DEFAULT_REMOTE_MODEL.to_owned(),
            };
            Some(RemoteAgent {
                name: text(entry, "name").unwrap_or_else(|| format!("Agno Agent {}", index + 1)),
                description: text(entry, "description").unwrap_or_default(),
                instructions: instructions(entry),
                model,
                id,
            })
        })
        .collect()
}

fn text(entry: &Value, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn instructions(entry: &Value) -> String {
    match entry.get("instructions") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(lines)) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
