#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    New,
    Sessions,
    History,
    Agents,
    /// 1-based index into the sidebar listing.
    Select(usize),
    Agent(String),
    /// Model override for the active agent; empty restores its default.
    Model(String),
    Delete(usize),
    /// 1-based message index plus replacement text.
    Edit(usize, String),
    DeleteMessage(usize),
    Rename(String),
    Feedback(usize, Option<bool>),
    Knowledge(Vec<String>),
    Cancel,
    Clear,
    Export,
    Quit,
    Invalid(String),
    Unknown(String),
}

pub const HELP_TEXT: &str = "Commands: /help, /new, /sessions, /select <n>, /history, /agents, /agent <id>, \
/model [id], /delete <n>, /edit <n> <text>, /rm <n>, /rename <title>, /up <n>, /down <n>, /unrate <n>, \
/knowledge [ids...], /cancel, /clear, /export, /quit";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };

    let parsed = match command {
        "/help" => SlashCommand::Help,
        "/new" => SlashCommand::New,
        "/sessions" => SlashCommand::Sessions,
        "/history" => SlashCommand::History,
        "/agents" => SlashCommand::Agents,
        "/select" => index_arg(command, rest).map_or_else(|e| e, SlashCommand::Select),
        "/delete" => index_arg(command, rest).map_or_else(|e| e, SlashCommand::Delete),
        "/rm" => index_arg(command, rest).map_or_else(|e| e, SlashCommand::DeleteMessage),
        "/up" => feedback_arg(command, rest, Some(true)),
        "/down" => feedback_arg(command, rest, Some(false)),
        "/unrate" => feedback_arg(command, rest, None),
        "/agent" if !rest.is_empty() => SlashCommand::Agent(rest.to_string()),
        "/agent" => SlashCommand::Invalid("usage: /agent <id>".to_string()),
        "/model" => SlashCommand::Model(rest.to_string()),
        "/rename" if !rest.is_empty() => SlashCommand::Rename(rest.to_string()),
        "/rename" => SlashCommand::Invalid("usage: /rename <title>".to_string()),
        "/edit" => parse_edit(rest),
        "/knowledge" => SlashCommand::Knowledge(
            rest.split_whitespace().map(str::to_string).collect(),
        ),
        "/cancel" => SlashCommand::Cancel,
        "/clear" => SlashCommand::Clear,
        "/export" => SlashCommand::Export,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command.to_string()),
    };

    Some(parsed)
}

fn index_arg(command: &str, rest: &str) -> Result<usize, SlashCommand> {
    rest.parse::<usize>()
        .ok()
        .filter(|index| *index > 0)
        .ok_or_else(|| SlashCommand::Invalid(format!("usage: {command} <n>")))
}

fn feedback_arg(command: &str, rest: &str, positive: Option<bool>) -> SlashCommand {
    match index_arg(command, rest) {
        Ok(index) => SlashCommand::Feedback(index, positive),
        Err(invalid) => invalid,
    }
}

fn parse_edit(rest: &str) -> SlashCommand {
    let usage = || SlashCommand::Invalid("usage: /edit <n> <text>".to_string());
    let Some((index, text)) = rest.split_once(char::is_whitespace) else {
        return usage();
    };
    match index.parse::<usize>() {
        Ok(index) if index > 0 && !text.trim().is_empty() => {
            SlashCommand::Edit(index, text.trim().to_string())
        }
        _ => usage(),
    }
}
