use std::collections::HashMap;

use agent_provider::{RunAttachment, RunMessage, RunRole, TraceEvent};
use serde_json::Value;
use session_store::{
    export_file_name, export_markdown, new_id, now_ms, Attachment, Feedback, LogEntry, Message,
    MessageLog, Role, Session, SessionRegistry, SessionStoreError,
};
use thiserror::Error;

use crate::agents::{Agent, AgentDirectory};

pub use agent_provider::RunId;

/// Titles derived from the first message keep this many characters.
pub const TITLE_MAX_CHARS: usize = 30;
pub const DEFAULT_USER_LABEL: &str = "You";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("a response is still streaming in session {session_id}")]
    RunInFlight { session_id: String },
    #[error("message {message_id} is not a user message and cannot be edited")]
    EditTargetInvalid { message_id: String },
    #[error("unknown message {message_id}")]
    UnknownMessage { message_id: String },
    #[error("unknown session {id}")]
    UnknownSession { id: String },
    #[error("unknown agent {id}")]
    UnknownAgent { id: String },
    #[error("agent directory is empty")]
    NoAgents,
    #[error("no active session")]
    NoActiveSession,
    #[error("message is empty")]
    EmptyMessage,
    #[error("failed to start run: {0}")]
    RunStart(String),
    #[error(transparent)]
    Store(SessionStoreError),
}

impl From<SessionStoreError> for ChatError {
    fn from(error: SessionStoreError) -> Self {
        match error {
            SessionStoreError::UnknownSession { id } => Self::UnknownSession { id },
            SessionStoreError::UnknownMessage { message_id, .. } => {
                Self::UnknownMessage { message_id }
            }
            other => Self::Store(other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    Streaming {
        run_id: RunId,
        placeholder_id: String,
    },
}

/// Everything the host needs to start one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStart {
    pub session_id: String,
    pub agent_id: String,
    pub model_id: String,
    pub instructions: String,
    /// Full history ending with the new user turn.
    pub messages: Vec<RunMessage>,
    pub knowledge: Vec<String>,
}

pub trait HostOps {
    fn start_run(&mut self, start: RunStart) -> Result<RunId, String>;
    fn cancel_run(&mut self, run_id: RunId);
    fn request_render(&mut self);
}

/// Markdown transcript ready to be written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub file_name: String,
    pub markdown: String,
}

#[derive(Debug, Default)]
struct SessionRun {
    state: RunState,
    live_trace: Vec<LogEntry>,
    last_error: Option<String>,
}

static IDLE: RunState = RunState::Idle;

/// Reconciles the optimistic message log of every session with the runs
/// streaming into it.
///
/// Each session runs its own `Idle -> Streaming -> Idle` cycle; sessions
/// stream independently. Run events are routed by run id and dropped unless
/// they belong to the run their session is currently streaming.
pub struct ChatApp {
    registry: SessionRegistry,
    agents: Box<dyn AgentDirectory>,
    active_agent: Agent,
    /// Model chosen over the active agent's default; cleared on agent or
    /// session switches.
    model_override: Option<String>,
    knowledge: Vec<String>,
    runs: HashMap<String, SessionRun>,
    run_sessions: HashMap<RunId, String>,
    user_label: String,
}

impl ChatApp {
    /// Picks the starting agent (`initial_agent` when known, else the agent of
    /// the most recent session, else the directory default), finalizes
    /// entries left streaming by an earlier process, and repairs the selection.
    pub fn new(
        registry: SessionRegistry,
        agents: Box<dyn AgentDirectory>,
        initial_agent: Option<&str>,
    ) -> Result<Self, ChatError> {
        let most_recent = registry
            .all()
            .iter()
            .max_by_key(|session| session.last_modified)
            .map(|session| session.agent_id.clone());
        let active_agent = initial_agent
            .and_then(|id| agents.get(id))
            .or_else(|| most_recent.as_deref().and_then(|id| agents.get(id)))
            .or_else(|| agents.default_agent())
            .cloned()
            .ok_or(ChatError::NoAgents)?;
        if let Some(id) = initial_agent.filter(|id| agents.get(id).is_none()) {
            tracing::warn!(agent_id = id, "unknown initial agent, using {}", active_agent.id);
        }

        let mut app = Self {
            registry,
            agents,
            active_agent,
            model_override: None,
            knowledge: Vec::new(),
            runs: HashMap::new(),
            run_sessions: HashMap::new(),
            user_label: DEFAULT_USER_LABEL.to_string(),
        };
        app.finalize_interrupted_entries();
        app.registry.repair_selection(&app.active_agent.id);
        Ok(app)
    }

    #[must_use]
    pub fn with_user_label(mut self, label: impl Into<String>) -> Self {
        self.user_label = label.into();
        self
    }

    fn finalize_interrupted_entries(&mut self) {
        let interrupted: Vec<(String, String)> = self
            .registry
            .all()
            .iter()
            .filter_map(|session| {
                session
                    .messages
                    .streaming_id()
                    .map(|message_id| (session.id.clone(), message_id.to_string()))
            })
            .collect();

        for (session_id, message_id) in interrupted {
            tracing::debug!(%session_id, %message_id, "finalizing entry left streaming");
            if let Err(error) = self.registry.update_message(&session_id, &message_id, |m| {
                Message {
                    is_streaming: false,
                    ..m.clone()
                }
            }) {
                tracing::warn!(%error, "failed to finalize interrupted entry");
            }
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn agents(&self) -> &dyn AgentDirectory {
        self.agents.as_ref()
    }

    pub fn active_agent(&self) -> &Agent {
        &self.active_agent
    }

    /// Model used for runs of the active agent.
    pub fn model(&self) -> &str {
        self.model_override
            .as_deref()
            .unwrap_or(&self.active_agent.model)
    }

    pub fn user_label(&self) -> &str {
        &self.user_label
    }

    pub fn knowledge(&self) -> &[String] {
        &self.knowledge
    }

    /// Sessions of the active agent, most recently modified first.
    pub fn sessions_for_sidebar(&self) -> Vec<&Session> {
        self.registry.list_for_agent(&self.active_agent.id)
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.registry.selected()
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.registry.selected_id()
    }

    pub fn current_messages(&self) -> Option<&MessageLog> {
        self.current_session().map(|session| &session.messages)
    }

    /// Trace steps of the selected session's latest run.
    pub fn live_trace(&self) -> &[LogEntry] {
        self.current_session_id()
            .and_then(|id| self.runs.get(id))
            .map(|run| run.live_trace.as_slice())
            .unwrap_or_default()
    }

    pub fn run_state(&self, session_id: &str) -> &RunState {
        self.runs
            .get(session_id)
            .map(|run| &run.state)
            .unwrap_or(&IDLE)
    }

    pub fn current_run_state(&self) -> &RunState {
        match self.current_session_id() {
            Some(id) => self.run_state(id),
            None => &IDLE,
        }
    }

    pub fn is_streaming(&self, session_id: &str) -> bool {
        matches!(self.run_state(session_id), RunState::Streaming { .. })
    }

    /// Error text of the session's last failed run, until the next run starts.
    pub fn last_error(&self, session_id: &str) -> Option<&str> {
        self.runs
            .get(session_id)
            .and_then(|run| run.last_error.as_deref())
    }

    /// Runs the active agent on `model_id`. A blank id restores the agent's
    /// own model.
    pub fn set_model(&mut self, model_id: &str) {
        let model_id = model_id.trim();
        self.model_override = (!model_id.is_empty() && model_id != self.active_agent.model)
            .then(|| model_id.to_string());
    }

    pub fn set_knowledge(&mut self, document_ids: Vec<String>) {
        self.knowledge = document_ids;
    }

    /// Switches agent and repairs the selection so it belongs to that agent.
    pub fn set_active_agent(&mut self, agent_id: &str) -> Result<String, ChatError> {
        let agent = self
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| ChatError::UnknownAgent {
                id: agent_id.to_string(),
            })?;
        self.active_agent = agent;
        self.model_override = None;
        Ok(self.registry.repair_selection(&self.active_agent.id))
    }

    /// Selects a session and makes its agent the active one.
    pub fn select_session(&mut self, session_id: &str) -> Result<(), ChatError> {
        let agent_id = self
            .registry
            .get(session_id)
            .map(|session| session.agent_id.clone())
            .ok_or_else(|| ChatError::UnknownSession {
                id: session_id.to_string(),
            })?;
        let agent = self
            .agents
            .get(&agent_id)
            .cloned()
            .ok_or(ChatError::UnknownAgent { id: agent_id })?;

        self.registry.select(session_id)?;
        self.active_agent = agent;
        self.model_override = None;
        Ok(())
    }

    /// Starts a fresh chat for the active agent. An already empty selected
    /// session is reused.
    pub fn new_chat(&mut self) -> String {
        if let Some(session) = self.registry.selected() {
            if session.agent_id == self.active_agent.id && session.messages.is_empty() {
                return session.id.clone();
            }
        }
        self.registry
            .create(&self.active_agent.id, session_store::DEFAULT_SESSION_TITLE)
    }

    /// Deletes a session (cancelling its run) and repairs the selection.
    pub fn delete_session(
        &mut self,
        host: &mut dyn HostOps,
        session_id: &str,
    ) -> Result<(), ChatError> {
        if self.registry.get(session_id).is_none() {
            return Err(ChatError::UnknownSession {
                id: session_id.to_string(),
            });
        }

        self.cancel_session(host, session_id);
        self.registry.delete(session_id)?;
        self.runs.remove(session_id);
        self.registry.repair_selection(&self.active_agent.id);
        host.request_render();
        Ok(())
    }

    pub fn rename_current(&mut self, title: &str) -> Result<(), ChatError> {
        let session_id = self.require_selected()?;
        self.registry.rename(&session_id, title)?;
        Ok(())
    }

    /// Removes every message of the selected session, cancelling its run.
    pub fn clear_chat(&mut self, host: &mut dyn HostOps) -> Result<(), ChatError> {
        let session_id = self.require_selected()?;
        self.cancel_session(host, &session_id);
        self.registry.clear_messages(&session_id)?;
        if let Some(run) = self.runs.get_mut(&session_id) {
            run.live_trace.clear();
            run.last_error = None;
        }
        host.request_render();
        Ok(())
    }

    pub fn set_feedback(
        &mut self,
        message_id: &str,
        feedback: Option<Feedback>,
    ) -> Result<(), ChatError> {
        let session_id = self.require_selected()?;
        self.registry.set_feedback(&session_id, message_id, feedback)?;
        Ok(())
    }

    /// Markdown transcript of the selected session; `None` when it has no
    /// messages.
    pub fn export_current(&self) -> Result<Option<Export>, ChatError> {
        let session = self.current_session().ok_or(ChatError::NoActiveSession)?;
        if session.messages.is_empty() {
            return Ok(None);
        }

        let agent_label = self
            .agents
            .get(&session.agent_id)
            .map_or(session.agent_id.as_str(), |agent| agent.name.as_str());
        Ok(Some(Export {
            file_name: export_file_name(&session.title),
            markdown: export_markdown(session, &self.user_label, agent_label),
        }))
    }

    /// Sends a user turn in the selected session of the active agent,
    /// creating the session when there is none. Returns the session id.
    pub fn send(
        &mut self,
        host: &mut dyn HostOps,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<String, ChatError> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let session_id = self.registry.repair_selection(&self.active_agent.id);
        self.ensure_idle(&session_id)?;

        let first_turn = self
            .registry
            .get(&session_id)
            .is_some_and(|session| session.messages.is_empty());
        if first_turn && !text.trim().is_empty() {
            self.registry.set_title(&session_id, &title_from_text(text))?;
        }

        let user = Message::user(text, attachments);
        self.registry
            .update_messages(&session_id, |log| log.append(user))?;
        self.start_streaming(host, &session_id)?;
        Ok(session_id)
    }

    /// Replaces a user turn of the selected session with `new_text`, drops
    /// everything after it, and streams a fresh reply.
    pub fn edit_and_regenerate(
        &mut self,
        host: &mut dyn HostOps,
        message_id: &str,
        new_text: &str,
    ) -> Result<(), ChatError> {
        let session_id = self.require_selected()?;
        let (index, original) = {
            let messages = &self
                .registry
                .get(&session_id)
                .ok_or_else(|| ChatError::UnknownSession {
                    id: session_id.clone(),
                })?
                .messages;
            let index = messages
                .position(message_id)
                .ok_or_else(|| ChatError::UnknownMessage {
                    message_id: message_id.to_string(),
                })?;
            let original = messages.get(index).cloned().ok_or_else(|| {
                ChatError::UnknownMessage {
                    message_id: message_id.to_string(),
                }
            })?;
            (index, original)
        };

        if original.role != Role::User {
            return Err(ChatError::EditTargetInvalid {
                message_id: message_id.to_string(),
            });
        }
        self.ensure_idle(&session_id)?;
        if new_text.trim().is_empty() && original.attachments.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let replacement = Message::user(new_text, original.attachments);
        self.registry.update_messages(&session_id, |log| {
            log.truncate_from(index).append(replacement)
        })?;
        self.start_streaming(host, &session_id)
    }

    /// Deletes a message together with its conversational pair.
    pub fn delete_message(
        &mut self,
        host: &mut dyn HostOps,
        message_id: &str,
    ) -> Result<(), ChatError> {
        let session_id = self.require_selected()?;
        let (start, count) = {
            let messages = &self
                .registry
                .get(&session_id)
                .ok_or_else(|| ChatError::UnknownSession {
                    id: session_id.clone(),
                })?
                .messages;
            let index = messages
                .position(message_id)
                .ok_or_else(|| ChatError::UnknownMessage {
                    message_id: message_id.to_string(),
                })?;
            pair_range(messages, index)
        };

        let placeholder_removed = match self.run_state(&session_id) {
            RunState::Streaming { placeholder_id, .. } => self
                .registry
                .get(&session_id)
                .and_then(|session| session.messages.position(placeholder_id))
                .is_some_and(|position| (start..start + count).contains(&position)),
            RunState::Idle => false,
        };
        if placeholder_removed {
            self.cancel_session(host, &session_id);
        }

        self.registry
            .update_messages(&session_id, |log| log.remove_range(start, count))?;
        host.request_render();
        Ok(())
    }

    /// Cancels the selected session's run, keeping the partial reply.
    /// Returns false when nothing was streaming.
    pub fn cancel(&mut self, host: &mut dyn HostOps) -> bool {
        match self.current_session_id().map(str::to_string) {
            Some(session_id) => self.cancel_session(host, &session_id),
            None => false,
        }
    }

    pub fn cancel_session(&mut self, host: &mut dyn HostOps, session_id: &str) -> bool {
        let Some(run) = self.runs.get_mut(session_id) else {
            return false;
        };
        let RunState::Streaming {
            run_id,
            placeholder_id,
        } = std::mem::take(&mut run.state)
        else {
            return false;
        };

        self.run_sessions.remove(&run_id);
        host.cancel_run(run_id);
        self.update_placeholder(session_id, &placeholder_id, |message| Message {
            is_streaming: false,
            ..message.clone()
        });
        host.request_render();
        true
    }

    pub fn on_run_started(&mut self, run_id: RunId) {
        if self.streaming_target(run_id).is_none() {
            tracing::debug!(run_id, "ignoring start of stale run");
        }
    }

    pub fn on_run_content(&mut self, run_id: RunId, text: &str) {
        let Some((session_id, placeholder_id)) = self.streaming_target(run_id) else {
            tracing::debug!(run_id, "dropping content of stale run");
            return;
        };
        self.update_placeholder(&session_id, &placeholder_id, |message| Message {
            text: text.to_string(),
            ..message.clone()
        });
    }

    pub fn on_run_trace(&mut self, run_id: RunId, trace: TraceEvent) {
        let Some((session_id, placeholder_id)) = self.streaming_target(run_id) else {
            tracing::debug!(run_id, "dropping trace of stale run");
            return;
        };

        let entry = LogEntry {
            id: new_id(),
            kind: trace.kind,
            title: trace.title,
            timestamp: now_ms(),
            agent_name: trace.agent_name,
            detail: trace.detail,
        };
        if let Some(run) = self.runs.get_mut(&session_id) {
            run.live_trace.push(entry.clone());
        }
        self.update_placeholder(&session_id, &placeholder_id, |message| {
            let mut updated = message.clone();
            updated.logs.push(entry);
            updated
        });
    }

    pub fn on_run_completed(&mut self, run_id: RunId, text: String, metrics: Option<Value>) {
        self.finish_run(run_id, None, |message| Message {
            text,
            is_streaming: false,
            metrics,
            ..message.clone()
        });
    }

    pub fn on_run_failed(&mut self, run_id: RunId, error: &str) {
        self.finish_run(run_id, Some(error.to_string()), |message| Message {
            text: format!("Error: {error}"),
            is_streaming: false,
            ..message.clone()
        });
    }

    pub fn on_run_cancelled(&mut self, run_id: RunId) {
        self.finish_run(run_id, None, |message| Message {
            is_streaming: false,
            ..message.clone()
        });
    }

    fn finish_run<F>(&mut self, run_id: RunId, error: Option<String>, update: F)
    where
        F: FnOnce(&Message) -> Message,
    {
        let Some((session_id, placeholder_id)) = self.streaming_target(run_id) else {
            tracing::debug!(run_id, "dropping terminal event of stale run");
            return;
        };

        self.run_sessions.remove(&run_id);
        if let Some(run) = self.runs.get_mut(&session_id) {
            run.state = RunState::Idle;
            run.last_error = error;
        }
        self.update_placeholder(&session_id, &placeholder_id, update);
    }

    /// Session and placeholder of `run_id` when it is still the run its
    /// session is streaming.
    fn streaming_target(&self, run_id: RunId) -> Option<(String, String)> {
        let session_id = self.run_sessions.get(&run_id)?;
        match &self.runs.get(session_id)?.state {
            RunState::Streaming {
                run_id: current,
                placeholder_id,
            } if *current == run_id => Some((session_id.clone(), placeholder_id.clone())),
            _ => None,
        }
    }

    fn update_placeholder<F>(&mut self, session_id: &str, placeholder_id: &str, update: F)
    where
        F: FnOnce(&Message) -> Message,
    {
        if let Err(error) = self
            .registry
            .update_message(session_id, placeholder_id, update)
        {
            tracing::warn!(%error, "failed to update streaming entry");
        }
    }

    fn start_streaming(
        &mut self,
        host: &mut dyn HostOps,
        session_id: &str,
    ) -> Result<(), ChatError> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| ChatError::UnknownSession {
                id: session_id.to_string(),
            })?;
        let agent = self
            .agents
            .get(&session.agent_id)
            .cloned()
            .unwrap_or_else(|| self.active_agent.clone());
        let model_id = if agent.id == self.active_agent.id {
            self.model().to_string()
        } else {
            agent.model.clone()
        };
        let start = RunStart {
            session_id: session_id.to_string(),
            agent_id: agent.id.clone(),
            model_id,
            instructions: agent.instructions.clone(),
            messages: session.messages.iter().map(run_message).collect(),
            knowledge: self.knowledge.clone(),
        };

        let placeholder = Message::streaming_placeholder(agent.name);
        let placeholder_id = placeholder.id.clone();
        self.registry
            .update_messages(session_id, |log| log.append(placeholder))?;

        let run = self.runs.entry(session_id.to_string()).or_default();
        run.live_trace.clear();
        run.last_error = None;

        match host.start_run(start) {
            Ok(run_id) => {
                run.state = RunState::Streaming {
                    run_id,
                    placeholder_id,
                };
                self.run_sessions.insert(run_id, session_id.to_string());
                host.request_render();
                Ok(())
            }
            Err(error) => {
                run.last_error = Some(error.clone());
                let rendered = format!("Error: {error}");
                self.update_placeholder(session_id, &placeholder_id, |message| Message {
                    text: rendered,
                    is_streaming: false,
                    ..message.clone()
                });
                host.request_render();
                Err(ChatError::RunStart(error))
            }
        }
    }

    fn ensure_idle(&self, session_id: &str) -> Result<(), ChatError> {
        if self.is_streaming(session_id) {
            return Err(ChatError::RunInFlight {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    fn require_selected(&self) -> Result<String, ChatError> {
        self.current_session_id()
            .map(str::to_string)
            .ok_or(ChatError::NoActiveSession)
    }
}

/// Range `(start, count)` removed when deleting the message at `index`.
///
/// A user turn takes its following reply with it; a reply takes its
/// preceding user turn. Anything else is removed alone.
pub fn pair_range(messages: &MessageLog, index: usize) -> (usize, usize) {
    let role_at = |i: usize| messages.get(i).map(|message| message.role);
    match role_at(index) {
        Some(Role::User) if role_at(index + 1) == Some(Role::Assistant) => (index, 2),
        Some(Role::Assistant) if index > 0 && role_at(index - 1) == Some(Role::User) => {
            (index - 1, 2)
        }
        _ => (index, 1),
    }
}

/// Session title derived from the first user message.
pub fn title_from_text(text: &str) -> String {
    if text.chars().count() > TITLE_MAX_CHARS {
        let head: String = text.chars().take(TITLE_MAX_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn run_message(message: &Message) -> RunMessage {
    let role = match message.role {
        Role::User => RunRole::User,
        Role::Assistant => RunRole::Assistant,
        Role::System => RunRole::System,
    };
    RunMessage {
        role,
        text: message.text.clone(),
        attachments: message
            .attachments
            .iter()
            .map(|attachment| RunAttachment {
                mime_type: attachment.mime_type.clone(),
                data: attachment.data.clone(),
                name: attachment.name.clone(),
            })
            .collect(),
    }
}
