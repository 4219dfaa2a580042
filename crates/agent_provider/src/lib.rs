//! Minimal provider-agnostic contract for executing a single agent run.
//!
//! This crate defines only the shared run lifecycle: the request handed to a
//! provider, the events a provider emits while streaming, and the trace records
//! correlated with a run. It excludes transport details, wire payloads, and
//! session bookkeeping.

use std::fmt;
use std::sync::{atomic::AtomicBool, Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier for one provider run.
pub type RunId = u64;

/// Shared cancellation flag for a run.
pub type CancelSignal = Arc<AtomicBool>;

/// Error returned while constructing/configuring a provider before any run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInitError {
    message: String,
}

impl ProviderInitError {
    /// Creates a new provider initialization error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the underlying error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProviderInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderInitError {}

impl From<String> for ProviderInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProviderInitError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Speaker of one history item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunRole {
    User,
    Assistant,
    System,
}

impl RunRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// Opaque attachment forwarded with a user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAttachment {
    pub mime_type: String,
    /// Base64 payload; encoding is owned by the caller.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Provider-neutral model-facing message history item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMessage {
    pub role: RunRole,
    pub text: String,
    pub attachments: Vec<RunAttachment>,
}

impl RunMessage {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: RunRole::User,
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: RunRole::Assistant,
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

/// Input required to start a provider run.
///
/// `messages` is the full history and always ends with the new user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: RunId,
    pub agent_id: String,
    pub session_id: Option<String>,
    pub model_id: String,
    pub instructions: String,
    pub messages: Vec<RunMessage>,
    /// Knowledge document ids, forwarded untouched.
    pub knowledge: Vec<String>,
}

impl RunRequest {
    /// Returns the newest user turn, if the history ends with one.
    #[must_use]
    pub fn latest_user_message(&self) -> Option<&RunMessage> {
        self.messages
            .last()
            .filter(|message| message.role == RunRole::User)
    }

    /// Returns every message before the newest user turn.
    #[must_use]
    pub fn prior_messages(&self) -> &[RunMessage] {
        match self.latest_user_message() {
            Some(_) => &self.messages[..self.messages.len() - 1],
            None => &self.messages,
        }
    }
}

/// Category of an execution-trace step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Rag,
    Tool,
    Mcp,
    Step,
    Router,
    Error,
    Success,
    Info,
}

/// One execution-trace step reported by a provider during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    pub kind: TraceKind,
    pub title: String,
    pub agent_name: Option<String>,
    pub detail: Option<Value>,
}

impl TraceEvent {
    #[must_use]
    pub fn new(kind: TraceKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            agent_name: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_agent_name(mut self, agent_name: Option<String>) -> Self {
        self.agent_name = agent_name;
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: Option<Value>) -> Self {
        self.detail = detail;
        self
    }
}

/// Provider-emitted lifecycle event for a run.
///
/// `Content` always carries the cumulative text so far, never a bare delta.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Started {
        run_id: RunId,
    },
    Content {
        run_id: RunId,
        text: String,
    },
    Trace {
        run_id: RunId,
        trace: TraceEvent,
    },
    Completed {
        run_id: RunId,
        text: String,
        metrics: Option<Value>,
    },
    Failed {
        run_id: RunId,
        error: String,
    },
    Cancelled {
        run_id: RunId,
    },
}

impl RunEvent {
    /// Returns the run identifier associated with this event.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::Started { run_id }
            | Self::Content { run_id, .. }
            | Self::Trace { run_id, .. }
            | Self::Completed { run_id, .. }
            | Self::Failed { run_id, .. }
            | Self::Cancelled { run_id } => *run_id,
        }
    }

    /// Returns true when this event terminates the run lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// Immutable metadata describing a run provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub model_id: String,
}

/// Provider interface for executing one run request.
pub trait RunProvider: Send + Sync + 'static {
    /// Returns provider/model identity metadata.
    fn profile(&self) -> ProviderProfile;

    /// Executes a run request and emits lifecycle events in transport order.
    ///
    /// Implementations must emit exactly one terminal event unless they return
    /// `Err`, and should observe `cancel` between reads.
    fn run(
        &self,
        req: RunRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(RunEvent),
    ) -> Result<(), String>;
}
