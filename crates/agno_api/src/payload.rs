use serde::{Deserialize, Serialize};

/// Prior-history item carried alongside the new turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgnoHistoryMessage {
    pub role: String,
    pub content: String,
}

impl AgnoHistoryMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Request body for `POST {base}/v1/agent/runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgnoRunRequest {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Text of the new user turn.
    pub input: String,
    /// Default: true.
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<AgnoHistoryMessage>,
    /// Knowledge document ids, passed through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knowledge: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl AgnoRunRequest {
    pub fn new(agent_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: None,
            input: input.into(),
            stream: true,
            model: None,
            instructions: None,
            messages: Vec::new(),
            knowledge: Vec::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<AgnoHistoryMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_knowledge(mut self, knowledge: Vec<String>) -> Self {
        self.knowledge = knowledge;
        self
    }
}
