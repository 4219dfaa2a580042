//! Agent directory: the read-only catalogue of agents a session can belong to.

use agno_api::RemoteAgent;

/// Agent configuration. The engine never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub description: String,
    pub model: String,
    pub instructions: String,
}

impl From<RemoteAgent> for Agent {
    fn from(remote: RemoteAgent) -> Self {
        Self {
            id: remote.id,
            name: remote.name,
            description: remote.description,
            model: remote.model,
            instructions: remote.instructions,
        }
    }
}

/// Lookup of agents by id.
pub trait AgentDirectory: Send + Sync {
    fn agents(&self) -> &[Agent];

    fn get(&self, id: &str) -> Option<&Agent> {
        self.agents().iter().find(|agent| agent.id == id)
    }

    /// First listed agent, used when nothing else is selected.
    fn default_agent(&self) -> Option<&Agent> {
        self.agents().first()
    }
}

/// Fixed list of agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAgentDirectory {
    agents: Vec<Agent>,
}

impl StaticAgentDirectory {
    #[must_use]
    pub fn new(agents: Vec<Agent>) -> Self {
        Self { agents }
    }

    /// Directory populated from a remote agent listing. Falls back to the
    /// built-in agents when the listing is empty.
    #[must_use]
    pub fn from_remote(remote: Vec<RemoteAgent>) -> Self {
        if remote.is_empty() {
            return Self::builtin();
        }
        Self::new(remote.into_iter().map(Agent::from).collect())
    }

    #[must_use]
    pub fn builtin() -> Self {
        let agent = |id: &str, name: &str, description: &str, instructions: &str| Agent {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            model: BUILTIN_MODEL.to_string(),
            instructions: instructions.to_string(),
        };

        Self::new(vec![
            agent(
                "general",
                "Orchestrator",
                "General purpose assistant",
                "You are the Orchestrator, a helpful and precise assistant. You are concise, accurate, and helpful.",
            ),
            agent(
                "developer",
                "Dev Architect",
                "Code and systems engineering",
                "You are a senior software architect. You specialize in clean code, design patterns, and scalable architecture.",
            ),
            agent(
                "creative",
                "Creative Studio",
                "Content creation and ideation",
                "You are a creative director. You help with brainstorming, storytelling, and visual ideation.",
            ),
            agent(
                "analyst",
                "Data Analyst",
                "Reasoning and data insights",
                "You are a data analyst. You break down complex problems and explain the reasoning behind every conclusion.",
            ),
            agent(
                "writer",
                "Tech Writer",
                "Documentation and blogs",
                "You are a professional technical writer. You write clear, concise, and engaging documentation.",
            ),
        ])
    }
}

impl Default for StaticAgentDirectory {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AgentDirectory for StaticAgentDirectory {
    fn agents(&self) -> &[Agent] {
        &self.agents
    }
}

const BUILTIN_MODEL: &str = "gpt-4o";
