use serde_json::Value;

pub const EVENT_RUN_STARTED: &str = "RunStarted";
pub const EVENT_RUN_CONTENT: &str = "RunContent";
pub const EVENT_RUN_COMPLETED: &str = "RunCompleted";
pub const EVENT_RUN_ERROR: &str = "RunError";
pub const EVENT_TOOL_CALL_STARTED: &str = "ToolCallStarted";
pub const EVENT_TOOL_CALL_COMPLETED: &str = "ToolCallCompleted";
pub const EVENT_REASONING_STEP: &str = "ReasoningStep";

/// Frame decoded from one line of the run response body, keyed by `event`.
#[derive(Debug, Clone, PartialEq)]
pub enum AgnoFrame {
    RunStarted {
        run_id: Option<String>,
        agent_name: Option<String>,
    },
    /// Incremental fragment to append to the running text.
    RunContent { content: String },
    ToolCallStarted {
        tool_name: String,
        arguments: Option<Value>,
        agent_name: Option<String>,
    },
    ToolCallCompleted {
        tool_name: String,
        result: Option<Value>,
        agent_name: Option<String>,
    },
    ReasoningStep {
        title: String,
        detail: Option<Value>,
        agent_name: Option<String>,
    },
    /// End of the logical run. Non-empty `content` is authoritative.
    RunCompleted {
        content: Option<String>,
        metrics: Option<Value>,
    },
    RunError { message: String },
    /// Unrecognized `event`; decoders drop these.
    Unknown { event: String },
}

impl AgnoFrame {
    /// Maps a parsed JSON object onto a frame. Returns `None` when the value
    /// carries no string `event` discriminator.
    pub fn from_value(value: Value) -> Option<Self> {
        let event = value.get("event")?.as_str()?;
        let agent_name = string_field(&value, "agent_name");

        Some(match event {
            EVENT_RUN_CONTENT => Self::RunContent {
                content: string_field(&value, "content").unwrap_or_default(),
            },
            EVENT_RUN_COMPLETED => Self::RunCompleted {
                content: string_field(&value, "content"),
                metrics: value.get("metrics").filter(|v| !v.is_null()).cloned(),
            },
            EVENT_RUN_STARTED => Self::RunStarted {
                run_id: string_field(&value, "run_id"),
                agent_name,
            },
            EVENT_TOOL_CALL_STARTED => {
                let tool = value.get("tool");
                Self::ToolCallStarted {
                    tool_name: tool_name(tool),
                    arguments: tool
                        .and_then(|tool| tool.get("tool_args"))
                        .filter(|v| !v.is_null())
                        .cloned(),
                    agent_name,
                }
            }
            EVENT_TOOL_CALL_COMPLETED => {
                let tool = value.get("tool");
                Self::ToolCallCompleted {
                    tool_name: tool_name(tool),
                    result: tool
                        .and_then(|tool| tool.get("result"))
                        .filter(|v| !v.is_null())
                        .cloned(),
                    agent_name,
                }
            }
            EVENT_REASONING_STEP => {
                let detail = value.get("content").filter(|v| !v.is_null()).cloned();
                let title = detail
                    .as_ref()
                    .and_then(|content| content.get("title"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "Reasoning step".to_owned());
                Self::ReasoningStep {
                    title,
                    detail,
                    agent_name,
                }
            }
            EVENT_RUN_ERROR => Self::RunError {
                message: string_field(&value, "content")
                    .or_else(|| string_field(&value, "error"))
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| "agent run failed".to_owned()),
            },
            other => Self::Unknown {
                event: other.to_owned(),
            },
        })
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn tool_name(tool: Option<&Value>) -> String {
    tool.and_then(|tool| tool.get("tool_name"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or("tool")
        .to_owned()
}

/// Running text for one run.
#[derive(Debug, Clone, Default)]
pub struct RunAccumulator {
    text: String,
}

impl RunAccumulator {
    /// Appends a fragment and returns the cumulative text, or `None` when the
    /// fragment is empty and nothing changed.
    pub fn push_fragment(&mut self, fragment: &str) -> Option<&str> {
        if fragment.is_empty() {
            return None;
        }
        self.text.push_str(fragment);
        Some(&self.text)
    }

    /// Resolves the final text: a non-empty completion payload wins over the
    /// accumulated fragments.
    pub fn complete(self, final_content: Option<String>) -> String {
        match final_content {
            Some(content) if !content.is_empty() => content,
            _ => self.text,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}
