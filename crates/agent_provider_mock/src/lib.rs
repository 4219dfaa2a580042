//! Deterministic mock implementation of the shared `agent_provider` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and contract-level integration testing.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use agent_provider::{
    CancelSignal, ProviderProfile, RunEvent, RunProvider, RunRequest, TraceEvent, TraceKind,
};

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

const DEFAULT_RUN_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_TOKEN_DELAY: Duration = Duration::from_millis(40);

/// How a scripted run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Ending {
    Complete { final_text: Option<String> },
    Fail { error: String },
}

/// Deterministic scripted provider used by `agno_chat` tests and local runs.
///
/// Chunks are streamed word by word as cumulative `Content` events. Trace
/// steps are emitted after `Started` and before the first chunk.
#[derive(Debug, Clone)]
pub struct MockProvider {
    chunks: Vec<String>,
    traces: Vec<TraceEvent>,
    ending: Ending,
    model_id: String,
    run_delay: Duration,
    token_delay: Duration,
}

impl MockProvider {
    /// Creates a mock provider streaming caller-provided chunks.
    #[must_use]
    pub fn new(chunks: Vec<String>) -> Self {
        Self {
            chunks,
            traces: Vec::new(),
            ending: Ending::Complete { final_text: None },
            model_id: "mock".to_string(),
            run_delay: DEFAULT_RUN_DELAY,
            token_delay: DEFAULT_TOKEN_DELAY,
        }
    }

    /// Completes with `final_text` instead of the streamed total.
    #[must_use]
    pub fn with_final_text(mut self, final_text: impl Into<String>) -> Self {
        self.ending = Ending::Complete {
            final_text: Some(final_text.into()),
        };
        self
    }

    /// Ends the run with `Failed` after streaming the chunks.
    #[must_use]
    pub fn with_failure(mut self, error: impl Into<String>) -> Self {
        self.ending = Ending::Fail {
            error: error.into(),
        };
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceEvent) -> Self {
        self.traces.push(trace);
        self
    }

    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        if !model_id.trim().is_empty() {
            self.model_id = model_id.trim().to_string();
        }
        self
    }

    /// Overrides the pause before streaming and the pause between tokens.
    #[must_use]
    pub fn with_delays(mut self, run_delay: Duration, token_delay: Duration) -> Self {
        self.run_delay = run_delay;
        self.token_delay = token_delay;
        self
    }

    fn pause(delay: Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(vec![
            "This is a **mock** agent reply streamed word by word.\n".to_string(),
            "\n".to_string(),
            "- Messages are kept per session and persisted after every change.\n".to_string(),
            "- Use `/edit`, `/delete`, and `/cancel` to exercise the conversation engine.\n"
                .to_string(),
            "\n".to_string(),
            "Set `AGNO_CHAT_PROVIDER=agno-api` to talk to a real agent service.\n".to_string(),
        ])
        .with_trace(TraceEvent::new(TraceKind::Router, "Routing request to agent"))
        .with_trace(TraceEvent::new(TraceKind::Rag, "Searched knowledge base"))
        .with_trace(TraceEvent::new(TraceKind::Step, "Drafting answer"))
    }
}

impl RunProvider for MockProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: self.model_id.clone(),
        }
    }

    fn run(
        &self,
        req: RunRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(RunEvent),
    ) -> Result<(), String> {
        let run_id = req.run_id;
        let agent_name = Some(req.agent_id.clone());
        let is_cancelled = || cancel.load(Ordering::SeqCst);

        emit(RunEvent::Started { run_id });
        Self::pause(self.run_delay);

        for trace in &self.traces {
            if is_cancelled() {
                emit(RunEvent::Cancelled { run_id });
                return Ok(());
            }
            let mut trace = trace.clone();
            if trace.agent_name.is_none() {
                trace.agent_name = agent_name.clone();
            }
            emit(RunEvent::Trace { run_id, trace });
        }

        let mut text = String::new();
        for chunk in &self.chunks {
            let mut pending_token = String::new();
            for ch in chunk.chars() {
                pending_token.push(ch);
                if !matches!(ch, ' ' | '\n') {
                    continue;
                }

                if is_cancelled() {
                    emit(RunEvent::Cancelled { run_id });
                    return Ok(());
                }
                text.push_str(&std::mem::take(&mut pending_token));
                emit(RunEvent::Content {
                    run_id,
                    text: text.clone(),
                });
                Self::pause(self.token_delay);
            }

            if !pending_token.is_empty() {
                if is_cancelled() {
                    emit(RunEvent::Cancelled { run_id });
                    return Ok(());
                }
                text.push_str(&pending_token);
                emit(RunEvent::Content {
                    run_id,
                    text: text.clone(),
                });
                Self::pause(self.token_delay);
            }
        }

        if is_cancelled() {
            emit(RunEvent::Cancelled { run_id });
            return Ok(());
        }

        match &self.ending {
            Ending::Complete { final_text } => emit(RunEvent::Completed {
                run_id,
                text: final_text.clone().unwrap_or(text),
                metrics: None,
            }),
            Ending::Fail { error } => emit(RunEvent::Failed {
                run_id,
                error: error.clone(),
            }),
        }

        Ok(())
    }
}
