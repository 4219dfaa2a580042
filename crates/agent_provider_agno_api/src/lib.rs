//! Agno API-backed implementation of the shared `agent_provider` contract.
//!
//! This adapter translates `agno_api` stream semantics into the `RunEvent`
//! lifecycle expected by `agno_chat`: cumulative `Content`, `Trace` steps for
//! tool and reasoning frames, and exactly one terminal event.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use agent_provider::{
    CancelSignal, ProviderInitError, ProviderProfile, RunEvent, RunProvider, RunRequest,
    TraceEvent, TraceKind,
};
use agno_api::{
    normalize_agno_url, AgnoApiClient, AgnoApiConfig, AgnoApiError, AgnoFrame,
    AgnoHistoryMessage, AgnoRunRequest, RunCompletion, RunUpdate,
};

/// Stable provider identifier used by `agno_chat` startup selection.
pub const AGNO_API_PROVIDER_ID: &str = "agno-api";

const DEFAULT_MODEL_ID: &str = "gpt-4o";

/// Runtime configuration for the Agno API provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgnoApiProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub default_model: Option<String>,
    pub timeout: Option<Duration>,
}

impl AgnoApiProviderConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            default_model: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn validate(&self) -> Result<(), ProviderInitError> {
        let normalized = normalize_agno_url(&self.base_url);
        let parsed = url::Url::parse(&normalized).map_err(|error| {
            ProviderInitError::new(format!("invalid agno-api base URL '{normalized}': {error}"))
        })?;
        if parsed.host_str().is_none() {
            return Err(ProviderInitError::new(format!(
                "agno-api base URL '{normalized}' has no host"
            )));
        }
        Ok(())
    }

    fn into_agno_api_config(self) -> AgnoApiConfig {
        let mut config = AgnoApiConfig::new(self.base_url);

        if let Some(api_key) = self.api_key {
            config = config.with_api_key(api_key);
        }

        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }

        config
    }
}

trait StreamClient: Send + Sync {
    fn stream_run(
        &self,
        request: &AgnoRunRequest,
        cancel: &CancelSignal,
        on_update: &mut dyn FnMut(RunUpdate),
    ) -> Result<RunCompletion, AgnoApiError>;
}

#[derive(Debug)]
struct DefaultStreamClient {
    client: AgnoApiClient,
}

impl StreamClient for DefaultStreamClient {
    fn stream_run(
        &self,
        request: &AgnoRunRequest,
        cancel: &CancelSignal,
        on_update: &mut dyn FnMut(RunUpdate),
    ) -> Result<RunCompletion, AgnoApiError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                AgnoApiError::Runtime(format!("failed to initialize tokio runtime: {error}"))
            })?;

        runtime.block_on(
            self.client
                .stream_run(request, Some(cancel), |update| on_update(update)),
        )
    }
}

/// `RunProvider` adapter backed by `agno_api` transport primitives.
pub struct AgnoApiProvider {
    default_model: String,
    stream_client: Arc<dyn StreamClient>,
}

impl AgnoApiProvider {
    /// Creates a provider using real Agno API transport.
    pub fn new(config: AgnoApiProviderConfig) -> Result<Self, ProviderInitError> {
        config.validate()?;
        let default_model = sanitize_model_id(config.default_model.clone());
        let stream_client = Arc::new(DefaultStreamClient {
            client: AgnoApiClient::new(config.into_agno_api_config()).map_err(map_init_error)?,
        });

        Ok(Self {
            default_model,
            stream_client,
        })
    }

    fn build_request(&self, req: &RunRequest) -> AgnoRunRequest {
        let input = req
            .latest_user_message()
            .map(|message| message.text.clone())
            .unwrap_or_default();
        let history = req
            .prior_messages()
            .iter()
            .map(|message| AgnoHistoryMessage::new(message.role.as_str(), message.text.clone()))
            .collect();
        let model = if req.model_id.trim().is_empty() {
            self.default_model.clone()
        } else {
            req.model_id.trim().to_string()
        };

        let mut request = AgnoRunRequest::new(req.agent_id.clone(), input)
            .with_model(model)
            .with_messages(history)
            .with_knowledge(req.knowledge.clone());
        if let Some(session_id) = &req.session_id {
            request = request.with_session_id(session_id.clone());
        }
        if !req.instructions.trim().is_empty() {
            request = request.with_instructions(req.instructions.clone());
        }
        request
    }

    #[cfg(test)]
    fn with_stream_client_for_tests(
        default_model: Option<String>,
        stream_client: Arc<dyn StreamClient>,
    ) -> Self {
        Self {
            default_model: sanitize_model_id(default_model),
            stream_client,
        }
    }
}

impl RunProvider for AgnoApiProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: AGNO_API_PROVIDER_ID.to_string(),
            model_id: self.default_model.clone(),
        }
    }

    fn run(
        &self,
        req: RunRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(RunEvent),
    ) -> Result<(), String> {
        let run_id = req.run_id;

        emit(RunEvent::Started { run_id });

        if cancel.load(Ordering::Acquire) {
            emit(RunEvent::Cancelled { run_id });
            return Ok(());
        }

        let request = self.build_request(&req);
        let result = self
            .stream_client
            .stream_run(&request, &cancel, &mut |update| match update {
                RunUpdate::Content { text } => emit(RunEvent::Content { run_id, text }),
                RunUpdate::Trace(frame) => {
                    if let Some(trace) = trace_from_frame(&frame) {
                        emit(RunEvent::Trace { run_id, trace });
                    }
                }
            });

        match result {
            Ok(completion) => emit(RunEvent::Completed {
                run_id,
                text: completion.text,
                metrics: completion.metrics,
            }),
            Err(AgnoApiError::Cancelled) => emit(RunEvent::Cancelled { run_id }),
            Err(error) => {
                tracing::debug!(run_id, %error, "agno-api run failed");
                emit(RunEvent::Failed {
                    run_id,
                    error: error.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Maps an informational frame onto a trace step.
pub fn trace_from_frame(frame: &AgnoFrame) -> Option<TraceEvent> {
    let trace = match frame {
        AgnoFrame::RunStarted { agent_name, .. } => {
            let title = match agent_name {
                Some(name) => format!("{name} started"),
                None => "Run started".to_string(),
            };
            TraceEvent::new(TraceKind::Info, title).with_agent_name(agent_name.clone())
        }
        AgnoFrame::ToolCallStarted {
            tool_name,
            arguments,
            agent_name,
        } => TraceEvent::new(tool_kind(tool_name), format!("Calling {tool_name}"))
            .with_agent_name(agent_name.clone())
            .with_detail(arguments.clone()),
        AgnoFrame::ToolCallCompleted {
            tool_name,
            result,
            agent_name,
        } => TraceEvent::new(TraceKind::Success, format!("{tool_name} finished"))
            .with_agent_name(agent_name.clone())
            .with_detail(result.clone()),
        AgnoFrame::ReasoningStep {
            title,
            detail,
            agent_name,
        } => TraceEvent::new(TraceKind::Step, title.clone())
            .with_agent_name(agent_name.clone())
            .with_detail(detail.clone()),
        AgnoFrame::RunContent { .. }
        | AgnoFrame::RunCompleted { .. }
        | AgnoFrame::RunError { .. }
        | AgnoFrame::Unknown { .. } => return None,
    };
    Some(trace)
}

fn tool_kind(tool_name: &str) -> TraceKind {
    let name = tool_name.to_ascii_lowercase();
    if name.starts_with("mcp") {
        TraceKind::Mcp
    } else if name.contains("knowledge") || name.contains("retriev") {
        TraceKind::Rag
    } else if name.contains("transfer") || name.contains("route") {
        TraceKind::Router
    } else {
        TraceKind::Tool
    }
}

fn sanitize_model_id(model_id: Option<String>) -> String {
    model_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string())
}

fn map_init_error(error: AgnoApiError) -> ProviderInitError {
    ProviderInitError::new(format!("Failed to initialize agno-api provider: {error}"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::{Mutex, MutexGuard};

    use agent_provider::RunMessage;
    use agno_api::RunTerminal;
    use serde_json::json;

    use super::*;

    enum FakeStreamOutcome {
        Success {
            updates: Vec<RunUpdate>,
            completion: RunCompletion,
        },
        Error(AgnoApiError),
    }

    struct FakeStreamClient {
        observed_request: Mutex<Option<AgnoRunRequest>>,
        outcome: Mutex<Option<FakeStreamOutcome>>,
    }

    impl FakeStreamClient {
        fn success(updates: Vec<RunUpdate>, completion: RunCompletion) -> Arc<Self> {
            Arc::new(Self {
                observed_request: Mutex::new(None),
                outcome: Mutex::new(Some(FakeStreamOutcome::Success {
                    updates,
                    completion,
                })),
            })
        }

        fn failure(error: AgnoApiError) -> Arc<Self> {
            Arc::new(Self {
                observed_request: Mutex::new(None),
                outcome: Mutex::new(Some(FakeStreamOutcome::Error(error))),
            })
        }

        fn observed_request(&self) -> Option<AgnoRunRequest> {
            lock(&self.observed_request).clone()
        }
    }

    impl StreamClient for FakeStreamClient {
        fn stream_run(
            &self,
            request: &AgnoRunRequest,
            _cancel: &CancelSignal,
            on_update: &mut dyn FnMut(RunUpdate),
        ) -> Result<RunCompletion, AgnoApiError> {
            *lock(&self.observed_request) = Some(request.clone());

            match lock(&self.outcome).take() {
                Some(FakeStreamOutcome::Success {
                    updates,
                    completion,
                }) => {
                    for update in updates {
                        on_update(update);
                    }
                    Ok(completion)
                }
                Some(FakeStreamOutcome::Error(error)) => Err(error),
                None => panic!("fake stream outcome should be consumed exactly once"),
            }
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn completed(text: &str) -> RunCompletion {
        RunCompletion {
            text: text.to_string(),
            metrics: None,
            terminal: RunTerminal::Completed,
        }
    }

    fn request() -> RunRequest {
        RunRequest {
            run_id: 9,
            agent_id: "researcher".to_string(),
            session_id: Some("session-1".to_string()),
            model_id: String::new(),
            instructions: "Cite sources.".to_string(),
            messages: vec![
                RunMessage::user("first"),
                RunMessage::assistant("reply"),
                RunMessage::user("second"),
            ],
            knowledge: vec!["doc-1".to_string()],
        }
    }

    fn run_events(provider: &AgnoApiProvider, cancel: CancelSignal) -> Vec<RunEvent> {
        let mut events = Vec::new();

        provider
            .run(request(), cancel, &mut |event| events.push(event))
            .expect("run should not return provider-level failure");

        events
    }

    #[test]
    fn profile_reports_agno_provider_id_and_default_model() {
        let stream = FakeStreamClient::success(Vec::new(), completed(""));
        let provider = AgnoApiProvider::with_stream_client_for_tests(None, stream);

        let profile = provider.profile();
        assert_eq!(profile.provider_id, AGNO_API_PROVIDER_ID);
        assert_eq!(profile.model_id, "gpt-4o");
    }

    #[test]
    fn run_splits_history_and_forwards_request_fields() {
        let stream = FakeStreamClient::success(Vec::new(), completed("ok"));
        let provider = AgnoApiProvider::with_stream_client_for_tests(
            Some("gpt-4.1".to_string()),
            Arc::clone(&stream) as Arc<dyn StreamClient>,
        );

        run_events(&provider, Arc::new(AtomicBool::new(false)));

        let observed = stream.observed_request().expect("request observed");
        assert_eq!(observed.agent_id, "researcher");
        assert_eq!(observed.input, "second");
        assert_eq!(
            observed.messages,
            vec![
                AgnoHistoryMessage::new("user", "first"),
                AgnoHistoryMessage::new("assistant", "reply"),
            ]
        );
        assert_eq!(observed.model.as_deref(), Some("gpt-4.1"));
        assert_eq!(observed.session_id.as_deref(), Some("session-1"));
        assert_eq!(observed.instructions.as_deref(), Some("Cite sources."));
        assert_eq!(observed.knowledge, vec!["doc-1".to_string()]);
    }

    #[test]
    fn run_maps_updates_to_content_and_trace_then_completed() {
        let stream = FakeStreamClient::success(
            vec![
                RunUpdate::Trace(AgnoFrame::ToolCallStarted {
                    tool_name: "mcp_github".to_string(),
                    arguments: Some(json!({"repo": "agno"})),
                    agent_name: None,
                }),
                RunUpdate::Content {
                    text: "Hel".to_string(),
                },
                RunUpdate::Content {
                    text: "Hello".to_string(),
                },
            ],
            RunCompletion {
                text: "Hello!".to_string(),
                metrics: Some(json!({"tokens": 4})),
                terminal: RunTerminal::Completed,
            },
        );
        let provider = AgnoApiProvider::with_stream_client_for_tests(None, stream);

        let events = run_events(&provider, Arc::new(AtomicBool::new(false)));

        assert!(matches!(events[0], RunEvent::Started { run_id: 9 }));
        assert!(matches!(
            &events[1],
            RunEvent::Trace { trace, .. } if trace.kind == TraceKind::Mcp && trace.title == "Calling mcp_github"
        ));
        assert!(matches!(&events[3], RunEvent::Content { text, .. } if text == "Hello"));
        assert_eq!(
            events.last(),
            Some(&RunEvent::Completed {
                run_id: 9,
                text: "Hello!".to_string(),
                metrics: Some(json!({"tokens": 4})),
            })
        );
    }

    #[test]
    fn run_maps_cancelled_transport_to_cancelled_terminal_event() {
        let stream = FakeStreamClient::failure(AgnoApiError::Cancelled);
        let provider = AgnoApiProvider::with_stream_client_for_tests(None, stream);

        let events = run_events(&provider, Arc::new(AtomicBool::new(false)));

        assert!(matches!(
            events.last(),
            Some(RunEvent::Cancelled { run_id: 9 })
        ));
    }

    #[test]
    fn run_maps_stream_failure_to_failed_terminal_event() {
        let stream = FakeStreamClient::failure(AgnoApiError::StreamFailed {
            message: "tool crashed".to_string(),
        });
        let provider = AgnoApiProvider::with_stream_client_for_tests(None, stream);

        let events = run_events(&provider, Arc::new(AtomicBool::new(false)));

        assert!(matches!(
            events.last(),
            Some(RunEvent::Failed { run_id: 9, error }) if error.contains("tool crashed")
        ));
        assert_eq!(events.iter().filter(|event| event.is_terminal()).count(), 1);
    }

    #[test]
    fn run_short_circuits_when_already_cancelled() {
        let stream = FakeStreamClient::success(Vec::new(), completed("unused"));
        let provider = AgnoApiProvider::with_stream_client_for_tests(
            None,
            Arc::clone(&stream) as Arc<dyn StreamClient>,
        );

        let events = run_events(&provider, Arc::new(AtomicBool::new(true)));

        assert_eq!(
            events,
            vec![
                RunEvent::Started { run_id: 9 },
                RunEvent::Cancelled { run_id: 9 }
            ]
        );
        assert!(stream.observed_request().is_none());
    }

    #[test]
    fn trace_mapping_classifies_frames() {
        let started = trace_from_frame(&AgnoFrame::RunStarted {
            run_id: None,
            agent_name: Some("Team".to_string()),
        })
        .expect("trace");
        assert_eq!(started.kind, TraceKind::Info);
        assert_eq!(started.title, "Team started");

        let completed = trace_from_frame(&AgnoFrame::ToolCallCompleted {
            tool_name: "search_knowledge_base".to_string(),
            result: Some(json!("3 docs")),
            agent_name: None,
        })
        .expect("trace");
        assert_eq!(completed.kind, TraceKind::Success);
        assert_eq!(completed.detail, Some(json!("3 docs")));

        assert_eq!(
            tool_kind("search_knowledge_base"),
            TraceKind::Rag
        );
        assert!(trace_from_frame(&AgnoFrame::RunContent {
            content: "x".to_string()
        })
        .is_none());
    }

    #[test]
    fn new_rejects_unparseable_base_url() {
        let error = match AgnoApiProvider::new(AgnoApiProviderConfig::new("http://exa mple.com")) {
            Ok(_) => panic!("invalid base URL should be rejected"),
            Err(error) => error,
        };
        assert!(error.message().contains("invalid agno-api base URL"));
    }
}
