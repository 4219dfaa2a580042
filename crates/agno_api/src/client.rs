use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, Response};
use serde_json::Value;

use crate::agents::{parse_agent_listing, RemoteAgent};
use crate::config::AgnoApiConfig;
use crate::decoder::FrameDecoder;
use crate::error::{parse_error_message, AgnoApiError};
use crate::events::{AgnoFrame, RunAccumulator};
use crate::headers::build_headers;
use crate::payload::AgnoRunRequest;
use crate::url::{agents_endpoint, runs_endpoint};

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct AgnoApiClient {
    http: Client,
    config: AgnoApiConfig,
}

/// How a run stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTerminal {
    /// A `RunCompleted` frame arrived; reading stopped there.
    Completed,
    /// The body ended without `RunCompleted`.
    Eof,
}

/// Incremental notification delivered while a run streams.
#[derive(Debug, Clone, PartialEq)]
pub enum RunUpdate {
    /// Cumulative text after a non-empty fragment.
    Content { text: String },
    /// Started, tool, or reasoning frame to surface as a trace step.
    Trace(AgnoFrame),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunCompletion {
    pub text: String,
    pub metrics: Option<Value>,
    pub terminal: RunTerminal,
}

impl AgnoApiClient {
    pub fn new(config: AgnoApiConfig) -> Result<Self, AgnoApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(AgnoApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AgnoApiConfig {
        &self.config
    }

    pub fn runs_endpoint(&self) -> String {
        runs_endpoint(&self.config.base_url)
    }

    pub fn build_headers(&self, user_agent: Option<&str>) -> Result<HeaderMap, AgnoApiError> {
        let mut out = HeaderMap::new();
        for (key, value) in build_headers(&self.config, user_agent) {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| AgnoApiError::InvalidHeader(format!("invalid key: {key}")))?,
                HeaderValue::from_str(&value)
                    .map_err(|_| AgnoApiError::InvalidHeader(format!("invalid value for {key}")))?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &AgnoRunRequest,
    ) -> Result<reqwest::RequestBuilder, AgnoApiError> {
        if request.agent_id.trim().is_empty() {
            return Err(AgnoApiError::InvalidBaseUrl(
                "agent id is required to start a run".to_owned(),
            ));
        }

        let headers = self.build_headers(self.config.user_agent.as_deref())?;
        let mut payload = request.clone();
        payload.stream = true;
        Ok(self
            .http
            .post(self.runs_endpoint())
            .headers(headers)
            .json(&payload))
    }

    /// Sends the run request once. Non-2xx responses become
    /// [`AgnoApiError::Status`] with the parsed body message.
    pub async fn send(
        &self,
        request: &AgnoRunRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, AgnoApiError> {
        if is_cancelled(cancellation) {
            return Err(AgnoApiError::Cancelled);
        }

        let response = await_or_cancel(self.build_request(request)?.send(), cancellation)
            .await?
            .map_err(AgnoApiError::from)?;
        ensure_success(response, cancellation).await
    }

    /// Streams decoded frames to `on_frame` until `RunCompleted` or EOF.
    ///
    /// Returns the terminal `RunCompleted` frame when one arrived. A
    /// `RunError` frame ends the stream with [`AgnoApiError::StreamFailed`].
    pub async fn stream_with_handler<F>(
        &self,
        request: &AgnoRunRequest,
        cancellation: Option<&CancellationSignal>,
        mut on_frame: F,
    ) -> Result<Option<AgnoFrame>, AgnoApiError>
    where
        F: FnMut(&AgnoFrame),
    {
        let response = self.send(request, cancellation).await?;
        let mut bytes = response.bytes_stream();
        let mut decoder = FrameDecoder::default();

        loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation).await? else {
                break;
            };
            if is_cancelled(cancellation) {
                return Err(AgnoApiError::Cancelled);
            }
            let chunk = chunk.map_err(AgnoApiError::from)?;
            for frame in decoder.feed(&chunk) {
                if let Some(terminal) = process_frame(frame, &mut on_frame)? {
                    return Ok(Some(terminal));
                }
            }
        }

        if is_cancelled(cancellation) {
            return Err(AgnoApiError::Cancelled);
        }

        if let Some(frame) = decoder.finish() {
            if let Some(terminal) = process_frame(frame, &mut on_frame)? {
                return Ok(Some(terminal));
            }
        }

        Ok(None)
    }

    /// Runs one request to completion, reporting cumulative text and trace
    /// frames through `on_update`.
    pub async fn stream_run<F>(
        &self,
        request: &AgnoRunRequest,
        cancellation: Option<&CancellationSignal>,
        mut on_update: F,
    ) -> Result<RunCompletion, AgnoApiError>
    where
        F: FnMut(RunUpdate),
    {
        let mut accumulator = RunAccumulator::default();
        let terminal = self
            .stream_with_handler(request, cancellation, |frame| match frame {
                AgnoFrame::RunContent { content } => {
                    if let Some(text) = accumulator.push_fragment(content) {
                        on_update(RunUpdate::Content {
                            text: text.to_owned(),
                        });
                    }
                }
                AgnoFrame::RunStarted { .. }
                | AgnoFrame::ToolCallStarted { .. }
                | AgnoFrame::ToolCallCompleted { .. }
                | AgnoFrame::ReasoningStep { .. } => on_update(RunUpdate::Trace(frame.clone())),
                AgnoFrame::RunCompleted { .. }
                | AgnoFrame::RunError { .. }
                | AgnoFrame::Unknown { .. } => {}
            })
            .await?;

        Ok(match terminal {
            Some(AgnoFrame::RunCompleted { content, metrics }) => RunCompletion {
                text: accumulator.complete(content),
                metrics,
                terminal: RunTerminal::Completed,
            },
            _ => RunCompletion {
                text: accumulator.complete(None),
                metrics: None,
                terminal: RunTerminal::Eof,
            },
        })
    }

    /// Lists agents exposed by the service.
    pub async fn list_agents(
        &self,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Vec<RemoteAgent>, AgnoApiError> {
        let mut headers = self.build_headers(self.config.user_agent.as_deref())?;
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response = await_or_cancel(
            self.http
                .get(agents_endpoint(&self.config.base_url))
                .headers(headers)
                .send(),
            cancellation,
        )
        .await?
        .map_err(AgnoApiError::from)?;
        let response = ensure_success(response, cancellation).await?;
        let body = await_or_cancel(response.text(), cancellation)
            .await?
            .map_err(AgnoApiError::from)?;
        let value = serde_json::from_str::<Value>(&body)?;
        Ok(parse_agent_listing(&value))
    }
}

async fn ensure_success(
    response: Response,
    cancellation: Option<&CancellationSignal>,
) -> Result<Response, AgnoApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = await_or_cancel(response.text(), cancellation)
        .await?
        .unwrap_or_default();
    Err(AgnoApiError::Status(status, parse_error_message(status, &body)))
}

/// Forwards a frame and reports whether it ends the run.
fn process_frame<F>(frame: AgnoFrame, on_frame: &mut F) -> Result<Option<AgnoFrame>, AgnoApiError>
where
    F: FnMut(&AgnoFrame),
{
    if let AgnoFrame::RunError { message } = frame {
        return Err(AgnoApiError::StreamFailed { message });
    }

    on_frame(&frame);
    if matches!(frame, AgnoFrame::RunCompleted { .. }) {
        return Ok(Some(frame));
    }
    Ok(None)
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, AgnoApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(AgnoApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(AgnoApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}
