//! Transport-only client primitives for the Agno agent run API.
//!
//! This crate owns request building, the line-oriented frame decoder, and the
//! streaming read loop for one run. It contains no session state and no
//! retry policy: failures are returned to the caller as [`AgnoApiError`].
//!
//! Completion semantics: `RunContent` fragments accumulate into a running
//! total, a non-empty `RunCompleted.content` overrides that total, and a stream
//! that ends without `RunCompleted` completes with whatever accumulated.

pub mod agents;
pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod url;

pub use agents::RemoteAgent;
pub use client::{AgnoApiClient, CancellationSignal, RunCompletion, RunTerminal, RunUpdate};
pub use config::AgnoApiConfig;
pub use decoder::FrameDecoder;
pub use error::AgnoApiError;
pub use events::{AgnoFrame, RunAccumulator};
pub use payload::{AgnoHistoryMessage, AgnoRunRequest};
pub use url::{normalize_agno_url, runs_endpoint};
