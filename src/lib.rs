//! Chat client for Agno agents.
//!
//! `ChatApp` owns every session and reconciles its optimistic message log
//! with the runs streaming into it; `RuntimeController` executes runs on
//! worker threads through a `RunProvider` and feeds their events back.
//!
//! ## Provider bootstrap
//!
//! - `AGNO_CHAT_PROVIDER=mock` (default) for deterministic local runs
//! - `AGNO_CHAT_PROVIDER=agno-api` for a remote Agno service
//!
//! With `agno-api`, set `AGNO_CHAT_CONFIG_PATH` to a JSON file of this shape:
//!
//! ```json
//! {
//!   "base_url": "localhost:7777",
//!   "api_key": "optional bearer key",
//!   "timeout_sec": 120,
//!   "default_agent": "general"
//! }
//! ```
//!
//! - `base_url` is required; a missing scheme and `/v1` suffix are filled in.
//! - `timeout_sec` is optional and must be > 0 when provided.
//! - Unknown JSON fields are rejected.
//!
//! Sessions persist to `$AGNO_CHAT_DATA_DIR/sessions.json` (default
//! `./.agno_chat/`); logs go to `agno_chat.log` in the same directory,
//! filtered by `AGNO_CHAT_LOG` (default `warn`).

pub mod agents;
pub mod app;
pub mod commands;
pub mod config;
pub mod logging;
pub mod providers;
pub mod runtime;
