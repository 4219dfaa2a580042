//! File-backed `tracing` subscriber for the CLI.
//!
//! The REPL owns stdout, so log lines go to `{data_dir}/agno_chat.log`.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "agno_chat.log";
pub const DEFAULT_LOG_FILTER: &str = "warn";

pub fn log_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(LOG_FILE_NAME)
}

/// Builds the filter from an `AGNO_CHAT_LOG`-style directive string.
///
/// Unparseable directives fall back to the default level.
pub fn env_filter(directives: Option<&str>) -> EnvFilter {
    let directives = directives.unwrap_or(DEFAULT_LOG_FILTER);
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs the global subscriber. Returns the log file path.
pub fn init(data_dir: &Path, directives: Option<&str>) -> io::Result<PathBuf> {
    fs::create_dir_all(data_dir)?;
    let path = log_file_path(data_dir);
    let log_file = OpenOptions::new().create(true).append(true).open(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(directives))
        .with_writer(log_file)
        .with_ansi(false)
        .try_init()
        .map_err(|error| io::Error::other(error.to_string()))?;

    Ok(path)
}
