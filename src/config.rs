//! Environment configuration plus the optional JSON provider config file.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const PROVIDER_ENV_VAR: &str = "AGNO_CHAT_PROVIDER";
pub const CONFIG_PATH_ENV_VAR: &str = "AGNO_CHAT_CONFIG_PATH";
pub const DATA_DIR_ENV_VAR: &str = "AGNO_CHAT_DATA_DIR";
pub const AGENT_ENV_VAR: &str = "AGNO_CHAT_AGENT";
pub const LOG_ENV_VAR: &str = "AGNO_CHAT_LOG";
pub const USER_NAME_ENV_VAR: &str = "AGNO_CHAT_USER_NAME";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{CONFIG_PATH_ENV_VAR} must be set for provider '{provider}'")]
    MissingConfigPath { provider: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config file {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub provider: Option<String>,
    pub config_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub agent: Option<String>,
    pub log_filter: Option<String>,
    /// Speaker label for the user in transcripts and exports.
    pub user_name: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            provider: env_string_opt(PROVIDER_ENV_VAR),
            config_path: env_string_opt(CONFIG_PATH_ENV_VAR).map(PathBuf::from),
            data_dir: env_string_opt(DATA_DIR_ENV_VAR).map(PathBuf::from),
            agent: env_string_opt(AGENT_ENV_VAR),
            log_filter: env_string_opt(LOG_ENV_VAR),
            user_name: env_string_opt(USER_NAME_ENV_VAR),
        }
    }

    /// Data directory, defaulting to `.agno_chat/` under `cwd`.
    pub fn data_dir_or(&self, cwd: &Path) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| session_store::default_data_dir(cwd))
    }
}

/// Connection settings for the remote agent service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    #[serde(default)]
    pub default_agent: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &raw)
    }

    pub fn parse(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let invalid = |message: &str| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        if config.base_url.trim().is_empty() {
            return Err(invalid("base_url must not be empty"));
        }
        if config.timeout_sec == Some(0) {
            return Err(invalid("timeout_sec must be > 0"));
        }

        Ok(config)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_sec.map(Duration::from_secs)
    }

    /// Non-empty API key, if one was configured.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{
        ConfigError, EnvConfig, FileConfig, AGENT_ENV_VAR, CONFIG_PATH_ENV_VAR, DATA_DIR_ENV_VAR,
        LOG_ENV_VAR, PROVIDER_ENV_VAR, USER_NAME_ENV_VAR,
    };
    use std::env;
    use std::path::{Path, PathBuf};
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    #[test]
    fn env_defaults_are_unset() {
        let _lock = env_lock();
        let _g1 = set_env_guard(PROVIDER_ENV_VAR, None);
        let _g2 = set_env_guard(CONFIG_PATH_ENV_VAR, None);
        let _g3 = set_env_guard(DATA_DIR_ENV_VAR, None);
        let _g4 = set_env_guard(AGENT_ENV_VAR, None);
        let _g5 = set_env_guard(LOG_ENV_VAR, None);
        let _g6 = set_env_guard(USER_NAME_ENV_VAR, None);

        let config = EnvConfig::from_env();
        assert!(config.provider.is_none());
        assert!(config.config_path.is_none());
        assert!(config.agent.is_none());
        assert!(config.user_name.is_none());
        assert_eq!(
            config.data_dir_or(Path::new("/work")),
            PathBuf::from("/work/.agno_chat")
        );
    }

    #[test]
    fn env_values_are_trimmed_and_blank_is_ignored() {
        let _lock = env_lock();
        let _g1 = set_env_guard(PROVIDER_ENV_VAR, Some(" agno-api "));
        let _g2 = set_env_guard(DATA_DIR_ENV_VAR, Some("/tmp/agno"));
        let _g3 = set_env_guard(AGENT_ENV_VAR, Some("   "));
        let _g4 = set_env_guard(LOG_ENV_VAR, Some("debug"));
        let _g5 = set_env_guard(USER_NAME_ENV_VAR, Some(" Ada "));

        let config = EnvConfig::from_env();
        assert_eq!(config.provider.as_deref(), Some("agno-api"));
        assert_eq!(config.data_dir_or(Path::new("/work")), PathBuf::from("/tmp/agno"));
        assert!(config.agent.is_none());
        assert_eq!(config.log_filter.as_deref(), Some("debug"));
        assert_eq!(config.user_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn file_config_parses_optional_fields() {
        let config = FileConfig::parse(
            Path::new("agno.json"),
            r#"{"base_url":"localhost:7777","api_key":"  ","timeout_sec":30,"default_agent":"writer"}"#,
        )
        .expect("config should parse");

        assert_eq!(config.base_url, "localhost:7777");
        assert!(config.api_key().is_none());
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.default_agent.as_deref(), Some("writer"));
    }

    #[test]
    fn file_config_rejects_unknown_fields() {
        let error = FileConfig::parse(
            Path::new("agno.json"),
            r#"{"base_url":"localhost","retries":3}"#,
        )
        .expect_err("unknown fields are rejected");
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn file_config_rejects_zero_timeout_and_blank_url() {
        let zero = FileConfig::parse(
            Path::new("agno.json"),
            r#"{"base_url":"localhost","timeout_sec":0}"#,
        )
        .expect_err("zero timeout is rejected");
        assert!(zero.to_string().contains("timeout_sec must be > 0"));

        let blank = FileConfig::parse(Path::new("agno.json"), r#"{"base_url":" "}"#)
            .expect_err("blank url is rejected");
        assert!(matches!(blank, ConfigError::Invalid { .. }));
    }

    #[test]
    fn missing_file_reports_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = FileConfig::load(&dir.path().join("missing.json")).expect_err("missing file");
        assert!(matches!(error, ConfigError::Read { .. }));
    }
}
