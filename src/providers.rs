//! Provider selection and the matching agent directory.

use std::sync::Arc;

use agent_provider::RunProvider;
use agent_provider_agno_api::{AgnoApiProvider, AgnoApiProviderConfig, AGNO_API_PROVIDER_ID};
use agent_provider_mock::{MockProvider, MOCK_PROVIDER_ID};
use agno_api::{AgnoApiClient, AgnoApiConfig, AgnoApiError, RemoteAgent};

use crate::agents::StaticAgentDirectory;
use crate::config::{ConfigError, EnvConfig, FileConfig};

pub const DEFAULT_PROVIDER_ID: &str = MOCK_PROVIDER_ID;

/// Provider id from the environment, defaulting to the mock provider.
pub fn provider_id(env: &EnvConfig) -> &str {
    env.provider.as_deref().unwrap_or(DEFAULT_PROVIDER_ID)
}

/// Loads the JSON config file when the selected provider needs one.
pub fn file_config_for(env: &EnvConfig) -> Result<Option<FileConfig>, ConfigError> {
    match (provider_id(env), env.config_path.as_deref()) {
        (_, Some(path)) => FileConfig::load(path).map(Some),
        (AGNO_API_PROVIDER_ID, None) => Err(ConfigError::MissingConfigPath {
            provider: AGNO_API_PROVIDER_ID.to_string(),
        }),
        _ => Ok(None),
    }
}

pub fn provider_for_id(
    provider_id: &str,
    file_config: Option<&FileConfig>,
) -> Result<Arc<dyn RunProvider>, String> {
    match provider_id {
        MOCK_PROVIDER_ID => Ok(Arc::new(MockProvider::default())),
        AGNO_API_PROVIDER_ID => {
            let file_config = file_config.ok_or_else(|| {
                format!("Provider '{AGNO_API_PROVIDER_ID}' requires a config file")
            })?;
            let provider = AgnoApiProvider::new(agno_provider_config(file_config))
                .map_err(|error| error.to_string())?;
            Ok(Arc::new(provider))
        }
        unknown => Err(format!(
            "Unsupported provider '{unknown}'. Available providers: {MOCK_PROVIDER_ID}, {AGNO_API_PROVIDER_ID}"
        )),
    }
}

fn agno_provider_config(file_config: &FileConfig) -> AgnoApiProviderConfig {
    let mut config = AgnoApiProviderConfig::new(file_config.base_url.clone());
    if let Some(api_key) = file_config.api_key() {
        config = config.with_api_key(api_key);
    }
    if let Some(timeout) = file_config.timeout() {
        config = config.with_timeout(timeout);
    }
    config
}

/// Agents for the selected provider. The remote provider lists agents from
/// the service and falls back to the built-in set when listing fails.
pub fn agent_directory_for(
    provider_id: &str,
    file_config: Option<&FileConfig>,
) -> StaticAgentDirectory {
    match (provider_id, file_config) {
        (AGNO_API_PROVIDER_ID, Some(file_config)) => match fetch_remote_agents(file_config) {
            Ok(remote) => StaticAgentDirectory::from_remote(remote),
            Err(error) => {
                tracing::warn!(%error, "agent listing failed, using built-in agents");
                StaticAgentDirectory::builtin()
            }
        },
        _ => StaticAgentDirectory::builtin(),
    }
}

fn fetch_remote_agents(file_config: &FileConfig) -> Result<Vec<RemoteAgent>, AgnoApiError> {
    let mut config = AgnoApiConfig::new(file_config.base_url.clone());
    if let Some(api_key) = file_config.api_key() {
        config = config.with_api_key(api_key);
    }
    if let Some(timeout) = file_config.timeout() {
        config = config.with_timeout(timeout);
    }
    let client = AgnoApiClient::new(config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            AgnoApiError::Runtime(format!("failed to initialize tokio runtime: {error}"))
        })?;
    runtime.block_on(client.list_agents(None))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn env_with(provider: Option<&str>, config_path: Option<PathBuf>) -> EnvConfig {
        EnvConfig {
            provider: provider.map(str::to_string),
            config_path,
            data_dir: None,
            agent: None,
            log_filter: None,
            user_name: None,
        }
    }

    #[test]
    fn provider_for_id_supports_mock() {
        let provider = provider_for_id("mock", None).expect("mock provider should resolve");
        assert_eq!(provider.profile().provider_id, "mock");
    }

    #[test]
    fn provider_for_id_builds_agno_api_from_file_config() {
        let file_config = FileConfig {
            base_url: "localhost:7777".to_string(),
            api_key: Some("secret".to_string()),
            timeout_sec: Some(5),
            default_agent: None,
        };

        let provider =
            provider_for_id("agno-api", Some(&file_config)).expect("agno-api should resolve");
        assert_eq!(provider.profile().provider_id, "agno-api");
    }

    #[test]
    fn provider_for_id_rejects_unknown_provider() {
        let error = match provider_for_id("custom", None) {
            Ok(_) => panic!("unknown providers should fail"),
            Err(error) => error,
        };

        assert!(error.contains("Unsupported provider 'custom'"));
    }

    #[test]
    fn agno_api_requires_config_path() {
        let env = env_with(Some("agno-api"), None);
        assert!(matches!(
            file_config_for(&env),
            Err(ConfigError::MissingConfigPath { .. })
        ));

        let env = env_with(None, None);
        assert_eq!(provider_id(&env), "mock");
        assert!(file_config_for(&env).expect("mock needs no file").is_none());
    }

    #[test]
    fn mock_provider_uses_builtin_agents() {
        let directory = agent_directory_for("mock", None);
        assert_eq!(directory, StaticAgentDirectory::builtin());
    }
}
