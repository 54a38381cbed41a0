//! Config loading: YAML file → [`AppConfig`] with environment overrides.
//!
//! A missing file is not an error — defaults apply (unconfigured mode).
//! A malformed file is terminal at startup.

use std::path::Path;

use thiserror::Error;

use super::schema::AppConfig;

/// Errors raised while loading configuration.  Terminal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Load configuration from `path`.
///
/// Returns defaults when the file does not exist; env-var overrides for
/// provider API keys are applied in both cases.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let mut config = if path.exists() {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?
    } else {
        log::info!("config file {} not found, using defaults", path.display());
        AppConfig::default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Environment overrides apply to provider API keys only.
///
/// | variable             | target                              |
/// |----------------------|-------------------------------------|
/// | `OPENROUTER_API_KEY` | `llm.providers.openrouter.api_key`  |
/// | `GLM_API_KEY`        | `llm.providers.glm.api_key`         |
pub fn apply_env_overrides(config: &mut AppConfig) {
    for (var, provider) in [("OPENROUTER_API_KEY", "openrouter"), ("GLM_API_KEY", "glm")] {
        if let Ok(key) = std::env::var(var) {
            if key.is_empty() {
                continue;
            }
            if let Some(p) = config.llm.providers.get_mut(provider) {
                p.api_key = key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ProviderConfig;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("no-such-config.yaml")).unwrap();
        assert_eq!(cfg.agent.max_steps, 20);
    }

    #[test]
    fn valid_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "agent:\n  name: tester\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.agent.name, "tester");
    }

    #[test]
    fn malformed_file_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "agent: [not, a, mapping\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_override_sets_api_key_only_for_known_provider() {
        let mut cfg = AppConfig::default();
        cfg.llm
            .providers
            .insert("openrouter".to_owned(), ProviderConfig::default());

        std::env::set_var("OPENROUTER_API_KEY", "sk-or-test");
        apply_env_overrides(&mut cfg);
        std::env::remove_var("OPENROUTER_API_KEY");

        assert_eq!(cfg.llm.providers["openrouter"].api_key, "sk-or-test");
    }
}
