use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendConfig;
use crate::collaborators::RerankConfig;
use crate::hvc::HvcConfig;
use crate::privacy::DpConfig;
use crate::rate_limit::RateLimitConfig;

pub const API_KEY_ENV: &str = "WAZIRA_API_KEY";
pub const DEFAULT_API_KEY: &str = "changeme";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConfigFormat {
    Auto,
    Toml,
    Yaml,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {format:?} config: {details}")]
    Parse {
        format: ConfigFormat,
        details: String,
    },
    #[error("configuration invalid: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct GatewayConfig {
    pub server: ServerSection,
    pub auth: AuthSection,
    pub rate_limit: RateLimitConfig,
    pub hvc: HvcConfig,
    pub privacy: DpConfig,
    pub backend: BackendConfig,
    pub rerank: RerankConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct AuthSection {
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
        }
    }
}

impl std::fmt::Debug for AuthSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSection")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl AuthSection {
    pub fn uses_default_key(&self) -> bool {
        self.api_key == DEFAULT_API_KEY
    }
}

fn default_api_key() -> String {
    DEFAULT_API_KEY.to_owned()
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.api_key.trim().is_empty() {
            return Err(ConfigError::Validation("api key must not be empty".into()));
        }
        if self.rate_limit.requests_per_hour == 0 {
            return Err(ConfigError::Validation(
                "rate limit must allow at least one request per hour".into(),
            ));
        }
        if self.rate_limit.prune_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "rate limit prune interval must be greater than zero".into(),
            ));
        }
        self.hvc
            .validate()
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        self.privacy
            .validate()
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        if self.backend.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "backend timeout must be greater than zero".into(),
            ));
        }
        if self.rerank.top_k == 0 {
            return Err(ConfigError::Validation("rerank top-k must be at least 1".into()));
        }
        Ok(())
    }

    /// Applies `WAZIRA_API_KEY` when it is set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        self.apply_api_key_override(std::env::var(API_KEY_ENV).ok());
    }

    fn apply_api_key_override(&mut self, value: Option<String>) {
        if let Some(key) = value.filter(|key| !key.trim().is_empty()) {
            self.auth.api_key = key;
        }
    }

    pub fn sample() -> Self {
        Self {
            auth: AuthSection {
                api_key: "sample-key".into(),
            },
            hvc: HvcConfig {
                key_seed: Some("shared-sample-passphrase".into()),
                ..HvcConfig::default()
            },
            ..Self::default()
        }
    }
}

pub fn load_config(path: &Path, format: ConfigFormat) -> Result<GatewayConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&contents, resolve_format(path, format))?;
    config.validate()?;
    Ok(config)
}

/// Parses without validating; `Auto` is treated as TOML.
pub fn parse_config(contents: &str, format: ConfigFormat) -> Result<GatewayConfig, ConfigError> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|err| ConfigError::Parse {
            format,
            details: err.to_string(),
        }),
        ConfigFormat::Toml | ConfigFormat::Auto => {
            toml::from_str(contents).map_err(|err| ConfigError::Parse {
                format: ConfigFormat::Toml,
                details: err.to_string(),
            })
        }
    }
}

fn resolve_format(path: &Path, format: ConfigFormat) -> ConfigFormat {
    match format {
        ConfigFormat::Auto => match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        },
        _ => format,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::DpMechanism;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_service_behavior() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.bind.to_string(), "0.0.0.0:8000");
        assert!(config.auth.uses_default_key());
        assert_eq!(config.rate_limit.requests_per_hour, 100);
        assert_eq!(config.privacy.mechanism, DpMechanism::Laplace);
        assert_eq!(config.rerank.top_k, 10);
        config.validate().unwrap();
    }

    #[test]
    fn parses_toml_config() {
        let contents = r#"
            [server]
            bind = "127.0.0.1:9000"

            [auth]
            api-key = "s3cret"

            [rate-limit]
            requests-per-hour = 5

            [hvc]
            dimension = 32
            key-seed = "team passphrase"

            [privacy]
            epsilon = 0.5
            mechanism = "gaussian"

            [backend]
            endpoint = "http://search.internal:8081/search"
            timeout-ms = 750
        "#;
        let config = parse_config(contents, ConfigFormat::Toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.bind.port(), 9000);
        assert_eq!(config.auth.api_key, "s3cret");
        assert_eq!(config.rate_limit.requests_per_hour, 5);
        assert_eq!(config.rate_limit.prune_interval_secs, 300);
        assert_eq!(config.hvc.dimension, 32);
        assert_eq!(config.privacy.mechanism, DpMechanism::Gaussian);
        assert_eq!(config.backend.timeout_ms, 750);
        assert_eq!(config.rerank, RerankConfig::default());
    }

    #[test]
    fn parses_yaml_config() {
        let contents = r#"
            auth:
              api-key: yaml-key
            rerank:
              top-k: 3
        "#;
        let config = parse_config(contents, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.auth.api_key, "yaml-key");
        assert_eq!(config.rerank.top_k, 3);
        assert_eq!(config.backend, BackendConfig::default());
    }

    #[test]
    fn rejects_invalid_sections() {
        let mut config = GatewayConfig::sample();
        config.privacy.epsilon = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = GatewayConfig::sample();
        config.rate_limit.requests_per_hour = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = GatewayConfig::sample();
        config.auth.api_key = " ".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn env_override_replaces_api_key() {
        let mut config = GatewayConfig::default();
        config.apply_api_key_override(Some(String::new()));
        assert!(config.auth.uses_default_key());
        config.apply_api_key_override(Some("from-env".into()));
        assert_eq!(config.auth.api_key, "from-env");
    }

    #[test]
    fn reports_parse_errors_with_format() {
        let err = parse_config("server = [", ConfigFormat::Auto).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Parse {
                format: ConfigFormat::Toml,
                ..
            }
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/wazira.toml"), ConfigFormat::Auto)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
