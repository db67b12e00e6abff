use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct BackendConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8081/search".to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("no response within {after_ms} ms")]
    Timeout { after_ms: u64 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend returned status {0}")]
    Status(u16),
    #[error("undecodable backend response: {0}")]
    Decode(String),
    #[error("invalid backend endpoint: {0}")]
    Endpoint(String),
}

#[derive(Debug, Serialize)]
struct BackendRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct BackendResponse {
    #[serde(default)]
    results: Vec<String>,
}

/// Document retrieval for a plaintext query, ranked best first.
///
/// Retries, if any, belong inside implementations; callers treat every error
/// as terminal.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<String>, BackendError>;
}

pub struct HttpSearchBackend {
    client: reqwest::Client,
    endpoint: Url,
    timeout_ms: u64,
}

impl HttpSearchBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let endpoint =
            Url::parse(&config.endpoint).map_err(|err| BackendError::Endpoint(err.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| BackendError::Transport(err.without_url().to_string()))?;
        Ok(Self {
            client,
            endpoint,
            timeout_ms: config.timeout_ms,
        })
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn search(&self, query: &str) -> Result<Vec<String>, BackendError> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&BackendRequest { query })
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    BackendError::Timeout {
                        after_ms: self.timeout_ms,
                    }
                } else {
                    BackendError::Transport(err.without_url().to_string())
                }
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }
        let body: BackendResponse = resp
            .json()
            .await
            .map_err(|err| BackendError::Decode(err.without_url().to_string()))?;
        Ok(body.results)
    }
}
