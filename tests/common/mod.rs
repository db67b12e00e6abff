#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use wazira_gateway::backend::{BackendError, SearchBackend};
use wazira_gateway::hvc::HvcConfig;
use wazira_gateway::privacy::{DpNoiser, ZeroNoise};
use wazira_gateway::{Gateway, GatewayConfig};

pub const API_KEY: &str = "test-key";
pub const PASSPHRASE: &str = "integration passphrase";

pub enum Behavior {
    Docs(Vec<String>),
    Fail,
    Stall(Duration),
}

/// Search backend double that counts calls.
pub struct MockBackend {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn with_docs(docs: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Docs(docs.iter().map(|doc| doc.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Fail,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn stalling(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Stall(delay),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for MockBackend {
    async fn search(&self, _query: &str) -> Result<Vec<String>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Docs(docs) => Ok(docs.clone()),
            Behavior::Fail => Err(BackendError::Status(503)),
            Behavior::Stall(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Vec::new())
            }
        }
    }
}

pub fn config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.api_key = API_KEY.into();
    config.hvc = HvcConfig {
        dimension: 16,
        key_seed: Some(PASSPHRASE.into()),
        ..HvcConfig::default()
    };
    config.backend.timeout_ms = 200;
    config
}

pub fn gateway_with(backend: Arc<MockBackend>, config: GatewayConfig) -> Gateway {
    Gateway::builder(config)
        .backend(backend)
        .noiser(DpNoiser::with_source(ZeroNoise, 1.0))
        .build()
        .expect("gateway builds")
}

pub fn default_docs() -> Arc<MockBackend> {
    MockBackend::with_docs(&[
        "Paris",
        "Paris is the capital and most populous city of France, for example.",
        "France is a country in Western Europe.",
    ])
}
