use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::hvc::HvcError;
use crate::privacy::{AggregatorError, DpError};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Terminal failure for one request. None of these are retried inside the
/// gateway, and no message carries query text, ciphertext or key material.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing or invalid api key")]
    Unauthorized,
    #[error("rate limit exceeded, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error(transparent)]
    Cipher(#[from] HvcError),
    #[error("search backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),
    #[error(transparent)]
    DifferentialPrivacy(#[from] DpError),
    #[error(transparent)]
    Aggregator(#[from] AggregatorError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Stable, machine-readable failure class reported to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    RateLimited,
    MalformedInput,
    PayloadTooLarge,
    SchemeUninitialized,
    InvalidCiphertext,
    BackendUnavailable,
    InvalidEpsilon,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::SchemeUninitialized => "scheme_uninitialized",
            ErrorKind::InvalidCiphertext => "invalid_ciphertext",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::InvalidEpsilon => "invalid_epsilon",
            ErrorKind::Internal => "internal",
        }
    }
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Unauthorized => ErrorKind::Unauthorized,
            GatewayError::RateLimited { .. } => ErrorKind::RateLimited,
            GatewayError::MalformedInput(_) => ErrorKind::MalformedInput,
            GatewayError::Cipher(err) => match err {
                HvcError::SchemeUninitialized => ErrorKind::SchemeUninitialized,
                HvcError::InvalidCiphertext(_) => ErrorKind::InvalidCiphertext,
                HvcError::DimensionMismatch { .. } | HvcError::NonFiniteSlot => {
                    ErrorKind::MalformedInput
                }
                HvcError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
                HvcError::InvalidParameters(_) => ErrorKind::Internal,
            },
            GatewayError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            GatewayError::DifferentialPrivacy(err) => dp_kind(err),
            GatewayError::Aggregator(err) => match err {
                AggregatorError::MalformedUpdate(_) => ErrorKind::MalformedInput,
                AggregatorError::Noise(err) => dp_kind(err),
            },
            GatewayError::Config(_) => ErrorKind::Internal,
        }
    }
}

fn dp_kind(err: &DpError) -> ErrorKind {
    match err {
        DpError::InvalidEpsilon => ErrorKind::InvalidEpsilon,
        DpError::NonFiniteValue => ErrorKind::MalformedInput,
        DpError::InvalidSensitivity => ErrorKind::Internal,
    }
}
