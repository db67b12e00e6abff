use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::dp::{DpError, DpNoiser};

/// Raw telemetry as submitted by a client. Both fields are required; they are
/// optional here so a missing field surfaces as [`AggregatorError::MalformedUpdate`]
/// rather than as a generic decode failure.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TelemetryPayload {
    #[serde(rename = "noisyDwell", default)]
    pub noisy_dwell: Option<f64>,
    #[serde(default)]
    pub count: Option<i64>,
}

impl TelemetryPayload {
    pub fn new(noisy_dwell: f64, count: i64) -> Self {
        Self {
            noisy_dwell: Some(noisy_dwell),
            count: Some(count),
        }
    }
}

/// An accepted update, after server-side noise injection. Never mutated again.
#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
pub struct TelemetryUpdate {
    #[serde(rename = "noisyDwell")]
    pub noisy_dwell: f64,
    pub count: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AggregateState {
    pub total_noisy_dwell: f64,
    pub total_count: u64,
    pub update_count: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct AggregateSnapshot {
    #[serde(rename = "mean_noisyDwell")]
    pub mean_noisy_dwell: f64,
    #[serde(rename = "count")]
    pub total_count: u64,
    #[serde(rename = "num_updates")]
    pub update_count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceptedAck {
    pub status: String,
    pub num_updates: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("malformed update: {0}")]
    MalformedUpdate(&'static str),
    #[error(transparent)]
    Noise(#[from] DpError),
}

#[derive(Default)]
struct Ledger {
    log: Vec<TelemetryUpdate>,
    state: AggregateState,
}

/// Process-wide accumulator for federated usage telemetry.
///
/// The log and running totals live behind one lock so every accepted update
/// lands as a single transaction and readers never observe a torn snapshot.
pub struct FederatedAggregator {
    noiser: DpNoiser,
    epsilon: f64,
    ledger: Mutex<Ledger>,
}

impl FederatedAggregator {
    pub fn new(noiser: DpNoiser, epsilon: f64) -> Self {
        Self {
            noiser,
            epsilon,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn accept(&self, payload: TelemetryPayload) -> Result<AcceptedAck, AggregatorError> {
        let dwell = payload
            .noisy_dwell
            .ok_or(AggregatorError::MalformedUpdate("missing noisyDwell"))?;
        let count = payload
            .count
            .ok_or(AggregatorError::MalformedUpdate("missing count"))?;
        let count =
            u64::try_from(count).map_err(|_| AggregatorError::MalformedUpdate("negative count"))?;
        if !dwell.is_finite() {
            return Err(AggregatorError::MalformedUpdate("noisyDwell must be finite"));
        }

        let update = TelemetryUpdate {
            noisy_dwell: self.noiser.add_noise(dwell, self.epsilon)?,
            count,
        };

        let mut ledger = self.ledger.lock();
        ledger.log.push(update);
        ledger.state.total_noisy_dwell += update.noisy_dwell;
        ledger.state.total_count = ledger.state.total_count.saturating_add(update.count);
        ledger.state.update_count += 1;
        let num_updates = ledger.state.update_count;
        drop(ledger);

        debug!(num_updates, "federated update accepted");
        Ok(AcceptedAck {
            status: "received".into(),
            num_updates,
        })
    }

    pub fn aggregate(&self) -> AggregateSnapshot {
        let state = self.state();
        AggregateSnapshot {
            mean_noisy_dwell: state.total_noisy_dwell / state.total_count.max(1) as f64,
            total_count: state.total_count,
            update_count: state.update_count,
        }
    }

    pub fn state(&self) -> AggregateState {
        self.ledger.lock().state
    }

    pub fn log(&self) -> Vec<TelemetryUpdate> {
        self.ledger.lock().log.clone()
    }
}
