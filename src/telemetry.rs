//! In-process counters and latency samples for the gateway. Nothing is
//! exported; `/health` reports a snapshot and tests assert on it directly.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

pub const SEARCH_QUERIES: &str = "search.queries";
pub const SEARCH_ENCRYPTED: &str = "search.encrypted";
pub const FEDERATED_UPDATES: &str = "federated.updates";
pub const AUTH_REJECTED: &str = "auth.rejected";
pub const RATE_LIMITED: &str = "rate.limited";
pub const BACKEND_FAILURES: &str = "backend.failures";
pub const QUERY_LATENCY: &str = "query.latency";

/// Latency samples kept per metric; older samples are evicted first.
pub const LATENCY_WINDOW: usize = 1_024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("counter overflow for metric {0}")]
    CounterOverflow(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    #[serde(skip)]
    pub taken_at: SystemTime,
    pub counters: BTreeMap<String, u64>,
    pub latencies_ms: BTreeMap<String, Vec<u64>>,
}

#[derive(Default)]
struct Ledger {
    counters: BTreeMap<String, u64>,
    latencies_ms: BTreeMap<String, VecDeque<u64>>,
}

#[derive(Clone, Default)]
pub struct TelemetryHandle {
    ledger: Arc<Mutex<Ledger>>,
}

impl TelemetryHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_counter(&self, name: &str, delta: u64) -> Result<(), TelemetryError> {
        let mut ledger = self.ledger.lock();
        let entry = ledger.counters.entry(name.to_owned()).or_default();
        *entry = entry
            .checked_add(delta)
            .ok_or_else(|| TelemetryError::CounterOverflow(name.to_owned()))?;
        Ok(())
    }

    /// Counter bump for hot paths where an overflow is only worth a log line.
    pub fn incr(&self, name: &str) {
        if let Err(err) = self.record_counter(name, 1) {
            tracing::warn!(%err, "telemetry counter saturated");
        }
    }

    pub fn record_latency_ms(&self, name: &str, value: u64) {
        let mut ledger = self.ledger.lock();
        let samples = ledger.latencies_ms.entry(name.to_owned()).or_default();
        if samples.len() == LATENCY_WINDOW {
            samples.pop_front();
        }
        samples.push_back(value);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.ledger.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.ledger.lock().counters.clone()
    }

    /// Copies current values without resetting them.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let ledger = self.ledger.lock();
        TelemetrySnapshot {
            taken_at: SystemTime::now(),
            counters: ledger.counters.clone(),
            latencies_ms: ledger
                .latencies_ms
                .iter()
                .map(|(name, samples)| (name.clone(), samples.iter().copied().collect()))
                .collect(),
        }
    }

    /// Returns current values and resets the ledger.
    pub fn flush(&self) -> TelemetrySnapshot {
        let mut ledger = self.ledger.lock();
        TelemetrySnapshot {
            taken_at: SystemTime::now(),
            counters: std::mem::take(&mut ledger.counters),
            latencies_ms: std::mem::take(&mut ledger.latencies_ms)
                .into_iter()
                .map(|(name, samples)| (name, samples.into()))
                .collect(),
        }
    }
}
