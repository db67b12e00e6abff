//! Differential-privacy noise and the federated telemetry aggregator.

pub mod aggregator;
pub mod dp;

pub use aggregator::{
    AcceptedAck, AggregateSnapshot, AggregateState, AggregatorError, FederatedAggregator,
    TelemetryPayload, TelemetryUpdate,
};
pub use dp::{DpConfig, DpError, DpMechanism, DpNoiser, GaussianNoise, LaplaceNoise, NoiseSource, ZeroNoise};
