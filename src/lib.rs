//! Privacy-preserving query gateway.
//!
//! Queries arrive as plaintext or as homomorphically encrypted bundles and
//! are answered in the same mode. Usage telemetry is perturbed with
//! differential-privacy noise before it reaches the federated aggregate.
//! Every operation is gated by a shared API key and a per-peer hourly quota.

pub mod access;
pub mod backend;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hvc;
pub mod orchestrator;
pub mod privacy;
pub mod protocol;
pub mod rate_limit;
pub mod server;
pub mod telemetry;

pub use config::{load_config, ConfigFormat, GatewayConfig};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use gateway::{Gateway, GatewayBuilder, RequestContext};
pub use hvc::{Ciphertext, CiphertextBundle, HomomorphicVectorCipher, HvcError, SchemeContext};
