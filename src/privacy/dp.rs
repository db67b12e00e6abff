use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Noise distribution applied to telemetry values.
///
/// `Laplace` with scale `sensitivity / epsilon` gives pure epsilon-DP.
/// `Gaussian` with the same scale as its standard deviation does NOT: it only
/// yields (epsilon, delta)-DP for a delta that depends on the scale, and is
/// offered for compatibility with clients calibrated against it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DpMechanism {
    Laplace,
    Gaussian,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct DpConfig {
    pub epsilon: f64,
    pub sensitivity: f64,
    pub mechanism: DpMechanism,
    /// Fixes the noise RNG seed; only meant for reproducible test runs.
    pub seed: Option<u64>,
}

impl Default for DpConfig {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            sensitivity: 1.0,
            mechanism: DpMechanism::Laplace,
            seed: None,
        }
    }
}

impl DpConfig {
    pub fn validate(&self) -> Result<(), DpError> {
        check_epsilon(self.epsilon)?;
        if !self.sensitivity.is_finite() || self.sensitivity <= 0.0 {
            return Err(DpError::InvalidSensitivity);
        }
        if !(self.sensitivity / self.epsilon).is_finite() {
            return Err(DpError::InvalidEpsilon);
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DpError {
    #[error("epsilon must be > 0 and give a finite noise scale")]
    InvalidEpsilon,
    #[error("sensitivity must be positive")]
    InvalidSensitivity,
    #[error("value to perturb must be finite")]
    NonFiniteValue,
}

/// Zero-mean random source the noiser draws from, parameterized by scale.
pub trait NoiseSource: Send + Sync {
    fn sample(&self, scale: f64) -> f64;

    fn mechanism(&self) -> DpMechanism;
}

pub struct LaplaceNoise {
    rng: Mutex<ChaCha20Rng>,
}

impl LaplaceNoise {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::from_seed(seed)),
        }
    }
}

impl NoiseSource for LaplaceNoise {
    fn sample(&self, scale: f64) -> f64 {
        // Inverse CDF: u ~ U(-1/2, 1/2), x = -b·sgn(u)·ln(1 - 2|u|).
        let u: f64 = self.rng.lock().gen::<f64>() - 0.5;
        let sign = if u >= 0.0 { 1.0 } else { -1.0 };
        let magnitude = (1.0 - 2.0 * u.abs()).max(1e-12);
        -scale * sign * magnitude.ln()
    }

    fn mechanism(&self) -> DpMechanism {
        DpMechanism::Laplace
    }
}

pub struct GaussianNoise {
    rng: Mutex<ChaCha20Rng>,
}

impl GaussianNoise {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::from_seed(seed)),
        }
    }
}

impl NoiseSource for GaussianNoise {
    fn sample(&self, scale: f64) -> f64 {
        match Normal::new(0.0, scale) {
            Ok(normal) => normal.sample(&mut *self.rng.lock()),
            Err(_) => 0.0,
        }
    }

    fn mechanism(&self) -> DpMechanism {
        DpMechanism::Gaussian
    }
}

/// Adds nothing. Lets tests assert exact aggregate arithmetic.
pub struct ZeroNoise;

impl NoiseSource for ZeroNoise {
    fn sample(&self, _scale: f64) -> f64 {
        0.0
    }

    fn mechanism(&self) -> DpMechanism {
        DpMechanism::Laplace
    }
}

pub struct DpNoiser {
    source: Box<dyn NoiseSource>,
    sensitivity: f64,
}

impl DpNoiser {
    pub fn from_config(config: &DpConfig) -> Self {
        let seed = match config.seed {
            Some(seed) => {
                let mut bytes = [0u8; 32];
                bytes[..8].copy_from_slice(&seed.to_le_bytes());
                bytes
            }
            None => random_seed(),
        };
        let source: Box<dyn NoiseSource> = match config.mechanism {
            DpMechanism::Laplace => Box::new(LaplaceNoise::new(seed)),
            DpMechanism::Gaussian => {
                warn!("gaussian telemetry noise configured; this is (epsilon, delta)-DP, not epsilon-DP");
                Box::new(GaussianNoise::new(seed))
            }
        };
        Self {
            source,
            sensitivity: config.sensitivity,
        }
    }

    pub fn with_source(source: impl NoiseSource + 'static, sensitivity: f64) -> Self {
        Self {
            source: Box::new(source),
            sensitivity,
        }
    }

    pub fn mechanism(&self) -> DpMechanism {
        self.source.mechanism()
    }

    /// Returns `value` plus zero-mean noise of scale `sensitivity / epsilon`.
    pub fn add_noise(&self, value: f64, epsilon: f64) -> Result<f64, DpError> {
        check_epsilon(epsilon)?;
        if !value.is_finite() {
            return Err(DpError::NonFiniteValue);
        }
        let scale = self.sensitivity / epsilon;
        if !scale.is_finite() {
            return Err(DpError::InvalidEpsilon);
        }
        let noisy = value + self.source.sample(scale);
        if !noisy.is_finite() {
            return Err(DpError::NonFiniteValue);
        }
        Ok(noisy)
    }
}

fn check_epsilon(epsilon: f64) -> Result<(), DpError> {
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(DpError::InvalidEpsilon);
    }
    Ok(())
}

fn random_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    let mut rng = StdRng::from_entropy();
    rng.fill_bytes(&mut seed);
    seed
}
