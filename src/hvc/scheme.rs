//! Reference scheme: isometric masking.
//!
//! Key material is a secret orthogonal basis `Q` and a secret scale `k`.
//! `encrypt(v) = k·Q·v + e`, where `e` is small deterministic encoding noise,
//! so decryption is approximate in the same way CKKS is. Orthogonal maps
//! preserve inner products, which makes `<ca, cb> = k²·<a, b>` computable on
//! ciphertexts alone; the product is projected onto the public evaluation
//! vector `w = Q·1` so it decrypts to the dot product broadcast over all slots.
//!
//! This scheme demonstrates the interface contract. It is not semantically
//! secure and must be replaced by a lattice scheme before real deployment.

use std::fmt;
use std::sync::OnceLock;

use blake3::Hasher;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Ciphertext, HomomorphicVectorCipher, HvcError, PlaintextVector};

const FRAME_MAGIC: &[u8; 4] = b"HVC1";
const FRAME_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 1 + 8 + 4;
const KEY_SEED_CONTEXT: &str = "wazira-gateway 2024-06 hvc key seed";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct HvcConfig {
    pub dimension: usize,
    /// Relative round-trip bound published through
    /// [`HomomorphicVectorCipher::tolerance`]; scaled by `max(1, max |v_i|)`.
    pub tolerance: f64,
    /// Standard deviation of the encoding noise added to fresh ciphertexts.
    pub noise_stddev: f64,
    /// Passphrase the key material is derived from. Clients holding the same
    /// passphrase produce ciphertexts this gateway can decrypt. `None` draws a
    /// fresh key on every start.
    pub key_seed: Option<String>,
}

impl Default for HvcConfig {
    fn default() -> Self {
        Self {
            dimension: 64,
            tolerance: 1e-6,
            noise_stddev: 1e-9,
            key_seed: None,
        }
    }
}

impl HvcConfig {
    pub fn validate(&self) -> Result<(), HvcError> {
        if self.dimension < 2 {
            return Err(HvcError::InvalidParameters("dimension must be at least 2"));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(HvcError::InvalidParameters("tolerance must be positive"));
        }
        if !self.noise_stddev.is_finite() || self.noise_stddev < 0.0 {
            return Err(HvcError::InvalidParameters("noise stddev must be non-negative"));
        }
        if self.noise_stddev >= self.tolerance {
            return Err(HvcError::InvalidParameters(
                "encoding noise must stay below the decrypt tolerance",
            ));
        }
        Ok(())
    }
}

/// Public identifier of a key context, embedded in every ciphertext frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyFingerprint(pub [u8; 8]);

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameKind {
    Fresh,
    Product,
}

impl FrameKind {
    fn tag(self) -> u8 {
        match self {
            FrameKind::Fresh => 1,
            FrameKind::Product => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(FrameKind::Fresh),
            2 => Some(FrameKind::Product),
            _ => None,
        }
    }
}

struct KeyMaterial {
    fingerprint: KeyFingerprint,
    /// Rows of the orthogonal matrix `Q`.
    basis: Vec<Vec<f64>>,
    scale: f64,
    /// `Q·1`, the only key-derived value the evaluator needs.
    evaluation: Vec<f64>,
}

impl KeyMaterial {
    fn generate(dimension: usize, seed: [u8; 32]) -> Result<Self, HvcError> {
        let mut rng = ChaCha20Rng::from_seed(seed);
        let normal =
            Normal::new(0.0, 1.0).map_err(|_| HvcError::InvalidParameters("key sampler"))?;
        let mut basis: Vec<Vec<f64>> = Vec::with_capacity(dimension);
        let mut attempts = 0usize;
        while basis.len() < dimension {
            attempts += 1;
            if attempts > dimension * 8 {
                return Err(HvcError::InvalidParameters(
                    "failed to sample an orthogonal basis",
                ));
            }
            let mut row: Vec<f64> = (0..dimension).map(|_| normal.sample(&mut rng)).collect();
            // Two Gram-Schmidt passes keep the basis orthogonal to ~1e-15.
            for _ in 0..2 {
                for existing in &basis {
                    let projection = dot(&row, existing);
                    for (slot, basis_slot) in row.iter_mut().zip(existing) {
                        *slot -= projection * basis_slot;
                    }
                }
            }
            let norm = dot(&row, &row).sqrt();
            if norm < 1e-6 {
                continue;
            }
            row.iter_mut().for_each(|slot| *slot /= norm);
            basis.push(row);
        }
        let scale = rng.gen_range(2.0..16.0);
        let evaluation = basis.iter().map(|row| row.iter().sum()).collect();

        let mut hasher = Hasher::new();
        hasher.update(b"hvc/fingerprint");
        hasher.update(&seed);
        let mut fingerprint = [0u8; 8];
        fingerprint.copy_from_slice(&hasher.finalize().as_bytes()[..8]);

        Ok(Self {
            fingerprint: KeyFingerprint(fingerprint),
            basis,
            scale,
            evaluation,
        })
    }

    fn forward(&self, vector: &[f64]) -> Vec<f64> {
        self.basis.iter().map(|row| dot(row, vector)).collect()
    }

    fn inverse(&self, slots: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; slots.len()];
        for (row, slot) in self.basis.iter().zip(slots) {
            for (acc, basis_slot) in out.iter_mut().zip(row) {
                *acc += basis_slot * slot;
            }
        }
        out
    }
}

/// Explicitly initialized key context implementing [`HomomorphicVectorCipher`].
///
/// Every operation fails with [`HvcError::SchemeUninitialized`] until
/// [`SchemeContext::init`] succeeds. After that the key material is read-only
/// and all operations may run in parallel.
pub struct SchemeContext {
    config: HvcConfig,
    keys: OnceLock<KeyMaterial>,
    init_lock: Mutex<()>,
}

impl SchemeContext {
    pub fn new(config: HvcConfig) -> Result<Self, HvcError> {
        config.validate()?;
        Ok(Self {
            config,
            keys: OnceLock::new(),
            init_lock: Mutex::new(()),
        })
    }

    /// Establishes key material once. Later calls return the live fingerprint
    /// without touching the keys.
    pub fn init(&self) -> Result<KeyFingerprint, HvcError> {
        if let Some(keys) = self.keys.get() {
            return Ok(keys.fingerprint);
        }
        let _guard = self.init_lock.lock();
        if let Some(keys) = self.keys.get() {
            return Ok(keys.fingerprint);
        }
        let seed = match &self.config.key_seed {
            Some(passphrase) => blake3::derive_key(KEY_SEED_CONTEXT, passphrase.as_bytes()),
            None => random_seed(),
        };
        let material = KeyMaterial::generate(self.config.dimension, seed)?;
        let fingerprint = material.fingerprint;
        // Only the holder of `init_lock` ever sets the cell.
        let _ = self.keys.set(material);
        info!(
            %fingerprint,
            dimension = self.config.dimension,
            "homomorphic key material initialized"
        );
        Ok(fingerprint)
    }

    pub fn is_initialized(&self) -> bool {
        self.keys.get().is_some()
    }

    pub fn fingerprint(&self) -> Option<KeyFingerprint> {
        self.keys.get().map(|keys| keys.fingerprint)
    }

    pub fn config(&self) -> &HvcConfig {
        &self.config
    }

    fn keys(&self) -> Result<&KeyMaterial, HvcError> {
        self.keys.get().ok_or(HvcError::SchemeUninitialized)
    }

    fn encoding_noise(&self, keys: &KeyMaterial, vector: &[f64]) -> Result<Vec<f64>, HvcError> {
        let dimension = self.config.dimension;
        if self.config.noise_stddev == 0.0 {
            return Ok(vec![0.0; dimension]);
        }
        let mut hasher = Hasher::new();
        hasher.update(b"hvc/noise");
        hasher.update(&keys.fingerprint.0);
        for slot in vector {
            hasher.update(&slot.to_le_bytes());
        }
        let mut rng = ChaCha20Rng::from_seed(*hasher.finalize().as_bytes());
        let normal = Normal::new(0.0, self.config.noise_stddev)
            .map_err(|_| HvcError::InvalidParameters("noise stddev"))?;
        Ok((0..dimension).map(|_| normal.sample(&mut rng)).collect())
    }

    fn encode_frame(&self, keys: &KeyMaterial, kind: FrameKind, slots: &[f64]) -> Ciphertext {
        let mut bytes = Vec::with_capacity(HEADER_LEN + slots.len() * 8);
        bytes.extend_from_slice(FRAME_MAGIC);
        bytes.push(FRAME_VERSION);
        bytes.push(kind.tag());
        bytes.extend_from_slice(&keys.fingerprint.0);
        bytes.extend_from_slice(&(slots.len() as u32).to_le_bytes());
        for slot in slots {
            bytes.extend_from_slice(&slot.to_le_bytes());
        }
        Ciphertext::from_bytes(bytes)
    }

    fn decode_frame(
        &self,
        keys: &KeyMaterial,
        ciphertext: &Ciphertext,
    ) -> Result<(FrameKind, Vec<f64>), HvcError> {
        let bytes = ciphertext.as_bytes();
        if bytes.len() < HEADER_LEN {
            return Err(HvcError::InvalidCiphertext("truncated frame header"));
        }
        if bytes[..4] != FRAME_MAGIC[..] {
            return Err(HvcError::InvalidCiphertext("unknown frame magic"));
        }
        if bytes[4] != FRAME_VERSION {
            return Err(HvcError::InvalidCiphertext("unsupported frame version"));
        }
        let kind = FrameKind::from_tag(bytes[5])
            .ok_or(HvcError::InvalidCiphertext("unknown frame kind"))?;
        if bytes[6..14] != keys.fingerprint.0 {
            return Err(HvcError::InvalidCiphertext(
                "ciphertext produced under a different key context",
            ));
        }
        let mut dimension_bytes = [0u8; 4];
        dimension_bytes.copy_from_slice(&bytes[14..HEADER_LEN]);
        let dimension = u32::from_le_bytes(dimension_bytes) as usize;
        if dimension != self.config.dimension {
            return Err(HvcError::InvalidCiphertext("frame dimension does not match scheme"));
        }
        let body = &bytes[HEADER_LEN..];
        if body.len() != dimension * 8 {
            return Err(HvcError::InvalidCiphertext("frame length does not match dimension"));
        }
        let mut slots = Vec::with_capacity(dimension);
        for chunk in body.chunks_exact(8) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            let slot = f64::from_le_bytes(raw);
            if !slot.is_finite() {
                return Err(HvcError::InvalidCiphertext("non-finite slot"));
            }
            slots.push(slot);
        }
        Ok((kind, slots))
    }
}

impl HomomorphicVectorCipher for SchemeContext {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn tolerance(&self) -> f64 {
        self.config.tolerance
    }

    fn encrypt(&self, vector: &[f64]) -> Result<Ciphertext, HvcError> {
        let keys = self.keys()?;
        if vector.len() != self.config.dimension {
            return Err(HvcError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|slot| !slot.is_finite()) {
            return Err(HvcError::NonFiniteSlot);
        }
        let noise = self.encoding_noise(keys, vector)?;
        let slots: Vec<f64> = keys
            .forward(vector)
            .into_iter()
            .zip(noise)
            .map(|(slot, e)| keys.scale * slot + e)
            .collect();
        if slots.iter().any(|slot| !slot.is_finite()) {
            return Err(HvcError::NonFiniteSlot);
        }
        Ok(self.encode_frame(keys, FrameKind::Fresh, &slots))
    }

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<PlaintextVector, HvcError> {
        let keys = self.keys()?;
        let (kind, slots) = self.decode_frame(keys, ciphertext)?;
        let divisor = match kind {
            FrameKind::Fresh => keys.scale,
            FrameKind::Product => keys.scale * keys.scale,
        };
        Ok(keys
            .inverse(&slots)
            .into_iter()
            .map(|slot| slot / divisor)
            .collect())
    }

    fn encrypted_dot(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, HvcError> {
        let keys = self.keys()?;
        let (kind_a, slots_a) = self.decode_frame(keys, a)?;
        let (kind_b, slots_b) = self.decode_frame(keys, b)?;
        if kind_a != FrameKind::Fresh || kind_b != FrameKind::Fresh {
            return Err(HvcError::InvalidCiphertext(
                "product ciphertexts cannot be multiplied again",
            ));
        }
        let product = dot(&slots_a, &slots_b);
        if !product.is_finite() {
            return Err(HvcError::NonFiniteSlot);
        }
        let slots: Vec<f64> = keys.evaluation.iter().map(|w| w * product).collect();
        Ok(self.encode_frame(keys, FrameKind::Product, &slots))
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn random_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    let mut rng = StdRng::from_entropy();
    rng.fill_bytes(&mut seed);
    seed
}
