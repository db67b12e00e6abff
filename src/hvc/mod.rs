//! Homomorphic vector cipher.
//!
//! The gateway never depends on a concrete scheme: everything above this
//! module talks to [`HomomorphicVectorCipher`]. [`SchemeContext`] is the reference
//! implementation and carries the key lifecycle explicitly (`init` once,
//! read-only afterwards) instead of relying on process globals.

pub mod codec;
pub mod scheme;

use std::fmt;

use thiserror::Error;

pub use codec::{
    decrypt_results, decrypt_text, encrypt_results, encrypt_text, CiphertextBundle,
    MAX_BUNDLE_FRAMES,
};
pub use scheme::{HvcConfig, SchemeContext};

/// Ordered slots of a plaintext vector. Length must equal the cipher dimension.
pub type PlaintextVector = Vec<f64>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HvcError {
    #[error("homomorphic scheme used before key material was initialized")]
    SchemeUninitialized,
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(&'static str),
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vector contains non-finite slots")]
    NonFiniteSlot,
    #[error("invalid scheme parameters: {0}")]
    InvalidParameters(&'static str),
    #[error("payload needs {frames} ciphertext frames, limit is {max}")]
    PayloadTooLarge { frames: usize, max: usize },
}

/// Opaque encrypted encoding of a [`PlaintextVector`].
///
/// Only the cipher that produced it can interpret the bytes; there is no
/// equality on ciphertexts outside of homomorphic operations.
#[derive(Clone)]
pub struct Ciphertext {
    bytes: Vec<u8>,
}

impl Ciphertext {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ciphertext")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Interface contract every encryption scheme plugged into the gateway must satisfy.
pub trait HomomorphicVectorCipher: Send + Sync {
    /// Number of slots per plaintext vector.
    fn dimension(&self) -> usize;

    /// Relative round-trip bound: every slot of `decrypt(encrypt(v))` lies
    /// within `tolerance() * max(1, max_i |v_i|)` of `v`.
    fn tolerance(&self) -> f64;

    fn encrypt(&self, vector: &[f64]) -> Result<Ciphertext, HvcError>;

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<PlaintextVector, HvcError>;

    /// Inner product of the two underlying vectors, computed without decrypting
    /// either input. The result decrypts to the scalar broadcast over every slot.
    fn encrypted_dot(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, HvcError>;
}
