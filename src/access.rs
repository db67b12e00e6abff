use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    Unauthorized,
}

/// Validates the per-request shared-secret credential.
///
/// Both sides are reduced to BLAKE3 digests and compared with
/// `blake3::Hash`'s constant-time equality, so neither the secret's bytes nor
/// its length influence comparison time.
pub struct AccessGate {
    secret: blake3::Hash,
}

impl AccessGate {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: blake3::hash(secret.as_bytes()),
        }
    }

    pub fn authorize(&self, credential: Option<&str>) -> Authorization {
        match credential {
            Some(presented) if blake3::hash(presented.as_bytes()) == self.secret => {
                Authorization::Authorized
            }
            _ => Authorization::Unauthorized,
        }
    }
}

impl fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGate").finish_non_exhaustive()
    }
}
