//! Text and bundle encodings layered on top of a [`HomomorphicVectorCipher`].
//!
//! Text travels as a sequence of fresh ciphertexts: each block stores its
//! byte length in slot 0 and one byte per remaining slot. A bundle packs the
//! frames into one base64 string for the protocol's `ciphertext` field.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::{Ciphertext, HomomorphicVectorCipher, HvcError};

const BUNDLE_MAGIC: &[u8; 4] = b"HVB1";
/// Upper bound on frames per bundle, enforced when sealing and when decoding.
pub const MAX_BUNDLE_FRAMES: usize = 4_096;
/// Slot 0 holds the block length as a byte value.
const MAX_BLOCK_BYTES: usize = 255;

#[derive(Clone, Debug, Default)]
pub struct CiphertextBundle {
    frames: Vec<Ciphertext>,
}

impl CiphertextBundle {
    pub fn new(frames: Vec<Ciphertext>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[Ciphertext] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body: usize = self.frames.iter().map(|frame| frame.len() + 4).sum();
        let mut out = Vec::with_capacity(8 + body);
        out.extend_from_slice(BUNDLE_MAGIC);
        out.extend_from_slice(&(self.frames.len() as u32).to_le_bytes());
        for frame in &self.frames {
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            out.extend_from_slice(frame.as_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HvcError> {
        if bytes.len() < 8 || bytes[..4] != BUNDLE_MAGIC[..] {
            return Err(HvcError::InvalidCiphertext("not a ciphertext bundle"));
        }
        let count = read_u32(&bytes[4..8]) as usize;
        if count > MAX_BUNDLE_FRAMES {
            return Err(HvcError::InvalidCiphertext("bundle holds too many frames"));
        }
        let mut frames = Vec::with_capacity(count);
        let mut cursor = 8;
        for _ in 0..count {
            let header_end = cursor + 4;
            if header_end > bytes.len() {
                return Err(HvcError::InvalidCiphertext("truncated bundle"));
            }
            let frame_len = read_u32(&bytes[cursor..header_end]) as usize;
            let frame_end = header_end
                .checked_add(frame_len)
                .filter(|end| *end <= bytes.len())
                .ok_or(HvcError::InvalidCiphertext("truncated bundle"))?;
            frames.push(Ciphertext::from_bytes(bytes[header_end..frame_end].to_vec()));
            cursor = frame_end;
        }
        if cursor != bytes.len() {
            return Err(HvcError::InvalidCiphertext("trailing bytes after bundle"));
        }
        Ok(Self { frames })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, HvcError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| HvcError::InvalidCiphertext("ciphertext is not valid base64"))?;
        Self::from_bytes(&bytes)
    }
}

pub fn encrypt_text(
    cipher: &dyn HomomorphicVectorCipher,
    text: &str,
) -> Result<CiphertextBundle, HvcError> {
    let dimension = cipher.dimension();
    if dimension < 2 {
        return Err(HvcError::InvalidParameters("text blocks need at least two slots"));
    }
    let frames = text.len().div_ceil(block_bytes(dimension));
    if frames > MAX_BUNDLE_FRAMES {
        return Err(HvcError::PayloadTooLarge {
            frames,
            max: MAX_BUNDLE_FRAMES,
        });
    }
    let frames = text
        .as_bytes()
        .chunks(block_bytes(dimension))
        .map(|chunk| {
            let mut slots = vec![0.0; dimension];
            slots[0] = chunk.len() as f64;
            for (slot, byte) in slots[1..].iter_mut().zip(chunk) {
                *slot = f64::from(*byte);
            }
            cipher.encrypt(&slots)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CiphertextBundle::new(frames))
}

pub fn decrypt_text(
    cipher: &dyn HomomorphicVectorCipher,
    bundle: &CiphertextBundle,
) -> Result<String, HvcError> {
    let dimension = cipher.dimension();
    let mut bytes = Vec::with_capacity(bundle.len() * dimension.saturating_sub(1));
    for frame in bundle.frames() {
        let slots = cipher.decrypt(frame)?;
        if slots.len() != dimension || dimension < 2 {
            return Err(HvcError::InvalidCiphertext("text block has wrong dimension"));
        }
        let len = usize::from(decode_byte(slots[0])?);
        if len > block_bytes(dimension) {
            return Err(HvcError::InvalidCiphertext("text block length out of range"));
        }
        for slot in &slots[1..=len] {
            bytes.push(decode_byte(*slot)?);
        }
    }
    String::from_utf8(bytes).map_err(|_| HvcError::InvalidCiphertext("text is not valid utf-8"))
}

/// Encrypts an ordered result list; the order survives the round trip.
pub fn encrypt_results(
    cipher: &dyn HomomorphicVectorCipher,
    results: &[String],
) -> Result<CiphertextBundle, HvcError> {
    let encoded = serde_json::to_string(results)
        .map_err(|_| HvcError::InvalidParameters("result list is not serializable"))?;
    encrypt_text(cipher, &encoded)
}

pub fn decrypt_results(
    cipher: &dyn HomomorphicVectorCipher,
    bundle: &CiphertextBundle,
) -> Result<Vec<String>, HvcError> {
    let encoded = decrypt_text(cipher, bundle)?;
    serde_json::from_str(&encoded)
        .map_err(|_| HvcError::InvalidCiphertext("payload is not a result list"))
}

fn decode_byte(slot: f64) -> Result<u8, HvcError> {
    let rounded = slot.round();
    if (slot - rounded).abs() > 0.25 || !(0.0..=255.0).contains(&rounded) {
        return Err(HvcError::InvalidCiphertext("corrupted text block"));
    }
    Ok(rounded as u8)
}

fn block_bytes(dimension: usize) -> usize {
    (dimension - 1).min(MAX_BLOCK_BYTES)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}
