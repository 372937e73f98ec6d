// crates/sahay-core/src/core/hashing.rs
// ============================================================================
// Module: SAHAY Canonical Hashing
// Description: RFC 8785 JSON canonicalization and content hashing utilities.
// Purpose: Provide deterministic hashes for audit entries, closure records,
// and on-chain anchors.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! SAHAY hashes all canonical JSON using RFC 8785 (JCS) to guarantee stable,
//! replayable digests: object keys are sorted and numbers serialize in their
//! shortest decimal form, so equivalent payloads hash identically regardless
//! of construction order. Non-finite floats are rejected. Anchors are fixed
//! 32-byte digests derived only from canonical hashes, never raw input.
//!
//! Security posture: hash inputs are untrusted; canonical form is part of
//! the audit and anchoring contract and must never be re-serialized through
//! a different encoder before hashing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported hash algorithms for SAHAY artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing (FIPS-friendly default).
    Sha256,
}

/// Default hash algorithm for SAHAY.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

/// Digest width in bytes for [`HashAlgorithm::Sha256`].
pub const SHA256_DIGEST_BYTES: usize = 32;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
    /// Digest value is not valid lowercase hex of the expected width.
    #[error("invalid digest encoding: {0}")]
    InvalidDigest(String),
}

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Deterministic content hash representation.
///
/// # Invariants
/// - `value` is lowercase hex of the digest bytes for `algorithm`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_encode(bytes),
        }
    }

    /// Returns the 32-zero-byte sentinel digest used as the chain origin.
    #[must_use]
    pub fn zero() -> Self {
        Self::new(DEFAULT_HASH_ALGORITHM, &[0_u8; SHA256_DIGEST_BYTES])
    }
}

impl fmt::Display for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

// ============================================================================
// SECTION: Anchor Hash
// ============================================================================

/// Fixed 32-byte hash submitted to the external anchor contract.
///
/// # Invariants
/// - Constructed only from a [`HashDigest`]; never from raw user input, so
///   anchors carry no PII by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorHash([u8; SHA256_DIGEST_BYTES]);

impl AnchorHash {
    /// Builds an anchor hash from a canonical digest.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::InvalidDigest`] when the digest hex does not
    /// decode to exactly 32 bytes.
    pub fn from_digest(digest: &HashDigest) -> Result<Self, HashError> {
        let bytes = hex_decode(&digest.value)?;
        let fixed: [u8; SHA256_DIGEST_BYTES] = bytes
            .try_into()
            .map_err(|_| HashError::InvalidDigest("digest is not 32 bytes".to_string()))?;
        Ok(Self(fixed))
    }

    /// Returns the raw 32 digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SHA256_DIGEST_BYTES] {
        &self.0
    }

    /// Returns the lowercase hex form of the anchor hash.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }
}

impl fmt::Display for AnchorHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for AnchorHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AnchorHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        let bytes = hex_decode(&value).map_err(serde::de::Error::custom)?;
        let fixed: [u8; SHA256_DIGEST_BYTES] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("anchor hash is not 32 bytes"))?;
        Ok(Self(fixed))
    }
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails,
/// including for non-finite floats.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON using the provided algorithm.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            let digest = hasher.finalize();
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let hi = byte >> 4;
        let lo = byte & 0x0f;
        out.push(hex_digit(hi));
        out.push(hex_digit(lo));
    }
    out
}

/// Returns the lowercase hex digit for a nibble.
const fn hex_digit(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'a' + (nibble - 10)) as char,
    }
}

/// Decodes a lowercase hex string into bytes.
fn hex_decode(value: &str) -> Result<Vec<u8>, HashError> {
    if value.len() % 2 != 0 {
        return Err(HashError::InvalidDigest("odd hex length".to_string()));
    }
    let mut out = Vec::with_capacity(value.len() / 2);
    let bytes = value.as_bytes();
    for pair in bytes.chunks_exact(2) {
        let hi = hex_nibble(pair[0])?;
        let lo = hex_nibble(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

/// Returns the value of a lowercase hex digit.
fn hex_nibble(byte: u8) -> Result<u8, HashError> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        _ => Err(HashError::InvalidDigest("non-hex character".to_string())),
    }
}
