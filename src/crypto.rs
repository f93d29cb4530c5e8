//! # Crypto Primitives for the Challenge-Response Handshake
//!
//! Three small building blocks used by the protocol state machine:
//!
//! - `SharedKey`: the 32-byte pre-shared symmetric secret, wiped on drop
//! - `challenge_hash`: SHA-256 over `nonce || key`, the response digest
//! - `generate_nonce`: a fresh 32-byte challenge from the OS random source
//!
//! The digest comparison helper is constant-time with respect to the digest
//! contents. Lengths are fixed and public, so only the byte values matter.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::AuthError;

/// Byte length of the pre-shared symmetric key.
pub const SHARED_KEY_LEN: usize = 32;

/// Byte length of a random challenge nonce.
pub const CHALLENGE_LEN: usize = 32;

/// Byte length of a challenge response digest (SHA-256 output).
pub const RESPONSE_LEN: usize = 32;

/// Built-in key used when the caller does not supply one.
///
/// A production deployment would provision the key from a secure store and
/// pass it through [`crate::session::AuthOptParams`].
const DEFAULT_SHARED_KEY: [u8; SHARED_KEY_LEN] = [
    0xBD, 0x84, 0xDC, 0x6E, 0x5C, 0x77, 0x41, 0x58, 0xE8, 0xFB, 0x1D, 0xB9, 0x95, 0x39, 0x20,
    0xE4, 0xC5, 0x03, 0x69, 0x9D, 0xBC, 0x53, 0x08, 0x20, 0x1E, 0xF4, 0x72, 0x8E, 0x90, 0x56,
    0x49, 0xA8,
];

/// The 32-byte symmetric secret both peers hold before any session runs.
///
/// Each session owns its key, so two sessions in one process can
/// authenticate against different peers with different secrets. The key
/// material is zeroed when the value is dropped and is never transmitted.
#[derive(Clone)]
pub struct SharedKey([u8; SHARED_KEY_LEN]);

impl SharedKey {
    /// Wrap caller-supplied key bytes.
    pub const fn new(bytes: [u8; SHARED_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, AuthError> {
        let raw = hex::decode(s.trim())
            .map_err(|_| AuthError::InvalidParam("shared key is not valid hex"))?;
        let bytes: [u8; SHARED_KEY_LEN] = raw
            .try_into()
            .map_err(|_| AuthError::InvalidParam("shared key must be 32 bytes"))?;
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_KEY_LEN] {
        &self.0
    }
}

impl Default for SharedKey {
    /// The built-in default key.
    fn default() -> Self {
        Self(DEFAULT_SHARED_KEY)
    }
}

impl Drop for SharedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SharedKey {
    /// Key material never appears in logs or debug output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// Compute the challenge response digest: `SHA-256(nonce || key)`.
///
/// The input ordering (nonce first, key second) is part of the wire
/// contract; both peers must compute the digest the same way.
pub fn challenge_hash(nonce: &[u8; CHALLENGE_LEN], key: &SharedKey) -> [u8; RESPONSE_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

/// Fill a fresh 32-byte nonce from the operating system's random source.
///
/// Nonce unpredictability is what prevents a recorded handshake from being
/// replayed, so a cryptographic generator is required here.
pub fn generate_nonce() -> Result<[u8; CHALLENGE_LEN], AuthError> {
    let mut nonce = [0u8; CHALLENGE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| AuthError::Crypto(format!("random source failed: {e}")))?;
    Ok(nonce)
}

/// Constant-time equality over two digests.
pub fn digest_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Recomputing the digest for the same inputs is deterministic.
    #[test]
    fn test_challenge_hash_deterministic() {
        let key = SharedKey::default();
        let nonce = [0x5Au8; CHALLENGE_LEN];

        let first = challenge_hash(&nonce, &key);
        let second = challenge_hash(&nonce, &key);
        assert_eq!(first, second);
    }

    /// Different nonces or different keys produce different digests.
    #[test]
    fn test_challenge_hash_input_sensitivity() {
        let key = SharedKey::default();
        let nonce_a = [0x00u8; CHALLENGE_LEN];
        let nonce_b = [0xFFu8; CHALLENGE_LEN];
        assert_ne!(challenge_hash(&nonce_a, &key), challenge_hash(&nonce_b, &key));

        let mut other = *key.as_bytes();
        other[0] ^= 0x01;
        let other_key = SharedKey::new(other);
        assert_ne!(
            challenge_hash(&nonce_a, &key),
            challenge_hash(&nonce_a, &other_key)
        );
    }

    /// The input ordering matters: hashing `key || nonce` is a different
    /// digest than `nonce || key` for distinct values.
    #[test]
    fn test_challenge_hash_ordering() {
        let key = SharedKey::default();
        let nonce = [0x11u8; CHALLENGE_LEN];

        let mut swapped = Sha256::new();
        swapped.update(key.as_bytes());
        swapped.update(nonce);
        let swapped: [u8; RESPONSE_LEN] = swapped.finalize().into();

        assert_ne!(challenge_hash(&nonce, &key), swapped);
    }

    /// Two freshly generated nonces should never collide.
    #[test]
    fn test_generate_nonce_freshness() {
        let a = generate_nonce().unwrap();
        let b = generate_nonce().unwrap();
        assert_ne!(a, b);
    }

    /// The comparison helper agrees with plain equality on fixed lengths.
    #[test]
    fn test_digest_eq() {
        let a = [0xABu8; RESPONSE_LEN];
        let mut b = a;
        assert!(digest_eq(&a, &b));
        b[RESPONSE_LEN - 1] ^= 0x01;
        assert!(!digest_eq(&a, &b));
    }

    /// Hex parsing accepts exactly 32 bytes and rejects everything else.
    #[test]
    fn test_shared_key_from_hex() {
        let hexkey = "00".repeat(SHARED_KEY_LEN);
        let key = SharedKey::from_hex(&hexkey).unwrap();
        assert_eq!(key.as_bytes(), &[0u8; SHARED_KEY_LEN]);

        assert!(SharedKey::from_hex("abcd").is_err());
        assert!(SharedKey::from_hex("zz".repeat(32).as_str()).is_err());
    }

    /// Debug formatting redacts the key bytes.
    #[test]
    fn test_shared_key_debug_redacted() {
        let key = SharedKey::default();
        assert_eq!(format!("{key:?}"), "SharedKey(..)");
    }
}
