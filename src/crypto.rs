//! Cryptographic primitives shared by the challenge, store and verifier.
//!
//! # Algorithms
//!
//! - **Randomness**: OS CSPRNG (`OsRng`), fallible so a missing entropy
//!   source surfaces as an environment error instead of a panic
//! - **Key Derivation**: Argon2id (memory-hard, brute-force resistant)
//! - **Encryption**: ChaCha20-Poly1305 (authenticated encryption)
//! - **Challenge binding**: HMAC-SHA256 with constant-time verification
//!
//! # Security Parameters
//!
//! Default Argon2id parameters:
//! - 64 MB memory (prevents GPU attacks)
//! - 3 iterations
//! - 4 parallelism threads

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::types::{Result, SpeakeasyError};

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Constants
// =============================================================================

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Derived key length (32 bytes)
pub const KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

// =============================================================================
// Key Derivation Parameters
// =============================================================================

/// Argon2id cost parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Iteration count
    pub iterations: u32,
    /// Parallelism (lanes)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheapest parameters Argon2 accepts comfortably. Only for tests and
    /// demo runs; never for a real device.
    pub fn minimal() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| SpeakeasyError::Config(format!("Invalid Argon2 params: {e}")))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Check that Argon2 accepts these parameters.
    pub fn validate(&self) -> Result<()> {
        self.argon2().map(|_| ())
    }
}

// =============================================================================
// Randomness
// =============================================================================

/// Fill `buf` from the OS random source.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| SpeakeasyError::Environment(format!("Secure random source unavailable: {e}")))
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    fill_random(&mut bytes)?;
    Ok(bytes)
}

// =============================================================================
// Key Derivation
// =============================================================================

/// Derive a 256-bit key from `secret` and `salt` using Argon2id.
///
/// Used both for the verifier-store encryption key (secret = device secret)
/// and for gesture key material (secret = canonical gesture encoding).
pub fn derive_key(secret: &[u8], salt: &[u8], params: &KdfParams) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let argon2 = params.argon2()?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(secret, salt, &mut key[..])
        .map_err(|e| SpeakeasyError::Crypto(format!("Key derivation failed: {e}")))?;

    Ok(key)
}

// =============================================================================
// Encryption / Decryption
// =============================================================================

/// Encrypt `plaintext` with ChaCha20-Poly1305, binding `aad`.
///
/// The nonce must never be reused with the same key.
pub fn seal(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| SpeakeasyError::Crypto(format!("Encryption failed: {e}")))
}

/// Decrypt and authenticate a ChaCha20-Poly1305 ciphertext.
///
/// Fails on any tampering with the ciphertext, nonce or `aad`, and on a
/// wrong key.
pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| SpeakeasyError::Crypto("Authentication failed".into()))
}

// =============================================================================
// Challenge Binding
// =============================================================================

/// Domain separation for challenge tags
const CHALLENGE_TAG_DOMAIN: &[u8] = b"speakeasy:verify:v1";

fn challenge_mac(key: &[u8], nonce: &[u8], salt: &[u8]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| SpeakeasyError::Crypto(format!("Invalid HMAC key: {e}")))?;
    mac.update(CHALLENGE_TAG_DOMAIN);
    mac.update(&(nonce.len() as u32).to_be_bytes());
    mac.update(nonce);
    mac.update(&(salt.len() as u32).to_be_bytes());
    mac.update(salt);
    Ok(mac)
}

/// HMAC-SHA256 of a challenge's nonce and salt under `key`.
pub fn challenge_tag(key: &[u8], nonce: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
    Ok(challenge_mac(key, nonce, salt)?.finalize().into_bytes().to_vec())
}

/// Check `expected` against the tag computed under `key`.
///
/// The comparison is constant time in the position of the first
/// mismatching byte.
pub fn verify_challenge_tag(key: &[u8], nonce: &[u8], salt: &[u8], expected: &[u8]) -> Result<bool> {
    Ok(challenge_mac(key, nonce, salt)?.verify_slice(expected).is_ok())
}

// =============================================================================
// Tests
// =============================================================================
