//! The registered verifier and its encrypted at-rest envelope.
//!
//! # Envelope versions
//!
//! - **v2** (written): fresh 16-byte salt and 12-byte nonce per write, the
//!   salt stored next to the ciphertext, the version bound as associated data.
//! - **v1** (read only): a fixed built-in salt and no associated data.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::crypto::{derive_key, generate_random_bytes, open, seal, KdfParams, NONCE_LEN, SALT_LEN};
use crate::types::{Result, SpeakeasyError};

use super::secret::DeviceSecret;

/// Envelope version written by this crate
pub const CURRENT_VERSION: u32 = 2;

/// Fixed-salt envelope version, still readable
pub const LEGACY_VERSION: u32 = 1;

/// Salt used by v1 envelopes
const LEGACY_SALT: &[u8; SALT_LEN] = b"speakeasy.legacy";

// =============================================================================
// Verifier
// =============================================================================

/// The registered secret gesture: derived key material plus the origin it is
/// scoped to. Never leaves the device unencrypted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verifier {
    /// Hex key material derived from the registered gesture and `salt`
    pub hash: String,
    /// Hex registration salt
    pub salt: String,
    /// Origin the verifier (and every token minted from it) is bound to
    pub domain: String,
    /// Key material of the registered duress gesture, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panic_hash: Option<String>,
}

impl Verifier {
    pub fn new(hash: String, salt: String, domain: String) -> Self {
        Self {
            hash,
            salt,
            domain,
            panic_hash: None,
        }
    }

    pub fn with_panic_hash(mut self, panic_hash: String) -> Self {
        self.panic_hash = Some(panic_hash);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.hash.is_empty() {
            return Err(SpeakeasyError::InvalidInput("Verifier hash is empty".into()));
        }
        if self.domain.is_empty() {
            return Err(SpeakeasyError::InvalidInput("Verifier domain is empty".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("hash", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("has_panic", &self.panic_hash.is_some())
            .finish()
    }
}

// =============================================================================
// Stored Record
// =============================================================================

/// Persisted layout: `{version, iv, ciphertext, salt?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub version: u32,
    /// Hex nonce
    pub iv: String,
    /// Base64 ciphertext with auth tag
    pub ciphertext: String,
    /// Hex KDF salt (absent in v1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

fn associated_data(version: u32) -> Vec<u8> {
    format!("speakeasy:verifier:v{version}").into_bytes()
}

/// Encrypt `verifier` into a fresh v2 envelope.
pub fn seal_verifier(
    verifier: &Verifier,
    secret: &DeviceSecret,
    params: &KdfParams,
) -> Result<StoredRecord> {
    let salt: [u8; SALT_LEN] = generate_random_bytes()?;
    let nonce: [u8; NONCE_LEN] = generate_random_bytes()?;

    let key = derive_key(secret.expose(), &salt, params)?;
    let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(verifier)?);
    let ciphertext = seal(&key, &nonce, &plaintext, &associated_data(CURRENT_VERSION))?;

    Ok(StoredRecord {
        version: CURRENT_VERSION,
        iv: hex::encode(nonce),
        ciphertext: BASE64.encode(ciphertext),
        salt: Some(hex::encode(salt)),
    })
}

/// Decrypt an envelope of any readable version.
///
/// Errors are descriptive for logging; callers facing users fold them into
/// "no verifier".
pub fn open_record(
    record: &StoredRecord,
    secret: &DeviceSecret,
    params: &KdfParams,
) -> Result<Verifier> {
    let (salt, aad) = match record.version {
        CURRENT_VERSION => {
            let encoded = record
                .salt
                .as_deref()
                .ok_or_else(|| SpeakeasyError::Crypto("v2 record has no salt".into()))?;
            let salt = hex::decode(encoded)
                .map_err(|e| SpeakeasyError::Crypto(format!("Invalid salt encoding: {e}")))?;
            if salt.len() != SALT_LEN {
                return Err(SpeakeasyError::Crypto("Invalid salt length".into()));
            }
            (salt, associated_data(CURRENT_VERSION))
        }
        LEGACY_VERSION => (LEGACY_SALT.to_vec(), Vec::new()),
        other => {
            return Err(SpeakeasyError::Crypto(format!(
                "Unsupported record version {other}"
            )))
        }
    };

    let nonce: [u8; NONCE_LEN] = hex::decode(&record.iv)
        .map_err(|e| SpeakeasyError::Crypto(format!("Invalid nonce encoding: {e}")))?
        .try_into()
        .map_err(|_| SpeakeasyError::Crypto("Invalid nonce length".into()))?;

    let ciphertext = BASE64
        .decode(&record.ciphertext)
        .map_err(|e| SpeakeasyError::Crypto(format!("Invalid ciphertext encoding: {e}")))?;

    let key = derive_key(secret.expose(), &salt, params)?;
    let plaintext = open(&key, &nonce, &ciphertext, &aad)?;

    let verifier: Verifier = serde_json::from_slice(&plaintext)
        .map_err(|e| SpeakeasyError::Crypto(format!("Decrypted payload is not a verifier: {e}")))?;
    verifier.validate()?;
    Ok(verifier)
}

/// Produce a v1 envelope. Only used to check that old records stay readable.
#[cfg(test)]
pub(crate) fn seal_legacy(
    verifier: &Verifier,
    secret: &DeviceSecret,
    params: &KdfParams,
) -> Result<StoredRecord> {
    let nonce: [u8; NONCE_LEN] = generate_random_bytes()?;
    let key = derive_key(secret.expose(), LEGACY_SALT, params)?;
    let ciphertext = seal(&key, &nonce, &serde_json::to_vec(verifier)?, &[])?;

    Ok(StoredRecord {
        version: LEGACY_VERSION,
        iv: hex::encode(nonce),
        ciphertext: BASE64.encode(ciphertext),
        salt: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> DeviceSecret {
        DeviceSecret::from_bytes(b"0123456789abcdef-device".to_vec()).unwrap()
    }

    fn verifier() -> Verifier {
        Verifier::new("ab".repeat(32), "cd".repeat(16), "https://bar.example".into())
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let params = KdfParams::minimal();
        let record = seal_verifier(&verifier(), &secret(), &params).unwrap();

        assert_eq!(record.version, CURRENT_VERSION);
        assert!(record.salt.is_some());
        assert_eq!(open_record(&record, &secret(), &params).unwrap(), verifier());
    }

    #[test]
    fn test_every_write_uses_fresh_salt_and_nonce() {
        let params = KdfParams::minimal();
        let a = seal_verifier(&verifier(), &secret(), &params).unwrap();
        let b = seal_verifier(&verifier(), &secret(), &params).unwrap();

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_legacy_record_is_readable() {
        let params = KdfParams::minimal();
        let record = seal_legacy(&verifier(), &secret(), &params).unwrap();

        assert_eq!(record.version, LEGACY_VERSION);
        assert_eq!(open_record(&record, &secret(), &params).unwrap(), verifier());
    }

    #[test]
    fn test_version_relabel_fails() {
        let params = KdfParams::minimal();
        let mut record = seal_verifier(&verifier(), &secret(), &params).unwrap();
        record.version = LEGACY_VERSION;
        assert!(open_record(&record, &secret(), &params).is_err());

        record.version = 7;
        assert!(open_record(&record, &secret(), &params).is_err());
    }

    #[test]
    fn test_tampered_fields_fail() {
        let params = KdfParams::minimal();
        let record = seal_verifier(&verifier(), &secret(), &params).unwrap();

        let mut bytes = BASE64.decode(&record.ciphertext).unwrap();
        bytes[0] ^= 0x01;
        let mut tampered = record.clone();
        tampered.ciphertext = BASE64.encode(&bytes);
        assert!(open_record(&tampered, &secret(), &params).is_err());

        let mut iv = hex::decode(&record.iv).unwrap();
        iv[0] ^= 0x80;
        let mut tampered = record.clone();
        tampered.iv = hex::encode(iv);
        assert!(open_record(&tampered, &secret(), &params).is_err());

        let mut salt = hex::decode(record.salt.as_deref().unwrap()).unwrap();
        salt[3] ^= 0x10;
        let mut tampered = record.clone();
        tampered.salt = Some(hex::encode(salt));
        assert!(open_record(&tampered, &secret(), &params).is_err());

        let mut tampered = record;
        tampered.salt = None;
        assert!(open_record(&tampered, &secret(), &params).is_err());
    }

    #[test]
    fn test_wrong_secret_fails() {
        let params = KdfParams::minimal();
        let record = seal_verifier(&verifier(), &secret(), &params).unwrap();
        let other = DeviceSecret::from_bytes(b"another-device-secret".to_vec()).unwrap();
        assert!(open_record(&record, &other, &params).is_err());
    }

    #[test]
    fn test_debug_redacts_hash() {
        let printed = format!("{:?}", verifier());
        assert!(!printed.contains(&"ab".repeat(32)));
        assert!(printed.contains("bar.example"));
    }
}
