//! Single-use challenges.
//!
//! A challenge is a random nonce and salt with an expiry. The generator
//! remembers the nonces of challenges that are still open and redraws on
//! collision. Nonces are forgotten once their challenge has expired; an
//! expired challenge is refused by the verifier regardless of its nonce.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::generate_random_bytes;
use crate::types::{Result, SpeakeasyError};

/// Nonce length in bytes (hex-encoded on the wire)
pub const CHALLENGE_NONCE_LEN: usize = 16;

/// Salt length in bytes (hex-encoded on the wire)
pub const CHALLENGE_SALT_LEN: usize = 16;

/// Redraws allowed before a colliding random source is treated as broken
const MAX_DRAWS: usize = 8;

/// A nonce/salt/expiry tuple issued for one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// Random nonce (hex)
    pub nonce: String,
    /// Random salt (hex)
    pub salt: String,
    /// Epoch milliseconds
    pub issued_at: u64,
    /// Epoch milliseconds; the challenge is valid while `now < expires_at`
    pub expires_at: u64,
}

impl Challenge {
    pub fn is_valid_at(&self, now: u64) -> bool {
        now < self.expires_at
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        !self.is_valid_at(now)
    }

    /// Remaining validity in milliseconds
    pub fn remaining_ms(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    /// Decoded nonce bytes
    pub fn nonce_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.nonce)
            .map_err(|e| SpeakeasyError::InvalidInput(format!("Invalid challenge nonce: {e}")))
    }

    /// Decoded salt bytes
    pub fn salt_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.salt)
            .map_err(|e| SpeakeasyError::InvalidInput(format!("Invalid challenge salt: {e}")))
    }
}

/// Issues challenges from the OS random source.
#[derive(Debug, Default)]
pub struct ChallengeGenerator {
    /// Nonces of open challenges, with their expiry
    outstanding: DashMap<String, u64>,
    issued: AtomicUsize,
}

impl ChallengeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw once from the random source so a broken environment fails at
    /// construction rather than at the first knock.
    pub fn self_test() -> Result<()> {
        generate_random_bytes::<CHALLENGE_NONCE_LEN>().map(|_| ())
    }

    /// Issue a fresh challenge valid for `window_ms` from `now`.
    pub fn issue(&self, now: u64, window_ms: u64) -> Result<Challenge> {
        if window_ms == 0 {
            return Err(SpeakeasyError::InvalidInput(
                "Challenge window must be positive".into(),
            ));
        }

        self.prune_expired(now);
        let expires_at = now.saturating_add(window_ms);

        for _ in 0..MAX_DRAWS {
            let nonce = hex::encode(generate_random_bytes::<CHALLENGE_NONCE_LEN>()?);
            if self.outstanding.contains_key(&nonce) {
                warn!("Random source repeated a challenge nonce, redrawing");
                continue;
            }
            self.outstanding.insert(nonce.clone(), expires_at);
            self.issued.fetch_add(1, Ordering::Relaxed);

            let salt = hex::encode(generate_random_bytes::<CHALLENGE_SALT_LEN>()?);
            let challenge = Challenge {
                nonce,
                salt,
                issued_at: now,
                expires_at,
            };
            debug!(expires_at = challenge.expires_at, "Issued challenge");
            return Ok(challenge);
        }

        Err(SpeakeasyError::Environment(
            "Random source keeps repeating nonces".into(),
        ))
    }

    /// Whether `nonce` belongs to a challenge this generator issued that has
    /// not been pruned yet.
    pub fn was_issued(&self, nonce: &str) -> bool {
        self.outstanding.contains_key(nonce)
    }

    /// Number of challenges issued so far.
    pub fn issued_count(&self) -> usize {
        self.issued.load(Ordering::Relaxed)
    }

    /// Number of nonces still remembered.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    fn prune_expired(&self, now: u64) {
        self.outstanding.retain(|_, expires_at| *expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_sets_window() {
        let generator = ChallengeGenerator::new();
        let challenge = generator.issue(1_000, 30_000).unwrap();

        assert_eq!(challenge.issued_at, 1_000);
        assert_eq!(challenge.expires_at, 31_000);
        assert_eq!(challenge.nonce.len(), CHALLENGE_NONCE_LEN * 2);
        assert_eq!(challenge.salt.len(), CHALLENGE_SALT_LEN * 2);
        assert!(generator.was_issued(&challenge.nonce));
    }

    #[test]
    fn test_validity_is_exclusive_of_expiry() {
        let challenge = ChallengeGenerator::new().issue(0, 100).unwrap();
        assert!(challenge.is_valid_at(99));
        assert!(challenge.is_expired_at(100));
        assert_eq!(challenge.remaining_ms(40), 60);
        assert_eq!(challenge.remaining_ms(400), 0);
    }

    #[test]
    fn test_zero_window_rejected() {
        let generator = ChallengeGenerator::new();
        assert!(matches!(
            generator.issue(0, 0),
            Err(SpeakeasyError::InvalidInput(_))
        ));
        assert_eq!(generator.issued_count(), 0);
    }

    #[test]
    fn test_nonces_are_unique() {
        let generator = ChallengeGenerator::new();
        for _ in 0..100 {
            generator.issue(0, 1_000).unwrap();
        }
        assert_eq!(generator.issued_count(), 100);
    }

    #[test]
    fn test_expired_nonces_are_forgotten() {
        let generator = ChallengeGenerator::new();
        let first = generator.issue(0, 100).unwrap();
        let second = generator.issue(50, 100).unwrap();
        assert_eq!(generator.outstanding_count(), 2);

        // Issuing at the first expiry drops the first nonce only.
        let third = generator.issue(100, 100).unwrap();
        assert!(!generator.was_issued(&first.nonce));
        assert!(generator.was_issued(&second.nonce));
        assert!(generator.was_issued(&third.nonce));
        assert_eq!(generator.outstanding_count(), 2);
        assert_eq!(generator.issued_count(), 3);

        for i in 0..50 {
            generator.issue(1_000 + i * 10, 5).unwrap();
        }
        assert_eq!(generator.outstanding_count(), 1);
        assert_eq!(generator.issued_count(), 53);
    }

    #[test]
    fn test_hex_accessors() {
        let challenge = ChallengeGenerator::new().issue(0, 1_000).unwrap();
        assert_eq!(challenge.nonce_bytes().unwrap().len(), CHALLENGE_NONCE_LEN);
        assert_eq!(challenge.salt_bytes().unwrap().len(), CHALLENGE_SALT_LEN);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let challenge = ChallengeGenerator::new().issue(5, 10).unwrap();
        let json = serde_json::to_value(&challenge).unwrap();
        assert_eq!(json["issuedAt"], 5);
        assert_eq!(json["expiresAt"], 15);
    }
}
