//! Doorman policy.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{Result, SpeakeasyError};

/// Tunable doorman policy. Replaced wholesale, never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DoormanConfig {
    /// How long a challenge stays open
    pub challenge_window_ms: u64,
    /// Failures in a row that trigger a hard lock
    pub max_consecutive_failures: u32,
    /// Cooldown after the first failure; doubles per further failure
    pub cooldown_base_ms: u64,
    pub lock_duration_ms: u64,
    /// Lifetime of a decoy admission
    pub decoy_ttl_ms: u64,
    /// Lock duration multiplier when a panic gesture locks the door
    pub panic_lock_multiplier: u32,
    /// Lifetime of a real admission and of its token
    pub admission_ttl_ms: u64,
    pub panic_enabled: bool,
    /// Panic gestures fake an admission instead of locking
    pub decoy_mode: bool,
    /// Issuer name written into tokens
    pub issuer: String,
    /// Scopes granted on admission
    pub scopes: Vec<String>,
    pub token_max_uses: u32,
}

impl Default for DoormanConfig {
    fn default() -> Self {
        Self {
            challenge_window_ms: 30_000,
            max_consecutive_failures: 3,
            cooldown_base_ms: 2_000,
            lock_duration_ms: 300_000,
            decoy_ttl_ms: 120_000,
            panic_lock_multiplier: 4,
            admission_ttl_ms: 900_000,
            panic_enabled: true,
            decoy_mode: true,
            issuer: "speakeasy".to_string(),
            scopes: vec!["session".to_string()],
            token_max_uses: 1,
        }
    }
}

impl DoormanConfig {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.challenge_window_ms == 0 {
            return Err("challengeWindowMs must be positive".to_string());
        }
        if self.max_consecutive_failures == 0 {
            return Err("maxConsecutiveFailures must be at least 1".to_string());
        }
        if self.cooldown_base_ms == 0 {
            return Err("cooldownBaseMs must be positive".to_string());
        }
        if self.lock_duration_ms == 0 {
            return Err("lockDurationMs must be positive".to_string());
        }
        if self.admission_ttl_ms == 0 {
            return Err("admissionTtlMs must be positive".to_string());
        }
        if self.panic_enabled {
            if self.decoy_ttl_ms == 0 {
                return Err("decoyTtlMs must be positive when panic handling is enabled".to_string());
            }
            if self.panic_lock_multiplier == 0 {
                return Err("panicLockMultiplier must be at least 1".to_string());
            }
        }
        if self.issuer.trim().is_empty() {
            return Err("issuer must not be empty".to_string());
        }
        if self.scopes.is_empty() || self.scopes.iter().any(|s| s.trim().is_empty()) {
            return Err("scopes must be a non-empty list of non-empty names".to_string());
        }
        if self.token_max_uses == 0 {
            return Err("tokenMaxUses must be at least 1".to_string());
        }
        Ok(())
    }

    /// Lock duration applied when a panic gesture locks the door.
    pub fn panic_lock_ms(&self) -> u64 {
        self.lock_duration_ms
            .saturating_mul(u64::from(self.panic_lock_multiplier))
    }

    /// Cooldown applied after a failure when `prior_failures` failures
    /// preceded it.
    pub fn cooldown_ms(&self, prior_failures: u32) -> u64 {
        self.cooldown_base_ms
            .saturating_mul(2u64.saturating_pow(prior_failures))
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            SpeakeasyError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            SpeakeasyError::Config(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate().map_err(SpeakeasyError::Config)?;
        Ok(config)
    }
}
