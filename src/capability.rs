//! Scoped, short-lived capability tokens minted on admission.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::store::Verifier;
use crate::types::{Result, SpeakeasyError};

/// Default number of uses per token
pub const DEFAULT_MAX_USES: u32 = 1;

/// Limits on how a token may be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    pub max_uses: u32,
    pub allowed_origins: Vec<String>,
}

/// Caller-supplied overrides for [`Constraints`]. Unset fields take the
/// defaults: one use, the verifier's own domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintOverrides {
    pub max_uses: Option<u32>,
    pub allowed_origins: Option<Vec<String>>,
}

/// Token handed to the host application after a successful knock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityToken {
    pub token_id: String,
    pub issuer: String,
    pub scopes: BTreeSet<String>,
    /// Epoch milliseconds
    pub issued_at: u64,
    /// Epoch milliseconds
    pub expires_at: u64,
    pub constraints: Constraints,
}

impl CapabilityToken {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Whether the token grants `scope` to a request from `origin`.
    pub fn permits(&self, origin: &str, scope: &str) -> bool {
        self.scopes.contains(scope)
            && self
                .constraints
                .allowed_origins
                .iter()
                .any(|allowed| allowed == origin)
    }
}

/// Mints capability tokens under a fixed issuer name.
#[derive(Debug, Clone)]
pub struct CapabilityIssuer {
    issuer: String,
}

impl CapabilityIssuer {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Mint a token for `verifier`, valid for `ttl_ms` from `now`.
    pub fn issue<I, S>(
        &self,
        verifier: &Verifier,
        scopes: I,
        ttl_ms: u64,
        overrides: Option<ConstraintOverrides>,
        now: u64,
    ) -> Result<CapabilityToken>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scopes: BTreeSet<String> = scopes.into_iter().map(Into::into).collect();
        if scopes.is_empty() {
            return Err(SpeakeasyError::InvalidInput(
                "Capability needs at least one scope".into(),
            ));
        }
        if ttl_ms == 0 {
            return Err(SpeakeasyError::InvalidInput(
                "Capability TTL must be positive".into(),
            ));
        }

        let overrides = overrides.unwrap_or_default();
        let max_uses = overrides.max_uses.unwrap_or(DEFAULT_MAX_USES);
        if max_uses == 0 {
            return Err(SpeakeasyError::InvalidInput(
                "Capability max_uses must be positive".into(),
            ));
        }
        let allowed_origins = overrides
            .allowed_origins
            .unwrap_or_else(|| vec![verifier.domain.clone()]);

        let token = CapabilityToken {
            token_id: Uuid::new_v4().to_string(),
            issuer: self.issuer.clone(),
            scopes,
            issued_at: now,
            expires_at: now.saturating_add(ttl_ms),
            constraints: Constraints {
                max_uses,
                allowed_origins,
            },
        };
        debug!(token_id = %token.token_id, "Issued capability");
        Ok(token)
    }
}
