//! Encrypted verifier store.
//!
//! Holds at most one [`Verifier`] under [`VERIFIER_KEY`]. Every write draws a
//! fresh salt and nonce; every read that fails to parse or authenticate is
//! reported as "no verifier" so a tampered record can never admit anyone.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::crypto::KdfParams;
use crate::types::Result;

use super::backend::StorageBackend;
use super::record::{open_record, seal_verifier, StoredRecord, Verifier};
use super::secret::DeviceSecret;

/// Logical key of the verifier record
pub const VERIFIER_KEY: &str = "speakeasy.verifier";

/// Authenticated-encryption wrapper around a [`StorageBackend`].
#[derive(Clone)]
pub struct VerifierStore {
    backend: Arc<dyn StorageBackend>,
    secret: DeviceSecret,
    params: KdfParams,
}

impl std::fmt::Debug for VerifierStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierStore")
            .field("secret", &self.secret)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl VerifierStore {
    /// Create a store over `backend`.
    ///
    /// Fails when the KDF parameters are unusable or the random source is
    /// unavailable.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        secret: DeviceSecret,
        params: KdfParams,
    ) -> Result<Self> {
        params.validate()?;
        crate::crypto::generate_random_bytes::<16>()?;
        Ok(Self {
            backend,
            secret,
            params,
        })
    }

    /// The stored verifier, or `None` when absent or unreadable.
    pub async fn get_verifier(&self) -> Result<Option<Verifier>> {
        let Some(raw) = self.backend.get(VERIFIER_KEY).await? else {
            return Ok(None);
        };

        let record: StoredRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Verifier record is not valid JSON, treating as absent");
                return Ok(None);
            }
        };

        let secret = self.secret.clone();
        let params = self.params.clone();
        let opened =
            tokio::task::spawn_blocking(move || open_record(&record, &secret, &params)).await?;

        match opened {
            Ok(verifier) => {
                debug!(domain = %verifier.domain, "Loaded verifier");
                Ok(Some(verifier))
            }
            Err(e) => {
                warn!(error = %e, "Verifier record failed to decrypt, treating as absent");
                Ok(None)
            }
        }
    }

    /// Encrypt and persist `verifier`, replacing any previous one.
    pub async fn set_verifier(&self, verifier: Verifier) -> Result<()> {
        verifier.validate()?;

        let secret = self.secret.clone();
        let params = self.params.clone();
        let record =
            tokio::task::spawn_blocking(move || seal_verifier(&verifier, &secret, &params))
                .await??;

        let encoded = serde_json::to_string(&record)?;
        self.backend.set(VERIFIER_KEY, encoded).await?;
        info!("Stored verifier");
        Ok(())
    }

    /// Remove the stored verifier. Clearing an empty store is not an error.
    pub async fn clear_verifier(&self) -> Result<()> {
        self.backend.remove(VERIFIER_KEY).await?;
        info!("Cleared verifier");
        Ok(())
    }

    /// Whether a readable verifier is stored.
    pub async fn has_verifier(&self) -> Result<bool> {
        Ok(self.get_verifier().await?.is_some())
    }
}
