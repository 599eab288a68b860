//! Device-held secret the verifier encryption key is derived from.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::crypto::generate_random_bytes;
use crate::types::{Result, SpeakeasyError};

/// Secrets shorter than this are accepted but logged
const RECOMMENDED_SECRET_LEN: usize = 16;

/// Length of secrets generated by [`DeviceSecret::generate`]
const GENERATED_SECRET_LEN: usize = 32;

/// The device secret. Zeroized when the last handle is dropped.
#[derive(Clone)]
pub struct DeviceSecret(Arc<Zeroizing<Vec<u8>>>);

impl DeviceSecret {
    /// Wrap raw secret bytes. An empty secret is an environment error.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let bytes = Zeroizing::new(bytes);
        if bytes.is_empty() {
            return Err(SpeakeasyError::Environment("Device secret is empty".into()));
        }
        if bytes.len() < RECOMMENDED_SECRET_LEN {
            warn!(
                len = bytes.len(),
                "Device secret is shorter than {} bytes", RECOMMENDED_SECRET_LEN
            );
        }
        Ok(Self(Arc::new(bytes)))
    }

    /// Draw a fresh random secret.
    pub fn generate() -> Result<Self> {
        let bytes = Zeroizing::new(generate_random_bytes::<GENERATED_SECRET_LEN>()?);
        Self::from_bytes(bytes.to_vec())
    }

    /// Read a hex-encoded secret from `path`, creating it if missing.
    pub async fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                let bytes = hex::decode(contents.trim()).map_err(|e| {
                    SpeakeasyError::Environment(format!(
                        "Device secret at {} is not hex: {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::from_bytes(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let secret = Self::generate()?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let encoded = Zeroizing::new(hex::encode(secret.expose()));
                tokio::fs::write(path, encoded.as_bytes()).await?;
                restrict_permissions(path).await?;
                info!(path = %path.display(), "Created new device secret");
                Ok(secret)
            }
            Err(e) => Err(SpeakeasyError::Environment(format!(
                "Cannot read device secret at {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub(crate) fn expose(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl fmt::Debug for DeviceSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceSecret([REDACTED; {}])", self.0.len())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
