//! Encrypted, device-bound persistence of the registered verifier.

pub mod backend;
pub mod record;
pub mod secret;
pub mod service;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};
pub use record::{StoredRecord, Verifier, CURRENT_VERSION, LEGACY_VERSION};
pub use secret::DeviceSecret;
pub use service::{VerifierStore, VERIFIER_KEY};
