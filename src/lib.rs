//! Speakeasy - gesture knock authentication
//!
//! "Knock and it shall be opened" - Matthew 7:7-8
//!
//! A device-bound challenge/response protocol: the user proves who they are
//! by performing a secret gesture against a single-use challenge. Success
//! mints a short-lived, origin-scoped capability token.
//!
//! ## Components
//!
//! - **Gesture**: pointer events to classified steps and a rhythm hash
//! - **Challenge**: single-use nonce/salt pairs with an expiry
//! - **Store**: the registered verifier, encrypted under a device secret
//! - **Verifier**: constant-time, challenge-bound gesture comparison
//! - **Doorman**: the state machine with cooldowns, locks and decoys
//! - **Capability**: scoped tokens minted on admission

pub mod capability;
pub mod challenge;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod doorman;
pub mod gesture;
pub mod logging;
pub mod store;
pub mod types;
pub mod verifier;

pub use capability::{CapabilityIssuer, CapabilityToken, ConstraintOverrides, Constraints};
pub use challenge::{Challenge, ChallengeGenerator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Args;
pub use doorman::{AttemptOutcome, Doorman, DoormanConfig, DoormanEvent, DoormanSnapshot, DoormanState};
pub use gesture::{GestureCapture, GestureRecognizer, GestureSequence, GestureStep};
pub use store::{DeviceSecret, FileBackend, MemoryBackend, StorageBackend, Verifier, VerifierStore};
pub use types::{Result, SpeakeasyError};
pub use verifier::{GestureVerifier, RejectReason, VerificationOutcome};
