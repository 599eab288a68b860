//! Gesture verification
//!
//! Turns a recognized gesture into key material, binds it to a single-use
//! challenge, and compares it in constant time against the stored verifier.

pub mod canonical;
pub mod outcome;
pub mod service;

pub use canonical::{encode_steps, hold_bucket};
pub use outcome::{RejectReason, VerificationOutcome};
pub use service::{register, GestureVerifier};
