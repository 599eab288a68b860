//! Logging infrastructure for Speakeasy
//!
//! Provides an append-only audit trail of doorman transitions.

pub mod audit;

pub use audit::{AuditEvent, AuditEventType, AuditLogger};
