use serde::{Deserialize, Serialize};

/// Why a verification attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The challenge nonce was already presented
    Replayed,
    /// The challenge window had closed
    Expired,
    /// Nothing was recognized
    EmptySequence,
    /// No readable verifier is stored
    NoVerifier,
    /// Challenge or stored material could not be decoded
    Malformed,
    /// The gesture did not match
    Mismatch,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Replayed => "challenge already used",
            Self::Expired => "challenge expired",
            Self::EmptySequence => "empty gesture",
            Self::NoVerifier => "no verifier registered",
            Self::Malformed => "malformed challenge or verifier",
            Self::Mismatch => "gesture mismatch",
        };
        f.write_str(text)
    }
}

/// Result of checking a gesture against a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// The secret gesture matched
    Admit,
    /// The registered duress gesture matched
    Panic,
    Reject(RejectReason),
}

impl VerificationOutcome {
    /// Whether the secret gesture matched.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Admit)
    }
}
