//! States, events and the mutable context of the doorman.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityToken;
use crate::challenge::Challenge;

/// Doorman states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DoormanState {
    #[default]
    Idle,
    Challenged,
    Verifying,
    Admitted,
    Cooldown,
    Locked,
    Decoy,
}

impl DoormanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Challenged => "CHALLENGED",
            Self::Verifying => "VERIFYING",
            Self::Admitted => "ADMITTED",
            Self::Cooldown => "COOLDOWN",
            Self::Locked => "LOCKED",
            Self::Decoy => "DECOY",
        }
    }

    /// The state as it may be shown outside the process: DECOY is reported
    /// as ADMITTED.
    pub fn observed(self) -> Self {
        match self {
            Self::Decoy => Self::Admitted,
            other => other,
        }
    }
}

impl fmt::Display for DoormanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DoormanEvent {
    KnockDetected { timestamp: u64 },
    GestureComplete,
    ChallengeTimeout,
    ExitRequested,
    VerificationSuccess { capability: CapabilityToken },
    VerificationFailure,
    CooldownElapsed,
    LockExpired,
    AdmissionTimeout,
    PanicGesture {
        #[serde(rename = "decoyMode")]
        decoy_mode: bool,
    },
}

impl DoormanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::KnockDetected { .. } => "KNOCK_DETECTED",
            Self::GestureComplete => "GESTURE_COMPLETE",
            Self::ChallengeTimeout => "CHALLENGE_TIMEOUT",
            Self::ExitRequested => "EXIT_REQUESTED",
            Self::VerificationSuccess { .. } => "VERIFICATION_SUCCESS",
            Self::VerificationFailure => "VERIFICATION_FAILURE",
            Self::CooldownElapsed => "COOLDOWN_ELAPSED",
            Self::LockExpired => "LOCK_EXPIRED",
            Self::AdmissionTimeout => "ADMISSION_TIMEOUT",
            Self::PanicGesture { .. } => "PANIC_GESTURE",
        }
    }
}

/// Everything the doorman knows about the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoormanContext {
    pub state: DoormanState,
    /// Present in CHALLENGED and VERIFYING
    pub challenge: Option<Challenge>,
    pub consecutive_failures: u32,
    pub cooldown_ends_at: Option<u64>,
    pub lock_ends_at: Option<u64>,
    /// Present in ADMITTED and DECOY
    pub admission_ends_at: Option<u64>,
    /// Present in ADMITTED only
    pub capability: Option<CapabilityToken>,
    /// Bumped on every applied transition
    pub epoch: u64,
}

impl DoormanContext {
    /// Deadline of the current state and the event that fires at it.
    pub fn deadline(&self) -> Option<(u64, DoormanEvent)> {
        match self.state {
            DoormanState::Challenged => self
                .challenge
                .as_ref()
                .map(|c| (c.expires_at, DoormanEvent::ChallengeTimeout)),
            DoormanState::Cooldown => self
                .cooldown_ends_at
                .map(|at| (at, DoormanEvent::CooldownElapsed)),
            DoormanState::Locked => self.lock_ends_at.map(|at| (at, DoormanEvent::LockExpired)),
            DoormanState::Admitted | DoormanState::Decoy => self
                .admission_ends_at
                .map(|at| (at, DoormanEvent::AdmissionTimeout)),
            DoormanState::Idle | DoormanState::Verifying => None,
        }
    }

    /// Whether every field the current state requires is present, and
    /// nothing belonging to another state lingers.
    pub fn is_consistent(&self) -> bool {
        let has_challenge = self.challenge.is_some();
        let has_cooldown = self.cooldown_ends_at.is_some();
        let has_lock = self.lock_ends_at.is_some();
        let has_admission = self.admission_ends_at.is_some();
        let has_capability = self.capability.is_some();

        match self.state {
            DoormanState::Idle => {
                !has_challenge && !has_cooldown && !has_lock && !has_admission && !has_capability
            }
            DoormanState::Challenged | DoormanState::Verifying => {
                has_challenge && !has_admission && !has_capability
            }
            DoormanState::Admitted => has_admission && has_capability && !has_challenge,
            DoormanState::Decoy => has_admission && !has_capability && !has_challenge,
            DoormanState::Cooldown => has_cooldown && !has_challenge && !has_capability,
            DoormanState::Locked => has_lock && !has_challenge && !has_capability,
        }
    }
}

/// Read-only view of the context handed to callers.
///
/// A decoy session reports its state tag and deadline like any other; it
/// carries no token because none exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoormanSnapshot {
    pub state: DoormanState,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_ends_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_ends_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission_ends_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<CapabilityToken>,
    pub epoch: u64,
}

impl From<&DoormanContext> for DoormanSnapshot {
    fn from(ctx: &DoormanContext) -> Self {
        Self {
            state: ctx.state,
            consecutive_failures: ctx.consecutive_failures,
            challenge_expires_at: ctx.challenge.as_ref().map(|c| c.expires_at),
            cooldown_ends_at: ctx.cooldown_ends_at,
            lock_ends_at: ctx.lock_ends_at,
            admission_ends_at: ctx.admission_ends_at,
            capability: ctx.capability.clone(),
            epoch: ctx.epoch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(DoormanState::Idle.to_string(), "IDLE");
        assert_eq!(DoormanState::Decoy.to_string(), "DECOY");
        assert_eq!(
            serde_json::to_value(DoormanState::Challenged).unwrap(),
            "CHALLENGED"
        );
    }

    #[test]
    fn test_decoy_is_observed_as_admitted() {
        assert_eq!(DoormanState::Decoy.observed(), DoormanState::Admitted);
        assert_eq!(DoormanState::Locked.observed(), DoormanState::Locked);
        assert_eq!(DoormanState::Decoy.observed().to_string(), "ADMITTED");
    }

    #[test]
    fn test_event_wire_format() {
        let event: DoormanEvent =
            serde_json::from_str(r#"{"type":"PANIC_GESTURE","decoyMode":true}"#).unwrap();
        assert_eq!(event, DoormanEvent::PanicGesture { decoy_mode: true });
        assert_eq!(event.name(), "PANIC_GESTURE");

        let knock = serde_json::to_value(DoormanEvent::KnockDetected { timestamp: 7 }).unwrap();
        assert_eq!(knock["type"], "KNOCK_DETECTED");
        assert_eq!(knock["timestamp"], 7);
    }

    #[test]
    fn test_fresh_context_is_idle_and_consistent() {
        let ctx = DoormanContext::default();
        assert_eq!(ctx.state, DoormanState::Idle);
        assert!(ctx.is_consistent());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_admitted_without_token_is_inconsistent() {
        let ctx = DoormanContext {
            state: DoormanState::Admitted,
            admission_ends_at: Some(10),
            ..Default::default()
        };
        assert!(!ctx.is_consistent());
    }
}
