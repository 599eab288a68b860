//! The doorman transition table.
//!
//! `transition` is a pure function of the current context, the event, the
//! policy and the time. The only side effect it may have is drawing a fresh
//! challenge on a knock.

use tracing::debug;

use crate::challenge::ChallengeGenerator;
use crate::types::Result;

use super::config::DoormanConfig;
use super::state::{DoormanContext, DoormanEvent, DoormanState};

/// What applying an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The event was handled; this is the new context (epoch already bumped)
    Moved(DoormanContext),
    /// No rule matches the (state, event) pair
    Unhandled,
}

impl Step {
    pub fn is_unhandled(&self) -> bool {
        matches!(self, Self::Unhandled)
    }
}

/// Apply `event` to `ctx` at time `now`.
pub fn transition(
    ctx: &DoormanContext,
    event: &DoormanEvent,
    config: &DoormanConfig,
    now: u64,
    challenges: &ChallengeGenerator,
) -> Result<Step> {
    use DoormanEvent as E;
    use DoormanState as S;

    let next = match (ctx.state, event) {
        (S::Idle, E::KnockDetected { .. }) => {
            let challenge = challenges.issue(now, config.challenge_window_ms)?;
            DoormanContext {
                state: S::Challenged,
                challenge: Some(challenge),
                ..base(ctx)
            }
        }

        (S::Challenged, E::GestureComplete) => {
            let expired = ctx
                .challenge
                .as_ref()
                .map_or(true, |c| c.is_expired_at(now));
            if expired {
                debug!("Gesture completed after the challenge closed");
                idle(ctx)
            } else {
                DoormanContext {
                    state: S::Verifying,
                    challenge: ctx.challenge.clone(),
                    ..base(ctx)
                }
            }
        }

        (S::Challenged | S::Verifying, E::ExitRequested) | (S::Challenged, E::ChallengeTimeout) => {
            idle(ctx)
        }

        (S::Verifying, E::VerificationSuccess { capability }) => DoormanContext {
            state: S::Admitted,
            consecutive_failures: 0,
            admission_ends_at: Some(now.saturating_add(config.admission_ttl_ms)),
            capability: Some(capability.clone()),
            ..base(ctx)
        },

        (S::Verifying, E::VerificationFailure) => {
            let failures = ctx.consecutive_failures.saturating_add(1);
            if failures < config.max_consecutive_failures {
                DoormanContext {
                    state: S::Cooldown,
                    consecutive_failures: failures,
                    cooldown_ends_at: Some(
                        now.saturating_add(config.cooldown_ms(ctx.consecutive_failures)),
                    ),
                    ..base(ctx)
                }
            } else {
                DoormanContext {
                    state: S::Locked,
                    consecutive_failures: config.max_consecutive_failures,
                    lock_ends_at: Some(now.saturating_add(config.lock_duration_ms)),
                    ..base(ctx)
                }
            }
        }

        (S::Cooldown, E::CooldownElapsed) => idle(ctx),

        (S::Locked, E::LockExpired) => DoormanContext {
            consecutive_failures: 0,
            ..idle(ctx)
        },

        (S::Admitted | S::Decoy, E::ExitRequested | E::AdmissionTimeout) => idle(ctx),

        (S::Challenged | S::Verifying, E::PanicGesture { decoy_mode }) if config.panic_enabled => {
            if *decoy_mode {
                DoormanContext {
                    state: S::Decoy,
                    admission_ends_at: Some(now.saturating_add(config.decoy_ttl_ms)),
                    ..base(ctx)
                }
            } else {
                DoormanContext {
                    state: S::Locked,
                    lock_ends_at: Some(now.saturating_add(config.panic_lock_ms())),
                    ..base(ctx)
                }
            }
        }

        (state, event) => {
            debug!(state = %state, event = event.name(), "Ignoring unhandled event");
            return Ok(Step::Unhandled);
        }
    };

    Ok(Step::Moved(next))
}

/// Fresh context carrying only the failure counter and the next epoch.
fn base(ctx: &DoormanContext) -> DoormanContext {
    DoormanContext {
        state: ctx.state,
        consecutive_failures: ctx.consecutive_failures,
        epoch: ctx.epoch.wrapping_add(1),
        ..Default::default()
    }
}

fn idle(ctx: &DoormanContext) -> DoormanContext {
    DoormanContext {
        state: DoormanState::Idle,
        ..base(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityIssuer;
    use crate::capability::CapabilityToken;
    use crate::store::Verifier;

    fn config() -> DoormanConfig {
        DoormanConfig {
            challenge_window_ms: 1_000,
            max_consecutive_failures: 3,
            cooldown_base_ms: 100,
            lock_duration_ms: 10_000,
            decoy_ttl_ms: 5_000,
            panic_lock_multiplier: 3,
            admission_ttl_ms: 60_000,
            ..Default::default()
        }
    }

    fn token() -> CapabilityToken {
        let verifier = Verifier::new("aa".into(), "bb".into(), "https://bar.example".into());
        CapabilityIssuer::new("test")
            .issue(&verifier, ["session"], 60_000, None, 0)
            .unwrap()
    }

    fn apply(ctx: &DoormanContext, event: DoormanEvent, now: u64, gen: &ChallengeGenerator) -> DoormanContext {
        match transition(ctx, &event, &config(), now, gen).unwrap() {
            Step::Moved(next) => {
                assert!(next.is_consistent(), "inconsistent context: {next:?}");
                next
            }
            Step::Unhandled => panic!("{} unhandled in {}", event.name(), ctx.state),
        }
    }

    fn verifying(gen: &ChallengeGenerator, failures: u32) -> DoormanContext {
        let ctx = DoormanContext {
            consecutive_failures: failures,
            ..Default::default()
        };
        let ctx = apply(&ctx, DoormanEvent::KnockDetected { timestamp: 0 }, 0, gen);
        apply(&ctx, DoormanEvent::GestureComplete, 10, gen)
    }

    #[test]
    fn test_knock_issues_challenge() {
        let gen = ChallengeGenerator::new();
        let ctx = apply(
            &DoormanContext::default(),
            DoormanEvent::KnockDetected { timestamp: 0 },
            500,
            &gen,
        );
        assert_eq!(ctx.state, DoormanState::Challenged);
        assert_eq!(ctx.challenge.as_ref().unwrap().expires_at, 1_500);
        assert_eq!(ctx.epoch, 1);
        assert_eq!(gen.issued_count(), 1);
    }

    #[test]
    fn test_success_admits_and_resets_failures() {
        let gen = ChallengeGenerator::new();
        let ctx = verifying(&gen, 2);
        let ctx = apply(&ctx, DoormanEvent::VerificationSuccess { capability: token() }, 20, &gen);

        assert_eq!(ctx.state, DoormanState::Admitted);
        assert_eq!(ctx.consecutive_failures, 0);
        assert_eq!(ctx.admission_ends_at, Some(60_020));
        assert!(ctx.challenge.is_none());

        let ctx = apply(&ctx, DoormanEvent::AdmissionTimeout, 60_020, &gen);
        assert_eq!(ctx.state, DoormanState::Idle);
        assert!(ctx.capability.is_none());
    }

    #[test]
    fn test_cooldown_grows_then_locks() {
        let gen = ChallengeGenerator::new();
        let mut ctx = DoormanContext::default();

        for k in 1..=2u32 {
            ctx = apply(&ctx, DoormanEvent::KnockDetected { timestamp: 0 }, 0, &gen);
            ctx = apply(&ctx, DoormanEvent::GestureComplete, 0, &gen);
            ctx = apply(&ctx, DoormanEvent::VerificationFailure, 1_000, &gen);
            assert_eq!(ctx.state, DoormanState::Cooldown);
            assert_eq!(ctx.consecutive_failures, k);
            assert_eq!(ctx.cooldown_ends_at, Some(1_000 + 100 * 2u64.pow(k - 1)));
            ctx = apply(&ctx, DoormanEvent::CooldownElapsed, 2_000, &gen);
            assert_eq!(ctx.consecutive_failures, k);
        }

        ctx = apply(&ctx, DoormanEvent::KnockDetected { timestamp: 0 }, 0, &gen);
        ctx = apply(&ctx, DoormanEvent::GestureComplete, 0, &gen);
        ctx = apply(&ctx, DoormanEvent::VerificationFailure, 1_000, &gen);
        assert_eq!(ctx.state, DoormanState::Locked);
        assert_eq!(ctx.consecutive_failures, 3);
        assert_eq!(ctx.lock_ends_at, Some(11_000));

        let knock = transition(&ctx, &DoormanEvent::KnockDetected { timestamp: 0 }, &config(), 1_500, &gen).unwrap();
        assert!(knock.is_unhandled());

        ctx = apply(&ctx, DoormanEvent::LockExpired, 11_000, &gen);
        assert_eq!(ctx.state, DoormanState::Idle);
        assert_eq!(ctx.consecutive_failures, 0);
    }

    #[test]
    fn test_failures_beyond_max_still_lock() {
        let gen = ChallengeGenerator::new();
        let ctx = verifying(&gen, 7);
        let ctx = apply(&ctx, DoormanEvent::VerificationFailure, 0, &gen);
        assert_eq!(ctx.state, DoormanState::Locked);
        assert_eq!(ctx.consecutive_failures, 3);
    }

    #[test]
    fn test_expired_gesture_returns_to_idle() {
        let gen = ChallengeGenerator::new();
        let ctx = apply(
            &DoormanContext::default(),
            DoormanEvent::KnockDetected { timestamp: 0 },
            0,
            &gen,
        );
        let ctx = apply(&ctx, DoormanEvent::GestureComplete, 1_000, &gen);
        assert_eq!(ctx.state, DoormanState::Idle);
        assert!(ctx.challenge.is_none());
    }

    #[test]
    fn test_panic_decoy_and_lock() {
        let gen = ChallengeGenerator::new();

        let ctx = verifying(&gen, 0);
        let decoy = apply(&ctx, DoormanEvent::PanicGesture { decoy_mode: true }, 100, &gen);
        assert_eq!(decoy.state, DoormanState::Decoy);
        assert_eq!(decoy.admission_ends_at, Some(5_100));
        assert!(decoy.capability.is_none());

        let locked = apply(&ctx, DoormanEvent::PanicGesture { decoy_mode: false }, 100, &gen);
        assert_eq!(locked.state, DoormanState::Locked);
        assert_eq!(locked.lock_ends_at, Some(30_100));
    }

    #[test]
    fn test_panic_disabled_is_unhandled() {
        let gen = ChallengeGenerator::new();
        let ctx = verifying(&gen, 0);
        let config = DoormanConfig {
            panic_enabled: false,
            ..config()
        };
        let step = transition(&ctx, &DoormanEvent::PanicGesture { decoy_mode: true }, &config, 0, &gen).unwrap();
        assert!(step.is_unhandled());
    }

    #[test]
    fn test_exit_discards_challenge() {
        let gen = ChallengeGenerator::new();
        let ctx = verifying(&gen, 1);
        let ctx = apply(&ctx, DoormanEvent::ExitRequested, 20, &gen);
        assert_eq!(ctx.state, DoormanState::Idle);
        assert!(ctx.challenge.is_none());
        assert_eq!(ctx.consecutive_failures, 1);
    }

    #[test]
    fn test_unhandled_pairs_leave_context_alone() {
        let gen = ChallengeGenerator::new();
        let idle = DoormanContext::default();
        for event in [
            DoormanEvent::GestureComplete,
            DoormanEvent::ChallengeTimeout,
            DoormanEvent::VerificationFailure,
            DoormanEvent::CooldownElapsed,
            DoormanEvent::LockExpired,
            DoormanEvent::AdmissionTimeout,
            DoormanEvent::ExitRequested,
        ] {
            let step = transition(&idle, &event, &config(), 0, &gen).unwrap();
            assert!(step.is_unhandled(), "{} should be ignored in IDLE", event.name());
        }
        assert_eq!(gen.issued_count(), 0);
    }
}
