//! Async doorman handle.
//!
//! Wraps the pure transition table with a single-writer lock, deadline
//! timers and the verify/mint round trip. Timers capture the context epoch
//! when scheduled and do nothing if it has moved on by the time they fire.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityIssuer, CapabilityToken, ConstraintOverrides};
use crate::challenge::{Challenge, ChallengeGenerator};
use crate::clock::Clock;
use crate::gesture::GestureSequence;
use crate::logging::AuditLogger;
use crate::store::Verifier;
use crate::types::{Result, SpeakeasyError};
use crate::verifier::{GestureVerifier, VerificationOutcome};

use super::config::DoormanConfig;
use super::state::{DoormanContext, DoormanEvent, DoormanSnapshot, DoormanState};
use super::transition::{transition, Step};

/// How a submitted gesture played out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The secret gesture matched and a token was minted
    Admitted { capability: CapabilityToken },
    /// The panic gesture matched in decoy mode; the door looks open.
    ///
    /// `cover` has the shape of a real token but is never recorded in the
    /// context, so nothing this doorman reports will vouch for it.
    Decoy {
        admission_ends_at: u64,
        cover: CapabilityToken,
    },
    /// Wrong gesture; knocking is refused until `until`
    Cooldown { until: u64 },
    /// Too many failures, or a panic gesture outside decoy mode
    Locked { until: u64 },
    /// The challenge closed before the gesture was submitted
    Expired,
    /// An exit or reset arrived while the gesture was being checked
    Cancelled,
}

impl AttemptOutcome {
    /// What an onlooker may be shown. A decoy renders as an ordinary
    /// admission carrying its cover token.
    pub fn observed(&self) -> AttemptOutcome {
        match self {
            Self::Decoy { cover, .. } => Self::Admitted {
                capability: cover.clone(),
            },
            other => other.clone(),
        }
    }

    /// Whether the caller should behave as if the door opened.
    pub fn looks_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. } | Self::Decoy { .. })
    }
}

/// Mint a token for `verifier` under the doorman's token policy.
fn mint(config: &DoormanConfig, verifier: &Verifier, now: u64) -> Result<CapabilityToken> {
    let overrides = ConstraintOverrides {
        max_uses: Some(config.token_max_uses),
        allowed_origins: None,
    };
    CapabilityIssuer::new(config.issuer.clone()).issue(
        verifier,
        config.scopes.iter().cloned(),
        config.admission_ttl_ms,
        Some(overrides),
        now,
    )
}

struct Shared {
    ctx: DoormanContext,
    config: DoormanConfig,
    timer: Option<AbortHandle>,
}

struct Inner {
    shared: Mutex<Shared>,
    verifier: Arc<GestureVerifier>,
    challenges: ChallengeGenerator,
    clock: Arc<dyn Clock>,
    runtime: Handle,
    audit: OnceLock<AuditLogger>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = self.shared.get_mut().timer.take() {
            timer.abort();
        }
    }
}

/// The doorman state machine. Cheap to clone; clones share one context.
#[derive(Clone)]
pub struct Doorman {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Doorman {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Doorman").finish_non_exhaustive()
    }
}

impl Doorman {
    /// Create a doorman in IDLE.
    ///
    /// Must be called inside a tokio runtime. Fails on an invalid config or
    /// an unusable random source.
    pub fn new(
        config: DoormanConfig,
        verifier: Arc<GestureVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(SpeakeasyError::Config)?;
        let runtime = Handle::try_current().map_err(|e| {
            SpeakeasyError::Environment(format!("Doorman needs a tokio runtime: {e}"))
        })?;
        ChallengeGenerator::self_test()?;

        Ok(Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    ctx: DoormanContext::default(),
                    config,
                    timer: None,
                }),
                verifier,
                challenges: ChallengeGenerator::new(),
                clock,
                runtime,
                audit: OnceLock::new(),
            }),
        })
    }

    /// Attach an audit logger. Only the first logger attached is kept.
    pub fn with_audit_logger(self, logger: AuditLogger) -> Self {
        if self.inner.audit.set(logger).is_err() {
            warn!("Audit logger already attached, ignoring");
        }
        self
    }

    pub fn verifier(&self) -> &Arc<GestureVerifier> {
        &self.inner.verifier
    }

    /// Number of challenges this doorman has issued.
    pub fn challenges_issued(&self) -> usize {
        self.inner.challenges.issued_count()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Start an attempt. Only accepted in IDLE; anywhere else it is refused
    /// without drawing a challenge.
    pub async fn knock(&self) -> Result<Challenge> {
        let now = self.inner.clock.now_ms();
        let (before, step) = self
            .apply(DoormanEvent::KnockDetected { timestamp: now }, None)
            .await?;

        match step {
            Step::Moved(ctx) => ctx
                .challenge
                .ok_or_else(|| SpeakeasyError::Internal("Knock produced no challenge".into())),
            Step::Unhandled => {
                let failures = self.inner.shared.lock().await.ctx.consecutive_failures;
                if let Some(audit) = self.inner.audit.get() {
                    audit.log_knock_rejected(before, failures).await;
                }
                Err(SpeakeasyError::rejected(before, "door is not accepting knocks"))
            }
        }
    }

    /// Submit a captured gesture against the open challenge.
    ///
    /// The machine enters VERIFYING before the (slow) check runs and the lock
    /// is released while it runs. The result is applied only if nothing else
    /// moved the machine in the meantime.
    pub async fn submit(&self, sequence: GestureSequence) -> Result<AttemptOutcome> {
        let (before, step) = self.apply(DoormanEvent::GestureComplete, None).await?;
        let ctx = match step {
            Step::Moved(ctx) => ctx,
            Step::Unhandled => {
                return Err(SpeakeasyError::rejected(before, "no open challenge"));
            }
        };
        if ctx.state != DoormanState::Verifying {
            return Ok(AttemptOutcome::Expired);
        }

        let challenge = ctx
            .challenge
            .clone()
            .ok_or_else(|| SpeakeasyError::Internal("VERIFYING without a challenge".into()))?;
        let epoch = ctx.epoch;

        let verified = self
            .inner
            .verifier
            .verify_against(&sequence, &challenge)
            .await;
        let (outcome, verifier) = match verified {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Verification failed to run, abandoning attempt");
                self.apply(DoormanEvent::ExitRequested, Some(epoch)).await?;
                return Err(e);
            }
        };

        let config = self.config().await;
        let event = match (outcome, verifier.as_ref()) {
            (VerificationOutcome::Admit, Some(verifier)) => {
                match mint(&config, verifier, self.inner.clock.now_ms()) {
                    Ok(capability) => DoormanEvent::VerificationSuccess { capability },
                    Err(e) => {
                        self.apply(DoormanEvent::ExitRequested, Some(epoch)).await?;
                        return Err(e);
                    }
                }
            }
            (VerificationOutcome::Panic, Some(_)) if config.panic_enabled => {
                DoormanEvent::PanicGesture {
                    decoy_mode: config.decoy_mode,
                }
            }
            (outcome, _) => {
                debug!(outcome = ?outcome, "Attempt failed");
                DoormanEvent::VerificationFailure
            }
        };

        let (_, step) = self.apply(event, Some(epoch)).await?;
        let Step::Moved(ctx) = step else {
            info!("Attempt resolved after the door moved on, dropping result");
            return Ok(AttemptOutcome::Cancelled);
        };

        let outcome = match ctx.state {
            DoormanState::Admitted => match ctx.capability {
                Some(capability) => AttemptOutcome::Admitted { capability },
                None => {
                    return Err(SpeakeasyError::Internal("ADMITTED without a token".into()))
                }
            },
            DoormanState::Decoy => {
                let verifier = verifier
                    .ok_or_else(|| SpeakeasyError::Internal("DECOY without a verifier".into()))?;
                AttemptOutcome::Decoy {
                    admission_ends_at: ctx.admission_ends_at.unwrap_or_default(),
                    cover: mint(&config, &verifier, self.inner.clock.now_ms())?,
                }
            }
            DoormanState::Cooldown => AttemptOutcome::Cooldown {
                until: ctx.cooldown_ends_at.unwrap_or_default(),
            },
            DoormanState::Locked => AttemptOutcome::Locked {
                until: ctx.lock_ends_at.unwrap_or_default(),
            },
            other => {
                return Err(SpeakeasyError::Internal(format!(
                    "Attempt resolved into unexpected state {other}"
                )))
            }
        };
        Ok(outcome)
    }

    /// Signal a panic gesture recognized by the host outside `submit`.
    pub async fn panic(&self, decoy_mode: bool) -> Result<DoormanSnapshot> {
        let (before, step) = self
            .apply(DoormanEvent::PanicGesture { decoy_mode }, None)
            .await?;
        match step {
            Step::Moved(ctx) => Ok(DoormanSnapshot::from(&ctx)),
            Step::Unhandled => Err(SpeakeasyError::rejected(before, "panic not accepted")),
        }
    }

    /// Leave the current attempt or session. Returns whether anything changed.
    pub async fn exit(&self) -> Result<bool> {
        let (_, step) = self.apply(DoormanEvent::ExitRequested, None).await?;
        Ok(!step.is_unhandled())
    }

    /// Deliver an event from the host. Unhandled pairs are ignored.
    pub async fn dispatch(&self, event: DoormanEvent) -> Result<Step> {
        Ok(self.apply(event, None).await?.1)
    }

    /// Return to a fresh IDLE context, dropping failures, tokens and timers.
    pub async fn reset(&self) {
        {
            let mut shared = self.inner.shared.lock().await;
            let epoch = shared.ctx.epoch.wrapping_add(1);
            shared.ctx = DoormanContext {
                epoch,
                ..Default::default()
            };
            if let Some(timer) = shared.timer.take() {
                timer.abort();
            }
        }
        info!("Doorman reset");
        if let Some(audit) = self.inner.audit.get() {
            audit.log_reset().await;
        }
    }

    pub async fn snapshot(&self) -> DoormanSnapshot {
        DoormanSnapshot::from(&self.inner.shared.lock().await.ctx)
    }

    pub async fn config(&self) -> DoormanConfig {
        self.inner.shared.lock().await.config.clone()
    }

    /// Replace the policy. Deadlines already set keep their values.
    pub async fn set_config(&self, config: DoormanConfig) -> Result<()> {
        config.validate().map_err(SpeakeasyError::Config)?;
        self.inner.shared.lock().await.config = config;
        info!("Doorman config replaced");
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Apply `event` under the lock. With `expected_epoch`, the event is
    /// dropped unless the context is still at that epoch.
    async fn apply(
        &self,
        event: DoormanEvent,
        expected_epoch: Option<u64>,
    ) -> Result<(DoormanState, Step)> {
        let (before, step) = {
            let mut shared = self.inner.shared.lock().await;
            let before = shared.ctx.state;

            if let Some(expected) = expected_epoch {
                if shared.ctx.epoch != expected {
                    debug!(
                        event = event.name(),
                        expected,
                        current = shared.ctx.epoch,
                        "Dropping stale event"
                    );
                    return Ok((before, Step::Unhandled));
                }
            }

            let now = self.inner.clock.now_ms();
            let step = transition(&shared.ctx, &event, &shared.config, now, &self.inner.challenges)?;
            if let Step::Moved(next) = &step {
                shared.ctx = next.clone();
                self.reschedule(&mut shared, now);
                if next.state != before {
                    info!(
                        from = %before.observed(),
                        to = %next.state.observed(),
                        "Doorman transition"
                    );
                    debug!(from = %before, to = %next.state, event = event.name(), "Doorman transition detail");
                }
            }
            (before, step)
        };

        if let (Step::Moved(next), Some(audit)) = (&step, self.inner.audit.get()) {
            audit.log_transition(before, next).await;
        }
        Ok((before, step))
    }

    /// Cancel the previous state's timer and arm one for the new deadline.
    fn reschedule(&self, shared: &mut Shared, now: u64) {
        if let Some(timer) = shared.timer.take() {
            timer.abort();
        }

        let Some((at, event)) = shared.ctx.deadline() else {
            return;
        };
        let epoch = shared.ctx.epoch;
        let delay = Duration::from_millis(at.saturating_sub(now));
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let task = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            Doorman { inner }.fire(epoch, event).await;
        });
        shared.timer = Some(task.abort_handle());
    }

    async fn fire(&self, epoch: u64, event: DoormanEvent) {
        {
            let mut shared = self.inner.shared.lock().await;
            if shared.ctx.epoch != epoch {
                debug!(event = event.name(), "Stale timer fired, ignoring");
                return;
            }
            // This task is the armed timer; forget it so the transition
            // below does not abort the task running it.
            shared.timer = None;
        }

        debug!(event = event.name(), "Deadline reached");
        if let Err(e) = self.apply(event, Some(epoch)).await {
            warn!(error = %e, "Timer transition failed");
        }
    }
}
