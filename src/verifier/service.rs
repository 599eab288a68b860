//! Challenge-bound gesture verification and registration.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::challenge::Challenge;
use crate::clock::Clock;
use crate::crypto::{challenge_tag, derive_key, generate_random_bytes, verify_challenge_tag, KdfParams, SALT_LEN};
use crate::gesture::GestureSequence;
use crate::store::{Verifier, VerifierStore};
use crate::types::{Result, SpeakeasyError};

use super::canonical::encode_steps;
use super::outcome::{RejectReason, VerificationOutcome};

// =============================================================================
// Registration
// =============================================================================

fn gesture_key_material(
    sequence: &GestureSequence,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>> {
    let encoded = Zeroizing::new(encode_steps(&sequence.steps));
    derive_key(&encoded, salt, params)
}

/// Build a verifier for `sequence`, scoped to `domain`.
///
/// A fresh salt is drawn for every registration. `panic` is an optional
/// duress gesture; it must differ from the secret gesture.
pub fn register(
    sequence: &GestureSequence,
    domain: &str,
    panic: Option<&GestureSequence>,
    params: &KdfParams,
) -> Result<Verifier> {
    if sequence.is_empty() {
        return Err(SpeakeasyError::InvalidInput(
            "Cannot register an empty gesture".into(),
        ));
    }
    if domain.trim().is_empty() {
        return Err(SpeakeasyError::InvalidInput(
            "Verifier domain must not be empty".into(),
        ));
    }

    let salt: [u8; SALT_LEN] = generate_random_bytes()?;
    let hash = gesture_key_material(sequence, &salt, params)?;
    let mut verifier = Verifier::new(hex::encode(&hash[..]), hex::encode(salt), domain.to_string());

    if let Some(panic) = panic {
        if panic.is_empty() {
            return Err(SpeakeasyError::InvalidInput(
                "Cannot register an empty panic gesture".into(),
            ));
        }
        if encode_steps(&panic.steps) == encode_steps(&sequence.steps) {
            return Err(SpeakeasyError::InvalidInput(
                "Panic gesture must differ from the secret gesture".into(),
            ));
        }
        let panic_hash = gesture_key_material(panic, &salt, params)?;
        verifier = verifier.with_panic_hash(hex::encode(&panic_hash[..]));
    }

    Ok(verifier)
}

// =============================================================================
// Verification
// =============================================================================

/// Checks submitted gestures against the stored verifier.
///
/// Each challenge nonce is consumed on first presentation, before any other
/// check, so the same challenge can never be verified twice.
pub struct GestureVerifier {
    store: VerifierStore,
    clock: Arc<dyn Clock>,
    params: KdfParams,
    /// Consumed nonces with their challenge expiry
    consumed: DashMap<String, u64>,
}

impl std::fmt::Debug for GestureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GestureVerifier")
            .field("params", &self.params)
            .field("consumed", &self.consumed.len())
            .finish_non_exhaustive()
    }
}

impl GestureVerifier {
    pub fn new(store: VerifierStore, clock: Arc<dyn Clock>, params: KdfParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            store,
            clock,
            params,
            consumed: DashMap::new(),
        })
    }

    pub fn store(&self) -> &VerifierStore {
        &self.store
    }

    /// Register `sequence` (and an optional panic gesture) and persist it,
    /// replacing any existing verifier.
    pub async fn enroll(
        &self,
        sequence: GestureSequence,
        domain: String,
        panic: Option<GestureSequence>,
    ) -> Result<Verifier> {
        let params = self.params.clone();
        let verifier = tokio::task::spawn_blocking(move || {
            register(&sequence, &domain, panic.as_ref(), &params)
        })
        .await??;

        self.store.set_verifier(verifier.clone()).await?;
        info!(domain = %verifier.domain, panic = verifier.panic_hash.is_some(), "Enrolled gesture");
        Ok(verifier)
    }

    /// The stored verifier, if any.
    pub async fn current_verifier(&self) -> Result<Option<Verifier>> {
        self.store.get_verifier().await
    }

    /// Verify `sequence` against `challenge`.
    ///
    /// Policy failures are `Ok(Reject(..))`; only environment problems
    /// (storage, runtime) are errors.
    pub async fn verify(
        &self,
        sequence: &GestureSequence,
        challenge: &Challenge,
    ) -> Result<VerificationOutcome> {
        Ok(self.verify_against(sequence, challenge).await?.0)
    }

    /// Like [`verify`](Self::verify), also returning the verifier that was
    /// compared against so a caller can mint a token for its domain.
    pub(crate) async fn verify_against(
        &self,
        sequence: &GestureSequence,
        challenge: &Challenge,
    ) -> Result<(VerificationOutcome, Option<Verifier>)> {
        let reject = |reason: RejectReason| -> Result<(VerificationOutcome, Option<Verifier>)> {
            Ok((VerificationOutcome::Reject(reason), None))
        };

        let now = self.clock.now_ms();
        self.prune_consumed(now);

        if !self.consume(challenge) {
            warn!("Challenge nonce presented twice");
            return reject(RejectReason::Replayed);
        }
        if now > challenge.expires_at {
            debug!(expires_at = challenge.expires_at, now, "Challenge expired");
            return reject(RejectReason::Expired);
        }
        if sequence.is_empty() {
            return reject(RejectReason::EmptySequence);
        }

        let Some(verifier) = self.store.get_verifier().await? else {
            debug!("No verifier registered");
            return reject(RejectReason::NoVerifier);
        };

        let (nonce, salt) = match (challenge.nonce_bytes(), challenge.salt_bytes()) {
            (Ok(nonce), Ok(salt)) => (nonce, salt),
            _ => return reject(RejectReason::Malformed),
        };

        let steps = sequence.steps.clone();
        let params = self.params.clone();
        let stored = verifier.clone();
        let outcome =
            tokio::task::spawn_blocking(move || compare(&steps, &stored, &nonce, &salt, &params))
                .await??;
        debug!(outcome = ?outcome, "Gesture verified");
        Ok((outcome, Some(verifier)))
    }

    /// Whether `nonce` has already been presented.
    pub fn is_consumed(&self, nonce: &str) -> bool {
        self.consumed.contains_key(nonce)
    }

    fn consume(&self, challenge: &Challenge) -> bool {
        match self.consumed.entry(challenge.nonce.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(challenge.expires_at);
                true
            }
        }
    }

    /// Forget nonces whose challenge has expired; they are rejected as
    /// expired anyway.
    fn prune_consumed(&self, now: u64) {
        self.consumed.retain(|_, expires_at| *expires_at >= now);
    }
}

fn compare(
    steps: &[crate::gesture::GestureStep],
    verifier: &Verifier,
    nonce: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<VerificationOutcome> {
    let Ok(registration_salt) = hex::decode(&verifier.salt) else {
        warn!("Stored verifier salt is not hex");
        return Ok(VerificationOutcome::Reject(RejectReason::Malformed));
    };

    let encoded = Zeroizing::new(encode_steps(steps));
    let candidate = derive_key(&encoded, &registration_salt, params)?;
    let candidate_tag = Zeroizing::new(challenge_tag(&candidate[..], nonce, salt)?);

    if matches_material(&verifier.hash, nonce, salt, &candidate_tag)? {
        return Ok(VerificationOutcome::Admit);
    }
    if let Some(panic_hash) = verifier.panic_hash.as_deref() {
        if matches_material(panic_hash, nonce, salt, &candidate_tag)? {
            return Ok(VerificationOutcome::Panic);
        }
    }
    Ok(VerificationOutcome::Reject(RejectReason::Mismatch))
}

fn matches_material(hex_material: &str, nonce: &[u8], salt: &[u8], candidate_tag: &[u8]) -> Result<bool> {
    let Ok(material) = hex::decode(hex_material) else {
        warn!("Stored key material is not hex");
        return Ok(false);
    };
    let material = Zeroizing::new(material);
    verify_challenge_tag(&material, nonce, salt, candidate_tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeGenerator;
    use crate::clock::ManualClock;
    use crate::gesture::{FlickDirection, GestureStep, Region};
    use crate::store::{DeviceSecret, MemoryBackend};

    fn sequence(steps: Vec<GestureStep>) -> GestureSequence {
        GestureSequence {
            steps,
            total_duration_ms: 1_000,
            rhythm_hash: String::new(),
            timestamp: 0,
        }
    }

    fn secret_gesture() -> GestureSequence {
        sequence(vec![
            GestureStep::Tap {
                count: 3,
                region: Region::Center,
            },
            GestureStep::Flick {
                direction: FlickDirection::Right,
                velocity: 1.2,
            },
        ])
    }

    fn panic_gesture() -> GestureSequence {
        sequence(vec![GestureStep::Tap {
            count: 5,
            region: Region::Edge,
        }])
    }

    fn wrong_gesture() -> GestureSequence {
        sequence(vec![GestureStep::Tap {
            count: 2,
            region: Region::Center,
        }])
    }

    fn verifier_with_clock(clock: Arc<ManualClock>) -> GestureVerifier {
        let secret = DeviceSecret::from_bytes(b"verifier-test-device-secret".to_vec()).unwrap();
        let store = VerifierStore::new(Arc::new(MemoryBackend::new()), secret, KdfParams::minimal()).unwrap();
        GestureVerifier::new(store, clock, KdfParams::minimal()).unwrap()
    }

    #[test]
    fn test_register_rejects_bad_input() {
        let params = KdfParams::minimal();
        assert!(register(&sequence(vec![]), "https://a.example", None, &params).is_err());
        assert!(register(&secret_gesture(), " ", None, &params).is_err());
        assert!(register(&secret_gesture(), "https://a.example", Some(&secret_gesture()), &params).is_err());
    }

    #[test]
    fn test_register_uses_fresh_salt() {
        let params = KdfParams::minimal();
        let a = register(&secret_gesture(), "https://a.example", None, &params).unwrap();
        let b = register(&secret_gesture(), "https://a.example", None, &params).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
        assert!(a.panic_hash.is_none());
    }

    #[tokio::test]
    async fn test_correct_gesture_admits() {
        let clock = Arc::new(ManualClock::new(1_000));
        let verifier = verifier_with_clock(clock);
        verifier
            .enroll(secret_gesture(), "https://a.example".into(), None)
            .await
            .unwrap();

        let challenge = ChallengeGenerator::new().issue(1_000, 30_000).unwrap();
        let outcome = verifier.verify(&secret_gesture(), &challenge).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Admit);
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_gesture_rejected() {
        let clock = Arc::new(ManualClock::new(1_000));
        let verifier = verifier_with_clock(clock);
        verifier
            .enroll(secret_gesture(), "https://a.example".into(), None)
            .await
            .unwrap();

        let challenge = ChallengeGenerator::new().issue(1_000, 30_000).unwrap();
        let outcome = verifier.verify(&wrong_gesture(), &challenge).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Reject(RejectReason::Mismatch));
        assert!(!outcome.is_ok());
    }

    #[tokio::test]
    async fn test_nonce_is_single_use() {
        let clock = Arc::new(ManualClock::new(1_000));
        let verifier = verifier_with_clock(clock);
        verifier
            .enroll(secret_gesture(), "https://a.example".into(), None)
            .await
            .unwrap();

        let challenge = ChallengeGenerator::new().issue(1_000, 30_000).unwrap();
        assert_eq!(
            verifier.verify(&wrong_gesture(), &challenge).await.unwrap(),
            VerificationOutcome::Reject(RejectReason::Mismatch)
        );
        // Even the right gesture cannot reuse a consumed challenge.
        assert_eq!(
            verifier.verify(&secret_gesture(), &challenge).await.unwrap(),
            VerificationOutcome::Reject(RejectReason::Replayed)
        );
        assert!(verifier.is_consumed(&challenge.nonce));
    }

    #[tokio::test]
    async fn test_expired_challenge_rejected() {
        let clock = Arc::new(ManualClock::new(1_000));
        let verifier = verifier_with_clock(clock.clone());
        verifier
            .enroll(secret_gesture(), "https://a.example".into(), None)
            .await
            .unwrap();

        let challenge = ChallengeGenerator::new().issue(1_000, 500).unwrap();
        clock.advance(501);
        assert_eq!(
            verifier.verify(&secret_gesture(), &challenge).await.unwrap(),
            VerificationOutcome::Reject(RejectReason::Expired)
        );
    }

    #[tokio::test]
    async fn test_empty_sequence_and_missing_verifier() {
        let clock = Arc::new(ManualClock::new(1_000));
        let verifier = verifier_with_clock(clock);
        let generator = ChallengeGenerator::new();

        let challenge = generator.issue(1_000, 30_000).unwrap();
        assert_eq!(
            verifier.verify(&sequence(vec![]), &challenge).await.unwrap(),
            VerificationOutcome::Reject(RejectReason::EmptySequence)
        );

        let challenge = generator.issue(1_000, 30_000).unwrap();
        assert_eq!(
            verifier.verify(&secret_gesture(), &challenge).await.unwrap(),
            VerificationOutcome::Reject(RejectReason::NoVerifier)
        );
    }

    #[tokio::test]
    async fn test_panic_gesture_detected() {
        let clock = Arc::new(ManualClock::new(1_000));
        let verifier = verifier_with_clock(clock);
        verifier
            .enroll(secret_gesture(), "https://a.example".into(), Some(panic_gesture()))
            .await
            .unwrap();

        let challenge = ChallengeGenerator::new().issue(1_000, 30_000).unwrap();
        assert_eq!(
            verifier.verify(&panic_gesture(), &challenge).await.unwrap(),
            VerificationOutcome::Panic
        );
    }
}
