//! Audit trail of doorman activity
//!
//! Writes one JSON object per line. A decoy admission is written exactly
//! like a real one minus the token id, so the file never shows duress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::doorman::{DoormanContext, DoormanState};

/// Audit event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A challenge was issued
    ChallengeIssued,
    /// A knock arrived while the door was not idle
    KnockRejected,
    /// Admission granted (real or decoy)
    Admitted,
    /// A wrong gesture started a cooldown
    AttemptFailed,
    /// The door locked
    Locked,
    /// A lock ran out
    LockReleased,
    /// A cooldown ran out
    CooldownEnded,
    /// A challenge was abandoned, timed out or expired
    AttemptAbandoned,
    /// An admission ended
    SessionEnded,
    /// The machine was reset explicitly
    Reset,
}

impl AuditEventType {
    /// Classify a transition by the state it left and the state it entered.
    pub fn for_transition(from: DoormanState, to: DoormanState) -> Self {
        use DoormanState as S;
        match (from, to) {
            (_, S::Challenged) => Self::ChallengeIssued,
            (_, S::Admitted | S::Decoy) => Self::Admitted,
            (_, S::Cooldown) => Self::AttemptFailed,
            (_, S::Locked) => Self::Locked,
            (S::Locked, S::Idle) => Self::LockReleased,
            (S::Cooldown, S::Idle) => Self::CooldownEnded,
            (S::Admitted | S::Decoy, S::Idle) => Self::SessionEnded,
            _ => Self::AttemptAbandoned,
        }
    }
}

/// One audit line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Doorman instance that produced the event
    pub instance: String,
    /// State after the event, with DECOY reported as ADMITTED
    pub state: DoormanState,
    pub consecutive_failures: u32,
    /// Id of the token minted, for real admissions only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    /// Deadline of the new state, epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, instance: String, state: DoormanState) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            instance,
            state: state.observed(),
            consecutive_failures: 0,
            token_id: None,
            until: None,
        }
    }

    /// Build the event for a transition into `ctx`.
    pub fn for_context(from: DoormanState, ctx: &DoormanContext, instance: String) -> Self {
        let mut event = Self::new(AuditEventType::for_transition(from, ctx.state), instance, ctx.state)
            .with_failures(ctx.consecutive_failures);
        if let Some(token) = &ctx.capability {
            event = event.with_token(token.token_id.clone());
        }
        if let Some((until, _)) = ctx.deadline() {
            event = event.with_until(until);
        }
        event
    }

    pub fn with_failures(mut self, failures: u32) -> Self {
        self.consecutive_failures = failures;
        self
    }

    /// Set the token id
    pub fn with_token(mut self, token_id: String) -> Self {
        self.token_id = Some(token_id);
        self
    }

    pub fn with_until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Audit logger that appends events to a JSONL file
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<Mutex<AuditLoggerInner>>,
    instance: String,
}

struct AuditLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// Create a logger that drops events until a file is attached
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AuditLoggerInner {
                writer: None,
                path: None,
            })),
            instance: instance.into(),
        }
    }

    /// Append to the file at `path`, creating it if needed
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Audit logging initialized to {}", path.display());
        Ok(())
    }

    /// Path of the attached file, if any
    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }

    pub async fn log(&self, event: AuditEvent) {
        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;

        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write audit event: {}", e);
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        }
    }

    /// Log a transition into `ctx` from `from`
    pub async fn log_transition(&self, from: DoormanState, ctx: &DoormanContext) {
        self.log(AuditEvent::for_context(from, ctx, self.instance.clone()))
            .await;
    }

    /// Log a knock refused because the door was busy
    pub async fn log_knock_rejected(&self, state: DoormanState, failures: u32) {
        let event = AuditEvent::new(AuditEventType::KnockRejected, self.instance.clone(), state)
            .with_failures(failures);
        self.log(event).await;
    }

    /// Log an explicit reset
    pub async fn log_reset(&self) {
        let event = AuditEvent::new(AuditEventType::Reset, self.instance.clone(), DoormanState::Idle);
        self.log(event).await;
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityIssuer;
    use crate::store::Verifier;

    #[test]
    fn test_transition_classification() {
        use DoormanState as S;
        assert_eq!(AuditEventType::for_transition(S::Idle, S::Challenged), AuditEventType::ChallengeIssued);
        assert_eq!(AuditEventType::for_transition(S::Verifying, S::Decoy), AuditEventType::Admitted);
        assert_eq!(AuditEventType::for_transition(S::Locked, S::Idle), AuditEventType::LockReleased);
        assert_eq!(AuditEventType::for_transition(S::Challenged, S::Idle), AuditEventType::AttemptAbandoned);
        assert_eq!(AuditEventType::for_transition(S::Decoy, S::Idle), AuditEventType::SessionEnded);
    }

    #[test]
    fn test_decoy_looks_like_admission() {
        let decoy = DoormanContext {
            state: DoormanState::Decoy,
            admission_ends_at: Some(5_000),
            ..Default::default()
        };
        let jsonl = AuditEvent::for_context(DoormanState::Verifying, &decoy, "door".into())
            .to_jsonl()
            .unwrap();

        assert!(jsonl.contains("\"admitted\""));
        assert!(jsonl.contains("\"ADMITTED\""));
        assert!(!jsonl.contains("DECOY"));
        assert!(!jsonl.contains("token_id"));
    }

    #[test]
    fn test_real_admission_carries_token() {
        let verifier = Verifier::new("aa".into(), "bb".into(), "https://bar.example".into());
        let token = CapabilityIssuer::new("test")
            .issue(&verifier, ["session"], 1_000, None, 0)
            .unwrap();
        let admitted = DoormanContext {
            state: DoormanState::Admitted,
            admission_ends_at: Some(1_000),
            capability: Some(token.clone()),
            ..Default::default()
        };

        let event = AuditEvent::for_context(DoormanState::Verifying, &admitted, "door".into());
        assert_eq!(event.token_id.as_deref(), Some(token.token_id.as_str()));
        assert_eq!(event.until, Some(1_000));
    }

    #[tokio::test]
    async fn test_writes_jsonl_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let logger = AuditLogger::new("door");
        logger.init_file(path.clone()).await.unwrap();
        logger.log_reset().await;
        logger.log_knock_rejected(DoormanState::Locked, 3).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"reset\""));
        assert!(lines[1].contains("\"knock_rejected\""));
        assert_eq!(logger.path().await, Some(path));
    }
}
