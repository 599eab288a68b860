//! Recorded pointer input that can be replayed through a recognizer.
//!
//! File form: `{"bounds": {...}, "events": [{"type": "down", ...}], "recognizer": {...}}`
//! with `recognizer` optional.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{Result, SpeakeasyError};

use super::recognizer::{GestureRecognizer, RecognizerConfig};
use super::types::{Bounds, GestureSequence, PointerEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GestureCapture {
    pub bounds: Bounds,
    pub events: Vec<PointerEvent>,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
}

impl GestureCapture {
    pub fn new(bounds: Bounds, events: Vec<PointerEvent>) -> Self {
        Self {
            bounds,
            events,
            recognizer: RecognizerConfig::default(),
        }
    }

    /// Read a capture from a JSON file. The recognizer thresholds are
    /// validated before anything is replayed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            SpeakeasyError::InvalidInput(format!("Cannot read gesture {}: {}", path.display(), e))
        })?;
        let capture: Self = serde_json::from_str(&raw).map_err(|e| {
            SpeakeasyError::InvalidInput(format!("Invalid gesture file {}: {}", path.display(), e))
        })?;
        capture.recognizer.validate().map_err(|e| {
            SpeakeasyError::InvalidInput(format!("Invalid recognizer in {}: {}", path.display(), e))
        })?;
        Ok(capture)
    }

    /// Run the events through a fresh recognizer.
    pub fn replay(&self) -> Option<GestureSequence> {
        let mut recognizer = GestureRecognizer::new(self.bounds, self.recognizer.clone());
        for event in &self.events {
            recognizer.handle(*event);
        }
        recognizer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::{GestureStep, Region};

    #[test]
    fn test_replay_from_json() {
        let json = r#"{
            "bounds": {"x": 0, "y": 0, "width": 300, "height": 300},
            "events": [
                {"type": "down", "x": 150, "y": 150, "t": 0},
                {"type": "up", "x": 150, "y": 150, "t": 80},
                {"type": "down", "x": 151, "y": 150, "t": 200},
                {"type": "up", "x": 151, "y": 150, "t": 280}
            ]
        }"#;
        let capture: GestureCapture = serde_json::from_str(json).unwrap();
        let sequence = capture.replay().unwrap();

        assert_eq!(
            sequence.steps,
            vec![GestureStep::Tap {
                count: 2,
                region: Region::Center
            }]
        );
        assert_eq!(sequence.total_duration_ms, 280);
    }

    #[test]
    fn test_empty_capture_yields_nothing() {
        let capture = GestureCapture::new(Bounds::new(0.0, 0.0, 100.0, 100.0), vec![]);
        assert!(capture.replay().is_none());
    }

    #[tokio::test]
    async fn test_load_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gesture.json");
        tokio::fs::write(&path, "{}").await.unwrap();
        assert!(matches!(
            GestureCapture::load(&path).await,
            Err(SpeakeasyError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_load_rejects_bad_recognizer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gesture.json");
        let json = r#"{
            "bounds": {"x": 0, "y": 0, "width": 300, "height": 300},
            "events": [],
            "recognizer": {"notch_width_deg": 0}
        }"#;
        tokio::fs::write(&path, json).await.unwrap();

        match GestureCapture::load(&path).await {
            Err(SpeakeasyError::InvalidInput(msg)) => assert!(msg.contains("notch_width_deg")),
            other => panic!("expected invalid input, got {:?}", other),
        }
    }
}
