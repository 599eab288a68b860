//! Gesture recognition
//!
//! Classifies raw pointer input against a reference control into taps,
//! holds, radial drags and flicks, and fingerprints the timing of a capture.

pub mod capture;
pub mod recognizer;
pub mod types;

pub use capture::GestureCapture;
pub use recognizer::{rhythm_hash, GestureRecognizer, RecognizerConfig};
pub use types::{
    Bounds, FlickDirection, GestureSequence, GestureStep, Point, PointerEvent, PointerKind, Region,
};
