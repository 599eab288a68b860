//! Gesture data model: pointer input, classified steps, and sequences.

use serde::{Deserialize, Serialize};

/// Screen coordinate. Only used for angle and distance math.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Angle of `self` around `center` in degrees, normalized to [0, 360).
    pub fn angle_around(&self, center: &Point) -> f64 {
        let deg = (self.y - center.y).atan2(self.x - center.x).to_degrees();
        if deg < 0.0 {
            deg + 360.0
        } else {
            deg
        }
    }
}

/// Bounding box of the reference control the gesture is performed against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Kind of pointer event delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerKind {
    Down,
    Move,
    Up,
    Cancel,
}

/// Raw pointer event. `t` is a monotonic timestamp in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    #[serde(rename = "type")]
    pub kind: PointerKind,
    pub x: f64,
    pub y: f64,
    pub t: u64,
}

impl PointerEvent {
    pub fn new(kind: PointerKind, x: f64, y: f64, t: u64) -> Self {
        Self { kind, x, y, t }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Where a tap or hold landed relative to the reference center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Center,
    Edge,
}

impl Region {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Center => 0,
            Self::Edge => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlickDirection {
    Up,
    Down,
    Left,
    Right,
}

impl FlickDirection {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Up => 0,
            Self::Down => 1,
            Self::Left => 2,
            Self::Right => 3,
        }
    }
}

/// One classified element of a gesture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GestureStep {
    Tap {
        count: u32,
        region: Region,
    },
    Hold {
        duration_ms: u64,
        region: Region,
    },
    RadialDrag {
        from_angle_deg: f64,
        to_angle_deg: f64,
        notches: u32,
    },
    Flick {
        direction: FlickDirection,
        velocity: f64,
    },
}

impl GestureStep {
    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tap { .. } => "tap",
            Self::Hold { .. } => "hold",
            Self::RadialDrag { .. } => "radial_drag",
            Self::Flick { .. } => "flick",
        }
    }
}

/// A completed capture, ready to submit for verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureSequence {
    pub steps: Vec<GestureStep>,
    pub total_duration_ms: u64,
    /// Hex SHA-256 over the per-step millisecond offsets
    pub rhythm_hash: String,
    /// Epoch milliseconds when the capture finished
    pub timestamp: u64,
}

impl GestureSequence {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
