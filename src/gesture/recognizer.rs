//! Pointer-event classifier.
//!
//! Turns a stream of down/move/up/cancel events into [`GestureStep`]s and, at
//! [`GestureRecognizer::finish`], a [`GestureSequence`] with its rhythm hash.
//!
//! # Classification (at pointer-up)
//!
//! 1. Moved at least `min_drag_px` from the down point: a drag. A drag whose
//!    samples fell in two or more angular notches around the reference center
//!    is a `RadialDrag`; a fast short one is a `Flick`; anything else is
//!    discarded.
//! 2. Held at least `hold_min_ms` without leaving the jitter radius: `Hold`.
//! 3. Short and still: a tap. Taps in the same region within `inter_tap_ms`
//!    of each other collapse into a single `Tap { count }`.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use super::types::{
    Bounds, FlickDirection, GestureSequence, GestureStep, Point, PointerEvent, PointerKind, Region,
};

// =============================================================================
// Configuration
// =============================================================================

/// Thresholds used by the recognizer. Distances are in pixels, times in ms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Movement from the down point at which a contact becomes a drag
    pub min_drag_px: f64,
    /// Movement tolerated for taps and holds
    pub jitter_px: f64,
    /// Longest press still counted as a tap
    pub tap_max_ms: u64,
    /// Shortest press counted as a hold
    pub hold_min_ms: u64,
    /// Gap between taps that still continues a tap run
    pub inter_tap_ms: u64,
    /// Minimum flick speed in px/ms
    pub flick_min_velocity: f64,
    /// Longest drag still counted as a flick
    pub flick_max_ms: u64,
    /// Width of one angular notch
    pub notch_width_deg: f64,
    /// Radius around the center, as a fraction of the smaller side, where
    /// angles are too unstable to sample
    pub dead_zone_ratio: f64,
    /// Center/edge boundary as a fraction of the reference width
    pub edge_ratio: f64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            min_drag_px: 30.0,
            jitter_px: 10.0,
            tap_max_ms: 250,
            hold_min_ms: 600,
            inter_tap_ms: 350,
            flick_min_velocity: 0.6,
            flick_max_ms: 300,
            notch_width_deg: 45.0,
            dead_zone_ratio: 0.1,
            edge_ratio: 1.0 / 3.0,
        }
    }
}

impl RecognizerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("min_drag_px", self.min_drag_px),
            ("flick_min_velocity", self.flick_min_velocity),
            ("notch_width_deg", self.notch_width_deg),
            ("edge_ratio", self.edge_ratio),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{name} must be a positive number"));
            }
        }
        if self.notch_width_deg > 180.0 {
            return Err("notch_width_deg must be at most 180".to_string());
        }
        if !self.jitter_px.is_finite() || self.jitter_px < 0.0 {
            return Err("jitter_px must not be negative".to_string());
        }
        if !(0.0..0.5).contains(&self.dead_zone_ratio) {
            return Err("dead_zone_ratio must be in [0, 0.5)".to_string());
        }
        if self.tap_max_ms >= self.hold_min_ms {
            return Err("tap_max_ms must be shorter than hold_min_ms".to_string());
        }
        Ok(())
    }
}

/// Angular jumps larger than this between two samples are treated as a
/// discontinuity (the pointer crossed the dead zone), not as rotation.
const MAX_SAMPLE_SWEEP_DEG: f64 = 90.0;

// =============================================================================
// Internal state
// =============================================================================

/// The contact currently in progress (between down and up).
#[derive(Debug)]
struct Contact {
    start: Point,
    start_t: u64,
    max_movement: f64,
    buckets: BTreeSet<u32>,
    first_angle: Option<f64>,
    last_angle: Option<f64>,
    /// Signed rotation accumulated around the center, in degrees
    sweep: f64,
}

/// A run of taps waiting for the inter-tap window to close.
#[derive(Debug)]
struct PendingTaps {
    count: u32,
    region: Region,
    offset_ms: u64,
    last_up_t: u64,
}

// =============================================================================
// Recognizer
// =============================================================================

/// Stateful classifier for one gesture capture.
pub struct GestureRecognizer {
    bounds: Bounds,
    config: RecognizerConfig,
    contact: Option<Contact>,
    pending: Option<PendingTaps>,
    steps: Vec<GestureStep>,
    offsets: Vec<u64>,
    capture_start: Option<u64>,
    last_t: Option<u64>,
}

impl GestureRecognizer {
    pub fn new(bounds: Bounds, config: RecognizerConfig) -> Self {
        Self {
            bounds,
            config,
            contact: None,
            pending: None,
            steps: Vec::new(),
            offsets: Vec::new(),
            capture_start: None,
            last_t: None,
        }
    }

    pub fn with_defaults(bounds: Bounds) -> Self {
        Self::new(bounds, RecognizerConfig::default())
    }

    /// Steps recognized so far in this capture (pending taps excluded).
    pub fn steps(&self) -> &[GestureStep] {
        &self.steps
    }

    /// Whether a tap run is waiting for its window to close.
    pub fn has_pending_taps(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one pointer event. Returns the steps completed by this event.
    pub fn handle(&mut self, event: PointerEvent) -> Vec<GestureStep> {
        let mut emitted = Vec::new();

        match event.kind {
            PointerKind::Down => {
                if let Some(step) = self.flush_expired(event.t) {
                    emitted.push(step);
                }
                if self.contact.is_some() {
                    debug!("Pointer down during an active contact, restarting contact");
                }
                self.capture_start.get_or_insert(event.t);
                let mut contact = Contact {
                    start: event.point(),
                    start_t: event.t,
                    max_movement: 0.0,
                    buckets: BTreeSet::new(),
                    first_angle: None,
                    last_angle: None,
                    sweep: 0.0,
                };
                self.sample(&mut contact, event.point());
                self.contact = Some(contact);
            }
            PointerKind::Move => {
                if let Some(mut contact) = self.contact.take() {
                    self.sample(&mut contact, event.point());
                    self.contact = Some(contact);
                }
            }
            PointerKind::Up => {
                let Some(mut contact) = self.contact.take() else {
                    trace!("Pointer up without down, ignoring");
                    return emitted;
                };
                self.sample(&mut contact, event.point());
                emitted.extend(self.classify(contact, event));
            }
            PointerKind::Cancel => {
                if self.contact.take().is_some() {
                    debug!("Contact cancelled, discarding");
                }
            }
        }

        self.last_t = Some(self.last_t.map_or(event.t, |t| t.max(event.t)));
        emitted
    }

    /// Close the pending tap run if its window elapsed before `now_t`.
    ///
    /// Hosts with a timer call this to emit a tap run without waiting for
    /// the next pointer event.
    pub fn flush_expired(&mut self, now_t: u64) -> Option<GestureStep> {
        let expired = self
            .pending
            .as_ref()
            .map(|p| now_t > p.last_up_t.saturating_add(self.config.inter_tap_ms))
            .unwrap_or(false);

        if expired {
            self.flush_pending()
        } else {
            None
        }
    }

    /// End the capture. Flushes any tap run and returns the sequence, or
    /// `None` if nothing was recognized. The recognizer is reset either way.
    pub fn finish(&mut self) -> Option<GestureSequence> {
        self.flush_pending();
        if self.contact.take().is_some() {
            debug!("Capture finished with a contact still down, discarding it");
        }

        let sequence = if self.steps.is_empty() {
            None
        } else {
            let start = self.capture_start.unwrap_or(0);
            let end = self.last_t.unwrap_or(start);
            Some(GestureSequence {
                steps: std::mem::take(&mut self.steps),
                total_duration_ms: end.saturating_sub(start),
                rhythm_hash: rhythm_hash(&self.offsets),
                timestamp: Utc::now().timestamp_millis().max(0) as u64,
            })
        };

        if let Some(seq) = &sequence {
            debug!(
                steps = seq.steps.len(),
                duration_ms = seq.total_duration_ms,
                "Gesture capture complete"
            );
        }

        self.reset();
        sequence
    }

    /// Discard everything, emitting nothing.
    pub fn reset(&mut self) {
        self.contact = None;
        self.pending = None;
        self.steps.clear();
        self.offsets.clear();
        self.capture_start = None;
        self.last_t = None;
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn sample(&self, contact: &mut Contact, point: Point) {
        contact.max_movement = contact.max_movement.max(contact.start.distance_to(&point));

        let center = self.bounds.center();
        let dead_zone = self.config.dead_zone_ratio * self.bounds.width.min(self.bounds.height);
        if point.distance_to(&center) < dead_zone {
            return;
        }

        let angle = point.angle_around(&center);
        contact
            .buckets
            .insert((angle / self.config.notch_width_deg).floor() as u32);

        if let Some(prev) = contact.last_angle {
            let mut delta = angle - prev;
            if delta > 180.0 {
                delta -= 360.0;
            } else if delta <= -180.0 {
                delta += 360.0;
            }
            if delta.abs() <= MAX_SAMPLE_SWEEP_DEG {
                contact.sweep += delta;
            }
        }
        contact.first_angle.get_or_insert(angle);
        contact.last_angle = Some(angle);
    }

    fn region_of(&self, point: &Point) -> Region {
        let threshold = self.config.edge_ratio * self.bounds.width;
        if point.distance_to(&self.bounds.center()) < threshold {
            Region::Center
        } else {
            Region::Edge
        }
    }

    fn offset_of(&self, t: u64) -> u64 {
        t.saturating_sub(self.capture_start.unwrap_or(t))
    }

    fn classify(&mut self, contact: Contact, up: PointerEvent) -> Vec<GestureStep> {
        let duration = up.t.saturating_sub(contact.start_t);
        let distance = contact.start.distance_to(&up.point());
        let offset = self.offset_of(contact.start_t);

        if distance >= self.config.min_drag_px {
            if contact.buckets.len() >= 2 {
                let from = contact.first_angle.unwrap_or(0.0);
                return self.push_step(
                    GestureStep::RadialDrag {
                        from_angle_deg: from,
                        to_angle_deg: from + contact.sweep,
                        notches: contact.buckets.len() as u32,
                    },
                    offset,
                );
            }

            let velocity = distance / duration.max(1) as f64;
            if velocity >= self.config.flick_min_velocity && duration <= self.config.flick_max_ms {
                let dx = up.x - contact.start.x;
                let dy = up.y - contact.start.y;
                let direction = if dx.abs() >= dy.abs() {
                    if dx >= 0.0 {
                        FlickDirection::Right
                    } else {
                        FlickDirection::Left
                    }
                } else if dy >= 0.0 {
                    FlickDirection::Down
                } else {
                    FlickDirection::Up
                };
                return self.push_step(GestureStep::Flick { direction, velocity }, offset);
            }

            debug!(distance, duration, "Drag was neither radial nor a flick, discarding");
            return Vec::new();
        }

        let still = contact.max_movement <= self.config.jitter_px;
        let region = self.region_of(&contact.start);

        if still && duration >= self.config.hold_min_ms {
            return self.push_step(
                GestureStep::Hold {
                    duration_ms: duration,
                    region,
                },
                offset,
            );
        }

        if still && duration <= self.config.tap_max_ms {
            return self.record_tap(region, contact.start_t, up.t, offset);
        }

        debug!(duration, "Press too long for a tap and too short for a hold, discarding");
        Vec::new()
    }

    fn record_tap(&mut self, region: Region, down_t: u64, up_t: u64, offset: u64) -> Vec<GestureStep> {
        let mut emitted = Vec::new();

        if let Some(pending) = self.pending.as_mut() {
            let continues = pending.region == region
                && down_t.saturating_sub(pending.last_up_t) <= self.config.inter_tap_ms;
            if continues {
                pending.count += 1;
                pending.last_up_t = up_t;
                return emitted;
            }
            emitted.extend(self.flush_pending());
        }

        self.pending = Some(PendingTaps {
            count: 1,
            region,
            offset_ms: offset,
            last_up_t: up_t,
        });
        emitted
    }

    fn push_step(&mut self, step: GestureStep, offset: u64) -> Vec<GestureStep> {
        let mut emitted: Vec<GestureStep> = self.flush_pending().into_iter().collect();
        debug!(kind = step.label(), offset_ms = offset, "Recognized gesture step");
        self.steps.push(step.clone());
        self.offsets.push(offset);
        emitted.push(step);
        emitted
    }

    fn flush_pending(&mut self) -> Option<GestureStep> {
        let pending = self.pending.take()?;
        let step = GestureStep::Tap {
            count: pending.count,
            region: pending.region,
        };
        debug!(count = pending.count, "Tap run closed");
        self.steps.push(step.clone());
        self.offsets.push(pending.offset_ms);
        Some(step)
    }
}

/// Hex SHA-256 over step offsets (ms from capture start, big-endian u64).
pub fn rhythm_hash(offsets: &[u64]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"speakeasy:rhythm:v1");
    for offset in offsets {
        hasher.update(offset.to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

// =============================================================================
// Tests
// =============================================================================
