//! Canonical byte encoding of a gesture.
//!
//! Only the parts a person can reproduce are encoded: tap counts, hold
//! length in half-second buckets, drag direction and notch count, flick
//! direction, and tap/hold regions. Velocities, exact angles and rhythm are
//! left out.

use crate::gesture::GestureStep;

/// Format version prefixed to every encoding
pub const ENCODING_VERSION: u8 = 1;

/// Hold durations are compared in buckets of this many milliseconds
pub const HOLD_BUCKET_MS: u64 = 500;

const TAG_TAP: u8 = 0x01;
const TAG_HOLD: u8 = 0x02;
const TAG_RADIAL_DRAG: u8 = 0x03;
const TAG_FLICK: u8 = 0x04;

const ROTATION_CLOCKWISE: u8 = 0;
const ROTATION_COUNTER_CLOCKWISE: u8 = 1;

/// Round a hold duration to the nearest bucket.
pub fn hold_bucket(duration_ms: u64) -> u32 {
    let bucket = duration_ms.saturating_add(HOLD_BUCKET_MS / 2) / HOLD_BUCKET_MS;
    u32::try_from(bucket).unwrap_or(u32::MAX)
}

/// Encode `steps` into the canonical byte form key material is derived from.
pub fn encode_steps(steps: &[GestureStep]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + steps.len() * 6);
    out.push(ENCODING_VERSION);
    out.extend_from_slice(&(steps.len() as u32).to_be_bytes());

    for step in steps {
        match step {
            GestureStep::Tap { count, region } => {
                out.push(TAG_TAP);
                out.extend_from_slice(&count.to_be_bytes());
                out.push(region.code());
            }
            GestureStep::Hold {
                duration_ms,
                region,
            } => {
                out.push(TAG_HOLD);
                out.extend_from_slice(&hold_bucket(*duration_ms).to_be_bytes());
                out.push(region.code());
            }
            GestureStep::RadialDrag {
                from_angle_deg,
                to_angle_deg,
                notches,
            } => {
                // Screen y grows downward, so increasing angle is clockwise.
                let rotation = if to_angle_deg >= from_angle_deg {
                    ROTATION_CLOCKWISE
                } else {
                    ROTATION_COUNTER_CLOCKWISE
                };
                out.push(TAG_RADIAL_DRAG);
                out.push(rotation);
                out.extend_from_slice(&notches.to_be_bytes());
            }
            GestureStep::Flick { direction, .. } => {
                out.push(TAG_FLICK);
                out.push(direction.code());
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::{FlickDirection, Region};

    #[test]
    fn test_tap_layout() {
        let bytes = encode_steps(&[GestureStep::Tap {
            count: 3,
            region: Region::Edge,
        }]);
        assert_eq!(bytes, vec![1, 0, 0, 0, 1, TAG_TAP, 0, 0, 0, 3, 1]);
    }

    #[test]
    fn test_hold_buckets() {
        assert_eq!(hold_bucket(0), 0);
        assert_eq!(hold_bucket(249), 0);
        assert_eq!(hold_bucket(250), 1);
        assert_eq!(hold_bucket(740), 1);
        assert_eq!(hold_bucket(760), 2);

        let a = encode_steps(&[GestureStep::Hold {
            duration_ms: 980,
            region: Region::Center,
        }]);
        let b = encode_steps(&[GestureStep::Hold {
            duration_ms: 1_120,
            region: Region::Center,
        }]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_ignores_velocity_and_exact_angles() {
        let slow = encode_steps(&[
            GestureStep::Flick {
                direction: FlickDirection::Left,
                velocity: 0.7,
            },
            GestureStep::RadialDrag {
                from_angle_deg: 10.0,
                to_angle_deg: 100.0,
                notches: 3,
            },
        ]);
        let fast = encode_steps(&[
            GestureStep::Flick {
                direction: FlickDirection::Left,
                velocity: 2.5,
            },
            GestureStep::RadialDrag {
                from_angle_deg: 30.0,
                to_angle_deg: 130.0,
                notches: 3,
            },
        ]);
        assert_eq!(slow, fast);
    }

    #[test]
    fn test_drag_direction_matters() {
        let cw = encode_steps(&[GestureStep::RadialDrag {
            from_angle_deg: 0.0,
            to_angle_deg: 120.0,
            notches: 3,
        }]);
        let ccw = encode_steps(&[GestureStep::RadialDrag {
            from_angle_deg: 0.0,
            to_angle_deg: -120.0,
            notches: 3,
        }]);
        assert_ne!(cw, ccw);
    }

    #[test]
    fn test_order_and_count_matter() {
        let tap = GestureStep::Tap {
            count: 2,
            region: Region::Center,
        };
        let flick = GestureStep::Flick {
            direction: FlickDirection::Up,
            velocity: 1.0,
        };
        assert_ne!(
            encode_steps(&[tap.clone(), flick.clone()]),
            encode_steps(&[flick.clone(), tap.clone()])
        );
        assert_ne!(
            encode_steps(&[tap.clone()]),
            encode_steps(&[tap.clone(), tap])
        );
    }
}
