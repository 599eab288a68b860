//! Doorman state machine
//!
//! Gatekeeper between a knock and an admission: issues challenges, routes
//! verification results, enforces cooldowns and locks, and handles panic
//! gestures.

pub mod config;
pub mod machine;
pub mod state;
pub mod transition;

pub use config::DoormanConfig;
pub use machine::{AttemptOutcome, Doorman};
pub use state::{DoormanContext, DoormanEvent, DoormanSnapshot, DoormanState};
pub use transition::{transition, Step};
