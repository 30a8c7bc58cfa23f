//! Core logic for device-timer
//!
//! This crate contains:
//! - Device state evaluation (now + schedule + usage -> enforcement state)
//! - Calibration session state machine (Idle -> Running -> Completed/Error)
//! - Calibration manager driving one sampling task per device
//! - Polling engine: usage accounting, day rollover, enforcement, snapshots

mod calibration;
mod engine;
mod evaluator;
mod events;
mod manager;

pub use calibration::*;
pub use engine::*;
pub use evaluator::*;
pub use events::*;
pub use manager::*;
