//! Domain models - position fixes, target and alarm state
//!
//! This module contains the canonical data types used throughout the system:
//! - `Target` / `AlarmRadius` - the watched circle
//! - `LocationSample` - one position fix from a location source
//! - `AlarmState` / `AlarmEvent` - evaluator state and emitted crossings
//! - `geo` - great-circle distance

pub mod geo;
pub mod types;

pub use types::{
    epoch_ms, AccuracyHint, AlarmEvent, AlarmRadius, AlarmState, DomainError, LocationRequest,
    LocationSample, Target,
};
