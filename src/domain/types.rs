//! Shared types for the proximity alarm

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Current time as epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Rejected domain values
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("latitude {0} out of range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} out of range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("alarm radius must be positive and finite, got {0}")]
    InvalidRadius(f64),
}

/// Juanda station, Jakarta
pub const DEFAULT_TARGET: Target = Target { latitude: -6.1666, longitude: 106.8300 };

pub const DEFAULT_RADIUS: AlarmRadius = AlarmRadius(200.0);

/// The point being watched
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Target {
    latitude: f64,
    longitude: f64,
}

impl Target {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, DomainError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(DomainError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(DomainError::LongitudeOutOfRange(longitude));
        }
        Ok(Self { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// Alarm distance threshold in meters
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[repr(transparent)]
pub struct AlarmRadius(f64);

impl AlarmRadius {
    pub fn new(meters: f64) -> Result<Self, DomainError> {
        if meters.is_finite() && meters > 0.0 {
            Ok(Self(meters))
        } else {
            Err(DomainError::InvalidRadius(meters))
        }
    }

    #[inline]
    pub fn meters(&self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for AlarmRadius {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}m", self.0)
    }
}

/// A single position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Fix time (epoch ms)
    pub timestamp: u64,
    /// Horizontal accuracy estimate in meters, if the receiver reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f32>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, timestamp: u64) -> Self {
        Self { latitude, longitude, timestamp, accuracy: None }
    }

    pub fn with_accuracy(mut self, meters: f32) -> Self {
        self.accuracy = Some(meters);
        self
    }
}

/// Power/precision preference passed to the positioning subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyHint {
    #[default]
    High,
    Balanced,
    Low,
}

impl AccuracyHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccuracyHint::High => "high",
            AccuracyHint::Balanced => "balanced",
            AccuracyHint::Low => "low",
        }
    }
}

/// Cadence and accuracy requested from a location source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationRequest {
    pub interval: Duration,
    pub fastest_interval: Duration,
    pub accuracy: AccuracyHint,
    /// Fixes reporting a worse accuracy than this are skipped
    pub max_accuracy_m: Option<f32>,
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10_000),
            fastest_interval: Duration::from_millis(5_000),
            accuracy: AccuracyHint::High,
            max_accuracy_m: None,
        }
    }
}

/// Proximity state owned by the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmState {
    Stopped,
    /// Watching, not yet inside the radius
    Armed,
    /// Inside the radius, alert already issued
    Triggered,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Stopped => "stopped",
            AlarmState::Armed => "armed",
            AlarmState::Triggered => "triggered",
        }
    }
}

/// Discrete crossing emitted by the evaluator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlarmEvent {
    Entered { distance_m: f64, sample: LocationSample },
    Exited { distance_m: f64, sample: LocationSample },
}

impl AlarmEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmEvent::Entered { .. } => "entered",
            AlarmEvent::Exited { .. } => "exited",
        }
    }

    pub fn distance_m(&self) -> f64 {
        match self {
            AlarmEvent::Entered { distance_m, .. } | AlarmEvent::Exited { distance_m, .. } => {
                *distance_m
            }
        }
    }
}
