//! IO modules - external system interfaces
//!
//! - `location` - position fix sources (serial NMEA, gpsd, replay, scripted)
//! - `notifier` - user-visible alert backends (log, command, MQTT)
//! - `http` - control, status and Prometheus metrics endpoint

pub mod http;
pub mod location;
pub mod notifier;

// Re-export commonly used types
pub use location::{build_source, LocationError, LocationSource, SourceHandle};
pub use notifier::{build_notifier, Alert, Notifier, NotifierError};
