//! Infrastructure - configuration, metrics, and persisted intent
//!
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `intent` - Last explicit start/stop request, for sticky restart

pub mod config;
pub mod intent;
pub mod metrics;

// Re-export commonly used types
pub use config::{Config, NotifierKind, RestartPolicy, SourceKind};
pub use intent::{IntentStore, MemoryIntentStore, MonitorIntent, RuntimeFileIntentStore};
pub use metrics::Metrics;
