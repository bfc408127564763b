//! Services - proximity logic and lifecycle
//!
//! - `evaluator` - armed/triggered state machine over position fixes
//! - `dispatcher` - turns alarm events into alerts
//! - `monitor` - start/stop, sample worker and sticky restart supervision
//! - `control` - method-name control boundary used by the UI

pub mod control;
pub mod dispatcher;
pub mod evaluator;
pub mod monitor;

// Re-export commonly used types
pub use control::{handle_method, ControlResponse};
pub use dispatcher::AlarmDispatcher;
pub use evaluator::{evaluate, ProximityEvaluator};
pub use monitor::{LifecycleState, MonitorLifecycle, MonitorSettings, MonitorStatus};
