//! Alarm dispatch - turns crossing events into user alerts
//!
//! Exactly one alert per `Entered`. `Exited` is recorded and logged only.
//! Notifier failures are logged and counted; they never reach the caller.

use crate::domain::types::AlarmEvent;
use crate::infra::metrics::Metrics;
use crate::io::notifier::{Alert, Notifier, STATUS_ALERT_ID};
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct AlarmDispatcher {
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
    title: String,
    body: String,
}

impl AlarmDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, metrics: Arc<Metrics>, title: &str, body: &str) -> Self {
        Self { notifier, metrics, title: title.to_string(), body: body.to_string() }
    }

    pub fn notifier_name(&self) -> &'static str {
        self.notifier.name()
    }

    pub fn on_event(&self, event: &AlarmEvent) {
        match event {
            AlarmEvent::Entered { distance_m, sample } => {
                self.metrics.record_entered();
                let alert = Alert::alarm(&self.title, &self.body, *distance_m);
                match self.notifier.notify(&alert) {
                    Ok(()) => {
                        self.metrics.record_alert_sent();
                        info!(
                            notifier = %self.notifier.name(),
                            distance_m = format!("{:.1}", distance_m),
                            ts = %sample.timestamp,
                            "alarm_dispatched"
                        );
                    }
                    Err(e) => {
                        self.metrics.record_notifier_failure();
                        error!(notifier = %self.notifier.name(), error = %e, "alarm_dispatch_failed");
                    }
                }
            }
            AlarmEvent::Exited { distance_m, sample } => {
                self.metrics.record_exited();
                debug!(
                    distance_m = format!("{:.1}", distance_m),
                    ts = %sample.timestamp,
                    "alarm_rearmed"
                );
            }
        }
    }

    /// Show the ongoing "monitoring active" notice
    pub fn show_status(&self, title: &str, body: &str) {
        if let Err(e) = self.notifier.notify(&Alert::status(title, body)) {
            self.metrics.record_notifier_failure();
            error!(notifier = %self.notifier.name(), error = %e, "status_notice_failed");
        }
    }

    pub fn clear_status(&self) {
        if let Err(e) = self.notifier.clear(STATUS_ALERT_ID) {
            self.metrics.record_notifier_failure();
            error!(notifier = %self.notifier.name(), error = %e, "status_clear_failed");
        }
    }
}
