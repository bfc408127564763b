//! Monitor lifecycle - owns start/stop and the sample worker
//!
//! A running session is one source subscription plus one worker task that
//! drains the sample channel into the evaluator. Each session owns its own
//! evaluator slot: the worker evaluates and dispatches while holding the slot
//! lock, and `stop()` empties the slot under the same lock, so a sample in
//! flight is either fully processed or discarded. A worker that outlives its
//! session only ever sees its own, now empty, slot.
//!
//! Sticky restart has two halves. `resume()` runs once at boot and honours the
//! recorded intent. `supervise()` runs for the life of the process and
//! re-opens a session whose source or worker died while monitoring is wanted.

use crate::domain::types::{
    epoch_ms, AlarmRadius, AlarmState, LocationRequest, LocationSample, Target,
};
use crate::infra::config::{Config, RestartPolicy};
use crate::infra::intent::{IntentStore, MonitorIntent};
use crate::infra::metrics::Metrics;
use crate::io::location::{LocationError, LocationSource, SourceHandle};
use crate::services::dispatcher::AlarmDispatcher;
use crate::services::evaluator::ProximityEvaluator;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type EvaluatorSlot = Arc<Mutex<Option<ProximityEvaluator>>>;

/// Immutable inputs of a monitoring session
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub target: Target,
    pub radius: AlarmRadius,
    pub request: LocationRequest,
    pub channel_capacity: usize,
    pub restart: RestartPolicy,
    pub status_title: String,
    pub status_body: String,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target: config.target(),
            radius: config.radius(),
            request: config.location_request(),
            channel_capacity: config.channel_capacity(),
            restart: config.restart_policy(),
            status_title: config.status_title().to_string(),
            status_body: config.status_body().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Stopped,
    Running,
}

/// Read-only snapshot served at `/status`
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub state: LifecycleState,
    pub alarm_state: AlarmState,
    pub last_distance_m: Option<f64>,
    pub session_id: Option<String>,
    pub source: &'static str,
    pub started_at: Option<u64>,
    pub restarts: u64,
}

struct Session {
    id: Uuid,
    handle: SourceHandle,
    evaluator: EvaluatorSlot,
    worker: JoinHandle<()>,
    started_at: u64,
}

impl Session {
    fn is_dead(&self) -> bool {
        self.worker.is_finished() || self.handle.is_finished()
    }
}

pub struct MonitorLifecycle {
    settings: MonitorSettings,
    source: Arc<dyn LocationSource>,
    dispatcher: Arc<AlarmDispatcher>,
    intent: Arc<dyn IntentStore>,
    metrics: Arc<Metrics>,
    /// Serializes start/stop/restart
    session: tokio::sync::Mutex<Option<Session>>,
    /// Mirrors the last explicit intent without re-reading the store
    wanted: AtomicBool,
}

impl MonitorLifecycle {
    pub fn new(
        settings: MonitorSettings,
        source: Arc<dyn LocationSource>,
        dispatcher: Arc<AlarmDispatcher>,
        intent: Arc<dyn IntentStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            settings,
            source,
            dispatcher,
            intent,
            metrics,
            session: tokio::sync::Mutex::new(None),
            wanted: AtomicBool::new(false),
        }
    }

    /// Begin monitoring; true if running afterwards
    ///
    /// Starting a running monitor is a no-op: the alarm state is kept and no
    /// second subscription is taken.
    pub async fn start(&self) -> bool {
        let mut session = self.session.lock().await;
        if session.is_some() {
            debug!("monitor_already_running");
            return true;
        }

        let evaluator = ProximityEvaluator::new(self.settings.target, self.settings.radius);
        match self.open_session(evaluator).await {
            Ok(s) => {
                info!(
                    session_id = %s.id,
                    source = %self.source.name(),
                    notifier = %self.dispatcher.notifier_name(),
                    target = %self.settings.target,
                    radius_m = %self.settings.radius.meters(),
                    interval_ms = %self.settings.request.interval.as_millis(),
                    "monitor_started"
                );
                *session = Some(s);
                self.metrics.record_start();
                self.record_intent(MonitorIntent::Running);
                self.dispatcher.show_status(&self.settings.status_title, &self.settings.status_body);
                true
            }
            Err(e) => {
                if matches!(e, LocationError::PermissionDenied(_)) {
                    self.metrics.record_permission_denied();
                }
                warn!(source = %self.source.name(), error = %e, "monitor_start_failed");
                false
            }
        }
    }

    /// Stop monitoring; always succeeds
    pub async fn stop(&self) -> bool {
        let mut session = self.session.lock().await;

        if let Some(s) = session.take() {
            // Empty the slot first so nothing in flight can fire
            if let Some(mut evaluator) = s.evaluator.lock().take() {
                evaluator.stop();
            }
            s.worker.abort();
            self.source.stop(s.handle);
            self.metrics.record_stop();
            self.dispatcher.clear_status();
            info!(session_id = %s.id, "monitor_stopped");
        } else {
            debug!("monitor_already_stopped");
        }

        self.record_intent(MonitorIntent::Stopped);
        true
    }

    /// Tear down for process exit; the recorded intent is left as it is
    pub async fn shutdown(&self) {
        let mut session = self.session.lock().await;
        if let Some(s) = session.take() {
            let _ = s.evaluator.lock().take();
            s.worker.abort();
            self.source.stop(s.handle);
            self.dispatcher.clear_status();
            info!(session_id = %s.id, "monitor_shutdown");
        }
    }

    /// Honour the recorded intent at process start
    ///
    /// With no recorded intent, `autostart` decides. The restart policy
    /// `none` ignores the record.
    pub async fn resume(&self, autostart: bool) -> bool {
        let recorded = match self.settings.restart {
            RestartPolicy::Sticky => self.intent.load(),
            RestartPolicy::None => None,
        };
        let should_start = match recorded {
            Some(MonitorIntent::Running) => true,
            Some(MonitorIntent::Stopped) => false,
            None => autostart,
        };
        info!(
            recorded = %recorded.map(|i| i.as_str()).unwrap_or("none"),
            autostart = %autostart,
            resume = %should_start,
            "monitor_resume"
        );

        if !should_start {
            return false;
        }
        if recorded == Some(MonitorIntent::Running) {
            // Survives a denied start so the supervisor keeps trying
            self.wanted.store(true, Ordering::SeqCst);
        }
        self.start().await
    }

    /// Restart dead sessions until shutdown (no-op under policy `none`)
    pub async fn supervise(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        if self.settings.restart == RestartPolicy::None {
            info!("monitor_supervisor_disabled");
            return;
        }
        info!(interval_ms = %every.as_millis(), "monitor_supervisor_started");

        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.check_health().await;
                }
            }
        }
        info!("monitor_supervisor_stopped");
    }

    /// One supervisor pass; returns true if a session was (re)opened
    pub async fn check_health(&self) -> bool {
        if !self.wanted.load(Ordering::SeqCst) {
            return false;
        }

        let mut session = self.session.lock().await;
        let revived = session.is_some();
        let evaluator = match session.take() {
            Some(s) if !s.is_dead() => {
                *session = Some(s);
                return false;
            }
            Some(s) => {
                warn!(
                    session_id = %s.id,
                    worker_finished = %s.worker.is_finished(),
                    source_finished = %s.handle.is_finished(),
                    "monitor_loop_died"
                );
                s.worker.abort();
                self.source.stop(s.handle);
                // Carry the alarm state over so a restart does not re-alert
                let carried = s.evaluator.lock().take();
                carried
            }
            None => None,
        };
        let evaluator = evaluator
            .unwrap_or_else(|| ProximityEvaluator::new(self.settings.target, self.settings.radius));

        match self.open_session(evaluator).await {
            Ok(s) => {
                if revived {
                    info!(session_id = %s.id, source = %self.source.name(), "monitor_restarted");
                    self.metrics.record_restart();
                } else {
                    // First session since boot; the earlier resume was refused
                    info!(session_id = %s.id, source = %self.source.name(), "monitor_started");
                    self.metrics.record_start();
                    self.dispatcher
                        .show_status(&self.settings.status_title, &self.settings.status_body);
                }
                *session = Some(s);
                true
            }
            Err(e) => {
                if matches!(e, LocationError::PermissionDenied(_)) {
                    self.metrics.record_permission_denied();
                }
                debug!(error = %e, "monitor_restart_failed");
                false
            }
        }
    }

    pub async fn state(&self) -> LifecycleState {
        match *self.session.lock().await {
            Some(_) => LifecycleState::Running,
            None => LifecycleState::Stopped,
        }
    }

    pub async fn status(&self) -> MonitorStatus {
        let session = self.session.lock().await;
        let (alarm_state, last_distance_m) = match session.as_ref() {
            Some(s) => match s.evaluator.lock().as_ref() {
                Some(e) => (e.state(), e.last_distance_m()),
                None => (AlarmState::Stopped, None),
            },
            None => (AlarmState::Stopped, None),
        };
        MonitorStatus {
            state: if session.is_some() { LifecycleState::Running } else { LifecycleState::Stopped },
            alarm_state,
            last_distance_m,
            session_id: session.as_ref().map(|s| s.id.to_string()),
            source: self.source.name(),
            started_at: session.as_ref().map(|s| s.started_at),
            restarts: self.metrics.restarts_total(),
        }
    }

    /// Subscribe to the source and spawn the worker around `evaluator`
    async fn open_session(&self, evaluator: ProximityEvaluator) -> Result<Session, LocationError> {
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity);
        let handle = self.source.start(self.settings.request, tx).await?;

        let slot: EvaluatorSlot = Arc::new(Mutex::new(Some(evaluator)));

        let id = Uuid::now_v7();
        let worker = tokio::spawn(run_worker(
            id,
            rx,
            slot.clone(),
            self.dispatcher.clone(),
            self.metrics.clone(),
        ));

        Ok(Session { id, handle, evaluator: slot, worker, started_at: epoch_ms() })
    }

    fn record_intent(&self, intent: MonitorIntent) {
        self.wanted.store(intent == MonitorIntent::Running, Ordering::SeqCst);
        if let Err(e) = self.intent.save(intent) {
            error!(intent = %intent.as_str(), error = %e, "intent_save_failed");
        }
    }
}

/// Drain samples in FIFO order until the source closes the channel
async fn run_worker(
    session_id: Uuid,
    mut rx: mpsc::Receiver<LocationSample>,
    slot: EvaluatorSlot,
    dispatcher: Arc<AlarmDispatcher>,
    metrics: Arc<Metrics>,
) {
    debug!(session_id = %session_id, "monitor_worker_started");

    while let Some(sample) = rx.recv().await {
        let mut guard = slot.lock();
        match guard.as_mut() {
            Some(evaluator) => {
                let event = evaluator.on_sample(&sample);
                metrics.record_sample_evaluated(evaluator.last_distance_m());
                if let Some(event) = event {
                    dispatcher.on_event(&event);
                }
            }
            None => {
                metrics.record_sample_discarded();
                tracing::trace!(ts = %sample.timestamp, "sample_discarded_after_stop");
            }
        }
    }

    info!(session_id = %session_id, "monitor_worker_stream_ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::intent::MemoryIntentStore;
    use crate::io::location::ScriptedSource;
    use crate::io::notifier::LogNotifier;

    fn settings(restart: RestartPolicy) -> MonitorSettings {
        MonitorSettings {
            target: Target::new(-6.1666, 106.83).unwrap(),
            radius: AlarmRadius::new(200.0).unwrap(),
            request: LocationRequest {
                interval: Duration::from_millis(20),
                fastest_interval: Duration::ZERO,
                ..Default::default()
            },
            channel_capacity: 16,
            restart,
            status_title: "running".to_string(),
            status_body: "watching".to_string(),
        }
    }

    fn monitor(source: Arc<ScriptedSource>, restart: RestartPolicy) -> MonitorLifecycle {
        let metrics = Arc::new(Metrics::new());
        let dispatcher =
            Arc::new(AlarmDispatcher::new(Arc::new(LogNotifier), metrics.clone(), "a", "b"));
        MonitorLifecycle::new(
            settings(restart),
            source,
            dispatcher,
            Arc::new(MemoryIntentStore::new()),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_stopped_status_reports_no_session() {
        let m = monitor(Arc::new(ScriptedSource::new(Vec::new())), RestartPolicy::Sticky);
        let status = m.status().await;
        assert_eq!(status.state, LifecycleState::Stopped);
        assert_eq!(status.alarm_state, AlarmState::Stopped);
        assert!(status.session_id.is_none());
    }

    #[tokio::test]
    async fn test_start_sets_armed_and_session() {
        let m = monitor(Arc::new(ScriptedSource::new(Vec::new())), RestartPolicy::Sticky);
        assert!(m.start().await);
        let status = m.status().await;
        assert_eq!(status.state, LifecycleState::Running);
        assert_eq!(status.alarm_state, AlarmState::Armed);
        assert!(status.session_id.is_some());
        assert!(m.stop().await);
        assert_eq!(m.state().await, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_health_check_idle_when_not_wanted() {
        let m = monitor(Arc::new(ScriptedSource::new(Vec::new())), RestartPolicy::Sticky);
        assert!(!m.check_health().await);
        assert_eq!(m.state().await, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_resume_policy_none_ignores_intent() {
        let source = Arc::new(ScriptedSource::new(Vec::new()));
        let metrics = Arc::new(Metrics::new());
        let dispatcher =
            Arc::new(AlarmDispatcher::new(Arc::new(LogNotifier), metrics.clone(), "a", "b"));
        let m = MonitorLifecycle::new(
            settings(RestartPolicy::None),
            source.clone(),
            dispatcher,
            Arc::new(MemoryIntentStore::with_intent(MonitorIntent::Running)),
            metrics,
        );
        assert!(!m.resume(false).await);
        assert_eq!(source.start_count(), 0);
    }
}
