//! Location sources - producers of position fixes
//!
//! A source is started with a `LocationRequest` and the sending half of the
//! sample channel. It runs its own task and pushes fixes in arrival order
//! until its handle is stopped. Sources:
//! - `nmea` - serial GNSS receiver speaking NMEA-0183
//! - `gpsd` - gpsd JSON watch stream over TCP
//! - `replay` - JSON Lines track file
//! - `scripted` - in-memory fixes for tests (not selectable from config)

pub mod gpsd;
pub mod nmea;
pub mod replay;
pub mod scripted;

use crate::domain::types::{LocationRequest, LocationSample};
use crate::infra::config::{Config, SourceKind};
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use gpsd::GpsdSource;
pub use nmea::SerialNmeaSource;
pub use replay::ReplaySource;
pub use scripted::ScriptedSource;

#[derive(Debug, Error)]
pub enum LocationError {
    /// Location capability not granted; the source stays inert
    #[error("location permission denied: {0}")]
    PermissionDenied(String),
    /// No fix obtainable right now
    #[error("location unavailable: {0}")]
    Unavailable(String),
}

impl LocationError {
    /// Classify an IO error from opening a positioning device or file
    pub fn from_io(context: &str, e: &std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            LocationError::PermissionDenied(format!("{context}: {e}"))
        } else {
            LocationError::Unavailable(format!("{context}: {e}"))
        }
    }
}

/// Running subscription returned by `LocationSource::start`
///
/// Dropping the handle without calling `release` also stops the producer,
/// since the shutdown sender closes.
#[derive(Debug)]
pub struct SourceHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SourceHandle {
    pub fn new(name: &'static str, shutdown: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { name, shutdown, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True once the producer task has exited (stream ended or crashed)
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the producer and tear it down; the device is closed with the task
    pub fn release(self) {
        let _ = self.shutdown.send(true);
        self.task.abort();
        info!(source = %self.name, "location_source_released");
    }
}

#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Begin delivering samples to `consumer`
    async fn start(
        &self,
        request: LocationRequest,
        consumer: mpsc::Sender<LocationSample>,
    ) -> Result<SourceHandle, LocationError>;

    /// Stop delivering samples and release the positioning resources
    fn stop(&self, handle: SourceHandle) {
        handle.release();
    }
}

/// Outcome of offering a fix to the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Skipped,
    /// Consumer is gone; the producer should exit
    Closed,
}

/// Applies the request's cadence and ordering rules before delivery
///
/// Shared by every source so that consumers see strictly increasing
/// timestamps spaced at least `fastest_interval` apart.
pub struct SampleGate {
    source: &'static str,
    request: LocationRequest,
    tx: mpsc::Sender<LocationSample>,
    metrics: Option<Arc<Metrics>>,
    last_timestamp: Option<u64>,
    last_delivery: Instant,
    outage_reported: bool,
    last_full_warn: Instant,
}

impl SampleGate {
    pub fn new(
        source: &'static str,
        request: LocationRequest,
        tx: mpsc::Sender<LocationSample>,
    ) -> Self {
        let now = Instant::now();
        Self {
            source,
            request,
            tx,
            metrics: None,
            last_timestamp: None,
            last_delivery: now,
            outage_reported: false,
            last_full_warn: now.checked_sub(Duration::from_secs(2)).unwrap_or(now),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn request(&self) -> &LocationRequest {
        &self.request
    }

    /// Offer a fix; returns what happened to it
    pub fn offer(&mut self, sample: LocationSample) -> Delivery {
        if let (Some(limit), Some(acc)) = (self.request.max_accuracy_m, sample.accuracy) {
            if acc > limit {
                debug!(source = %self.source, accuracy_m = %acc, limit_m = %limit, "sample_skipped_inaccurate");
                return Delivery::Skipped;
            }
        }

        if let Some(last) = self.last_timestamp {
            if sample.timestamp <= last {
                debug!(source = %self.source, ts = %sample.timestamp, last = %last, "sample_skipped_stale");
                return Delivery::Skipped;
            }
            let fastest_ms = self.request.fastest_interval.as_millis() as u64;
            if sample.timestamp - last < fastest_ms {
                tracing::trace!(source = %self.source, ts = %sample.timestamp, "sample_skipped_cadence");
                return Delivery::Skipped;
            }
        }

        if let Some(ref m) = self.metrics {
            m.record_sample_received();
        }

        match self.tx.try_send(sample) {
            Ok(()) => {
                self.last_timestamp = Some(sample.timestamp);
                self.last_delivery = Instant::now();
                if self.outage_reported {
                    info!(source = %self.source, "location_available");
                    self.outage_reported = false;
                }
                Delivery::Sent
            }
            Err(TrySendError::Full(_)) => {
                if let Some(ref m) = self.metrics {
                    m.record_sample_dropped();
                }
                // Rate-limit warning to 1 per second
                if self.last_full_warn.elapsed() > Duration::from_secs(1) {
                    warn!(source = %self.source, "sample_dropped: channel full");
                    self.last_full_warn = Instant::now();
                }
                Delivery::Skipped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Log an outage once if nothing was delivered for twice the interval
    pub fn check_outage(&mut self) {
        if self.outage_reported {
            return;
        }
        let silent = self.last_delivery.elapsed();
        if silent > self.request.interval * 2 {
            warn!(
                source = %self.source,
                silent_ms = %silent.as_millis(),
                "location_unavailable"
            );
            self.outage_reported = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Build the source selected in configuration
pub fn build_source(config: &Config, metrics: Arc<Metrics>) -> Arc<dyn LocationSource> {
    match config.location_source() {
        SourceKind::Serial => Arc::new(SerialNmeaSource::new(
            config.serial_device(),
            config.serial_baud(),
            metrics,
        )),
        SourceKind::Gpsd => Arc::new(GpsdSource::new(config.gpsd_addr(), metrics)),
        SourceKind::Replay => Arc::new(
            ReplaySource::new(config.replay_path(), metrics)
                .realtime(config.replay_realtime())
                .repeat(config.replay_repeat()),
        ),
    }
}
