//! In-memory location source
//!
//! Delivers a fixed list of samples, optionally paced. Built directly by
//! tests to drive the monitor without a receiver attached.

use super::{LocationError, LocationSource, SampleGate, SourceHandle};
use crate::domain::types::{LocationRequest, LocationSample};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

pub struct ScriptedSource {
    samples: Mutex<Vec<LocationSample>>,
    permission_granted: AtomicBool,
    /// Delay between samples (zero = as fast as the channel allows)
    pace: Duration,
    /// Keep the stream open after the last sample instead of ending it
    hold_open: bool,
    starts: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(samples: Vec<LocationSample>) -> Self {
        Self {
            samples: Mutex::new(samples),
            permission_granted: AtomicBool::new(true),
            pace: Duration::ZERO,
            hold_open: true,
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// End the stream after the last sample (simulates a dying producer)
    pub fn ending(mut self) -> Self {
        self.hold_open = false;
        self
    }

    pub fn deny_permission(self) -> Self {
        self.permission_granted.store(false, Ordering::SeqCst);
        self
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission_granted.store(granted, Ordering::SeqCst);
    }

    /// Replace the script used by the next `start`
    pub fn set_samples(&self, samples: Vec<LocationSample>) {
        *self.samples.lock() = samples;
    }

    /// Number of successful `start` calls (subscriptions taken)
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn start(
        &self,
        request: LocationRequest,
        consumer: mpsc::Sender<LocationSample>,
    ) -> Result<SourceHandle, LocationError> {
        if !self.permission_granted.load(Ordering::SeqCst) {
            return Err(LocationError::PermissionDenied("scripted source denied".to_string()));
        }

        self.starts.fetch_add(1, Ordering::SeqCst);
        let samples = self.samples.lock().clone();
        let pace = self.pace;
        let hold_open = self.hold_open;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut gate = SampleGate::new("scripted", request, consumer);

        let task = tokio::spawn(async move {
            info!(count = samples.len(), "scripted_source_started");
            for sample in samples {
                if *shutdown_rx.borrow() {
                    return;
                }
                if gate.offer(sample) == super::Delivery::Closed {
                    return;
                }
                if !pace.is_zero() {
                    tokio::select! {
                        _ = shutdown_rx.changed() => return,
                        _ = tokio::time::sleep(pace) => {}
                    }
                }
            }
            if hold_open {
                // Keep the consumer's channel open until released
                let _ = shutdown_rx.changed().await;
            }
        });

        Ok(SourceHandle::new("scripted", shutdown_tx, task))
    }
}
