//! Track file replay
//!
//! Reads a JSON Lines file, one `LocationSample` per line, and replays it.
//! Fixes are spaced by the request interval, or by the recorded timestamps
//! when `realtime` is set. Timestamps are rebased onto the wall clock so the
//! stream looks live to the consumer.

use super::{Delivery, LocationError, LocationSource, SampleGate, SourceHandle};
use crate::domain::types::{epoch_ms, LocationRequest, LocationSample};
use crate::infra::metrics::Metrics;
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

pub struct ReplaySource {
    path: PathBuf,
    realtime: bool,
    repeat: bool,
    metrics: Arc<Metrics>,
}

impl ReplaySource {
    pub fn new<P: AsRef<Path>>(path: P, metrics: Arc<Metrics>) -> Self {
        Self { path: path.as_ref().to_path_buf(), realtime: false, repeat: false, metrics }
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }
}

/// Parse a JSON Lines track, skipping blank and `#` comment lines
pub fn parse_track(content: &str) -> anyhow::Result<Vec<LocationSample>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| {
            serde_json::from_str::<LocationSample>(line)
                .with_context(|| format!("invalid sample on line {}", i + 1))
        })
        .collect()
}

/// Delay before emitting `next`, given the previous recorded fix
fn replay_delay(prev: Option<&LocationSample>, next: &LocationSample, realtime: bool, interval: Duration) -> Duration {
    match prev {
        None => Duration::ZERO,
        Some(p) if realtime => Duration::from_millis(next.timestamp.saturating_sub(p.timestamp)),
        Some(_) => interval,
    }
}

#[async_trait]
impl LocationSource for ReplaySource {
    fn name(&self) -> &'static str {
        "replay"
    }

    async fn start(
        &self,
        request: LocationRequest,
        consumer: mpsc::Sender<LocationSample>,
    ) -> Result<SourceHandle, LocationError> {
        let path_str = self.path.display().to_string();
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| LocationError::from_io(&path_str, &e))?;
        let track = parse_track(&content)
            .map_err(|e| LocationError::Unavailable(format!("{path_str}: {e:#}")))?;

        info!(path = %path_str, fixes = track.len(), realtime = self.realtime, repeat = self.repeat, "replay_source_started");

        let realtime = self.realtime;
        let repeat = self.repeat;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut gate = SampleGate::new("replay", request, consumer).with_metrics(self.metrics.clone());

        let task = tokio::spawn(async move {
            let interval = gate.request().interval;
            loop {
                let mut prev: Option<&LocationSample> = None;
                for recorded in &track {
                    let delay = replay_delay(prev, recorded, realtime, interval);
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = shutdown_rx.changed() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    prev = Some(recorded);

                    let live = LocationSample { timestamp: epoch_ms(), ..*recorded };
                    if gate.offer(live) == Delivery::Closed {
                        return;
                    }
                }
                if !repeat {
                    break;
                }
                // Pause one interval between passes so the timestamps stay increasing
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            warn!("replay_track_ended");
        });

        Ok(SourceHandle::new("replay", shutdown_tx, task))
    }
}
