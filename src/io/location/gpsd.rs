//! gpsd client
//!
//! Connects to gpsd (default 127.0.0.1:2947), enables the JSON watcher and
//! turns TPV reports with a 2D or 3D fix into samples.
//! Protocol: one JSON object per line, `class` selects the report type.

use super::{Delivery, LocationError, LocationSource, SampleGate, SourceHandle};
use crate::domain::types::{LocationRequest, LocationSample};
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";

/// Subset of a gpsd TPV (time-position-velocity) report
#[derive(Debug, Deserialize)]
struct TpvReport {
    class: String,
    #[serde(default)]
    mode: u8,
    time: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    /// Estimated horizontal position error (m), gpsd >= 3.20
    eph: Option<f64>,
    /// Longitude/latitude error estimates (m), older gpsd
    epx: Option<f64>,
    epy: Option<f64>,
}

/// Decode one gpsd line into a sample; None for non-TPV or no-fix reports
pub fn parse_report(line: &str) -> Option<LocationSample> {
    let report: TpvReport = serde_json::from_str(line).ok()?;
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }
    let timestamp = DateTime::parse_from_rfc3339(report.time.as_deref()?).ok()?.timestamp_millis();
    let sample = LocationSample::new(report.lat?, report.lon?, u64::try_from(timestamp).ok()?);

    let accuracy = report.eph.or_else(|| match (report.epx, report.epy) {
        (Some(x), Some(y)) => Some(x.max(y)),
        _ => None,
    });
    Some(match accuracy {
        Some(a) => sample.with_accuracy(a as f32),
        None => sample,
    })
}

pub struct GpsdSource {
    addr: String,
    metrics: Arc<Metrics>,
}

impl GpsdSource {
    pub fn new(addr: &str, metrics: Arc<Metrics>) -> Self {
        Self { addr: addr.to_string(), metrics }
    }
}

/// Connect and send the watch command, giving up after `limit`
async fn connect(addr: &str, limit: Duration) -> Result<TcpStream, LocationError> {
    let handshake = async {
        let mut stream =
            TcpStream::connect(addr).await.map_err(|e| LocationError::from_io(addr, &e))?;
        stream.write_all(WATCH_COMMAND).await.map_err(|e| LocationError::from_io(addr, &e))?;
        Ok::<_, LocationError>(stream)
    };
    match tokio::time::timeout(limit, handshake).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::Unavailable(format!(
            "{addr}: no answer within {}ms",
            limit.as_millis()
        ))),
    }
}

#[async_trait]
impl LocationSource for GpsdSource {
    fn name(&self) -> &'static str {
        "gpsd"
    }

    async fn start(
        &self,
        request: LocationRequest,
        consumer: mpsc::Sender<LocationSample>,
    ) -> Result<SourceHandle, LocationError> {
        let initial = match connect(&self.addr, request.interval).await {
            Ok(stream) => Some(stream),
            Err(e @ LocationError::PermissionDenied(_)) => return Err(e),
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "gpsd_connect_failed");
                None
            }
        };

        info!(
            addr = %self.addr,
            interval_ms = %request.interval.as_millis(),
            accuracy = %request.accuracy.as_str(),
            "gpsd_source_started"
        );

        let addr = self.addr.clone();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut gate = SampleGate::new("gpsd", request, consumer).with_metrics(self.metrics.clone());

        let task = tokio::spawn(async move {
            let retry = gate.request().interval;
            let mut conn = initial;

            loop {
                let stream = match conn.take() {
                    Some(s) => s,
                    None => {
                        tokio::select! {
                            _ = shutdown_rx.changed() => return,
                            _ = tokio::time::sleep(retry) => {}
                        }
                        gate.check_outage();
                        match connect(&addr, retry).await {
                            Ok(s) => {
                                info!(addr = %addr, "gpsd_connected");
                                s
                            }
                            Err(e) => {
                                debug!(addr = %addr, error = %e, "gpsd_reconnect_failed");
                                continue;
                            }
                        }
                    }
                };

                let mut lines = BufReader::new(stream).lines();
                let mut outage_timer = interval(retry);

                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            info!(addr = %addr, "gpsd_source_shutdown");
                            return;
                        }
                        _ = outage_timer.tick() => gate.check_outage(),
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => {
                                if let Some(sample) = parse_report(&line) {
                                    if gate.offer(sample) == Delivery::Closed {
                                        return;
                                    }
                                }
                            }
                            Ok(None) => {
                                warn!(addr = %addr, "gpsd_connection_closed");
                                break;
                            }
                            Err(e) => {
                                warn!(addr = %addr, error = %e, "gpsd_read_error");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(SourceHandle::new("gpsd", shutdown_tx, task))
    }
}
