//! HTTP control and metrics endpoint
//!
//! - `POST /control` with `{"method": "start"}` - lifecycle control
//! - `GET /status` - lifecycle and alarm snapshot (JSON)
//! - `GET /metrics` - Prometheus text format
//! - `GET /health`
//!
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::services::control::{handle_method, ControlRequest, ControlResponse};
use crate::services::monitor::MonitorLifecycle;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Control bodies are a single small JSON object
const MAX_BODY_BYTES: usize = 4096;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with source label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    source: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{source=\"{source}\"}} {val}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary, source: &str, running: bool) -> String {
    let mut output = String::with_capacity(2048);

    let counters = [
        ("geobeep_samples_received_total", "Fixes forwarded by the location source", summary.samples_received),
        ("geobeep_samples_evaluated_total", "Fixes run through the proximity evaluator", summary.samples_evaluated),
        ("geobeep_samples_discarded_total", "Fixes discarded after stop", summary.samples_discarded),
        ("geobeep_samples_dropped_total", "Fixes dropped on a full sample channel", summary.samples_dropped),
        ("geobeep_alarm_entered_total", "Entries into the alarm radius", summary.entered_total),
        ("geobeep_alarm_exited_total", "Exits from the alarm radius", summary.exited_total),
        ("geobeep_alerts_sent_total", "Alarm alerts delivered to the notifier", summary.alerts_sent),
        ("geobeep_notifier_failures_total", "Notifier calls that failed", summary.notifier_failures),
        ("geobeep_monitor_starts_total", "Successful monitor starts", summary.starts_total),
        ("geobeep_monitor_stops_total", "Monitor stops", summary.stops_total),
        ("geobeep_monitor_restarts_total", "Monitoring loops restarted by the supervisor", summary.restarts_total),
        ("geobeep_permission_denied_total", "Source starts refused for lack of permission", summary.permission_denied_total),
    ];
    for (name, help, val) in counters {
        write_metric(&mut output, name, help, MetricType::Counter, source, val);
    }

    write_metric(
        &mut output,
        "geobeep_monitor_running",
        "1 while monitoring is running",
        MetricType::Gauge,
        source,
        u64::from(running),
    );

    if let Some(d) = summary.last_distance_m {
        let _ = writeln!(output, "# HELP geobeep_last_distance_m Distance to target at the last fix");
        let _ = writeln!(output, "# TYPE geobeep_last_distance_m gauge");
        let _ = writeln!(output, "geobeep_last_distance_m{{source=\"{source}\"}} {d:.1}");
    }

    output
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => {
            error!(error = %e, "http_json_encode_failed");
            respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "encode error")
        }
    }
}

async fn read_control_request(req: Request<hyper::body::Incoming>) -> Result<ControlRequest, String> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| e.to_string())?
        .to_bytes();
    serde_json::from_slice(&body).map_err(|e| e.to_string())
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    monitor: Arc<MonitorLifecycle>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    debug!(method = %req.method(), path = %req.uri().path(), "http_request");

    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/control") => match read_control_request(req).await {
            Ok(control) => {
                let reply = handle_method(&monitor, &control.method).await;
                let status = match reply {
                    ControlResponse::Success { .. } => StatusCode::OK,
                    ControlResponse::Error { .. } => StatusCode::NOT_IMPLEMENTED,
                };
                json(status, &reply)
            }
            Err(e) => {
                debug!(error = %e, "control_request_invalid");
                json(StatusCode::BAD_REQUEST, &ControlResponse::Error { error: e })
            }
        },
        (&Method::GET, "/status") => json(StatusCode::OK, &monitor.status().await),
        (&Method::GET, "/metrics") => {
            let status = monitor.status().await;
            let body = format_prometheus_metrics(
                &metrics.snapshot(),
                status.source,
                status.session_id.is_some(),
            );
            respond(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body)
        }
        (&Method::GET, "/health") => respond(StatusCode::OK, "text/plain", "ok"),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };
    Ok(response)
}

/// Bind and serve the control endpoint until shutdown
pub async fn start_control_server(
    addr: SocketAddr,
    monitor: Arc<MonitorLifecycle>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "control_server_started");
    serve(listener, monitor, metrics, shutdown).await;
    Ok(())
}

/// Accept loop on an already bound listener
pub async fn serve(
    listener: TcpListener,
    monitor: Arc<MonitorLifecycle>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let monitor = monitor.clone();
                        let metrics = metrics.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let monitor = monitor.clone();
                                let metrics = metrics.clone();
                                async move { handle_request(req, monitor, metrics).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "control_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "control_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("control_server_shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{AlarmRadius, LocationRequest, Target};
    use crate::infra::config::RestartPolicy;
    use crate::infra::intent::MemoryIntentStore;
    use crate::io::location::ScriptedSource;
    use crate::io::notifier::LogNotifier;
    use crate::services::dispatcher::AlarmDispatcher;
    use crate::services::monitor::MonitorSettings;
    use std::time::Duration;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_sample_evaluated(Some(187.0));
        metrics.record_entered();
        metrics.record_alert_sent();

        let output = format_prometheus_metrics(&metrics.snapshot(), "gpsd", true);

        assert!(output.contains("geobeep_samples_evaluated_total{source=\"gpsd\"} 1"));
        assert!(output.contains("geobeep_alerts_sent_total{source=\"gpsd\"} 1"));
        assert!(output.contains("geobeep_monitor_running{source=\"gpsd\"} 1"));
        assert!(output.contains("geobeep_last_distance_m{source=\"gpsd\"} 187.0"));
    }

    #[test]
    fn test_last_distance_omitted_before_first_fix() {
        let output = format_prometheus_metrics(&Metrics::new().snapshot(), "replay", false);
        assert!(!output.contains("geobeep_last_distance_m"));
        assert!(output.contains("geobeep_monitor_running{source=\"replay\"} 0"));
    }

    async fn spawn_server() -> (String, watch::Sender<bool>) {
        let metrics = Arc::new(Metrics::new());
        let dispatcher =
            Arc::new(AlarmDispatcher::new(Arc::new(LogNotifier), metrics.clone(), "a", "b"));
        let settings = MonitorSettings {
            target: Target::new(-6.1666, 106.83).unwrap(),
            radius: AlarmRadius::new(200.0).unwrap(),
            request: LocationRequest {
                interval: Duration::from_millis(50),
                fastest_interval: Duration::ZERO,
                ..Default::default()
            },
            channel_capacity: 8,
            restart: RestartPolicy::Sticky,
            status_title: "running".to_string(),
            status_body: "watching".to_string(),
        };
        let monitor = Arc::new(MonitorLifecycle::new(
            settings,
            Arc::new(ScriptedSource::new(Vec::new())),
            dispatcher,
            Arc::new(MemoryIntentStore::new()),
            metrics.clone(),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(serve(listener, monitor, metrics, shutdown_rx));
        (base, shutdown_tx)
    }

    #[tokio::test]
    async fn test_control_roundtrip() {
        let (base, _shutdown) = spawn_server().await;
        let client = reqwest::Client::new();

        let start: serde_json::Value = client
            .post(format!("{base}/control"))
            .json(&serde_json::json!({"method": "start"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(start, serde_json::json!({"success": true}));

        let status: serde_json::Value =
            client.get(format!("{base}/status")).send().await.unwrap().json().await.unwrap();
        assert_eq!(status["state"], "running");
        assert_eq!(status["alarm_state"], "armed");

        let resp = client
            .post(format!("{base}/control"))
            .json(&serde_json::json!({"method": "snooze"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_IMPLEMENTED);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body, serde_json::json!({"error": "not implemented"}));
    }

    #[tokio::test]
    async fn test_malformed_control_body() {
        let (base, _shutdown) = spawn_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/control"))
            .body("start")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
