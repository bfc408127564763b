//! User-visible alert backends
//!
//! The dispatcher hands an `Alert` to a `Notifier` and never looks back:
//! failures are returned so the caller can log them, nothing is retried.
//! Backends:
//! - `log` - tracing warn line (headless default)
//! - `command` - spawns a local command such as `notify-send`
//! - `mqtt` - publishes the alert as JSON for a phone/desktop bridge

use crate::domain::types::epoch_ms;
use crate::infra::config::{Config, NotifierKind};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Alert id for proximity alarms; a new alarm replaces the previous one
pub const ALARM_ALERT_ID: u32 = 2001;
/// Alert id for the ongoing "monitoring active" notice
pub const STATUS_ALERT_ID: u32 = 1002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Low,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: u32,
    pub priority: Priority,
    pub title: String,
    pub body: String,
    /// Stays visible until cleared
    pub ongoing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    /// Creation time (epoch ms)
    pub ts: u64,
}

impl Alert {
    /// High-priority proximity alarm
    pub fn alarm(title: &str, body: &str, distance_m: f64) -> Self {
        Self {
            id: ALARM_ALERT_ID,
            priority: Priority::High,
            title: title.to_string(),
            body: body.to_string(),
            ongoing: false,
            distance_m: Some(distance_m),
            ts: epoch_ms(),
        }
    }

    /// Low-priority ongoing notice shown while monitoring runs
    pub fn status(title: &str, body: &str) -> Self {
        Self {
            id: STATUS_ALERT_ID,
            priority: Priority::Low,
            title: title.to_string(),
            body: body.to_string(),
            ongoing: true,
            distance_m: None,
            ts: epoch_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("alert channel unavailable: {0}")]
    Unavailable(String),
    #[error("notifier command failed: {0}")]
    Command(#[from] std::io::Error),
    #[error("alert publish failed: {0}")]
    Publish(String),
}

pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Surface an alert to the user
    fn notify(&self, alert: &Alert) -> Result<(), NotifierError>;

    /// Withdraw an ongoing alert
    fn clear(&self, _id: u32) -> Result<(), NotifierError> {
        Ok(())
    }
}

/// Writes alerts to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&self, alert: &Alert) -> Result<(), NotifierError> {
        match alert.priority {
            Priority::High => warn!(
                id = alert.id,
                title = %alert.title,
                body = %alert.body,
                distance_m = ?alert.distance_m,
                "ALARM"
            ),
            Priority::Low => info!(id = alert.id, title = %alert.title, body = %alert.body, "notice"),
        }
        Ok(())
    }

    fn clear(&self, id: u32) -> Result<(), NotifierError> {
        info!(id = id, "notice_cleared");
        Ok(())
    }
}

/// Spawns a command per alert
///
/// Arguments may contain `{title}`, `{body}`, `{distance_m}`, `{priority}`
/// and `{id}`, e.g. `["notify-send", "-u", "critical", "{title}", "{body}"]`.
/// The child is not awaited; only a failure to spawn is reported.
pub struct CommandNotifier {
    argv: Vec<String>,
}

impl CommandNotifier {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    fn render(&self, alert: &Alert) -> Vec<String> {
        let distance = alert.distance_m.map(|d| format!("{d:.0}")).unwrap_or_default();
        let priority = match alert.priority {
            Priority::High => "critical",
            Priority::Low => "low",
        };
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{title}", &alert.title)
                    .replace("{body}", &alert.body)
                    .replace("{distance_m}", &distance)
                    .replace("{priority}", priority)
                    .replace("{id}", &alert.id.to_string())
            })
            .collect()
    }
}

impl Notifier for CommandNotifier {
    fn name(&self) -> &'static str {
        "command"
    }

    fn notify(&self, alert: &Alert) -> Result<(), NotifierError> {
        let argv = self.render(alert);
        let Some((program, args)) = argv.split_first() else {
            return Err(NotifierError::Unavailable("empty notifier command".to_string()));
        };
        let child = tokio::process::Command::new(program).args(args).spawn()?;
        debug!(program = %program, pid = ?child.id(), "notifier_command_spawned");
        Ok(())
    }
}

/// Publishes alerts to an MQTT topic (QoS 1)
pub struct MqttNotifier {
    client: AsyncClient,
    topic: String,
}

#[derive(Serialize)]
struct ClearPayload {
    id: u32,
    clear: bool,
    ts: u64,
}

impl MqttNotifier {
    /// Connect to the broker; the event loop runs on its own task
    pub fn new(config: &Config) -> Self {
        let client_id = format!("{}-{}", config.mqtt_client_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));

        // Set credentials if configured
        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_notifier_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_notifier_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_notifier_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, topic: config.mqtt_topic().to_string() }
    }

    fn publish<T: Serialize>(&self, payload: &T) -> Result<(), NotifierError> {
        let json = serde_json::to_vec(payload).map_err(|e| NotifierError::Publish(e.to_string()))?;
        self.client
            .try_publish(&self.topic, QoS::AtLeastOnce, false, json)
            .map_err(|e| NotifierError::Publish(e.to_string()))
    }
}

impl Notifier for MqttNotifier {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn notify(&self, alert: &Alert) -> Result<(), NotifierError> {
        self.publish(alert)
    }

    fn clear(&self, id: u32) -> Result<(), NotifierError> {
        self.publish(&ClearPayload { id, clear: true, ts: epoch_ms() })
    }
}

/// Build the notifier selected in configuration
pub fn build_notifier(config: &Config) -> Arc<dyn Notifier> {
    match config.notifier_kind() {
        NotifierKind::Log => Arc::new(LogNotifier),
        NotifierKind::Command => Arc::new(CommandNotifier::new(config.notifier_command().to_vec())),
        NotifierKind::Mqtt => Arc::new(MqttNotifier::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_alert_fields() {
        let alert = Alert::alarm("GeoBeep alarm!", "Almost there", 142.7);
        assert_eq!(alert.id, ALARM_ALERT_ID);
        assert_eq!(alert.priority, Priority::High);
        assert!(!alert.ongoing);

        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains(r#""priority":"high""#));
        assert!(json.contains(r#""distance_m":142.7"#));
    }

    #[test]
    fn test_status_alert_omits_distance() {
        let alert = Alert::status("GeoBeep running", "Watching");
        assert!(alert.ongoing);
        let json = serde_json::to_string(&alert).unwrap();
        assert!(!json.contains("distance_m"));
    }

    #[test]
    fn test_command_placeholders() {
        let notifier = CommandNotifier::new(vec![
            "notify-send".to_string(),
            "-u".to_string(),
            "{priority}".to_string(),
            "{title}".to_string(),
            "{body} ({distance_m} m)".to_string(),
        ]);
        let argv = notifier.render(&Alert::alarm("Alarm", "Near station", 187.4));
        assert_eq!(argv, vec!["notify-send", "-u", "critical", "Alarm", "Near station (187 m)"]);
    }

    #[tokio::test]
    async fn test_command_missing_program_fails() {
        let notifier = CommandNotifier::new(vec!["/nonexistent/geobeep-notify".to_string()]);
        let result = notifier.notify(&Alert::alarm("a", "b", 1.0));
        assert!(matches!(result, Err(NotifierError::Command(_))));
    }

    #[test]
    fn test_empty_command_is_unavailable() {
        let notifier = CommandNotifier::new(Vec::new());
        let result = notifier.notify(&Alert::alarm("a", "b", 1.0));
        assert!(matches!(result, Err(NotifierError::Unavailable(_))));
    }

    #[test]
    fn test_log_notifier_never_fails() {
        assert!(LogNotifier.notify(&Alert::alarm("a", "b", 1.0)).is_ok());
        assert!(LogNotifier.clear(STATUS_ALERT_ID).is_ok());
    }
}
