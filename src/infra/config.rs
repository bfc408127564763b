//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument (parsed by the binary)
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::types::{
    AccuracyHint, AlarmRadius, LocationRequest, Target, DEFAULT_RADIUS, DEFAULT_TARGET,
};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Serial,
    Gpsd,
    Replay,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Serial => "serial",
            SourceKind::Gpsd => "gpsd",
            SourceKind::Replay => "replay",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    Log,
    Command,
    Mqtt,
}

impl NotifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifierKind::Log => "log",
            NotifierKind::Command => "command",
            NotifierKind::Mqtt => "mqtt",
        }
    }
}

/// What happens when the monitoring loop dies while monitoring is wanted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Resume the last explicit intent after a crash or respawn
    Sticky,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlarmConfig {
    pub radius_m: f64,
    #[serde(default = "default_alarm_title")]
    pub title: String,
    #[serde(default = "default_alarm_body")]
    pub body: String,
    #[serde(default = "default_status_title")]
    pub status_title: String,
    #[serde(default = "default_status_body")]
    pub status_body: String,
}

fn default_alarm_title() -> String {
    "GeoBeep alarm!".to_string()
}

fn default_alarm_body() -> String {
    "You are close to your destination station.".to_string()
}

fn default_status_title() -> String {
    "GeoBeep is running in the background".to_string()
}

fn default_status_body() -> String {
    "Alarm and location tracking stay active.".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_serial_device")]
    pub device: String,
    #[serde(default = "default_serial_baud")]
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { device: default_serial_device(), baud: default_serial_baud() }
    }
}

fn default_serial_device() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_serial_baud() -> u32 {
    9600
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpsdConfig {
    #[serde(default = "default_gpsd_addr")]
    pub addr: String,
}

impl Default for GpsdConfig {
    fn default() -> Self {
        Self { addr: default_gpsd_addr() }
    }
}

fn default_gpsd_addr() -> String {
    "127.0.0.1:2947".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "default_replay_path")]
    pub path: String,
    /// Space fixes by their recorded timestamps instead of `interval_ms`
    #[serde(default)]
    pub realtime: bool,
    #[serde(default)]
    pub repeat: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { path: default_replay_path(), realtime: false, repeat: false }
    }
}

fn default_replay_path() -> String {
    "tracks/demo.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    pub source: SourceKind,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_fastest_interval_ms")]
    pub fastest_interval_ms: u64,
    #[serde(default)]
    pub accuracy: AccuracyHint,
    #[serde(default)]
    pub max_accuracy_m: Option<f32>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub gpsd: GpsdConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

fn default_interval_ms() -> u64 {
    10_000
}

fn default_fastest_interval_ms() -> u64 {
    5_000
}

fn default_channel_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            client_id: default_mqtt_client_id(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "geobeep/alerts".to_string()
}

fn default_mqtt_client_id() -> String {
    "geobeep".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_notifier_kind")]
    pub kind: NotifierKind,
    /// argv for the command notifier
    #[serde(default = "default_notifier_command")]
    pub command: Vec<String>,
    #[serde(default)]
    pub mqtt: MqttConfig,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: default_notifier_kind(),
            command: default_notifier_command(),
            mqtt: MqttConfig::default(),
        }
    }
}

fn default_notifier_kind() -> NotifierKind {
    NotifierKind::Log
}

fn default_notifier_command() -> Vec<String> {
    ["notify-send", "-u", "{priority}", "-a", "geobeep", "{title}", "{body}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_restart_policy")]
    pub restart: RestartPolicy,
    /// Runtime file holding the last explicit start/stop intent
    #[serde(default = "default_intent_file")]
    pub intent_file: String,
    #[serde(default = "default_supervise_interval_ms")]
    pub supervise_interval_ms: u64,
    /// Start monitoring at boot when no intent has been recorded yet
    #[serde(default)]
    pub autostart: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            restart: default_restart_policy(),
            intent_file: default_intent_file(),
            supervise_interval_ms: default_supervise_interval_ms(),
            autostart: false,
        }
    }
}

fn default_restart_policy() -> RestartPolicy {
    RestartPolicy::Sticky
}

fn default_intent_file() -> String {
    "/run/geobeep/intent".to_string()
}

fn default_supervise_interval_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_bind_address")]
    pub bind_address: String,
    /// HTTP control port (0 to disable)
    #[serde(default = "default_control_port")]
    pub port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { bind_address: default_control_bind_address(), port: default_control_port() }
    }
}

fn default_control_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    8787
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub target: TargetConfig,
    pub alarm: AlarmConfig,
    pub location: LocationConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    target: Target,
    radius: AlarmRadius,
    alarm_title: String,
    alarm_body: String,
    status_title: String,
    status_body: String,
    location_source: SourceKind,
    location_request: LocationRequest,
    channel_capacity: usize,
    serial_device: String,
    serial_baud: u32,
    gpsd_addr: String,
    replay_path: String,
    replay_realtime: bool,
    replay_repeat: bool,
    notifier_kind: NotifierKind,
    notifier_command: Vec<String>,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_client_id: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    restart_policy: RestartPolicy,
    intent_file: String,
    supervise_interval_ms: u64,
    autostart: bool,
    control_bind_address: String,
    control_port: u16,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        let serial = SerialConfig::default();
        let notifier = NotifierConfig::default();
        let lifecycle = LifecycleConfig::default();
        let control = ControlConfig::default();
        Self {
            target: DEFAULT_TARGET,
            radius: DEFAULT_RADIUS,
            alarm_title: default_alarm_title(),
            alarm_body: default_alarm_body(),
            status_title: default_status_title(),
            status_body: default_status_body(),
            location_source: SourceKind::Gpsd,
            location_request: LocationRequest::default(),
            channel_capacity: default_channel_capacity(),
            serial_device: serial.device,
            serial_baud: serial.baud,
            gpsd_addr: default_gpsd_addr(),
            replay_path: default_replay_path(),
            replay_realtime: false,
            replay_repeat: false,
            notifier_kind: notifier.kind,
            notifier_command: notifier.command,
            mqtt_host: notifier.mqtt.host,
            mqtt_port: notifier.mqtt.port,
            mqtt_topic: notifier.mqtt.topic,
            mqtt_client_id: notifier.mqtt.client_id,
            mqtt_username: None,
            mqtt_password: None,
            restart_policy: lifecycle.restart,
            intent_file: lifecycle.intent_file,
            supervise_interval_ms: lifecycle.supervise_interval_ms,
            autostart: lifecycle.autostart,
            control_bind_address: control.bind_address,
            control_port: control.port,
            metrics_interval_secs: default_metrics_interval(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from the command line or environment
    pub fn resolve_config_path(cli: Option<String>) -> String {
        if let Some(path) = cli {
            return path;
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        // Default to dev.toml
        "config/dev.toml".to_string()
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, origin: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig =
            toml::from_str(content).with_context(|| format!("Failed to parse config {}", origin))?;

        let loc = &toml_config.location;
        if loc.interval_ms == 0 {
            anyhow::bail!("location.interval_ms must be positive");
        }
        if loc.fastest_interval_ms > loc.interval_ms {
            anyhow::bail!(
                "location.fastest_interval_ms ({}) exceeds interval_ms ({})",
                loc.fastest_interval_ms,
                loc.interval_ms
            );
        }
        if loc.channel_capacity == 0 {
            anyhow::bail!("location.channel_capacity must be positive");
        }
        if toml_config.lifecycle.supervise_interval_ms == 0 {
            anyhow::bail!("lifecycle.supervise_interval_ms must be positive");
        }

        let target = Target::new(toml_config.target.latitude, toml_config.target.longitude)
            .context("invalid [target]")?;
        let radius = AlarmRadius::new(toml_config.alarm.radius_m).context("invalid [alarm]")?;

        Ok(Self {
            target,
            radius,
            alarm_title: toml_config.alarm.title,
            alarm_body: toml_config.alarm.body,
            status_title: toml_config.alarm.status_title,
            status_body: toml_config.alarm.status_body,
            location_source: toml_config.location.source,
            location_request: LocationRequest {
                interval: Duration::from_millis(toml_config.location.interval_ms),
                fastest_interval: Duration::from_millis(toml_config.location.fastest_interval_ms),
                accuracy: toml_config.location.accuracy,
                max_accuracy_m: toml_config.location.max_accuracy_m,
            },
            channel_capacity: toml_config.location.channel_capacity,
            serial_device: toml_config.location.serial.device,
            serial_baud: toml_config.location.serial.baud,
            gpsd_addr: toml_config.location.gpsd.addr,
            replay_path: toml_config.location.replay.path,
            replay_realtime: toml_config.location.replay.realtime,
            replay_repeat: toml_config.location.replay.repeat,
            notifier_kind: toml_config.notifier.kind,
            notifier_command: toml_config.notifier.command,
            mqtt_host: toml_config.notifier.mqtt.host,
            mqtt_port: toml_config.notifier.mqtt.port,
            mqtt_topic: toml_config.notifier.mqtt.topic,
            mqtt_client_id: toml_config.notifier.mqtt.client_id,
            mqtt_username: toml_config.notifier.mqtt.username,
            mqtt_password: toml_config.notifier.mqtt.password,
            restart_policy: toml_config.lifecycle.restart,
            intent_file: toml_config.lifecycle.intent_file,
            supervise_interval_ms: toml_config.lifecycle.supervise_interval_ms,
            autostart: toml_config.lifecycle.autostart,
            control_bind_address: toml_config.control.bind_address,
            control_port: toml_config.control.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: origin.to_string(),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path, error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn target(&self) -> Target {
        self.target
    }

    pub fn radius(&self) -> AlarmRadius {
        self.radius
    }

    pub fn alarm_title(&self) -> &str {
        &self.alarm_title
    }

    pub fn alarm_body(&self) -> &str {
        &self.alarm_body
    }

    pub fn status_title(&self) -> &str {
        &self.status_title
    }

    pub fn status_body(&self) -> &str {
        &self.status_body
    }

    pub fn location_source(&self) -> SourceKind {
        self.location_source
    }

    pub fn location_request(&self) -> LocationRequest {
        self.location_request
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn serial_device(&self) -> &str {
        &self.serial_device
    }

    pub fn serial_baud(&self) -> u32 {
        self.serial_baud
    }

    pub fn gpsd_addr(&self) -> &str {
        &self.gpsd_addr
    }

    pub fn replay_path(&self) -> &str {
        &self.replay_path
    }

    pub fn replay_realtime(&self) -> bool {
        self.replay_realtime
    }

    pub fn replay_repeat(&self) -> bool {
        self.replay_repeat
    }

    pub fn notifier_kind(&self) -> NotifierKind {
        self.notifier_kind
    }

    pub fn notifier_command(&self) -> &[String] {
        &self.notifier_command
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt_client_id
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        self.restart_policy
    }

    pub fn intent_file(&self) -> &str {
        &self.intent_file
    }

    pub fn supervise_interval_ms(&self) -> u64 {
        self.supervise_interval_ms
    }

    pub fn autostart(&self) -> bool {
        self.autostart
    }

    pub fn control_bind_address(&self) -> &str {
        &self.control_bind_address
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
