//! Integration tests for configuration loading

use geobeep::domain::types::AccuracyHint;
use geobeep::infra::{Config, NotifierKind, RestartPolicy, SourceKind};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[target]
latitude = -6.5950
longitude = 106.7900

[alarm]
radius_m = 350.0
title = "Wake up"
body = "Bogor is next."

[location]
source = "serial"
interval_ms = 4000
fastest_interval_ms = 2000
accuracy = "balanced"
max_accuracy_m = 40.0
channel_capacity = 8

[location.serial]
device = "/dev/ttyUSB1"
baud = 38400

[notifier]
kind = "mqtt"

[notifier.mqtt]
host = "test-host"
port = 1884
topic = "test/alerts"
username = "phone"
password = "secret"

[lifecycle]
restart = "none"
intent_file = "/tmp/geobeep-test/intent"
supervise_interval_ms = 500
autostart = true

[control]
bind_address = "0.0.0.0"
port = 0

[metrics]
interval_secs = 15
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.target().latitude(), -6.5950);
    assert_eq!(config.target().longitude(), 106.7900);
    assert_eq!(config.radius().meters(), 350.0);
    assert_eq!(config.alarm_title(), "Wake up");
    assert_eq!(config.location_source(), SourceKind::Serial);
    assert_eq!(config.serial_device(), "/dev/ttyUSB1");
    assert_eq!(config.serial_baud(), 38400);

    let request = config.location_request();
    assert_eq!(request.interval, Duration::from_millis(4000));
    assert_eq!(request.fastest_interval, Duration::from_millis(2000));
    assert_eq!(request.accuracy, AccuracyHint::Balanced);
    assert_eq!(request.max_accuracy_m, Some(40.0));
    assert_eq!(config.channel_capacity(), 8);

    assert_eq!(config.notifier_kind(), NotifierKind::Mqtt);
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_username(), Some("phone"));

    assert_eq!(config.restart_policy(), RestartPolicy::None);
    assert_eq!(config.supervise_interval_ms(), 500);
    assert!(config.autostart());
    assert_eq!(config.control_port(), 0);
    assert_eq!(config.metrics_interval_secs(), 15);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.target().latitude(), -6.1666);
    assert_eq!(config.target().longitude(), 106.8300);
    assert_eq!(config.radius().meters(), 200.0);
    assert_eq!(config.location_request().interval, Duration::from_millis(10_000));
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_invalid_file_falls_back_to_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[target]\nlatitude = 0.0\nlongitude = 0.0\n[alarm]\nradius_m = -1.0\n[location]\nsource = \"gpsd\"\n")
        .unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());

    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.radius().meters(), 200.0);
}

#[test]
fn test_unknown_source_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[target]\nlatitude = 0.0\nlongitude = 0.0\n[alarm]\nradius_m = 10.0\n[location]\nsource = \"wifi\"\n")
        .unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_dev_config_parses() {
    let config = Config::from_file("config/dev.toml").unwrap();
    assert_eq!(config.location_source(), SourceKind::Replay);
    assert_eq!(config.replay_path(), "tracks/demo.jsonl");
    assert_eq!(config.notifier_kind(), NotifierKind::Log);
}
