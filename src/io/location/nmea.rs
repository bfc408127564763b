//! Serial GNSS receiver speaking NMEA-0183
//!
//! Sentences used:
//! - RMC: time, status, lat, lon, date
//! - GGA: time, lat, lon, fix quality, HDOP (no date; last RMC date is reused)
//!
//! Any talker id is accepted (GP, GN, GL, GA, BD). Checksums are verified when
//! present. Accuracy is estimated as HDOP x `UERE_M`.

use super::{Delivery, LocationError, LocationSource, SampleGate, SourceHandle};
use crate::domain::types::{LocationRequest, LocationSample};
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, warn};

/// User equivalent range error assumed when converting HDOP to meters
const UERE_M: f32 = 5.0;

/// One decoded position sentence
#[derive(Debug, Clone, PartialEq)]
pub enum NmeaSentence {
    Rmc { time: NaiveTime, date: NaiveDate, latitude: f64, longitude: f64 },
    Gga { time: NaiveTime, latitude: f64, longitude: f64, hdop: Option<f32> },
}

/// Verify the `*hh` checksum if present and return the sentence body
fn strip_checksum(line: &str) -> Option<&str> {
    let line = line.trim();
    let body = line.strip_prefix('$')?;
    match body.split_once('*') {
        Some((data, checksum)) => {
            let expected = u8::from_str_radix(checksum.trim(), 16).ok()?;
            let actual = data.bytes().fold(0u8, |acc, b| acc ^ b);
            if actual != expected {
                debug!(sentence = %line, expected = expected, actual = actual, "nmea_checksum_failed");
                return None;
            }
            Some(data)
        }
        None => Some(body),
    }
}

/// Parse `ddmm.mmmm` / `dddmm.mmmm` with hemisphere into signed degrees
fn parse_coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    let raw: f64 = value.parse().ok()?;
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    if minutes >= 60.0 {
        return None;
    }
    let unsigned = degrees + minutes / 60.0;
    let (limit, sign) = match hemisphere {
        "N" => (90.0, 1.0),
        "S" => (90.0, -1.0),
        "E" => (180.0, 1.0),
        "W" => (180.0, -1.0),
        _ => return None,
    };
    if unsigned > limit {
        return None;
    }
    Some(sign * unsigned)
}

/// Parse `hhmmss[.sss]`
fn parse_time(value: &str) -> Option<NaiveTime> {
    if value.len() < 6 {
        return None;
    }
    let hours = value.get(0..2)?.parse().ok()?;
    let minutes = value.get(2..4)?.parse().ok()?;
    let seconds: f64 = value.get(4..)?.parse().ok()?;
    let whole = seconds.trunc() as u32;
    let millis = ((seconds - seconds.trunc()) * 1000.0).round() as u32;
    NaiveTime::from_hms_milli_opt(hours, minutes, whole, millis.min(999))
}

/// Parse `ddmmyy` (two-digit years are 20xx)
fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 6 {
        return None;
    }
    let day = value.get(0..2)?.parse().ok()?;
    let month = value.get(2..4)?.parse().ok()?;
    let year: i32 = value.get(4..6)?.parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

/// Decode one NMEA line; returns None for other sentence types or no-fix
pub fn parse_sentence(line: &str) -> Option<NmeaSentence> {
    let body = strip_checksum(line)?;
    let fields: Vec<&str> = body.split(',').collect();
    let kind = fields.first()?;
    if kind.len() != 5 || !kind.is_ascii() {
        return None;
    }

    match &kind[2..] {
        "RMC" if fields.len() >= 10 => {
            // Status A = valid, V = receiver warning
            if fields[2] != "A" {
                return None;
            }
            Some(NmeaSentence::Rmc {
                time: parse_time(fields[1])?,
                latitude: parse_coordinate(fields[3], fields[4])?,
                longitude: parse_coordinate(fields[5], fields[6])?,
                date: parse_date(fields[9])?,
            })
        }
        "GGA" if fields.len() >= 9 => {
            // Fix quality 0 = invalid
            let quality: u8 = fields[6].parse().ok()?;
            if quality == 0 {
                return None;
            }
            Some(NmeaSentence::Gga {
                time: parse_time(fields[1])?,
                latitude: parse_coordinate(fields[2], fields[3])?,
                longitude: parse_coordinate(fields[4], fields[5])?,
                hdop: fields[8].parse().ok(),
            })
        }
        _ => None,
    }
}

/// Turns a stream of NMEA lines into location samples
#[derive(Debug, Default)]
pub struct NmeaDecoder {
    last_date: Option<NaiveDate>,
    last_hdop: Option<f32>,
}

impl NmeaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> Option<LocationSample> {
        match parse_sentence(line)? {
            NmeaSentence::Rmc { time, date, latitude, longitude } => {
                self.last_date = Some(date);
                let sample = LocationSample::new(latitude, longitude, to_epoch_ms(date, time)?);
                Some(match self.last_hdop {
                    Some(hdop) => sample.with_accuracy(hdop * UERE_M),
                    None => sample,
                })
            }
            NmeaSentence::Gga { time, latitude, longitude, hdop } => {
                self.last_hdop = hdop;
                let date = self.last_date.unwrap_or_else(|| Utc::now().date_naive());
                let sample = LocationSample::new(latitude, longitude, to_epoch_ms(date, time)?);
                Some(match hdop {
                    Some(hdop) => sample.with_accuracy(hdop * UERE_M),
                    None => sample,
                })
            }
        }
    }
}

fn to_epoch_ms(date: NaiveDate, time: NaiveTime) -> Option<u64> {
    u64::try_from(date.and_time(time).and_utc().timestamp_millis()).ok()
}

pub struct SerialNmeaSource {
    device: String,
    baud: u32,
    metrics: Arc<Metrics>,
}

impl SerialNmeaSource {
    pub fn new(device: &str, baud: u32, metrics: Arc<Metrics>) -> Self {
        Self { device: device.to_string(), baud, metrics }
    }

    fn open(&self) -> Result<tokio_serial::SerialStream, LocationError> {
        open_port(&self.device, self.baud)
    }
}

fn open_port(device: &str, baud: u32) -> Result<tokio_serial::SerialStream, LocationError> {
    tokio_serial::new(device, baud)
        .timeout(Duration::from_millis(100))
        .open_native_async()
        .map_err(|e| match e.kind {
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                LocationError::PermissionDenied(format!("{device}: {e}"))
            }
            _ => LocationError::Unavailable(format!("{device}: {e}")),
        })
}

#[async_trait]
impl LocationSource for SerialNmeaSource {
    fn name(&self) -> &'static str {
        "serial"
    }

    async fn start(
        &self,
        request: LocationRequest,
        consumer: mpsc::Sender<LocationSample>,
    ) -> Result<SourceHandle, LocationError> {
        let initial = match self.open() {
            Ok(port) => Some(port),
            Err(e @ LocationError::PermissionDenied(_)) => return Err(e),
            Err(e) => {
                warn!(device = %self.device, error = %e, "nmea_port_open_failed");
                None
            }
        };

        info!(
            device = %self.device,
            baud = %self.baud,
            interval_ms = %request.interval.as_millis(),
            accuracy = %request.accuracy.as_str(),
            "nmea_source_started"
        );

        let device = self.device.clone();
        let baud = self.baud;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut gate = SampleGate::new("serial", request, consumer).with_metrics(self.metrics.clone());

        let task = tokio::spawn(async move {
            let retry = gate.request().interval;
            let mut port = initial;
            let mut decoder = NmeaDecoder::new();

            loop {
                let stream = match port.take() {
                    Some(p) => p,
                    None => {
                        tokio::select! {
                            _ = shutdown_rx.changed() => return,
                            _ = tokio::time::sleep(retry) => {}
                        }
                        gate.check_outage();
                        match open_port(&device, baud) {
                            Ok(p) => {
                                info!(device = %device, "nmea_port_opened");
                                p
                            }
                            Err(e) => {
                                debug!(device = %device, error = %e, "nmea_port_retry_failed");
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
                            info!(device = %device, "nmea_source_shutdown");
                            return;
                        }
                        _ = outage_timer.tick() => gate.check_outage(),
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => {
                                if let Some(sample) = decoder.feed(&line) {
                                    if gate.offer(sample) == Delivery::Closed {
                                        return;
                                    }
                                }
                            }
                            Ok(None) => {
                                warn!(device = %device, "nmea_port_closed");
                                break;
                            }
                            Err(e) => {
                                error!(device = %device, error = %e, "nmea_read_error");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(SourceHandle::new("serial", shutdown_tx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
    const GGA: &str = "$GPGGA,123520,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*4D";

    #[test]
    fn test_parse_rmc() {
        match parse_sentence(RMC) {
            Some(NmeaSentence::Rmc { time, date, latitude, longitude }) => {
                assert_eq!(time, NaiveTime::from_hms_opt(12, 35, 19).unwrap());
                assert_eq!(date, NaiveDate::from_ymd_opt(2094, 3, 23).unwrap());
                assert!((latitude - 48.1173).abs() < 1e-4);
                assert!((longitude - 11.516_666).abs() < 1e-4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_gga_hdop() {
        match parse_sentence(GGA) {
            Some(NmeaSentence::Gga { hdop, .. }) => assert_eq!(hdop, Some(0.9)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let corrupted = RMC.replace("*6A", "*00");
        assert_eq!(parse_sentence(&corrupted), None);
    }

    #[test]
    fn test_void_rmc_rejected() {
        assert_eq!(parse_sentence("$GNRMC,123519,V,,,,,,,230394,,,N"), None);
    }

    #[test]
    fn test_southern_and_western_hemispheres() {
        assert!((parse_coordinate("0610.000", "S").unwrap() + 6.166_666).abs() < 1e-5);
        assert!((parse_coordinate("10649.800", "W").unwrap() + 106.83).abs() < 1e-5);
        assert_eq!(parse_coordinate("0675.000", "N"), None);
        assert_eq!(parse_coordinate("0610.000", "X"), None);
    }

    #[test]
    fn test_non_finite_and_out_of_range_coordinates_rejected() {
        assert_eq!(parse_coordinate("NaN", "N"), None);
        assert_eq!(parse_coordinate("inf", "E"), None);
        assert_eq!(parse_coordinate("9130.000", "N"), None);
        assert_eq!(parse_coordinate("18100.000", "W"), None);
        assert!(parse_coordinate("9000.000", "S").is_some());
        assert!(parse_coordinate("17959.000", "E").is_some());
    }

    #[test]
    fn test_other_sentences_ignored() {
        assert_eq!(parse_sentence("$GPGSV,3,1,11,03,03,111,00,04,15,270,00"), None);
        assert_eq!(parse_sentence("garbage"), None);
    }

    #[test]
    fn test_decoder_uses_rmc_date_for_gga() {
        let mut decoder = NmeaDecoder::new();
        let rmc = decoder.feed(RMC).unwrap();
        let gga = decoder.feed(GGA).unwrap();
        assert_eq!(gga.timestamp - rmc.timestamp, 1_000);
        assert_eq!(gga.accuracy, Some(0.9 * UERE_M));
    }

    #[test]
    fn test_fractional_seconds() {
        let t = parse_time("123519.250").unwrap();
        assert_eq!(t, NaiveTime::from_hms_milli_opt(12, 35, 19, 250).unwrap());
    }
}
