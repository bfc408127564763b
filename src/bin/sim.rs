//! GeoBeep track simulator
//!
//! Writes a replay track (JSON Lines, one fix per line) that walks in a
//! straight line toward the configured target, straight through it, and out
//! the other side. Feed it to the daemon with `[location] source = "replay"`.
//!
//! Usage:
//!   cargo run --bin geobeep-sim -- --config config/dev.toml --out tracks/demo.jsonl
//!   cargo run --bin geobeep-sim -- --approach-m 600 --step-m 25 --out -

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use geobeep::domain::geo::{destination_point, distance_to_target};
use geobeep::domain::types::{LocationSample, Target};
use geobeep::infra::Config;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "geobeep-sim", version, about = "Generate a replay track through the target")]
struct Args {
    /// Config file providing target, radius and interval
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Output file, or `-` for stdout
    #[arg(short, long, default_value = "tracks/demo.jsonl")]
    out: String,

    /// Distance from the target where the walk starts and ends (m)
    #[arg(long, default_value = "1000")]
    approach_m: f64,

    /// Distance covered between consecutive fixes (m)
    #[arg(long, default_value = "50")]
    step_m: f64,

    /// Direction of travel (degrees clockwise from north)
    #[arg(long, default_value = "0")]
    bearing: f64,

    /// Time between fixes (ms); defaults to the configured interval
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Horizontal accuracy to stamp on every fix (m)
    #[arg(long)]
    accuracy_m: Option<f32>,
}

/// Fixes along the line through `target`, signed offsets from -approach to +approach
fn build_track(
    target: &Target,
    approach_m: f64,
    step_m: f64,
    bearing: f64,
    start_ts: u64,
    interval_ms: u64,
) -> Vec<LocationSample> {
    let steps = (2.0 * approach_m / step_m).round() as u64;
    (0..=steps)
        .map(|i| {
            let offset = -approach_m + i as f64 * step_m;
            let (lat, lon) = if offset < 0.0 {
                destination_point(target.latitude(), target.longitude(), bearing + 180.0, -offset)
            } else {
                destination_point(target.latitude(), target.longitude(), bearing, offset)
            };
            LocationSample::new(lat, lon, start_ts + i * interval_ms)
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if !(args.step_m > 0.0 && args.approach_m > 0.0) {
        anyhow::bail!("--approach-m and --step-m must be positive");
    }

    let config = Config::load_from_path(&args.config);
    let target = config.target();
    let interval_ms = args
        .interval_ms
        .unwrap_or_else(|| config.location_request().interval.as_millis() as u64);
    let start_ts = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();

    let mut track =
        build_track(&target, args.approach_m, args.step_m, args.bearing, start_ts, interval_ms);
    if let Some(acc) = args.accuracy_m {
        track = track.into_iter().map(|s| s.with_accuracy(acc)).collect();
    }

    let writer: Box<dyn Write> = if args.out == "-" {
        Box::new(io::stdout().lock())
    } else {
        let path = Path::new(&args.out);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        Box::new(File::create(path).with_context(|| format!("failed to create {}", args.out))?)
    };
    let mut writer = BufWriter::new(writer);

    writeln!(
        writer,
        "# geobeep-sim target={} radius_m={} bearing={} step_m={}",
        target,
        config.radius().meters(),
        args.bearing,
        args.step_m
    )?;
    let mut inside = 0usize;
    for sample in &track {
        if distance_to_target(sample, &target) <= config.radius().meters() {
            inside += 1;
        }
        writeln!(writer, "{}", serde_json::to_string(sample)?)?;
    }
    writer.flush()?;

    eprintln!(
        "wrote {} fixes ({} inside the {} m radius) to {}",
        track.len(),
        inside,
        config.radius().meters(),
        args.out
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_passes_through_target() {
        let target = Target::new(-6.1666, 106.83).unwrap();
        let track = build_track(&target, 500.0, 100.0, 90.0, 1_000, 10_000);

        assert_eq!(track.len(), 11);
        assert!((distance_to_target(&track[0], &target) - 500.0).abs() < 0.01);
        assert!(distance_to_target(&track[5], &target) < 0.01);
        assert!((distance_to_target(&track[10], &target) - 500.0).abs() < 0.01);
        assert_eq!(track[10].timestamp, 101_000);
    }
}
