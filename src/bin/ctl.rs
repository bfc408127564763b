//! GeoBeep control client
//!
//! Sends a control method to a running daemon and prints the JSON reply.
//!
//! Usage:
//!   geobeep-ctl start
//!   geobeep-ctl stop
//!   geobeep-ctl status
//!   geobeep-ctl --url http://10.0.0.5:8787 snooze   # -> {"error":"not implemented"}

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "geobeep-ctl", version, about = "Control a running GeoBeep daemon")]
struct Args {
    /// Base URL of the daemon's control endpoint
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    url: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    /// Control method (`start`, `stop`), or `status`
    method: String,
}

async fn run(args: &Args) -> anyhow::Result<bool> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout))
        .build()
        .context("failed to build HTTP client")?;
    let base = args.url.trim_end_matches('/');

    let resp = if args.method == "status" {
        client.get(format!("{base}/status")).send().await
    } else {
        client.post(format!("{base}/control")).json(&json!({ "method": args.method })).send().await
    }
    .with_context(|| format!("request to {base} failed"))?;

    let status = resp.status();
    let body: serde_json::Value = resp.json().await.context("invalid JSON reply")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    // `{"success": false}` counts as failure too
    let ok = status.is_success() && body.get("success").and_then(|v| v.as_bool()) != Some(false);
    Ok(ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("geobeep-ctl: {e:#}");
            ExitCode::from(2)
        }
    }
}
