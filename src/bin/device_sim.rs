//! ==============================================================================
//! device_sim.rs - simulated field device
//! ==============================================================================
//!
//! purpose:
//!     stands in for the soil probe during development. posts a synthetic
//!     reading to the hub every `--interval-secs` and logs the hub's answer.
//!     values drift slowly (slow sine waves) so charts have something to show.
//!
//! usage:
//!     device-sim --url http://localhost:3000 --interval-secs 2 --count 100
//!
//! ==============================================================================

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "device-sim", about = "Posts simulated soil readings to a sensor hub")]
struct Args {
    /// Base url of the hub
    #[arg(long, env = "HUB_URL", default_value = "http://localhost:3000")]
    url: String,

    /// Seconds between readings
    #[arg(long, default_value_t = 5)]
    interval_secs: u64,

    /// Stop after this many readings (0 = run forever)
    #[arg(long, default_value_t = 0)]
    count: u64,
}

#[derive(Debug, Serialize)]
struct Payload {
    temperature: f64,
    moisture: f64,
    ph: f64,
}

/// reading number `tick` of a slowly varying signal
fn synthesize(tick: u64) -> Payload {
    let t = tick as f64;
    Payload {
        temperature: round2(22.0 + 4.0 * (t / 40.0).sin()),
        moisture: round2(45.0 + 12.0 * (t / 65.0).cos()),
        ph: round2(6.6 + 0.4 * (t / 90.0).sin()),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let endpoint = format!("{}/api/sensor-data", args.url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    tracing::info!(%endpoint, interval_secs = args.interval_secs, "device simulator started");

    let mut interval = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    let mut tick = 0u64;
    loop {
        interval.tick().await;

        let payload = synthesize(tick);
        // the device does not retry; a missed reading is simply lost
        match client.post(&endpoint).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(
                    temperature = payload.temperature,
                    moisture = payload.moisture,
                    ph = payload.ph,
                    "reading accepted"
                );
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(%status, %body, "reading rejected");
            }
            Err(e) => tracing::warn!(error = %e, "hub unreachable"),
        }

        tick += 1;
        if args.count > 0 && tick >= args.count {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_readings_stay_in_domain() {
        for tick in 0..2_000 {
            let p = synthesize(tick);
            assert!((-50.0..=100.0).contains(&p.temperature));
            assert!((0.0..=100.0).contains(&p.moisture));
            assert!((0.0..=14.0).contains(&p.ph));
        }
    }
}
