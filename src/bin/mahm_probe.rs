//! Polls MSI Afterburner once per second and prints the display packet.
//!
//! Pass `--json` to print each report as a JSON line instead. Log verbosity
//! follows `RUST_LOG` (default `info`).

use mahm_telemetry::default_reader;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let json = std::env::args().skip(1).any(|arg| arg == "--json");
    let mut reader = default_reader();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_ms = POLL_INTERVAL.as_millis() as u64, "Polling hardware monitoring shared memory");

    loop {
        ticker.tick().await;

        match reader.poll() {
            Ok(report) if json => println!("{}", serde_json::to_string(&report)?),
            Ok(report) => {
                let polled = report.formatted_poll_time().unwrap_or_default();
                println!("{} {}", polled, report.packet());
            }
            Err(e) => {
                warn!(code = e.status_code(), "{}", e);
                if !e.is_retryable() {
                    return Err(e.into());
                }
                for suggestion in e.recovery_suggestions() {
                    info!("hint: {}", suggestion);
                }
            }
        }
    }
}
