//! Diagnostic output: stdout plus an append-only log file.
//!
//! The coupler runs unattended, so everything it logs must land somewhere
//! inspectable after the fact. `RUST_LOG` overrides the default `info`
//! filter.

use crate::config::CouplerConfig;
use crate::error::Result;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Called once per process, before any
/// command runs.
pub fn init(config: &CouplerConfig) -> Result<()> {
    std::fs::create_dir_all(&config.state_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.coupler_log_file())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();
    Ok(())
}
