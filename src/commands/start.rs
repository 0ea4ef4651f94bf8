use crate::config::CouplerConfig;
use crate::error::Result;
use crate::supervisor::{StartOutcome, Supervisor};

/// `hostlink start`: ensure one correctly-bound instance is running.
///
/// Exits non-zero (via the propagated error) if the process never binds
/// within the timeout.
pub async fn run(config: &CouplerConfig) -> Result<()> {
    let supervisor = Supervisor::new(config);
    match supervisor.start().await? {
        StartOutcome::Started(pid) => {
            println!(
                "Started '{}' (PID {}), listening on {}:{}",
                config.command, pid, config.bind_addr, config.port
            );
        }
        StartOutcome::AlreadyRunning(pid) => {
            println!(
                "'{}' is already running (PID {}) and bound to {}:{}",
                config.command, pid, config.bind_addr, config.port
            );
        }
    }
    println!("Logs: {}", config.process_log_file().display());
    Ok(())
}
