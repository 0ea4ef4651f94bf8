use crate::config::CouplerConfig;
use crate::error::Result;
use crate::supervisor::{StopOutcome, Supervisor};

/// `hostlink stop`: terminate the supervised process and sweep orphans.
/// Always succeeds — "nothing was running" is a satisfied postcondition.
pub async fn run(config: &CouplerConfig) -> Result<()> {
    let supervisor = Supervisor::new(config);
    match supervisor.stop().await {
        StopOutcome::Stopped => println!("Stopped '{}'", config.command),
        StopOutcome::NotRunning => {
            println!("'{}' was not running; nothing to do", config.command)
        }
    }
    Ok(())
}
