use crate::config::CouplerConfig;
use crate::coupler::Coupler;
use crate::error::Result;

/// `hostlink watch`: run the lifecycle coupling in the foreground until the
/// container goes away or a termination signal arrives.
pub async fn run(config: &CouplerConfig) -> Result<()> {
    println!(
        "Coupling '{}' to container '{}' (Ctrl+C to stop both)",
        config.command, config.container
    );
    Coupler::new(config.clone())?.run().await
}
