use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hostlink")]
#[command(about = "Couple a host-native Ollama process to a Docker container's lifecycle")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// All configuration is environment-driven (`HOSTLINK_*`, see the config
/// module); every subcommand runs with zero flags.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the supervised process if it isn't already running and bound
    Start,
    /// Stop the supervised process and sweep orphans
    Stop,
    /// Couple the process to the container lifecycle (runs in foreground)
    Watch,
    /// Show container, process and binding state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
