use clap::Parser;
use ollama_hostlink::cli::{Cli, Commands};
use ollama_hostlink::{commands, logging, CouplerConfig, Error};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        if let Some(suggestion) = e.suggestion() {
            eprintln!("\nHint: {}", suggestion);
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    let config = CouplerConfig::from_env()?;
    logging::init(&config)?;

    match cli.command {
        Commands::Start => commands::start::run(&config).await,
        Commands::Stop => commands::stop::run(&config).await,
        Commands::Watch => commands::watch::run(&config).await,
        Commands::Status { json } => commands::status::run(&config, json).await,
    }
}
