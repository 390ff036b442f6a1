use anyhow::Result;
use clap::{Parser, Subcommand};

mod adapters;
mod commands;
mod config;

#[derive(Parser)]
#[command(name = "synapse")]
#[command(about = "Event-driven multi-session agent dispatch runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write default configuration files
    Init,
    /// Run the dispatch core with console adapters
    Run {
        /// Path to the app config file
        #[arg(long, default_value = "synapse.yaml")]
        config: String,
    },
    /// Validate configuration and print a summary
    Health {
        #[arg(long, default_value = "synapse.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Run { config } => commands::run::run(&config).await,
        Commands::Health { config } => commands::health::run(&config),
    }
}
