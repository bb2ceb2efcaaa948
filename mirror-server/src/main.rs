//! Mirroring feed server CLI binary

use anyhow::Result;
use clap::{Parser, Subcommand};
use mirror_server::{run_server, Config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mirror-server")]
#[command(about = "Pull-through mirroring NuGet feed server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON); built-in defaults when absent
    #[arg(long, default_value = "config.json", global = true)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the feed server
    Start {
        /// Host to bind to [default: from config]
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to [default: from config]
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for package storage [default: from config]
        #[arg(long)]
        data: Option<PathBuf>,

        /// Serve local packages only
        #[arg(long)]
        no_mirror: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = mirror_logging::init_subscriber();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Start {
            host,
            port,
            data,
            no_mirror,
        } => {
            if no_mirror {
                config.mirror.enabled = false;
            }
            let host = host.unwrap_or_else(|| config.server.default_host.clone());
            let port = port.unwrap_or(config.server.default_port);
            let data = data.unwrap_or_else(|| config.storage.default_data_dir.clone());
            run_server(config, host, port, data).await
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
