//! Config node binary

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tsmeta::{Config, Coordinator};

#[derive(Parser)]
#[command(name = "tsmeta-confignode")]
#[command(about = "tsmeta config node: cluster metadata behind a replicated command log")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start config node server
    Serve {
        /// Node ID (overrides config file)
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP (overrides config file)
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Command log directory (overrides config file)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Audit log file
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },

    /// Print the effective configuration and exit
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config file first, then CLI flags on top
    let mut config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            data_dir,
            audit_log,
        } => {
            if let Some(id) = id {
                config.coordinator.node_id = id;
            }
            if let Some(bind) = bind {
                config.coordinator.bind_addr = bind;
            }
            if let Some(dir) = data_dir {
                config.coordinator.data_dir = dir;
            }
            if audit_log.is_some() {
                config.coordinator.audit_log = audit_log;
            }
            config.validate()?;
            Coordinator::new(config).serve().await?;
        }
        Commands::Config => {
            config.security.admin_password = "********".to_string();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
