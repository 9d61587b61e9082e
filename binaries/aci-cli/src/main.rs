//! ACI CLI
//!
//! ```bash
//! aci serve                         # HTTP boundary + gatekeeper poller
//! aci routes                        # print the route table
//! aci watch                         # follow lock state over /ws
//! aci device keygen -o ipad.key     # companion-device tooling
//! ```

mod device;
mod watch;

use std::path::{Path, PathBuf};

use aci_config::AciConfig;
use aci_web::AppState;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str =
    "aci=info,aci_web=info,aci_session=info,aci_gatekeeper=info,tower_http=info";

#[derive(Parser)]
#[command(name = "aci")]
#[command(about = "ACI console - device trust handshake and duty gatekeeper")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server and the gatekeeper poller
    Serve {
        /// Config file (defaults to $ACI_CONFIG, then <config_dir>/aci/config.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bind address, overrides config and ACI_BIND
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Print the route table
    Routes,

    /// Follow lock state changes from a running console
    Watch {
        /// Observer endpoint
        #[arg(long, default_value = "ws://127.0.0.1:5000/ws")]
        url: String,
    },

    /// Companion-device tooling
    Device {
        #[command(subcommand)]
        command: device::DeviceCommands,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json);

    match cli.command {
        Commands::Serve { config, bind } => cmd_serve(config.as_deref(), bind).await,
        Commands::Routes => {
            aci_web::print_routes();
            Ok(())
        }
        Commands::Watch { url } => watch::run(&url).await,
        Commands::Device { command } => device::run(command).await,
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(path: Option<&Path>) -> Result<AciConfig> {
    let Some(path) = path else {
        return AciConfig::load().context("loading configuration");
    };

    let mut config = AciConfig::from_file(path)?;
    config.apply_env(|var| std::env::var(var).ok())?;
    config.validate()?;
    Ok(config)
}

async fn cmd_serve(config_path: Option<&Path>, bind: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }

    tracing::info!(
        aci_id = %config.aci_id,
        flygate = %config.authority.base_url,
        devices = config.devices.len(),
        "starting ACI console"
    );

    let addr = config.server.bind.clone();
    let state = AppState::from_config(config).await?;
    state.gatekeeper.start().await;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown requested");
    };

    let served = aci_web::serve(state.clone(), &addr, shutdown).await;
    state.gatekeeper.stop().await;
    served?;
    Ok(())
}
