//! Machina Runner
//!
//! The same executable serves two roles:
//! - Normal mode: build a host from a driver name and its JSON configuration
//!   and print what it resolved to
//! - Plugin mode: when re-executed with `MACHINE_PLUGIN_TOKEN=42`, serve the
//!   driver named by `MACHINE_PLUGIN_DRIVER_NAME` over loopback RPC and exit

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use machina::plugin::{Launcher, Startup};
use machina::prelude::*;
use machina::new_api_client_with;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "machina", version, about = "Build a machine host from a driver configuration")]
struct Cli {
    /// TOML configuration file with a [client] section
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured client type (local or rpc)
    #[arg(long)]
    client: Option<ClientType>,

    /// Registered driver name, e.g. virtualbox
    driver: String,

    /// File holding the driver's JSON configuration
    driver_config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout is reserved for the plugin address line
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Launcher::from_env().run().await {
        Ok(Startup::PluginFinished) => return ExitCode::SUCCESS,
        Ok(Startup::RunCli) => {}
        Err(e) => {
            error!("Plugin failed: {:#}", e);
            return ExitCode::FAILURE;
        }
    }

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let kind = e
                .downcast_ref::<MachineError>()
                .map(MachineError::kind)
                .unwrap_or("Error");
            eprintln!("error[{}]: {:#}", kind, e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let store = match &cli.config {
        Some(path) => ConfigStore::from_file(path)?,
        None => ConfigStore::empty(),
    };

    let mut options: ClientOptions = store.get()?;
    if let Some(client_type) = cli.client {
        options.client_type = client_type;
    }

    let raw = tokio::fs::read(&cli.driver_config)
        .await
        .with_context(|| format!("Failed to read {}", cli.driver_config.display()))?;

    info!("Using {} client", options.client_type);
    let client = new_api_client_with(options.client_type, options)?;

    let described = describe(client.as_ref(), &cli.driver, &raw).await;
    client.close().await?;
    described
}

async fn describe(client: &dyn Client, driver_name: &str, raw: &[u8]) -> Result<()> {
    let host = client.new_host(driver_name, raw).await?;

    let state = match host.state().await {
        Ok(state) => state.to_string(),
        Err(e) => {
            warn!("Could not read state of '{}': {}", host.name, e);
            "Unknown".to_string()
        }
    };

    println!("name: {}", host.name);
    println!("driver: {}", host.driver_name);
    println!("state: {}", state);
    Ok(())
}
