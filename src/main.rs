//! Binary entry point for the vmvault service.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vmvault::api::{AppState, router};
use vmvault::config::{ConfigError, ServiceConfig};
use vmvault::inventory::{InventoryError, XapiClient};
use vmvault::remote::SshExecutor;
use vmvault::shutdown::shutdown_signal;
use vmvault::store::{SqliteStore, StoreError};
use vmvault::workflow::Orchestrator;

mod cli;

use cli::{Cli, ServeCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Store(#[from] StoreError),
    #[error("control plane client error: {0}")]
    Inventory(#[from] InventoryError),
    #[error("server error: {0}")]
    Io(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = ServiceConfig::load_without_cli_args()?;
    config.validate()?;
    match cli {
        Cli::Serve(command) => serve(config, command).await,
        Cli::Migrate => migrate(&config).await,
    }
}

async fn migrate(config: &ServiceConfig) -> Result<(), CliError> {
    let store = SqliteStore::connect(&config.database_url).await?;
    store.migrate().await?;
    store.close().await;
    info!("database is up to date");
    Ok(())
}

async fn serve(config: ServiceConfig, command: ServeCommand) -> Result<(), CliError> {
    let address = command.bind.unwrap_or_else(|| config.bind_address.clone());
    let allow_origin = config.cors_origin()?;

    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
    store.migrate().await?;

    let executor = Arc::new(SshExecutor::with_process_runner(config.ssh_settings()));
    let inventory = Arc::new(XapiClient::new(&config.xapi_scheme, config.xapi_timeout())?);
    let orchestrator = Orchestrator::new(store.clone(), executor, config.workflow_settings());
    let app = router(
        AppState::new(store.clone(), inventory, orchestrator),
        allow_origin,
    );

    let listener = TcpListener::bind(&address).await?;
    info!(address = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown signal received; closing database");
    store.close().await;
    Ok(())
}

fn report_error(err: &CliError) {
    writeln!(io::stderr(), "{err}").ok();
}
