pub mod bridge;
pub mod carwings;
pub mod config;
pub mod mqtt;
pub mod telemetry;

use crate::carwings::Session;
use crate::config::Config;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = Config::default_path().map_err(|e| eyre!("No configuration file: {}", e))?;
    let config = Config::load(&path)
        .await
        .map_err(|e| eyre!("Failed to load configuration: {}", e))?;

    info!(
        "Logging in to Carwings as {} ({})",
        config.carwings.username,
        config.carwings.region.code()
    );
    let session = Session::connect(&config.carwings)
        .await
        .map_err(|e| eyre!("Carwings login failed: {}", e))?;

    bridge::run(&config, Arc::new(session))
        .await
        .map_err(|e| eyre!("Bridge stopped: {}", e))?;

    info!("Bridge stopped");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}
