// src/main.rs

//! The main entry point for the packet forwarder.

use std::env;
use std::path::Path;

use anyhow::Result;
use lorafwd::config::Config;
use lorafwd::hal::sim::SimConcentrator;
use lorafwd::hal::Deps;
use lorafwd::server;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("lorafwd version {VERSION}");
        return Ok(());
    }

    // Configuration files are searched in the directory given by
    // --config-dir; it defaults to the working directory.
    let config_dir = args
        .iter()
        .position(|arg| arg == "--config-dir")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or(".");

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    // The forwarder cannot run without a valid configuration.
    let config = match Config::load(Path::new(config_dir)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_dir}\": {e:#}");
            std::process::exit(1);
        }
    };

    // This build carries the software concentrator backend; hardware
    // integrations construct their own `Deps` and call `server::run`
    // themselves.
    let deps = Deps {
        concentrator: Box::new(SimConcentrator::new(config.radio.clone())),
        gps: None,
    };

    if let Err(e) = server::run(config, deps).await {
        error!("forwarder runtime error: {e:#}");
        return Err(e);
    }

    Ok(())
}
