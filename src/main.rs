// src/main.rs

//! The entry point for the SpinelDB server process.

use anyhow::Result;
use spineldb::config::Config;
use std::env;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version") {
        println!("SpinelDB version {VERSION}");
        return Ok(());
    }

    let config = match Config::parse(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    if let Err(e) = spineldb::server::run(config).await {
        error!("server error: {e}");
        std::process::exit(1);
    }

    Ok(())
}
