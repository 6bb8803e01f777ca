//! `WireChat` echo endpoint: answers every text frame on `/ws`.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 127.0.0.1:8000
//! cargo run --bin wirechat-echo
//!
//! # Run on custom address with a custom reply prefix
//! cargo run --bin wirechat-echo -- --bind 0.0.0.0:9000 --prefix "bot: "
//! ```

use clap::Parser;
use wirechat_echo::config::{EchoCliArgs, EchoConfig};
use wirechat_echo::server;

#[tokio::main]
async fn main() {
    let cli = EchoCliArgs::parse();

    let config = match EchoConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting echo endpoint");

    match server::start_server(&config.bind_addr, &config.reply_prefix).await {
        Ok(server) => {
            tracing::info!(addr = %server.addr(), "echo endpoint listening");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to wait for shutdown signal");
            }
            tracing::info!("shutting down");
            server.close_all_connections().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start echo endpoint");
            std::process::exit(1);
        }
    }
}
