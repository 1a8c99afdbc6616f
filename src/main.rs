//! Chat Relay - Entry Point
//!
//! Parses the listen port, starts the dispatcher and runs until ctrl-c.

use std::env;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::{ChatServer, ServerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let port = match args.as_slice() {
        [_, port] => port.parse::<u16>().ok(),
        _ => None,
    };
    let Some(port) = port else {
        let prog = args.first().map(String::as_str).unwrap_or("chat_relay");
        println!("Usage: {} <port>", prog);
        return ExitCode::FAILURE;
    };

    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    let config = ServerConfig::with_port(port);
    let server = match ChatServer::bind(config.clone()).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr(), e);
            return ExitCode::FAILURE;
        }
    };

    info!("=== WELCOME TO THE CHATROOM ===");
    info!("Chat relay listening on {}", config.bind_addr());

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    ExitCode::SUCCESS
}
