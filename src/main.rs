//! Line chat server - Entry Point
//!
//! Loads the configuration, binds the listener and runs until Ctrl-C.

use std::env;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use line_chat::{ChatError, ChatServer, ServerConfig, DEFAULT_PORT};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=line_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("line_chat=info")),
        )
        .init();

    let config = load_config()?;
    let server = ChatServer::bind(config).await?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            ctrl_c.cancel();
        }
    });

    server.run(shutdown).await?;
    Ok(())
}

/// Configuration from `CHAT_CONFIG` (JSON file), or from the port given as
/// the first argument plus the `CHAT_POLICY` preset name
fn load_config() -> Result<ServerConfig, ChatError> {
    if let Ok(path) = env::var("CHAT_CONFIG") {
        info!("Loading configuration from {}", path);
        return ServerConfig::from_file(path);
    }

    let port = match env::args().nth(1) {
        Some(arg) => arg
            .parse::<i32>()
            .map_err(|_| ChatError::InvalidConfiguration(format!("invalid port '{}'", arg)))?,
        None => DEFAULT_PORT,
    };

    let mut config = ServerConfig::new(port);
    if let Ok(policy) = env::var("CHAT_POLICY") {
        config = config.with_policy(policy.parse()?);
    }

    config.validate()?;
    Ok(config)
}
