use std::path::PathBuf;
use std::process::ExitCode;

use replywatch::config::{load_config, load_config_from_str};
use replywatch::{build_router, logging, Config, ReplyWatchError, Result};

mod app;

use app::App;

const CONFIG_ENV_VAR: &str = "REPLYWATCH_CONFIG";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("replywatch-server: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = read_config()?;
    logging::init(&config.logging)?;

    tracing::info!("Starting replywatch-server v{}", env!("CARGO_PKG_VERSION"));

    let app = App::build(&config)?;
    if config.webhook.enabled {
        app.ensure_all_subscriptions();
    } else {
        tracing::info!("Webhooks disabled, relying on reconciliation sweeps");
    }

    let router = build_router(app.state.clone());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(ReplyWatchError::Server)?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ReplyWatchError::Server)?;

    tracing::info!("Draining notification queue and stopping jobs");
    app.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Config path from the first argument, then `REPLYWATCH_CONFIG`; defaults
/// plus environment overrides otherwise.
fn read_config() -> Result<Config> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

    let config = match path {
        Some(path) => load_config(&path)?,
        None => load_config_from_str("{}")?,
    };
    Ok(config)
}
