use std::sync::Arc;

use arc_swap::ArcSwap;
use clap::Parser;
use core::{
    apikey::ApiKeyService,
    handler::RequestHandler,
    logger::Logger,
};
use tokio_util::sync::CancellationToken;

use crate::{args::Args, routes::AppState};

mod args;
mod logger;
mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init(&args.log_filter);

    let snapshot = config::load(&args.config)
        .map_err(|e| anyhow::anyhow!("failed to load config from {}: {e}", args.config.display()))?;

    let wildcard_enabled = snapshot.wildcard_key_enabled;
    let config = Arc::new(ArcSwap::new(Arc::new(snapshot)));

    let api_keys: Arc<dyn ApiKeyService> = Arc::new(store::InMemoryApiKeyService::new(wildcard_enabled));
    let log_store: Arc<dyn Logger> = store::InMemoryLogger::new();

    let handler = Arc::new(RequestHandler::new(config.clone(), log_store, api_keys));
    let state = AppState { handler, config };

    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(args.listen_address)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind to {}: {e}", args.listen_address))?;

    log::info!("cc-gw listening on http://{}", args.listen_address);

    let shutdown_signal = CancellationToken::new();
    let ctrl_c_signal = shutdown_signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("received shutdown signal, shutting down gracefully...");
            ctrl_c_signal.cancel();
        }
    });

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.map_err(|e| anyhow::anyhow!("server error: {e}"))?;
        }
        _ = shutdown_signal.cancelled() => {}
    }

    Ok(())
}
