//! Facilitator HTTP entrypoint.
//!
//! Launches the axum server exposing the settlement interface:
//! - `POST /verify` — check a pre-signed payment against expected terms
//! - `POST /settle` — verify, submit to chain, and wait for confirmation
//! - `GET /supported` — list configured networks
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` (or `--config`) selects the JSON configuration file
//! - `HOST`, `PORT` control the binding address when absent from config
//! - `OTEL_*` variables enable span export

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use payrelay::config::Config;
use payrelay::handlers;
use payrelay::orchestrator::AdapterRegistry;
use payrelay::sig_down::SigDown;
use payrelay::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::new();

    let config = Config::load()?;
    let registry = Arc::new(AdapterRegistry::from_config(&config)?);

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(registry))
        .layer(_telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    // Let the signal task log which signal stopped us before exiting.
    sig_down.recv().await;

    Ok(())
}
