use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse};
use tower_http::LatencyUnit;

use crate::feed::{FeedSource, ReformatOptions};

mod handlers;

pub use handlers::StatusBody;

/// Route serving the reformatted bulletin feed.
pub const FEED_ROUTE: &str = "/feeds/google-cloud-security-bulletins.xml";
const STATUS_PREFIX: &str = "/_status";

/// Everything a request needs. Cloned per request; holds nothing mutable.
#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn FeedSource>,
    pub options: ReformatOptions,
}

impl AppState {
    pub fn new(source: Arc<dyn FeedSource>) -> Self {
        Self {
            source,
            options: ReformatOptions::default(),
        }
    }
}

/// Builds the router without binding anything, so tests can drive it directly.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(FEED_ROUTE, get(handlers::bulletin_feed))
        .route(&format!("{}/livez", STATUS_PREFIX), get(handlers::livez))
        .fallback(handlers::not_found_handler)
        .with_state(state)
}

/// Serves the router on `listen_addr` until Ctrl-C.
pub async fn run(listen_addr: SocketAddr, state: AppState) -> Result<(), ServerError> {
    let trace_layer = TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(tracing::Level::INFO)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros));

    let app = router(state).layer(trace_layer);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, route = FEED_ROUTE, "Feed server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Feed server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] std::io::Error),
}
