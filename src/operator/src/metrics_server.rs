use crate::error::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use prune_core::MetricsRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
struct MetricsState {
    registry: Arc<MetricsRegistry>,
    /// Rendered configuration, exposed only when profiling is enabled
    debug_config: Option<Arc<String>>,
}

pub fn build_router(registry: Arc<MetricsRegistry>, debug_config: Option<String>) -> Router {
    let with_debug = debug_config.is_some();
    let state = MetricsState {
        registry,
        debug_config: debug_config.map(Arc::new),
    };

    let mut router = Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health));
    if with_debug {
        router = router.route("/debug/config", get(debug_config_handler));
    }
    router.with_state(state)
}

/// Serve `router` on `addr` until `shutdown` flips to true
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("[Metrics] Listening on {}", addr);
    serve_on(listener, router, shutdown).await
}

pub async fn serve_on(
    listener: tokio::net::TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;

    tracing::info!("[Metrics] Server stopped");
    Ok(())
}

async fn metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.registry.render_prometheus(),
    )
}

async fn health() -> impl IntoResponse {
    tracing::debug!("GET /health - Health check request");
    (StatusCode::OK, "ok")
}

async fn debug_config_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.debug_config {
        Some(config) => (StatusCode::OK, config.as_ref().clone()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}
