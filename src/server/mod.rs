//! HTTP/WebSocket surface (§6). Grounded on the teacher's
//! `server::{make_app, run_server}` split and `tower_governor` rate-limiting
//! layer, trimmed to the config/status/discovery-artifact endpoints this
//! crate actually needs — no sessions, no catalog streaming.

mod routes;
pub mod state;
mod websocket;

pub use state::AppState;
pub use websocket::ConnectionRegistry;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::Request;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::KeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

const GLOBAL_PER_MINUTE: u32 = 300;

/// IP-based rate-limit key, grounded on the teacher's
/// `http_layers::rate_limit::IpKeyExtractor`.
#[derive(Clone)]
struct IpKeyExtractor;

impl KeyExtractor for IpKeyExtractor {
    type Key = SocketAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr)
            .ok_or(GovernorError::UnableToExtractKey)
    }
}

pub fn make_app(state: AppState) -> Router {
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(std::cmp::max(1, (GLOBAL_PER_MINUTE / 60) as u64))
            .burst_size(GLOBAL_PER_MINUTE)
            .key_extractor(IpKeyExtractor)
            .finish()
            .expect("static governor config is always valid"),
    );

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/status/system", get(routes::system_status))
        .route("/api/status/commands", get(routes::command_statuses))
        .route("/api/status/commands/{name}/trigger", post(routes::trigger_command))
        .route("/api/status/executions/recent", get(routes::recent_executions))
        .route("/api/status/cache", get(routes::cache_stats))
        .route("/api/status/cache/reset", post(routes::reset_cache_stats))
        .route("/api/config/", get(routes::list_config))
        .route("/api/config/{key}", get(routes::get_config_key).put(routes::put_config_key))
        .route("/api/config/validate/", post(routes::validate_config))
        .route("/api/config/refresh/", post(routes::refresh_config))
        .route("/api/config/test-connectivity", post(routes::test_connectivity))
        .route("/import_lists/metrics", get(routes::import_list_metrics))
        .route("/import_lists/{name}", get(routes::import_list))
        .route("/api/new-releases", get(routes::new_releases))
        .route("/ws", get(websocket::ws_handler))
        .layer(GovernorLayer::new(governor_config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = make_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "starting HTTP/WebSocket server");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
