use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};

use phosaic_proto::Role;

use crate::{config::ServerConfig, metrics::RelayMetrics, router::Router};

#[derive(Clone)]
pub struct AppState {
    pub router: Router,
    pub metrics: Arc<RelayMetrics>,
    pub config: ServerConfig,
    pub shutdown: tokio::sync::watch::Receiver<bool>,
}

// GET / and GET /ws (upgrade)
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if *state.shutdown.borrow() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let max = state.config.max_message_size;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| crate::ws::serve_connection(socket, addr, state))
}

// GET /health
pub async fn get_health(State(state): State<AppState>) -> Response {
    use serde_json::json;

    let registry = state.router.registry();
    let response = json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "subordinates": registry.count(Role::Subordinate),
        "coordinators": registry.count(Role::Coordinator),
    });

    (StatusCode::OK, axum::Json(response)).into_response()
}

// GET /metrics
pub async fn get_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.export_prometheus() {
        Ok(text) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
