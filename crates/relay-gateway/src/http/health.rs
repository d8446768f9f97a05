use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::json;

use crate::app::AppState;

/// GET /health — liveness plus a couple of cheap gauges.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.presence.connection_count(),
    }))
}
