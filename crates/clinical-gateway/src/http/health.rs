use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /healthz — liveness probe.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": if state.is_ready() { "ok" } else { "degraded" },
        "useAdvancedOrchestration": state.config.orchestration.use_advanced_orchestration,
    }))
}
