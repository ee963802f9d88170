use crate::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

/// Liveness probe. Reports whether the upstream key is loaded but does not
/// call the upstream; use `/api/image/ping` for that.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "nestory-frontend",
        "version": env!("CARGO_PKG_VERSION"),
        "imageApiConfigured": state.gateway.is_configured(),
    }))
}
