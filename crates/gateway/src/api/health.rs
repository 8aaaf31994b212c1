//! `GET /health` and `GET /ready` (§6) — both unauthenticated so a load
//! balancer or orchestrator can probe them without a token.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Ready iff every configured provider has at least one valid key.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let providers = state.monitor.ready_by_provider();
    let all_ready = !providers.is_empty() && providers.values().all(|v| *v);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": all_ready,
            "providers": providers,
        })),
    )
}
