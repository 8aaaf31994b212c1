//! `GET /keys` (§6): the Monitor's aggregate dashboard view, auth-gated
//! like every other `/tasks*` route.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

pub async fn list_keys(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.monitor.summary();
    Json(json!({
        "summary": summary,
        "healthy": state.monitor.healthy_keys(),
        "invalid": state.monitor.invalid_keys(),
    }))
}
