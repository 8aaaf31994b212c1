pub mod auth;
pub mod health;
pub mod keys;
pub mod stream;
pub mod tasks;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required, for load-balancer
/// and orchestrator probes) and **protected** (gated behind the
/// `SW_API_TOKEN` bearer-token middleware, §4.10 step 6).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready));

    let protected = Router::new()
        .route("/tasks", post(tasks::create_task))
        .route("/tasks/batch", post(tasks::create_tasks_batch))
        .route("/tasks/:id", get(tasks::get_task))
        .route("/tasks/:id", delete(tasks::delete_task))
        .route("/progress/:id", get(stream::progress))
        .route("/keys", get(keys::list_keys))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
