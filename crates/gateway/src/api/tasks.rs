//! `/tasks` endpoints (§6): create from an uploaded transcript, create a
//! batch from URLs, fetch, and delete. Processing itself runs in a
//! background task so the HTTP response returns as soon as the task is
//! recorded in the Task Store.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::runtime::{run_task, task_runner::run_task_from_url};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BatchCreateRequest {
    pub urls: Vec<String>,
}

/// `POST /tasks` — multipart upload with a `transcript` field holding
/// the raw text.
pub async fn create_task(State(state): State<AppState>, mut multipart: Multipart) -> impl IntoResponse {
    let mut transcript = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("malformed multipart body: {e}") })),
                )
                    .into_response();
            }
        };
        if field.name() == Some("transcript") {
            transcript = field.text().await.ok();
        }
    }

    let Some(transcript) = transcript.filter(|t| !t.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing or empty 'transcript' field" })),
        )
            .into_response();
    };

    let task_id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = state.tasks.create(&task_id) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response();
    }

    tokio::spawn(run_task(state, task_id.clone(), transcript));
    (StatusCode::ACCEPTED, Json(json!({ "task_id": task_id }))).into_response()
}

/// `POST /tasks/batch` — one task per URL; transcripts are fetched
/// individually, so one bad URL doesn't block the others.
pub async fn create_tasks_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchCreateRequest>,
) -> impl IntoResponse {
    if body.urls.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "'urls' must contain at least one entry" })),
        )
            .into_response();
    }

    let mut task_ids = Vec::with_capacity(body.urls.len());
    for url in body.urls {
        let task_id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = state.tasks.create(&task_id) {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
        tokio::spawn(run_task_from_url(state.clone(), task_id.clone(), url));
        task_ids.push(task_id);
    }
    (StatusCode::ACCEPTED, Json(json!({ "task_ids": task_ids }))).into_response()
}

/// `GET /tasks/{id}`
pub async fn get_task(State(state): State<AppState>, Path(task_id): Path<String>) -> impl IntoResponse {
    match state.tasks.get(&task_id) {
        Ok(Some(task)) => Json(task).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("task {task_id} not found") })),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

/// `DELETE /tasks/{id}` — signals cancellation for an in-flight task
/// (observed at the next suspension point) and removes its record.
pub async fn delete_task(State(state): State<AppState>, Path(task_id): Path<String>) -> impl IntoResponse {
    state.cancels.cancel(&task_id);
    match state.tasks.delete(&task_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}
