//! Stream Endpoint (C9): `GET /progress/{id}` — SSE progress replay and
//! live tail for one task (§4.9, §6).

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use sw_domain::model::EventType;
use sw_domain::trace::TraceEvent;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub last_event_id: Option<String>,
}

fn last_event_id(headers: &HeaderMap, query: &StreamQuery) -> Option<String> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.last_event_id.clone())
}

pub async fn progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if state.tasks.get(&task_id).ok().flatten().is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("task {task_id} not found") })),
        )
            .into_response();
    }

    let resume_from = last_event_id(&headers, &query);
    TraceEvent::SseSubscribed {
        task_id: task_id.clone(),
        last_event_id: resume_from.clone(),
    }
    .emit();

    let heartbeat = Duration::from_secs(state.config.sse.heartbeat_seconds);
    let poll_interval = Duration::from_millis(100);
    let events = state.events.clone();

    let stream = async_stream::stream! {
        yield Ok::<_, std::convert::Infallible>(
            SseEvent::default().event("connected").data(json!({ "task_id": task_id }).to_string()),
        );

        let mut replayed = 0usize;
        let mut last_sent_id = resume_from.clone();
        for event in events.fetch(&task_id, resume_from.as_deref()) {
            last_sent_id = Some(event.id.clone());
            replayed += 1;
            let is_terminal = event.event_type.is_terminal();
            yield Ok(to_sse_event(&event.id, &event.event_type, &event.payload));
            if is_terminal {
                TraceEvent::SseDisconnected { task_id: task_id.clone() }.emit();
                return;
            }
        }
        if replayed > 0 {
            TraceEvent::SseResumed { task_id: task_id.clone(), replayed }.emit();
        }

        let mut since_heartbeat = Duration::ZERO;
        loop {
            tokio::time::sleep(poll_interval).await;
            since_heartbeat += poll_interval;

            if let Some(latest) = events.latest(&task_id) {
                let is_newer = last_sent_id.as_deref().map(|id| latest.id.as_str() > id).unwrap_or(true);
                if is_newer {
                    last_sent_id = Some(latest.id.clone());
                    since_heartbeat = Duration::ZERO;
                    let is_terminal = latest.event_type.is_terminal();
                    yield Ok(to_sse_event(&latest.id, &latest.event_type, &latest.payload));
                    if is_terminal {
                        TraceEvent::SseDisconnected { task_id: task_id.clone() }.emit();
                        return;
                    }
                }
            }

            if since_heartbeat >= heartbeat {
                since_heartbeat = Duration::ZERO;
                yield Ok(SseEvent::default().event("heartbeat").data("{}"));
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn to_sse_event(id: &str, event_type: &EventType, payload: &serde_json::Value) -> SseEvent {
    let type_str = serde_json::to_value(event_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "progress".to_string());
    SseEvent::default().id(id).event(type_str).data(payload.to_string())
}
