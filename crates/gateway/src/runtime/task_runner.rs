//! Glues the Orchestrator (C6) to the Task Store (C7) and Event Bus
//! (C8): translates each [`sw_pipeline::ProgressSink`] emission into the
//! matching Task Store write, and drives a task from `Pending` through
//! to `Completed`/`Failed` (§4.6, §4.7, §7).

use async_trait::async_trait;
use std::sync::Arc;
use sw_domain::error::Error;
use sw_domain::model::{EventType, TaskStatus};
use sw_pipeline::ProgressSink;

use crate::runtime::{EventBus, TaskPatch, TaskStore};
use crate::state::AppState;

struct GatewayProgressSink {
    task_id: String,
    tasks: Arc<TaskStore>,
    events: Arc<EventBus>,
}

#[async_trait]
impl ProgressSink for GatewayProgressSink {
    async fn emit(&self, event_type: EventType, payload: serde_json::Value) {
        self.events.publish(&self.task_id, event_type, payload.clone());

        let patch = match event_type {
            EventType::SemanticChunksCompleted => {
                if let Some(total) = payload.get("total_chunks").and_then(|v| v.as_u64()) {
                    let _ = self.tasks.update_chunks_info(&self.task_id, total as u32, 0);
                }
                Some(TaskPatch {
                    status: Some(TaskStatus::Chunking),
                    current_step: Some("splitting transcript into chunks".into()),
                    ..Default::default()
                })
            }
            EventType::ChunksProcessingStarted => Some(TaskPatch {
                status: Some(TaskStatus::Processing),
                current_step: Some("generating shadow-writing artifacts".into()),
                ..Default::default()
            }),
            EventType::ChunkCompleted => {
                let _ = self.tasks.increment_completed_chunk(&self.task_id);
                None
            }
            EventType::ChunkingCompleted => Some(TaskPatch {
                status: Some(TaskStatus::QualityCheck),
                current_step: Some("finalizing artifacts".into()),
                ..Default::default()
            }),
            _ => None,
        };
        if let Some(patch) = patch {
            let _ = self.tasks.update(&self.task_id, patch);
        }
    }
}

/// Run one task end to end: chunk, fan out via the Orchestrator, and
/// persist the terminal outcome. Intended to be `tokio::spawn`ed by the
/// `POST /tasks` handler so the HTTP response returns immediately with
/// the task id.
pub async fn run_task(state: AppState, task_id: String, transcript: String) {
    let cancel_token = state.cancels.register(&task_id);

    let _ = state.tasks.update(
        &task_id,
        TaskPatch {
            status: Some(TaskStatus::Parsing),
            current_step: Some("parsing transcript".into()),
            ..Default::default()
        },
    );
    state
        .events
        .publish(&task_id, EventType::Started, serde_json::json!({ "task_id": task_id }));

    let sink = Arc::new(GatewayProgressSink {
        task_id: task_id.clone(),
        tasks: state.tasks.clone(),
        events: state.events.clone(),
    });

    if cancel_token.is_cancelled() {
        state.cancels.remove(&task_id);
        return;
    }

    let result = sw_pipeline::run(
        &task_id,
        &transcript,
        state.llm.clone(),
        state.config.chunk,
        state.config.concurrency,
        sink,
        cancel_token.clone(),
    )
    .await;

    match result {
        Ok(outcome) => {
            let artifacts_json = serde_json::to_value(&outcome.artifacts).unwrap_or(serde_json::Value::Null);
            let _ = state.tasks.update(
                &task_id,
                TaskPatch {
                    status: Some(TaskStatus::Completed),
                    current_step: Some("completed".into()),
                    result: Some(serde_json::json!({
                        "artifacts": artifacts_json,
                        "total_chunks": outcome.total_chunks,
                        "failed_chunks": outcome.errors.len(),
                    })),
                    ..Default::default()
                },
            );
            state.events.publish(
                &task_id,
                EventType::Completed,
                serde_json::json!({
                    "total_chunks": outcome.total_chunks,
                    "finalized": outcome.artifacts.len(),
                    "failed": outcome.errors.len(),
                }),
            );
        }
        Err(e) => {
            let message = e.to_string();
            let _ = state.tasks.update(
                &task_id,
                TaskPatch {
                    status: Some(TaskStatus::Failed),
                    current_step: Some("failed".into()),
                    error: Some(message.clone()),
                    ..Default::default()
                },
            );
            state
                .events
                .publish(&task_id, EventType::Failed, serde_json::json!({ "reason": message }));
        }
    }

    state.cancels.remove(&task_id);
}

/// Resolve a `POST /tasks/batch` URL entry to transcript text, then run
/// the same pipeline as [`run_task`]. A fetch failure is a per-task
/// `Failed` outcome, not a process-wide error — sibling URLs in the same
/// batch are unaffected (§7).
pub async fn run_task_from_url(state: AppState, task_id: String, url: String) {
    let _ = state.tasks.update(
        &task_id,
        TaskPatch {
            status: Some(TaskStatus::Parsing),
            current_step: Some(format!("fetching transcript from {url}")),
            ..Default::default()
        },
    );

    match fetch_transcript(&url).await {
        Ok(transcript) => run_task(state, task_id, transcript).await,
        Err(e) => {
            let message = e.to_string();
            let _ = state.tasks.update(
                &task_id,
                TaskPatch {
                    status: Some(TaskStatus::Failed),
                    current_step: Some("failed".into()),
                    error: Some(message.clone()),
                    ..Default::default()
                },
            );
            state
                .events
                .publish(&task_id, EventType::Failed, serde_json::json!({ "reason": message }));
        }
    }
}

async fn fetch_transcript(url: &str) -> sw_domain::error::Result<String> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| Error::Http(format!("fetching {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(Error::Http(format!("{url} returned {}", response.status())));
    }
    response
        .text()
        .await
        .map_err(|e| Error::Http(format!("reading body of {url}: {e}")))
}
