//! Orchestrator (C6): fans a chunked transcript out across bounded
//! concurrent workers and multiplexes their terminal states into the
//! ordered progress-event stream (§4.6).

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use sw_domain::cancel::CancelToken;
use sw_domain::config::{ChunkConfig, ConcurrencyConfig};
use sw_domain::error::{Error, Result};
use sw_domain::model::{ChunkState, EventType, ShadowArtifact};
use tokio::sync::Semaphore;

use crate::chunk_pipeline::process_chunk;
use crate::chunker::chunk_transcript;

/// Bridge from the Orchestrator to the gateway's event bus / SSE layer.
/// The pipeline crate has no opinion on how an event reaches a client;
/// it only needs somewhere to publish one.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event_type: EventType, payload: serde_json::Value);
}

pub struct OrchestratorResult {
    pub artifacts: Vec<ShadowArtifact>,
    pub errors: Vec<String>,
    pub total_chunks: usize,
}

/// Chunk, fan out, and collect. Partial success — some chunks finalized,
/// others failed — is not itself a task failure; only zero finalized
/// artifacts is (§4.6).
pub async fn run(
    task_id: &str,
    transcript: &str,
    llm: Arc<sw_providers::LlmClient>,
    chunk_cfg: ChunkConfig,
    concurrency_cfg: ConcurrencyConfig,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelToken,
) -> Result<OrchestratorResult> {
    let chunks = chunk_transcript(transcript, &chunk_cfg);
    let total = chunks.len();

    sink.emit(
        EventType::SemanticChunksCompleted,
        serde_json::json!({ "total_chunks": total }),
    )
    .await;

    if total == 0 {
        return Err(Error::Other(
            "chunker produced zero chunks from a non-empty transcript".into(),
        ));
    }

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    sink.emit(
        EventType::ChunksProcessingStarted,
        serde_json::json!({ "total_chunks": total }),
    )
    .await;

    let semaphore = Arc::new(Semaphore::new(concurrency_cfg.clamped().max_outbound as usize));
    let completed = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::with_capacity(total);

    for chunk in chunks {
        let semaphore = Arc::clone(&semaphore);
        let llm = Arc::clone(&llm);
        let sink = Arc::clone(&sink);
        let completed = Arc::clone(&completed);
        let task_id = task_id.to_string();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("semaphore is never closed while handles are outstanding");
            let chunk_id = chunk.id;
            let state = if cancel.is_cancelled() {
                ChunkState::Failed("cancelled".into())
            } else {
                process_chunk(&task_id, chunk, &llm, &cancel).await
            };

            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            match &state {
                ChunkState::Finalized(artifact) => {
                    sink.emit(
                        EventType::ChunkCompleted,
                        serde_json::json!({
                            "chunk_id": chunk_id,
                            "status": "finalized",
                            "quality_score": artifact.quality_score,
                            "completed_chunks": done,
                            "total_chunks": total,
                        }),
                    )
                    .await;
                }
                ChunkState::Failed(reason) => {
                    sink.emit(
                        EventType::ChunkCompleted,
                        serde_json::json!({
                            "chunk_id": chunk_id,
                            "status": "failed",
                            "reason": reason,
                            "completed_chunks": done,
                            "total_chunks": total,
                        }),
                    )
                    .await;
                }
                _ => unreachable!("process_chunk always returns a terminal state"),
            }
            state
        }));
    }

    let mut artifacts = Vec::new();
    let mut errors = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(ChunkState::Finalized(artifact)) => artifacts.push(artifact),
            Ok(ChunkState::Failed(reason)) => errors.push(reason),
            Ok(_) => unreachable!("process_chunk always returns a terminal state"),
            Err(join_err) => errors.push(format!("chunk task panicked: {join_err}")),
        }
    }

    sink.emit(
        EventType::ChunkingCompleted,
        serde_json::json!({ "total_chunks": total, "finalized": artifacts.len(), "failed": errors.len() }),
    )
    .await;

    if artifacts.is_empty() {
        return Err(Error::Other(format!(
            "all {total} chunks failed; first error: {}",
            errors.first().cloned().unwrap_or_default()
        )));
    }

    Ok(OrchestratorResult {
        artifacts,
        errors,
        total_chunks: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<EventType>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn emit(&self, event_type: EventType, _payload: serde_json::Value) {
            self.events.lock().unwrap().push(event_type);
        }
    }

    #[tokio::test]
    async fn empty_transcript_is_a_fatal_orchestration_error() {
        let llm_cfg = sw_domain::config::LlmConfig {
            default_timeout_ms: 1000,
            providers: Default::default(),
            purpose_map: Default::default(),
        };
        let (client, _pools) =
            sw_providers::LlmClient::from_config(&llm_cfg, std::time::Duration::from_secs(1))
                .expect("empty config still builds a client with no targets");
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let result = run(
            "task-1",
            "",
            Arc::new(client),
            ChunkConfig {
                min: 150,
                max: 250,
                target: 200,
            },
            ConcurrencyConfig { max_outbound: 3 },
            sink,
            CancelToken::new(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits_before_fan_out() {
        let llm_cfg = sw_domain::config::LlmConfig {
            default_timeout_ms: 1000,
            providers: Default::default(),
            purpose_map: Default::default(),
        };
        let (client, _pools) =
            sw_providers::LlmClient::from_config(&llm_cfg, std::time::Duration::from_secs(1))
                .expect("empty config still builds a client with no targets");
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = run(
            "task-1",
            "a transcript long enough to actually produce a chunk for this test",
            Arc::new(client),
            ChunkConfig {
                min: 10,
                max: 250,
                target: 50,
            },
            ConcurrencyConfig { max_outbound: 3 },
            sink,
            cancel,
        )
        .await;
        assert!(matches!(result.unwrap_err(), Error::Cancelled));
    }
}
