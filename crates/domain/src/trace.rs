use serde::Serialize;

/// Structured trace events emitted across the shadow-writing pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    KeyAcquired {
        provider: String,
        key_id: String,
    },
    KeyMarkedFailed {
        provider: String,
        key_id: String,
        kind: String,
        cooldown_secs: f64,
        consecutive_failures: u32,
    },
    KeyInvalidated {
        provider: String,
        key_id: String,
        reason: String,
    },
    KeysExhausted {
        provider: String,
    },
    LlmCallAttempt {
        provider: String,
        model: String,
        purpose: String,
        duration_ms: u64,
        outcome: &'static str,
    },
    ChunkStateTransition {
        task_id: String,
        chunk_id: u32,
        from: String,
        to: String,
    },
    ChunkFailed {
        task_id: String,
        chunk_id: u32,
        reason: String,
    },
    TaskStatusChanged {
        task_id: String,
        status: String,
    },
    EventPublished {
        task_id: String,
        event_id: String,
        event_type: String,
    },
    SseSubscribed {
        task_id: String,
        last_event_id: Option<String>,
    },
    SseResumed {
        task_id: String,
        replayed: usize,
    },
    SseDisconnected {
        task_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sw_event");
    }
}
