//! Shared handler state. Much smaller than a general-purpose agent
//! gateway's `AppState` — this process has exactly one job, so its
//! state is the Key Pool's Monitor, the LLM Client, the Task Store, the
//! Event Bus, and the cancel map that ties task deletion to in-flight
//! Orchestrator runs.

use std::sync::Arc;

use sw_domain::config::Config;
use sw_providers::{LlmClient, Monitor};

use crate::runtime::{CancelMap, EventBus, TaskStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<LlmClient>,
    pub monitor: Arc<Monitor>,
    pub tasks: Arc<TaskStore>,
    pub events: Arc<EventBus>,
    pub cancels: Arc<CancelMap>,
    /// SHA-256 digest of the configured bearer token. `None` means no
    /// token is configured and `/tasks*` and `/keys` run unauthenticated.
    pub api_token_hash: Option<Vec<u8>>,
}
