//! `AppState` construction and background-task spawning extracted from
//! `main.rs` so the `serve` and `doctor` commands share one boot path
//! (§4.10).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use sw_domain::config::{Config, ConfigSeverity};
use sw_providers::{LlmClient, Monitor};

use crate::runtime::{CancelMap, EventBus, TaskStore};
use crate::state::AppState;

/// Validate config and initialize every subsystem, returning a fully
/// wired [`AppState`]. Shared by `serve` and `doctor`.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── Key Pool + LLM Client (C1, C3) ───────────────────────────────
    let stage_timeout = Duration::from_secs(config.task.stage_timeout_seconds);
    let (llm, pools) =
        LlmClient::from_config(&config.llm, stage_timeout).context("initializing LLM providers")?;
    let llm = Arc::new(llm);

    // ── Cold-start key health check (§4.1, §4.10 step 3) ─────────────
    // Probes every configured key with a minimal prompt and permanently
    // invalidates any that come back organization_restricted/invalid/
    // unauthorized/forbidden/disabled, before the gateway serves traffic.
    llm.health_check().await;

    // ── Monitor (C2) with post-probe readiness ────────────────────────
    let monitor = Arc::new(Monitor::new(pools));
    for (provider, ready) in monitor.ready_by_provider() {
        if ready {
            tracing::info!(provider = %provider, "provider has valid keys");
        } else {
            tracing::warn!(provider = %provider, "provider has no valid keys after cold-start check");
        }
    }

    // ── Task Store (C7) ───────────────────────────────────────────────
    let tasks = Arc::new(TaskStore::open(&config.store.database_path).context("opening task store")?);
    tracing::info!(path = %config.store.database_path, "task store ready");

    // ── Event Bus (C8) ─────────────────────────────────────────────────
    let events = Arc::new(EventBus::new(config.sse.max_messages_per_task));
    tracing::info!(max_per_task = config.sse.max_messages_per_task, "event bus ready");

    // ── Cancel map ─────────────────────────────────────────────────────
    let cancels = Arc::new(CancelMap::new());

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = match &config.server.auth_token_env {
        Some(env_var) => match std::env::var(env_var) {
            Ok(token) if !token.is_empty() => {
                tracing::info!(env_var = %env_var, "API bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            _ => {
                tracing::warn!(env_var = %env_var, "auth_token_env set but empty/unset — auth DISABLED");
                None
            }
        },
        None => {
            tracing::warn!("no server.auth_token_env configured — /tasks and /keys are unauthenticated");
            None
        }
    };

    Ok(AppState {
        config,
        llm,
        monitor,
        tasks,
        events,
        cancels,
        api_token_hash,
    })
}

/// Spawn the long-running background tokio tasks: Event Bus GC and
/// Task Store stale-task eviction (§4.7, §4.8).
pub fn spawn_background_tasks(state: &AppState) {
    {
        let events = state.events.clone();
        let ttl = Duration::from_secs(state.config.sse.ttl_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let evicted = events.gc(ttl);
                if evicted > 0 {
                    tracing::debug!(evicted, "event bus GC");
                }
            }
        });
    }

    {
        let tasks = state.tasks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                match tasks.evict_stale(chrono::Duration::hours(1)) {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(removed = n, "evicted stale completed/failed tasks"),
                    Err(e) => tracing::warn!(error = %e, "stale task eviction failed"),
                }
            }
        });
    }

    tracing::info!("background tasks spawned");
}
