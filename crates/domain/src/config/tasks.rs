use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkConfig {
    #[serde(default = "d_150")]
    pub min: usize,
    #[serde(default = "d_250")]
    pub max: usize,
    #[serde(default = "d_200")]
    pub target: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min: d_150(),
            max: d_250(),
            target: d_200(),
        }
    }
}

fn d_150() -> usize {
    150
}
fn d_250() -> usize {
    250
}
fn d_200() -> usize {
    200
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Concurrency
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Orchestrator (C6) fan-out bound: how many chunks may be in flight
/// (any non-terminal FSM stage) per task at once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "d_max_outbound")]
    pub max_outbound: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_outbound: d_max_outbound(),
        }
    }
}

impl ConcurrencyConfig {
    /// Clamp to a sane range so a bad config can't starve or unbound the pool.
    pub fn clamped(&self) -> Self {
        Self {
            max_outbound: self.max_outbound.clamp(1, 64),
        }
    }
}

fn d_max_outbound() -> usize {
    3
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cooldown
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Base seconds for the two distinct backoff formulas the Key Pool (C1)
/// applies: one for rate-limit responses, one for transient network
/// errors. Both use exponential backoff with jitter, capped at
/// `cap_seconds`. The rate-limit base defaults to 1s so the cooldown
/// escalates 1, 2, 4, ... up to the cap rather than jumping straight to
/// it on the first failure (§4.1, §8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "d_rate_limit_base")]
    pub rate_limit_base_seconds: f64,
    #[serde(default = "d_transient_base")]
    pub transient_base_seconds: f64,
    #[serde(default = "d_cap")]
    pub cap_seconds: f64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            rate_limit_base_seconds: d_rate_limit_base(),
            transient_base_seconds: d_transient_base(),
            cap_seconds: d_cap(),
        }
    }
}

fn d_rate_limit_base() -> f64 {
    1.0
}
fn d_transient_base() -> f64 {
    5.0
}
fn d_cap() -> f64 {
    60.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE (Event Bus / Stream Endpoint)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SseConfig {
    #[serde(default = "d_max_messages")]
    pub max_messages_per_task: usize,
    #[serde(default = "d_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "d_heartbeat")]
    pub heartbeat_seconds: u64,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            max_messages_per_task: d_max_messages(),
            ttl_seconds: d_ttl(),
            heartbeat_seconds: d_heartbeat(),
        }
    }
}

fn d_max_messages() -> usize {
    100
}
fn d_ttl() -> u64 {
    300
}
fn d_heartbeat() -> u64 {
    15
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task timeouts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "d_stage_timeout")]
    pub stage_timeout_seconds: u64,
    #[serde(default = "d_overall_timeout")]
    pub overall_timeout_seconds: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            stage_timeout_seconds: d_stage_timeout(),
            overall_timeout_seconds: d_overall_timeout(),
        }
    }
}

fn d_stage_timeout() -> u64 {
    120
}
fn d_overall_timeout() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_config_defaults_match_target_window() {
        let cfg = ChunkConfig::default();
        assert_eq!((cfg.min, cfg.max, cfg.target), (150, 250, 200));
    }

    #[test]
    fn concurrency_clamp_below_min() {
        let cfg = ConcurrencyConfig { max_outbound: 0 };
        assert_eq!(cfg.clamped().max_outbound, 1);
    }

    #[test]
    fn concurrency_clamp_above_max() {
        let cfg = ConcurrencyConfig { max_outbound: 1000 };
        assert_eq!(cfg.clamped().max_outbound, 64);
    }

    #[test]
    fn sse_defaults() {
        let cfg = SseConfig::default();
        assert_eq!(cfg.max_messages_per_task, 100);
        assert_eq!(cfg.ttl_seconds, 300);
        assert_eq!(cfg.heartbeat_seconds, 15);
    }

    #[test]
    fn task_timeout_defaults() {
        let cfg = TaskConfig::default();
        assert_eq!(cfg.stage_timeout_seconds, 120);
        assert_eq!(cfg.overall_timeout_seconds, 600);
    }
}
