//! Process-global key health/usage dashboard (C2): a read-only aggregator
//! over every provider's [`crate::key_pool::KeyPool`], exposed to the
//! `/keys` admin route. Never blocks the Key Pool or the LLM Client —
//! it only ever reads snapshots they already maintain.

use crate::key_pool::{KeyPool, KeySnapshot};
use std::sync::Arc;
use std::time::Instant;

/// Aggregate counts across every key of every registered provider.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MonitorSummary {
    pub total_keys: usize,
    pub healthy_keys: usize,
    pub cooling_keys: usize,
    pub invalid_keys: usize,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rate_limit_hits: u64,
    pub avg_success_rate: f64,
    pub uptime_seconds: u64,
}

/// Aggregates [`KeyPool`]s registered at startup, one per configured
/// provider, into process-wide health views.
pub struct Monitor {
    pools: Vec<Arc<KeyPool>>,
    started_at: Instant,
}

impl Monitor {
    pub fn new(pools: Vec<Arc<KeyPool>>) -> Self {
        Self {
            pools,
            started_at: Instant::now(),
        }
    }

    fn all_snapshots(&self) -> Vec<KeySnapshot> {
        self.pools.iter().flat_map(|p| p.snapshot()).collect()
    }

    pub fn summary(&self) -> MonitorSummary {
        let snaps = self.all_snapshots();
        let total_keys = snaps.len();
        let invalid_keys = snaps.iter().filter(|k| !k.valid).count();
        let cooling_keys = snaps.iter().filter(|k| k.valid && k.cooling).count();
        let healthy_keys = total_keys - invalid_keys - cooling_keys;
        let total_calls: u64 = snaps.iter().map(|k| k.total_calls).sum();
        let successful_calls: u64 = snaps.iter().map(|k| k.successful_calls).sum();
        let failed_calls: u64 = snaps.iter().map(|k| k.failed_calls).sum();
        let rate_limit_hits: u64 = snaps.iter().map(|k| k.rate_limit_hits).sum();
        let avg_success_rate = if total_calls > 0 {
            successful_calls as f64 / total_calls as f64
        } else {
            0.0
        };

        MonitorSummary {
            total_keys,
            healthy_keys,
            cooling_keys,
            invalid_keys,
            total_calls,
            successful_calls,
            failed_calls,
            rate_limit_hits,
            avg_success_rate,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    pub fn healthy_keys(&self) -> Vec<KeySnapshot> {
        self.all_snapshots()
            .into_iter()
            .filter(|k| k.valid && !k.cooling)
            .collect()
    }

    pub fn invalid_keys(&self) -> Vec<KeySnapshot> {
        self.all_snapshots().into_iter().filter(|k| !k.valid).collect()
    }

    pub fn top_by_success(&self, n: usize) -> Vec<KeySnapshot> {
        let mut snaps = self.all_snapshots();
        snaps.sort_by(|a, b| b.successful_calls.cmp(&a.successful_calls));
        snaps.truncate(n);
        snaps
    }

    pub fn top_by_usage(&self, n: usize) -> Vec<KeySnapshot> {
        let mut snaps = self.all_snapshots();
        snaps.sort_by(|a, b| b.total_calls.cmp(&a.total_calls));
        snaps.truncate(n);
        snaps
    }

    pub fn key_detail(&self, key_id: &str) -> Option<KeySnapshot> {
        self.all_snapshots().into_iter().find(|k| k.id == key_id)
    }

    /// Per-provider readiness: `true` iff at least one of its keys is
    /// still valid (not permanently invalidated). Used by `/ready`
    /// (§4.10 step 7, §6); cooling keys still count as ready since
    /// cooldowns are temporary.
    pub fn ready_by_provider(&self) -> std::collections::HashMap<String, bool> {
        let mut ready = std::collections::HashMap::new();
        for pool in &self.pools {
            let has_valid_key = pool.snapshot().iter().any(|k| k.valid);
            ready.insert(pool.provider().to_string(), has_valid_key);
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_domain::config::CooldownConfig;

    fn cooldown() -> CooldownConfig {
        CooldownConfig {
            rate_limit_base_seconds: 1.0,
            transient_base_seconds: 5.0,
            cap_seconds: 60.0,
        }
    }

    #[test]
    fn summary_counts_keys_across_providers() {
        let a = Arc::new(KeyPool::new("openai", vec!["sk-a".into()], cooldown()));
        let b = Arc::new(KeyPool::new(
            "anthropic",
            vec!["sk-b1".into(), "sk-b2".into()],
            cooldown(),
        ));
        let monitor = Monitor::new(vec![a, b]);
        let summary = monitor.summary();
        assert_eq!(summary.total_keys, 3);
        assert_eq!(summary.healthy_keys, 3);
        assert_eq!(summary.invalid_keys, 0);
    }

    #[test]
    fn invalid_keys_are_excluded_from_healthy_view() {
        let pool = Arc::new(KeyPool::new("openai", vec!["sk-a".into()], cooldown()));
        pool.invalidate("openai-0", "test".into());
        let monitor = Monitor::new(vec![pool]);
        assert!(monitor.healthy_keys().is_empty());
        assert_eq!(monitor.invalid_keys().len(), 1);
    }

    #[test]
    fn key_detail_finds_by_id() {
        let pool = Arc::new(KeyPool::new("openai", vec!["sk-a".into()], cooldown()));
        let monitor = Monitor::new(vec![pool]);
        assert!(monitor.key_detail("openai-0").is_some());
        assert!(monitor.key_detail("does-not-exist").is_none());
    }

    #[test]
    fn top_by_usage_truncates_and_sorts() {
        let pool = Arc::new(KeyPool::new(
            "openai",
            vec!["sk-a".into(), "sk-b".into()],
            cooldown(),
        ));
        pool.mark_success("openai-1", std::time::Duration::from_millis(10), None);
        pool.mark_success("openai-1", std::time::Duration::from_millis(10), None);
        let monitor = Monitor::new(vec![pool]);
        let top = monitor.top_by_usage(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, "openai-1");
    }
}
