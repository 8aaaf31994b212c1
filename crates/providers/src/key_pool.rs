//! Per-provider key pool (C1): hands out a usable key, records outcomes,
//! imposes cooldowns, and permanently invalidates keys that keep failing.

use crate::traits::{LlmProvider, RateLimitHeaders};
use crate::util::{self, ErrorClass};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use sw_domain::config::CooldownConfig;
use sw_domain::error::{Error, Result};
use sw_domain::trace::TraceEvent;

const ROLLING_WINDOW_CAP: usize = 50;
const INVALIDATE_CONSECUTIVE_FAILURES: u32 = 10;
const INVALIDATE_FAILURE_RATE: f64 = 0.80;

/// Minimal prompt for the cold-start probe (§4.1) — cheap enough to send
/// once per key at boot without burning a meaningful amount of quota.
const HEALTH_CHECK_PROMPT: &str = "Reply with the single word \"ok\".";

/// One API key and its health/usage state. `secret` is never exposed
/// outside this module except through [`KeyRecord::masked_secret`].
struct KeyRecord {
    id: String,
    secret: String,
    provider: String,
    cooling_until: Option<Instant>,
    consecutive_failures: u32,
    rolling_window: VecDeque<bool>,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rate_limit_hits: u64,
    total_latency_ms: u64,
    valid: bool,
    invalid_reason: Option<String>,
    last_rate_limit: Option<RateLimitHeaders>,
}

impl KeyRecord {
    fn new(id: String, secret: String, provider: String) -> Self {
        Self {
            id,
            secret,
            provider,
            cooling_until: None,
            consecutive_failures: 0,
            rolling_window: VecDeque::with_capacity(ROLLING_WINDOW_CAP),
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rate_limit_hits: 0,
            total_latency_ms: 0,
            valid: true,
            invalid_reason: None,
            last_rate_limit: None,
        }
    }

    fn masked_secret(&self) -> String {
        let tail: String = self
            .secret
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("****{tail}")
    }

    fn is_cooling(&self, now: Instant) -> bool {
        self.cooling_until.is_some_and(|until| now < until)
    }

    fn push_outcome(&mut self, success: bool) {
        if self.rolling_window.len() == ROLLING_WINDOW_CAP {
            self.rolling_window.pop_front();
        }
        self.rolling_window.push_back(success);
    }

    fn failure_rate(&self) -> f64 {
        if self.rolling_window.is_empty() {
            return 0.0;
        }
        let failures = self.rolling_window.iter().filter(|s| !**s).count();
        failures as f64 / self.rolling_window.len() as f64
    }

    fn maybe_invalidate(&mut self) {
        if !self.valid {
            return;
        }
        if self.consecutive_failures >= INVALIDATE_CONSECUTIVE_FAILURES {
            self.invalidate("consecutive_failures >= 10".into());
        } else if self.rolling_window.len() == ROLLING_WINDOW_CAP
            && self.failure_rate() > INVALIDATE_FAILURE_RATE
        {
            self.invalidate("rolling window failure rate > 80%".into());
        }
    }

    fn invalidate(&mut self, reason: String) {
        self.valid = false;
        self.invalid_reason = Some(reason.clone());
        TraceEvent::KeyInvalidated {
            provider: self.provider.clone(),
            key_id: self.id.clone(),
            reason,
        }
        .emit();
    }
}

/// Read-only snapshot of a key's state, safe to log or serialize — the
/// secret never appears, only a masked tail.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KeySnapshot {
    pub id: String,
    pub masked_secret: String,
    pub provider: String,
    pub cooling: bool,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rate_limit_hits: u64,
    pub avg_latency_ms: f64,
    pub valid: bool,
    pub invalid_reason: Option<String>,
    /// Quota remaining as of the last successful call, when the provider
    /// supplies `x-ratelimit-*` headers (§4.2).
    pub last_rate_limit: Option<RateLimitHeaders>,
}

/// Holds every key configured for one provider and hands them out under
/// rotation with cooperative cooldown.
pub struct KeyPool {
    provider: String,
    keys: parking_lot::Mutex<Vec<KeyRecord>>,
    cursor: AtomicUsize,
    cooldown: CooldownConfig,
}

impl KeyPool {
    pub fn new(provider: impl Into<String>, secrets: Vec<String>, cooldown: CooldownConfig) -> Self {
        let provider = provider.into();
        let keys = secrets
            .into_iter()
            .enumerate()
            .map(|(i, secret)| KeyRecord::new(format!("{provider}-{i}"), secret, provider.clone()))
            .collect();
        Self {
            provider,
            keys: parking_lot::Mutex::new(keys),
            cursor: AtomicUsize::new(0),
            cooldown,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Return the next usable `(key_id, secret)` pair, waiting out
    /// cooldowns without holding the lock while it sleeps.
    pub async fn acquire(&self) -> Result<(String, String)> {
        loop {
            let outcome = {
                let keys = self.keys.lock();
                if keys.iter().all(|k| !k.valid) {
                    return Err(Error::AllKeysExhausted {
                        provider: self.provider.clone(),
                    });
                }
                let now = Instant::now();
                let len = keys.len();
                let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
                let mut found = None;
                for offset in 0..len {
                    let idx = (start + offset) % len;
                    let k = &keys[idx];
                    if k.valid && !k.is_cooling(now) {
                        found = Some((k.id.clone(), k.secret.clone()));
                        break;
                    }
                }
                match found {
                    Some(pair) => Ok(pair),
                    None => {
                        let soonest = keys
                            .iter()
                            .filter(|k| k.valid)
                            .filter_map(|k| k.cooling_until)
                            .min();
                        Err(soonest)
                    }
                }
            };

            match outcome {
                Ok((id, secret)) => {
                    TraceEvent::KeyAcquired {
                        provider: self.provider.clone(),
                        key_id: id.clone(),
                    }
                    .emit();
                    return Ok((id, secret));
                }
                Err(Some(until)) => {
                    let wait = until.saturating_duration_since(Instant::now());
                    tokio::time::sleep(wait).await;
                }
                Err(None) => {
                    return Err(Error::AllKeysExhausted {
                        provider: self.provider.clone(),
                    });
                }
            }
        }
    }

    /// Record a successful call.
    pub fn mark_success(&self, key_id: &str, latency: Duration, rate_limit: Option<RateLimitHeaders>) {
        let mut keys = self.keys.lock();
        if let Some(k) = keys.iter_mut().find(|k| k.id == key_id) {
            k.consecutive_failures = 0;
            k.push_outcome(true);
            k.total_calls += 1;
            k.successful_calls += 1;
            k.total_latency_ms += latency.as_millis() as u64;
            if rate_limit.is_some() {
                k.last_rate_limit = rate_limit;
            }
        }
    }

    /// Record a failed call, classify it, and advance cooldown/invalidation
    /// state. Returns `true` if the pool should loop back to `acquire`.
    pub fn mark_failure(&self, key_id: &str, class: ErrorClass) -> bool {
        let mut keys = self.keys.lock();
        let Some(k) = keys.iter_mut().find(|k| k.id == key_id) else {
            return true;
        };
        k.total_calls += 1;
        k.failed_calls += 1;
        k.push_outcome(false);

        match class {
            ErrorClass::RateLimit => {
                k.rate_limit_hits += 1;
                k.consecutive_failures += 1;
                let secs = cooldown_seconds(
                    k.consecutive_failures,
                    self.cooldown.rate_limit_base_seconds,
                    self.cooldown.cap_seconds,
                );
                k.cooling_until = Some(Instant::now() + Duration::from_secs_f64(secs));
                k.maybe_invalidate();
                TraceEvent::KeyMarkedFailed {
                    provider: self.provider.clone(),
                    key_id: k.id.clone(),
                    kind: "rate_limit".into(),
                    cooldown_secs: secs,
                    consecutive_failures: k.consecutive_failures,
                }
                .emit();
                true
            }
            ErrorClass::TransientNetwork => {
                k.consecutive_failures += 1;
                let secs = cooldown_seconds(
                    k.consecutive_failures,
                    self.cooldown.transient_base_seconds,
                    self.cooldown.cap_seconds.min(30.0),
                );
                k.cooling_until = Some(Instant::now() + Duration::from_secs_f64(secs));
                k.maybe_invalidate();
                TraceEvent::KeyMarkedFailed {
                    provider: self.provider.clone(),
                    key_id: k.id.clone(),
                    kind: "transient_network".into(),
                    cooldown_secs: secs,
                    consecutive_failures: k.consecutive_failures,
                }
                .emit();
                true
            }
            ErrorClass::Other => false,
        }
    }

    /// Permanently invalidate a key (cold-start health check, §4.1).
    pub fn invalidate(&self, key_id: &str, reason: String) {
        let mut keys = self.keys.lock();
        if let Some(k) = keys.iter_mut().find(|k| k.id == key_id) {
            k.invalidate(reason);
        }
    }

    /// Cold-start probe (§4.1, §4.10 step 3): call every key once with a
    /// minimal prompt before the pool serves real traffic, permanently
    /// invalidating any that answer with one of the invalidation reasons
    /// `is_permanent_invalidation` recognizes. Bypasses rotation/cooldown
    /// entirely — every key is probed regardless of its current state.
    pub async fn health_check(&self, provider: &dyn LlmProvider) {
        let pairs: Vec<(String, String)> = self
            .keys
            .lock()
            .iter()
            .map(|k| (k.id.clone(), k.secret.clone()))
            .collect();

        for (key_id, secret) in pairs {
            let Err(err) = provider.call_raw(&secret, HEALTH_CHECK_PROMPT, 0.0).await else {
                continue;
            };
            let Some((status, body)) = util::provider_error_parts(&err) else {
                continue;
            };
            if util::is_permanent_invalidation(status, &body) {
                self.invalidate(&key_id, format!("cold-start health check: {status} {body}"));
            }
        }
    }

    pub fn snapshot(&self) -> Vec<KeySnapshot> {
        let now = Instant::now();
        self.keys
            .lock()
            .iter()
            .map(|k| KeySnapshot {
                id: k.id.clone(),
                masked_secret: k.masked_secret(),
                provider: self.provider.clone(),
                cooling: k.is_cooling(now),
                consecutive_failures: k.consecutive_failures,
                total_calls: k.total_calls,
                successful_calls: k.successful_calls,
                failed_calls: k.failed_calls,
                rate_limit_hits: k.rate_limit_hits,
                avg_latency_ms: if k.successful_calls > 0 {
                    k.total_latency_ms as f64 / k.successful_calls as f64
                } else {
                    0.0
                },
                valid: k.valid,
                invalid_reason: k.invalid_reason.clone(),
                last_rate_limit: k.last_rate_limit.clone(),
            })
            .collect()
    }

    pub fn key_ids(&self) -> Vec<String> {
        self.keys.lock().iter().map(|k| k.id.clone()).collect()
    }
}

/// `min(cap, base * 2^(n-1))` seconds with ±25% uniform jitter (§4.1, §8
/// backoff law). `n` is `consecutive_failures`, always ≥ 1 when called.
fn cooldown_seconds(consecutive_failures: u32, base: f64, cap: f64) -> f64 {
    let exp = 2f64.powi(consecutive_failures as i32 - 1);
    let raw = (base * exp).min(cap);
    let jitter = rand::rng().random_range(-0.25..=0.25);
    (raw * (1.0 + jitter)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cooldown() -> CooldownConfig {
        CooldownConfig {
            rate_limit_base_seconds: 1.0,
            transient_base_seconds: 5.0,
            cap_seconds: 60.0,
        }
    }

    #[tokio::test]
    async fn acquire_returns_a_configured_key() {
        let pool = KeyPool::new("openai", vec!["sk-aaaa".into()], cooldown());
        let (id, secret) = pool.acquire().await.unwrap();
        assert_eq!(id, "openai-0");
        assert_eq!(secret, "sk-aaaa");
    }

    #[tokio::test]
    async fn all_keys_invalid_yields_exhausted() {
        let pool = KeyPool::new("openai", vec!["sk-a".into()], cooldown());
        pool.invalidate("openai-0", "test".into());
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::AllKeysExhausted { .. }));
    }

    #[test]
    fn ten_consecutive_failures_invalidates() {
        let pool = KeyPool::new("openai", vec!["sk-a".into()], cooldown());
        for _ in 0..10 {
            pool.mark_failure("openai-0", ErrorClass::Other);
        }
        // Other-class failures don't bump consecutive_failures by design;
        // force it through rate-limit failures instead.
        for _ in 0..10 {
            pool.mark_failure("openai-0", ErrorClass::RateLimit);
        }
        let snap = pool.snapshot();
        assert!(!snap[0].valid);
    }

    #[test]
    fn mark_success_resets_consecutive_failures() {
        let pool = KeyPool::new("openai", vec!["sk-a".into()], cooldown());
        pool.mark_failure("openai-0", ErrorClass::RateLimit);
        pool.mark_success("openai-0", Duration::from_millis(100), None);
        let snap = pool.snapshot();
        assert_eq!(snap[0].consecutive_failures, 0);
    }

    #[test]
    fn masked_secret_never_exposes_full_key() {
        let pool = KeyPool::new("openai", vec!["sk-supersecretvalue".into()], cooldown());
        let snap = pool.snapshot();
        assert!(!snap[0].masked_secret.contains("supersecretvalue"));
        assert!(snap[0].masked_secret.ends_with("alue"));
    }

    #[test]
    fn other_class_failure_does_not_rotate_or_cool() {
        let pool = KeyPool::new("openai", vec!["sk-a".into(), "sk-b".into()], cooldown());
        let should_loop = pool.mark_failure("openai-0", ErrorClass::Other);
        assert!(!should_loop);
        let snap = pool.snapshot();
        assert_eq!(snap[0].consecutive_failures, 0);
    }

    struct FakeProvider {
        /// Status+body to fail every `call_raw` with, or `None` to succeed.
        fail_with: Option<(u16, String)>,
    }

    #[async_trait::async_trait]
    impl LlmProvider for FakeProvider {
        async fn call_raw(
            &self,
            _key: &str,
            _prompt: &str,
            _temperature: f64,
        ) -> Result<crate::traits::RawCompletion> {
            match &self.fail_with {
                Some((status, body)) => Err(Error::Provider {
                    provider: "fake".into(),
                    message: format!("{status} {body}"),
                }),
                None => Ok(crate::traits::RawCompletion::default()),
            }
        }

        fn id(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test]
    async fn health_check_invalidates_on_permanent_reason() {
        let pool = KeyPool::new("openai", vec!["sk-a".into(), "sk-b".into()], cooldown());
        let provider = FakeProvider {
            fail_with: Some((401, "unauthorized".into())),
        };
        pool.health_check(&provider).await;
        let snap = pool.snapshot();
        assert!(snap.iter().all(|k| !k.valid));
    }

    #[tokio::test]
    async fn health_check_leaves_transient_failures_valid() {
        let pool = KeyPool::new("openai", vec!["sk-a".into()], cooldown());
        let provider = FakeProvider {
            fail_with: Some((503, "service unavailable".into())),
        };
        pool.health_check(&provider).await;
        let snap = pool.snapshot();
        assert!(snap[0].valid);
    }

    #[tokio::test]
    async fn health_check_leaves_healthy_keys_valid() {
        let pool = KeyPool::new("openai", vec!["sk-a".into()], cooldown());
        let provider = FakeProvider { fail_with: None };
        pool.health_check(&provider).await;
        let snap = pool.snapshot();
        assert!(snap[0].valid);
    }

    #[test]
    fn backoff_escalates_from_base_then_caps_with_jitter() {
        // n=1: just the base, ±25% jitter.
        let first = cooldown_seconds(1, 1.0, 60.0);
        assert!((0.75..=1.25).contains(&first));
        // n=7: 2^6 = 64 exceeds the 60s cap, so the raw value is clamped
        // to the cap before jitter is applied.
        let capped = cooldown_seconds(7, 1.0, 60.0);
        assert!((60.0 * 0.75..=60.0 * 1.25).contains(&capped));
    }
}
