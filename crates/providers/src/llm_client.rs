//! LLM Client (C3): resolves a call purpose to a provider/model/key pool,
//! then drives the retry-via-key-rotation loop from §4.3 around a single
//! [`LlmProvider`] call.

use crate::anthropic::AnthropicProvider;
use crate::key_pool::KeyPool;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use crate::util;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sw_domain::config::{LlmConfig, ProviderKind};
use sw_domain::error::{Error, Result};
use sw_domain::trace::TraceEvent;

/// A fully resolved destination for one `purpose_map` entry: a live
/// provider adapter bound to its model, the key pool it rotates through,
/// and the sampling temperature to use.
struct PurposeTarget {
    provider_name: String,
    model: String,
    provider: Arc<dyn LlmProvider>,
    key_pool: Arc<KeyPool>,
    temperature: f64,
}

pub struct LlmClient {
    targets: HashMap<String, PurposeTarget>,
    stage_timeout: Duration,
}

impl LlmClient {
    /// Build every configured provider's adapter and key pool, then
    /// resolve each `purpose_map` entry against them. Returns an error if
    /// a purpose references an unknown provider or a provider has no
    /// usable keys — `Config::validate` should already have caught both,
    /// but construction re-checks since it runs after key resolution.
    pub fn from_config(cfg: &LlmConfig, stage_timeout: Duration) -> Result<(Self, Vec<Arc<KeyPool>>)> {
        let cooldown = sw_domain::config::CooldownConfig::default();
        let mut pools = HashMap::new();
        for (name, provider_cfg) in &cfg.providers {
            let secrets = util::resolve_env_keys(&provider_cfg.api_key_envs)?;
            pools.insert(
                name.clone(),
                Arc::new(KeyPool::new(name.clone(), secrets, cooldown)),
            );
        }

        let mut targets = HashMap::new();
        for (purpose, purpose_cfg) in &cfg.purpose_map {
            let provider_cfg = cfg.providers.get(&purpose_cfg.provider).ok_or_else(|| {
                Error::Config(format!(
                    "purpose '{purpose}' references unknown provider '{}'",
                    purpose_cfg.provider
                ))
            })?;
            let key_pool = pools
                .get(&purpose_cfg.provider)
                .expect("pool built for every configured provider")
                .clone();
            let model = purpose_cfg
                .model
                .clone()
                .or_else(|| provider_cfg.default_model.clone())
                .ok_or_else(|| {
                    Error::Config(format!("purpose '{purpose}' has no model configured"))
                })?;
            let provider: Arc<dyn LlmProvider> = match provider_cfg.kind {
                ProviderKind::OpenaiCompat => {
                    Arc::new(OpenAiCompatProvider::new(provider_cfg.base_url.clone(), model.clone()))
                }
                ProviderKind::Anthropic => {
                    Arc::new(AnthropicProvider::new(provider_cfg.base_url.clone(), model.clone()))
                }
            };
            targets.insert(
                purpose.clone(),
                PurposeTarget {
                    provider_name: purpose_cfg.provider.clone(),
                    model,
                    provider,
                    key_pool,
                    temperature: purpose_cfg.temperature,
                },
            );
        }

        let all_pools: Vec<Arc<KeyPool>> = pools.into_values().collect();
        Ok((
            Self {
                targets,
                stage_timeout,
            },
            all_pools,
        ))
    }

    /// Cold-start probe (§4.1, §4.10 step 3): run every distinct
    /// provider's [`KeyPool::health_check`] once before serving traffic.
    /// Providers shared by multiple purposes are only probed once.
    pub async fn health_check(&self) {
        let mut probed = std::collections::HashSet::new();
        for target in self.targets.values() {
            if !probed.insert(target.provider_name.clone()) {
                continue;
            }
            target.key_pool.health_check(target.provider.as_ref()).await;
        }
    }

    /// Issue a prompt under the given logical purpose, returning the
    /// lenient-parsed, object-normalized JSON response (§4.3).
    ///
    /// There is no fixed retry cap: the rotation loop below keeps
    /// reacquiring a key and retrying on any retriable failure until
    /// either every key for the target provider is cooling/invalidated
    /// (`AllKeysExhausted`, surfaced through [`KeyPool::acquire`]) or the
    /// `stage_timeout` deadline wraps the whole call.
    pub async fn call(&self, purpose: &str, prompt: &str) -> Result<serde_json::Value> {
        let target = self
            .targets
            .get(purpose)
            .or_else(|| self.targets.get("default"))
            .ok_or_else(|| Error::Config(format!("no llm target for purpose '{purpose}'")))?;

        tokio::time::timeout(self.stage_timeout, self.call_with_retry(purpose, target, prompt))
            .await
            .map_err(|_| Error::Deadline {
                unit: purpose.to_string(),
            })?
    }

    async fn call_with_retry(
        &self,
        purpose: &str,
        target: &PurposeTarget,
        prompt: &str,
    ) -> Result<serde_json::Value> {
        loop {
            let (key_id, secret) = target.key_pool.acquire().await?;
            let start = Instant::now();
            let outcome = target.provider.call_raw(&secret, prompt, target.temperature).await;
            let elapsed = start.elapsed();

            match outcome {
                Ok(raw) => {
                    target
                        .key_pool
                        .mark_success(&key_id, elapsed, Some(raw.rate_limit));
                    TraceEvent::LlmCallAttempt {
                        provider: target.provider_name.clone(),
                        model: target.model.clone(),
                        purpose: purpose.to_string(),
                        duration_ms: elapsed.as_millis() as u64,
                        outcome: "success",
                    }
                    .emit();
                    let parsed = util::lenient_json_parse(&raw.text)?;
                    return Ok(util::normalize_to_object(parsed));
                }
                Err(err) => {
                    TraceEvent::LlmCallAttempt {
                        provider: target.provider_name.clone(),
                        model: target.model.clone(),
                        purpose: purpose.to_string(),
                        duration_ms: elapsed.as_millis() as u64,
                        outcome: "failure",
                    }
                    .emit();

                    if !err.is_retriable() {
                        target.key_pool.mark_failure(&key_id, util::ErrorClass::Other);
                        return Err(err);
                    }
                    let class = util::classify_error(&err);
                    if !target.key_pool.mark_failure(&key_id, class) {
                        return Err(err);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use sw_domain::config::{ProviderConfig, PurposeConfig};

    fn cfg_with_one_provider() -> LlmConfig {
        std::env::set_var("SW_TEST_LLM_KEY", "sk-test");
        let mut providers = HashMap::new();
        providers.insert(
            "openai".to_string(),
            ProviderConfig {
                kind: ProviderKind::OpenaiCompat,
                base_url: "https://api.openai.com/v1".into(),
                api_key_envs: vec!["SW_TEST_LLM_KEY".into()],
                default_model: Some("gpt-4o-mini".into()),
            },
        );
        let mut purpose_map = HashMap::new();
        purpose_map.insert(
            "default".to_string(),
            PurposeConfig {
                provider: "openai".into(),
                model: None,
                temperature: 0.7,
            },
        );
        LlmConfig {
            providers,
            purpose_map,
            ..LlmConfig::default()
        }
    }

    #[test]
    fn from_config_resolves_default_purpose() {
        let cfg = cfg_with_one_provider();
        let (client, pools) = LlmClient::from_config(&cfg, Duration::from_secs(5)).unwrap();
        assert!(client.targets.contains_key("default"));
        assert_eq!(pools.len(), 1);
        std::env::remove_var("SW_TEST_LLM_KEY");
    }

    #[test]
    fn from_config_rejects_purpose_with_no_model() {
        let mut cfg = cfg_with_one_provider();
        cfg.providers.get_mut("openai").unwrap().default_model = None;
        let err = LlmClient::from_config(&cfg, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        std::env::remove_var("SW_TEST_LLM_KEY");
    }
}
