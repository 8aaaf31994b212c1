use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_20000u")]
    pub default_timeout_ms: u64,
    /// Registered providers, keyed by the name used in `purpose_map`.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Maps a logical call purpose (`generate`, `validate`, `quality`,
    /// `correct`) to the provider/model/temperature that serves it.
    /// Must contain a `"default"` entry.
    #[serde(default)]
    pub purpose_map: HashMap<String, PurposeConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 20_000,
            providers: HashMap::new(),
            purpose_map: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    /// Environment variable names, one per rotation slot. Keys are never
    /// accepted as inline plaintext in config.
    #[serde(default)]
    pub api_key_envs: Vec<String>,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
}

/// Which provider/model/temperature answers a given call purpose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurposeConfig {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "d_temperature")]
    pub temperature: f64,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_20000u() -> u64 {
    20_000
}
fn d_temperature() -> f64 {
    0.7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_config_deserializes_with_key_envs() {
        let json = r#"{
            "kind": "openai_compat",
            "base_url": "https://api.openai.com/v1",
            "api_key_envs": ["OPENAI_API_KEY_1", "OPENAI_API_KEY_2"]
        }"#;
        let cfg: ProviderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.kind, ProviderKind::OpenaiCompat);
        assert_eq!(cfg.api_key_envs.len(), 2);
    }

    #[test]
    fn purpose_config_defaults_temperature() {
        let json = r#"{ "provider": "openai" }"#;
        let cfg: PurposeConfig = serde_json::from_str(json).unwrap();
        assert!((cfg.temperature - 0.7).abs() < 1e-9);
        assert!(cfg.model.is_none());
    }
}
