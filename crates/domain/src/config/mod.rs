mod llm;
mod log;
mod server;
mod store;
mod tasks;

pub use llm::*;
pub use log::*;
pub use server::*;
pub use store::*;
pub use tasks::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chunk: ChunkConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub sse: SseConfig,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Never fails fast — every check runs regardless of earlier
    /// failures so a single run reports everything wrong at once.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.providers".into(),
                message: "at least one provider is required".into(),
            });
        }

        for (name, provider) in self.llm.providers.iter() {
            if provider.base_url.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers.{name}.base_url"),
                    message: "base_url must not be empty".into(),
                });
            } else if !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers.{name}.base_url"),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{}\")",
                        provider.base_url
                    ),
                });
            }

            if provider.api_key_envs.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers.{name}.api_key_envs"),
                    message: "at least one env var name is required (keys are never inline)"
                        .into(),
                });
            }
        }

        if !self.llm.purpose_map.contains_key("default") {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.purpose_map".into(),
                message: "missing required \"default\" entry".into(),
            });
        }

        for (purpose, entry) in self.llm.purpose_map.iter() {
            if !self.llm.providers.contains_key(&entry.provider) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.purpose_map.{purpose}.provider"),
                    message: format!(
                        "references unknown provider \"{}\"",
                        entry.provider
                    ),
                });
            }
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }

        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.requests_per_second".into(),
                    message: "requests_per_second must be greater than 0".into(),
                });
            }
            if rl.burst_size == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.burst_size".into(),
                    message: "burst_size must be greater than 0".into(),
                });
            }
        }

        if self.chunk.min == 0 || self.chunk.min >= self.chunk.max {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "chunk.min".into(),
                message: format!(
                    "chunk.min ({}) must be > 0 and < chunk.max ({})",
                    self.chunk.min, self.chunk.max
                ),
            });
        }
        if self.chunk.target < self.chunk.min || self.chunk.target > self.chunk.max {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "chunk.target".into(),
                message: "target falls outside [min, max]".into(),
            });
        }

        if self.server.auth_token_env.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.auth_token_env".into(),
                message: "no auth token configured — /tasks and /keys are unauthenticated".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> Config {
        let mut providers = HashMap::new();
        providers.insert(
            "openai".to_string(),
            ProviderConfig {
                kind: ProviderKind::OpenaiCompat,
                base_url: "https://api.openai.com/v1".into(),
                api_key_envs: vec!["OPENAI_API_KEY".into()],
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
        Config {
            server: ServerConfig {
                port: 3210,
                host: "127.0.0.1".into(),
                auth_token_env: Some("SW_AUTH_TOKEN".into()),
                ..ServerConfig::default()
            },
            llm: LlmConfig {
                providers,
                purpose_map,
                ..LlmConfig::default()
            },
            ..Config::default()
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_has_no_errors() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn server_port_zero_is_error() {
        let mut cfg = valid_config();
        cfg.server.port = 0;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "server.port").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn no_providers_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers.clear();
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "llm.providers").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn provider_invalid_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers.get_mut("openai").unwrap().base_url = "ws://localhost".into();
        let issues = cfg.validate();
        let issue =
            find_issue(&issues, "llm.providers.openai.base_url").expect("expected base_url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn provider_with_no_key_envs_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers.get_mut("openai").unwrap().api_key_envs.clear();
        let issues = cfg.validate();
        assert!(find_issue(&issues, "llm.providers.openai.api_key_envs").is_some());
    }

    #[test]
    fn missing_default_purpose_is_error() {
        let mut cfg = valid_config();
        cfg.llm.purpose_map.clear();
        let issues = cfg.validate();
        assert!(find_issue(&issues, "llm.purpose_map").is_some());
    }

    #[test]
    fn purpose_map_referencing_unknown_provider_is_error() {
        let mut cfg = valid_config();
        cfg.llm.purpose_map.insert(
            "quality".to_string(),
            PurposeConfig {
                provider: "does-not-exist".into(),
                model: None,
                temperature: 0.2,
            },
        );
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.purpose_map.quality.provider")
            .expect("expected unknown-provider error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn cors_wildcard_is_warning() {
        let mut cfg = valid_config();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "server.cors.allowed_origins")
                .unwrap()
                .severity,
            ConfigSeverity::Warning
        );
    }

    #[test]
    fn rate_limit_zero_values_are_errors() {
        let mut cfg = valid_config();
        cfg.server.rate_limit = Some(RateLimitConfig {
            requests_per_second: 0,
            burst_size: 0,
        });
        let issues = cfg.validate();
        assert!(find_issue(&issues, "server.rate_limit.requests_per_second").is_some());
        assert!(find_issue(&issues, "server.rate_limit.burst_size").is_some());
    }

    #[test]
    fn chunk_min_ge_max_is_error() {
        let mut cfg = valid_config();
        cfg.chunk = ChunkConfig {
            min: 300,
            max: 250,
            target: 200,
        };
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "chunk.min").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn missing_auth_token_env_is_warning_not_error() {
        let mut cfg = valid_config();
        cfg.server.auth_token_env = None;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "server.auth_token_env")
                .unwrap()
                .severity,
            ConfigSeverity::Warning
        );
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(
            format!("{err}"),
            "[ERROR] server.port: port must be greater than 0"
        );
    }
}
