//! Shared utility functions for provider adapters: error classification,
//! HTTP→domain error mapping, and lenient JSON repair.

use sw_domain::error::Error;

/// How the Key Pool (C1) should react to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimit,
    TransientNetwork,
    Other,
}

/// Convert a [`reqwest::Error`] into the domain [`Error`] type, given how
/// long the caller had been waiting when it failed.
pub fn from_reqwest(e: reqwest::Error, elapsed: std::time::Duration) -> Error {
    if e.is_timeout() {
        Error::Timeout(elapsed)
    } else {
        Error::Http(e.to_string())
    }
}

/// Classify an HTTP status + body combination for the Key Pool's cooldown
/// and invalidation logic (§4.1).
pub fn classify_status(status: u16, body: &str) -> ErrorClass {
    let lower = body.to_ascii_lowercase();
    if status == 429 || lower.contains("rate limit") || lower.contains("rate_limit") {
        return ErrorClass::RateLimit;
    }
    if (500..600).contains(&status) {
        return ErrorClass::TransientNetwork;
    }
    ErrorClass::Other
}

/// Classify an already-mapped domain [`Error`] the same way
/// [`classify_status`] would, for call sites that only have the error and
/// not the original status code (the retry loop in [`crate::llm_client`]).
pub fn classify_error(err: &Error) -> ErrorClass {
    match err {
        Error::Timeout(_) => ErrorClass::TransientNetwork,
        Error::Http(_) => ErrorClass::TransientNetwork,
        Error::Provider { message, .. } => {
            let m = message.to_ascii_lowercase();
            if m.contains("429") || m.contains("rate limit") {
                ErrorClass::RateLimit
            } else if ["500", "502", "503", "504", "529"].iter().any(|c| m.contains(c)) {
                ErrorClass::TransientNetwork
            } else {
                ErrorClass::Other
            }
        }
        _ => ErrorClass::Other,
    }
}

/// Health-check error reasons that mean a key should be permanently
/// invalidated rather than merely cooled down (§4.1 cold-start check).
pub fn is_permanent_invalidation(status: u16, body: &str) -> bool {
    if matches!(status, 401 | 403) {
        return true;
    }
    let lower = body.to_ascii_lowercase();
    [
        "organization_restricted",
        "invalid_api_key",
        "unauthorized",
        "forbidden",
        "account_disabled",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Split a mapped provider error back into `(status, body)` for call
/// sites, like the cold-start health check in [`crate::key_pool`], that
/// only have the [`Error`] and not the original [`reqwest::Response`].
/// The adapters in [`crate::openai_compat`] and [`crate::anthropic`]
/// format non-2xx responses as `Error::Provider { message: "{status} {body}", .. }`,
/// so this is the inverse of that formatting. Returns `None` for errors
/// with no HTTP status (timeouts, transport errors).
pub fn provider_error_parts(err: &Error) -> Option<(u16, String)> {
    let Error::Provider { message, .. } = err else {
        return None;
    };
    let mut parts = message.splitn(2, ' ');
    let status: u16 = parts.next()?.parse().ok()?;
    let body = parts.next().unwrap_or_default().to_string();
    Some((status, body))
}

/// Parse a provider's content string as JSON, tolerating the misbehaviors
/// LLMs are known to produce: trailing commas, single-quoted strings, and
/// a fenced ```json code block wrapper. Returns the repaired [`serde_json::Value`].
pub fn lenient_json_parse(raw: &str) -> Result<serde_json::Value, Error> {
    let trimmed = strip_code_fence(raw.trim());

    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }

    let repaired = repair_json_text(trimmed);
    serde_json::from_str(&repaired)
        .map_err(|e| Error::Content(format!("unrecoverable JSON: {e} (raw: {trimmed})")))
}

fn strip_code_fence(s: &str) -> &str {
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

/// Remove trailing commas before `}`/`]` and normalize single-quoted
/// strings to double-quoted. This is a best-effort textual repair, not a
/// parser — it runs only after a strict parse has already failed.
fn repair_json_text(s: &str) -> String {
    let no_trailing_commas = remove_trailing_commas(s);
    requote_single_quotes(&no_trailing_commas)
}

fn remove_trailing_commas(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn requote_single_quotes(s: &str) -> String {
    if !s.contains('\'') || s.contains('"') {
        return s.to_string();
    }
    s.replace('\'', "\"")
}

/// Normalize a parsed result into an object, per §4.3's shape rule: arrays
/// take their first element, non-object scalars are wrapped as `{raw: v}`.
pub fn normalize_to_object(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.remove(0),
        serde_json::Value::Object(_) => value,
        other => serde_json::json!({ "raw": other }),
    }
}

/// Resolve provider API keys: each entry of `env_names` is an environment
/// variable name; every named variable must be set and non-empty.
pub fn resolve_env_keys(env_names: &[String]) -> Result<Vec<String>, Error> {
    if env_names.is_empty() {
        return Err(Error::Config(
            "no api_key_envs configured for provider".into(),
        ));
    }
    env_names
        .iter()
        .map(|name| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::Auth(format!("environment variable '{name}' not set")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_429_as_rate_limit() {
        assert_eq!(classify_status(429, ""), ErrorClass::RateLimit);
    }

    #[test]
    fn classify_5xx_as_transient() {
        assert_eq!(classify_status(503, ""), ErrorClass::TransientNetwork);
    }

    #[test]
    fn classify_400_as_other() {
        assert_eq!(classify_status(400, "bad request"), ErrorClass::Other);
    }

    #[test]
    fn classify_error_maps_timeout_to_transient() {
        assert_eq!(
            classify_error(&Error::Timeout(std::time::Duration::from_secs(1))),
            ErrorClass::TransientNetwork
        );
    }

    #[test]
    fn classify_error_maps_provider_429_to_rate_limit() {
        let err = Error::Provider {
            provider: "openai".into(),
            message: "429 Too Many Requests".into(),
        };
        assert_eq!(classify_error(&err), ErrorClass::RateLimit);
    }

    #[test]
    fn permanent_invalidation_on_401() {
        assert!(is_permanent_invalidation(401, ""));
    }

    #[test]
    fn permanent_invalidation_on_body_keyword() {
        assert!(is_permanent_invalidation(
            400,
            "error: invalid_api_key provided"
        ));
    }

    #[test]
    fn transient_5xx_is_not_permanent() {
        assert!(!is_permanent_invalidation(503, "service unavailable"));
    }

    #[test]
    fn provider_error_parts_splits_status_and_body() {
        let err = Error::Provider {
            provider: "openai".into(),
            message: "401 {\"error\":\"invalid_api_key\"}".into(),
        };
        let (status, body) = provider_error_parts(&err).unwrap();
        assert_eq!(status, 401);
        assert!(body.contains("invalid_api_key"));
    }

    #[test]
    fn provider_error_parts_none_for_non_http_errors() {
        assert!(provider_error_parts(&Error::Timeout(std::time::Duration::from_secs(1))).is_none());
    }

    #[test]
    fn lenient_parse_handles_trailing_comma() {
        let raw = r#"{"original": "a", "imitation": "b",}"#;
        let v = lenient_json_parse(raw).unwrap();
        assert_eq!(v["original"], "a");
    }

    #[test]
    fn lenient_parse_strips_code_fence() {
        let raw = "```json\n{\"a\": 1}\n```";
        let v = lenient_json_parse(raw).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn lenient_parse_fails_on_garbage() {
        assert!(lenient_json_parse("not json at all").is_err());
    }

    #[test]
    fn normalize_array_takes_first() {
        let v = serde_json::json!([{"a": 1}, {"a": 2}]);
        assert_eq!(normalize_to_object(v), serde_json::json!({"a": 1}));
    }

    #[test]
    fn normalize_scalar_wraps_as_raw() {
        let v = serde_json::json!(42);
        assert_eq!(normalize_to_object(v), serde_json::json!({"raw": 42}));
    }

    #[test]
    fn resolve_env_keys_reads_each_var() {
        std::env::set_var("SW_TEST_KEY_A", "a-secret");
        std::env::set_var("SW_TEST_KEY_B", "b-secret");
        let keys =
            resolve_env_keys(&["SW_TEST_KEY_A".into(), "SW_TEST_KEY_B".into()]).unwrap();
        assert_eq!(keys, vec!["a-secret", "b-secret"]);
        std::env::remove_var("SW_TEST_KEY_A");
        std::env::remove_var("SW_TEST_KEY_B");
    }

    #[test]
    fn resolve_env_keys_missing_var_errors() {
        let err = resolve_env_keys(&["SW_TEST_NOT_SET_XYZ".into()]).unwrap_err();
        assert!(err.to_string().contains("SW_TEST_NOT_SET_XYZ"));
    }
}
