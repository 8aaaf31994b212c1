use sw_domain::error::Result;

/// A provider-agnostic single-turn completion call (§4.3).
///
/// Every concrete provider adapter (OpenAI-compatible, Anthropic) implements
/// only this one method; the rotation/retry loop in [`crate::llm_client`]
/// composes adapters behind it without special-casing any provider.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send `prompt` authenticated with `key` and return the raw response
    /// text (not yet JSON-parsed) plus any rate-limit headers the provider
    /// supplied. Errors carry enough HTTP context for the caller to
    /// classify them via [`crate::util::classify_status`].
    async fn call_raw(&self, key: &str, prompt: &str, temperature: f64) -> Result<RawCompletion>;

    /// A short identifier for logs and trace events (e.g. "openai", "anthropic").
    fn id(&self) -> &str;
}

/// The raw text plus whatever rate-limit bookkeeping headers were present.
#[derive(Debug, Clone, Default)]
pub struct RawCompletion {
    pub text: String,
    pub rate_limit: RateLimitHeaders,
}

/// Parsed `x-ratelimit-*` response headers (§4.2), left absent when the
/// provider doesn't supply them.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RateLimitHeaders {
    pub limit_requests: Option<u64>,
    pub remaining_requests: Option<u64>,
    pub limit_tokens: Option<u64>,
    pub remaining_tokens: Option<u64>,
    pub reset_requests: Option<String>,
}

impl RateLimitHeaders {
    pub fn from_header_map(headers: &reqwest::header::HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        Self {
            limit_requests: get("x-ratelimit-limit-requests").and_then(|s| s.parse().ok()),
            remaining_requests: get("x-ratelimit-remaining-requests")
                .and_then(|s| s.parse().ok()),
            limit_tokens: get("x-ratelimit-limit-tokens").and_then(|s| s.parse().ok()),
            remaining_tokens: get("x-ratelimit-remaining-tokens").and_then(|s| s.parse().ok()),
            reset_requests: get("x-ratelimit-reset-requests"),
        }
    }
}
