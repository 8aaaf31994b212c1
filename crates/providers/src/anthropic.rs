//! Anthropic-native adapter.
//!
//! Implements just the single-turn Messages API call the pipeline needs:
//! one user message in, the concatenated text content out.

use crate::traits::{LlmProvider, RateLimitHeaders, RawCompletion};
use crate::util::from_reqwest;
use serde_json::Value;
use std::time::Instant;
use sw_domain::error::{Error, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(base_url: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("reqwest client builds with no custom TLS config");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    fn build_body(&self, prompt: &str, temperature: f64) -> Value {
        serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": temperature,
            "max_tokens": DEFAULT_MAX_TOKENS,
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn call_raw(&self, key: &str, prompt: &str, temperature: f64) -> Result<RawCompletion> {
        let start = Instant::now();
        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&self.build_body(prompt, temperature))
            .send()
            .await
            .map_err(|e| from_reqwest(e, start.elapsed()))?;

        let status = response.status();
        let rate_limit = RateLimitHeaders::from_header_map(response.headers());
        let body: Value = response
            .json()
            .await
            .map_err(|e| from_reqwest(e, start.elapsed()))?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: "anthropic".into(),
                message: format!("{} {}", status.as_u16(), body),
            });
        }

        let text = extract_content(&body)?;
        Ok(RawCompletion { text, rate_limit })
    }

    fn id(&self) -> &str {
        "anthropic"
    }
}

fn extract_content(body: &Value) -> Result<String> {
    let blocks = body
        .get("content")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::Provider {
            provider: "anthropic".into(),
            message: "no content blocks in response".into(),
        })?;

    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        return Err(Error::Provider {
            provider: "anthropic".into(),
            message: "no text content block in response".into(),
        });
    }
    Ok(text)
}
