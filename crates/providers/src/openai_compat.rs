//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure OpenAI-style, and any other endpoint that
//! follows the OpenAI chat completions contract. Only the single-turn,
//! non-streaming, non-tool-calling shape the pipeline needs is implemented.

use crate::traits::{LlmProvider, RateLimitHeaders, RawCompletion};
use crate::util::from_reqwest;
use serde_json::Value;
use std::time::Instant;
use sw_domain::error::{Error, Result};

pub struct OpenAiCompatProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
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

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body(&self, prompt: &str, temperature: f64) -> Value {
        serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": temperature,
            "response_format": {"type": "json_object"},
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn call_raw(&self, key: &str, prompt: &str, temperature: f64) -> Result<RawCompletion> {
        let start = Instant::now();
        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(key)
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
                provider: "openai_compat".into(),
                message: format!("{} {}", status.as_u16(), body),
            });
        }

        let text = extract_content(&body)?;
        Ok(RawCompletion { text, rate_limit })
    }

    fn id(&self) -> &str {
        "openai_compat"
    }
}

fn extract_content(body: &Value) -> Result<String> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: "openai_compat".into(),
            message: "no choices in response".into(),
        })?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Provider {
            provider: "openai_compat".into(),
            message: "no message content in response".into(),
        })?;

    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_content_reads_first_choice_message() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "{\"original\": \"a\"}"}}]
        });
        assert_eq!(extract_content(&body).unwrap(), "{\"original\": \"a\"}");
    }

    #[test]
    fn extract_content_errors_on_empty_choices() {
        let body = serde_json::json!({"choices": []});
        assert!(extract_content(&body).is_err());
    }

    #[test]
    fn chat_url_strips_trailing_slash() {
        let provider = OpenAiCompatProvider::new("https://api.openai.com/v1/".into(), "gpt-4o-mini".into());
        assert_eq!(provider.chat_url(), "https://api.openai.com/v1/chat/completions");
    }
}
