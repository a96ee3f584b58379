//! Chat-completion provider over a plain JSON endpoint
//!
//! Speaks the OpenAI-compatible `/chat/completions` shape, which every
//! upstream this service is pointed at exposes. One request per analysis,
//! temperature 0, bounded output.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{parse, prompt, AiVerdict, AnalysisProvider, ProviderError, Result};
use crate::pipeline::request::FilterConfig;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Output token ceiling for the verdict object.
pub const MAX_OUTPUT_TOKENS: u32 = 300;

/// Provider backed by a JSON chat-completion endpoint.
pub struct ChatCompletionProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl ChatCompletionProvider {
    /// Build a provider for one upstream model.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn complete(&self, prompt_text: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt_text}
            ],
            "temperature": 0,
            "max_tokens": MAX_OUTPUT_TOKENS,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(classify_reqwest_error)?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::MalformedResponse("empty choices".to_string()))
    }
}

#[async_trait]
impl AnalysisProvider for ChatCompletionProvider {
    async fn analyze(
        &self,
        text: &str,
        history: &[String],
        config: &FilterConfig,
    ) -> Result<AiVerdict> {
        let prompt_text = prompt::build_prompt(text, history, config);
        let raw = self.complete(&prompt_text).await?;
        Ok(parse::parse_response(&raw))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Map transport errors, distinguishing timeouts.
pub(super) fn classify_reqwest_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Request(error)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = ChatCompletionProvider::new("http://host/v1/", "key", "model-a");
        assert_eq!(provider.base_url, "http://host/v1");
    }

    #[test]
    fn test_response_shape_parses() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": "{}"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].message.content, "{}");
    }
}
