//! Streaming chat-completion provider
//!
//! Same upstream contract as [`super::chat`], but with `stream: true`. The
//! SSE `data:` chunks are accumulated into the full completion before the
//! shared response parser runs, so both providers produce identical
//! verdicts for identical prompts.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use super::chat::{classify_reqwest_error, DEFAULT_TIMEOUT, MAX_OUTPUT_TOKENS};
use super::{parse, prompt, AiVerdict, AnalysisProvider, ProviderError, Result};
use crate::pipeline::request::FilterConfig;

/// Provider backed by an SSE streaming chat endpoint.
pub struct StreamingChatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl StreamingChatProvider {
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

    /// Override the per-call timeout, which covers the entire stream.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn stream_completion(&self, prompt_text: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt_text}
            ],
            "temperature": 0,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "stream": true,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut content = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify_reqwest_error)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Complete SSE lines end in '\n'; keep any partial tail.
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();

                if data == "[DONE]" {
                    return Ok(content);
                }

                if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
                    for choice in chunk.choices {
                        if let Some(delta) = choice.delta.content {
                            content.push_str(&delta);
                        }
                    }
                }
            }
        }

        Ok(content)
    }
}

#[async_trait]
impl AnalysisProvider for StreamingChatProvider {
    async fn analyze(
        &self,
        text: &str,
        history: &[String],
        config: &FilterConfig,
    ) -> Result<AiVerdict> {
        let prompt_text = prompt::build_prompt(text, history, config);

        let raw = tokio::time::timeout(self.timeout, self.stream_completion(&prompt_text))
            .await
            .map_err(|_| ProviderError::Timeout)??;

        if raw.trim().is_empty() {
            return Err(ProviderError::MalformedResponse(
                "stream produced no content".to_string(),
            ));
        }

        Ok(parse::parse_response(&raw))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_chunk_parses() {
        let raw = r#"{"choices": [{"delta": {"content": "partial"}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("partial"));
    }

    #[test]
    fn test_final_chunk_without_content() {
        let raw = r#"{"choices": [{"delta": {}, "finish_reason": "stop"}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
    }
}
