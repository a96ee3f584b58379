//! # AI Provider Abstraction
//!
//! A single operation — analyze text against the caller's filter
//! configuration — with two interchangeable HTTP implementations:
//!
//! - [`chat::ChatCompletionProvider`] — plain JSON chat-completion endpoint
//! - [`streaming::StreamingChatProvider`] — SSE streaming chat endpoint
//!
//! Providers are selected per [`ModelTier`] from a fixed registry built at
//! startup. Prompt construction is deterministic in (config, history, text)
//! and shared by every provider, so the AI-result cache key is valid across
//! implementations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::request::{FilterConfig, Flag};

pub mod chat;
pub mod parse;
pub mod prompt;
pub mod streaming;

/// Provider error types. None of these ever propagate to callers of the
/// pipeline; they degrade to an allow verdict carrying the `error` flag.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider did not answer within the per-call timeout
    #[error("AI provider timed out")]
    Timeout,

    /// Transport-level failure
    #[error("AI provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("AI provider returned status {0}")]
    Status(u16),

    /// Response body missing the expected fields
    #[error("AI provider response malformed: {0}")]
    MalformedResponse(String),
}

/// Provider result alias
pub type Result<T> = std::result::Result<T, ProviderError>;

// ============================================================================
// Tiers
// ============================================================================

/// Model tier requested by the caller, selecting a provider+model pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Smallest, fastest model
    Fast,
    /// Default tier
    Normal,
    /// Largest model
    Pro,
}

impl ModelTier {
    /// Parse a tier name from the wire.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "fast" => Some(Self::Fast),
            "normal" => Some(Self::Normal),
            "pro" => Some(Self::Pro),
            _ => None,
        }
    }

    /// Wire string for this tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Normal => "normal",
            Self::Pro => "pro",
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Verdicts
// ============================================================================

/// The model's judgement of one piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiVerdict {
    /// Whether the model judged the content a violation
    pub is_violation: bool,

    /// Flags from the closed vocabulary
    pub flags: Vec<Flag>,

    /// Short reason, already sanitized
    pub reason: String,

    /// Model-produced redaction, when it offered one
    pub filtered_content: Option<String>,
}

// ============================================================================
// Provider contract and registry
// ============================================================================

/// A single cancellable analysis operation with its own timeout.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Analyze `text` in the context of `history` under `config`.
    async fn analyze(
        &self,
        text: &str,
        history: &[String],
        config: &FilterConfig,
    ) -> Result<AiVerdict>;

    /// Model name for logs and the AI monitor endpoint.
    fn model_name(&self) -> &str;
}

/// Fixed tier → provider table built at startup.
pub struct ProviderRegistry {
    fast: Arc<dyn AnalysisProvider>,
    normal: Arc<dyn AnalysisProvider>,
    pro: Arc<dyn AnalysisProvider>,
}

impl ProviderRegistry {
    /// Build the registry from one provider per tier.
    pub fn new(
        fast: Arc<dyn AnalysisProvider>,
        normal: Arc<dyn AnalysisProvider>,
        pro: Arc<dyn AnalysisProvider>,
    ) -> Self {
        Self { fast, normal, pro }
    }

    /// The provider for a tier.
    pub fn provider(&self, tier: ModelTier) -> Arc<dyn AnalysisProvider> {
        match tier {
            ModelTier::Fast => Arc::clone(&self.fast),
            ModelTier::Normal => Arc::clone(&self.normal),
            ModelTier::Pro => Arc::clone(&self.pro),
        }
    }

    /// (tier, model name) pairs for the AI monitor endpoint.
    pub fn model_table(&self) -> Vec<(ModelTier, String)> {
        vec![
            (ModelTier::Fast, self.fast.model_name().to_string()),
            (ModelTier::Normal, self.normal.model_name().to_string()),
            (ModelTier::Pro, self.pro.model_name().to_string()),
        ]
    }
}
