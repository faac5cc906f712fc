//! Text completion provider abstraction.
//!
//! This module provides a unified interface for the LLM backends:
//! - OpenAI API
//! - Anthropic API
//!
//! The gateway is a pure transport: no business logic, no retries. Retry
//! policy belongs to the strategy making the call, which is also what lets
//! strategies run against a scripted fake in tests.

pub mod anthropic;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAIProvider;

/// Per-call options for a completion.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound for the call; exceeding it is reported as
    /// [`ProviderError::Unavailable`].
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            temperature: 0.7,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Unified text completion interface.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Submit a prompt and await the full completion.
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError>;

    /// Submit a prompt and receive incremental text deltas via `on_token`
    /// while the full completion accumulates. Cancelling `cancel` stops the
    /// stream early and returns what was received so far.
    async fn complete_streaming(
        &self,
        system: &str,
        prompt: &str,
        options: &CompletionOptions,
        on_token: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<String, ProviderError>;

    /// Provider name, e.g. "openai" or "anthropic".
    fn provider_name(&self) -> &'static str;

    /// The model identifier this provider is configured with.
    fn model_id(&self) -> &str;
}

/// Provider configuration stored in settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    #[serde(rename = "openai")]
    OpenAI { api_key: String, model: String },
    Anthropic { api_key: String, model: String },
}

impl ProviderConfig {
    pub fn provider_type(&self) -> &'static str {
        match self {
            ProviderConfig::OpenAI { .. } => "openai",
            ProviderConfig::Anthropic { .. } => "anthropic",
        }
    }

    pub fn model_id(&self) -> &str {
        match self {
            ProviderConfig::OpenAI { model, .. } => model,
            ProviderConfig::Anthropic { model, .. } => model,
        }
    }
}

/// Construct the configured provider.
pub fn build_provider(config: &ProviderConfig) -> Arc<dyn TextProvider> {
    match config {
        ProviderConfig::OpenAI { api_key, model } => {
            Arc::new(OpenAIProvider::new(api_key, model))
        }
        ProviderConfig::Anthropic { api_key, model } => {
            Arc::new(AnthropicProvider::new(api_key, model))
        }
    }
}
