//! Application configuration and tunable settings.
//!
//! `Config` locates the data directories; `Settings` holds the provider
//! selection and the strategy tuning values. The word-count thresholds that
//! separate short, medium, and long documents are heuristics, so they live
//! here rather than as constants in the selector.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::{CompletionOptions, ProviderConfig};

/// Filesystem layout.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory (~/.local/share/redraft)
    pub data_dir: PathBuf,
    /// SQLite job database
    pub db_path: PathBuf,
    /// Settings file (provider, thresholds)
    pub settings_file: PathBuf,
    /// Prompt template overrides
    pub prompts_file: PathBuf,
}

impl Config {
    /// Load configuration or use defaults
    pub fn load_or_default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("redraft");

        Self {
            db_path: data_dir.join("jobs.db"),
            settings_file: data_dir.join("settings.json"),
            prompts_file: data_dir.join("prompts.json"),
            data_dir,
        }
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

/// Word-count thresholds and section sizing for strategy selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrategyThresholds {
    /// Lower bound of the "medium" band routed to outline-first.
    pub medium_low_words: usize,
    /// Upper bound of the "medium" band; above it, cross-chunk.
    pub medium_high_words: usize,
    /// Chunk budget for the cross-chunk strategy.
    pub max_words_per_chunk: usize,
    /// Inputs below this get the default expansion target.
    pub expansion_small_input_words: usize,
    /// Default expansion target when no explicit one is given.
    pub expansion_default_target_words: usize,
    /// Expected words per generated expansion section.
    pub expansion_section_words: usize,
}

impl Default for StrategyThresholds {
    fn default() -> Self {
        Self {
            medium_low_words: 1_200,
            medium_high_words: 25_000,
            max_words_per_chunk: 1_000,
            expansion_small_input_words: 1_000,
            expansion_default_target_words: 5_000,
            expansion_section_words: 600,
        }
    }
}

/// Persisted settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Configured completion provider; `None` until the operator sets one.
    pub provider: Option<ProviderConfig>,
    pub thresholds: StrategyThresholds,
    pub completion: CompletionSettings,
}

/// Defaults for individual provider calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            temperature: 0.7,
            timeout_secs: 120,
        }
    }
}

impl CompletionSettings {
    pub fn to_options(&self) -> CompletionOptions {
        CompletionOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl Settings {
    /// Load settings from disk, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse settings, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply environment overrides for provider credentials.
    ///
    /// `REDRAFT_ANTHROPIC_API_KEY` or `REDRAFT_OPENAI_API_KEY` selects and
    /// configures a provider; `REDRAFT_MODEL` overrides the model id.
    pub fn apply_env(&mut self) {
        let model = std::env::var("REDRAFT_MODEL").ok();

        if let Ok(api_key) = std::env::var("REDRAFT_ANTHROPIC_API_KEY") {
            let model = model
                .clone()
                .unwrap_or_else(|| "claude-sonnet-4-5".to_string());
            self.provider = Some(ProviderConfig::Anthropic { api_key, model });
        } else if let Ok(api_key) = std::env::var("REDRAFT_OPENAI_API_KEY") {
            let model = model.unwrap_or_else(|| "gpt-4o".to_string());
            self.provider = Some(ProviderConfig::OpenAI { api_key, model });
        } else if let (Some(model), Some(provider)) = (model, self.provider.as_mut()) {
            match provider {
                ProviderConfig::OpenAI { model: m, .. } => *m = model,
                ProviderConfig::Anthropic { model: m, .. } => *m = model,
            }
        }
    }
}
