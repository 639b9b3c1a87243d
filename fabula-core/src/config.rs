//! Configuration for FABULA.
//!
//! Maps directly to `fabula.toml`.  Every section and field has a default,
//! so an empty file is a valid configuration.

use std::path::PathBuf;

use fabula_llm::prompt::SCENE_EVALUATION_OBJECTIVE;
use fabula_llm::{Genre, HttpEmbeddingClient, LlmClient, LlmProvider, ModelParams};
use serde::{Deserialize, Serialize};

use crate::error::{FabulaError, Result};
use crate::story::{AdvancePolicy, StoryLevel};

/// Environment variable overriding `llm.api_key`.
pub const LLM_API_KEY_ENV: &str = "FABULA_LLM_API_KEY";
/// Environment variable overriding `embedding.api_key`.
pub const EMBEDDING_API_KEY_ENV: &str = "FABULA_EMBEDDING_API_KEY";

/// Top-level FABULA configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabulaConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Language model connection.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Embedding service connection.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Dialogue window and long-term memory.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Outline and scene progression.
    #[serde(default)]
    pub story: StoryConfig,
    /// Turn loop and prompt framing.
    #[serde(default)]
    pub session: SessionConfig,
}

impl FabulaConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| FabulaError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Fill API keys from the environment.  A set variable wins over the file.
    ///
    /// `lookup` is normally `|k| std::env::var(k).ok()`.
    pub fn apply_secrets<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(LLM_API_KEY_ENV).filter(|k| !k.is_empty()) {
            self.llm.api_key = key;
        }
        if let Some(key) = lookup(EMBEDDING_API_KEY_ENV).filter(|k| !k.is_empty()) {
            self.embedding.api_key = key;
        }
    }

    /// Check values that serde cannot.
    ///
    /// # Errors
    /// Returns [`FabulaError::Config`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        self.llm.provider()?;
        self.story.highest_level()?;
        if self.memory.char_budget == 0 {
            return Err(FabulaError::Config("memory.char_budget must be positive".into()));
        }
        if self.session.continue_keyword.trim().is_empty() {
            return Err(FabulaError::Config("session.continue_keyword must not be empty".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level or filter directive, used when `FABULA_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Language model connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Backend: "ollama", "openai", "textgen", or "none".
    #[serde(default = "default_ollama")]
    pub provider: String,
    /// Base URL of the backend.
    #[serde(default = "default_ollama_url")]
    pub endpoint_url: String,
    /// Bearer token for "openai".  Prefer `FABULA_LLM_API_KEY`.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Model name passed to the backend.
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-generation timeout.  No timeout when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra attempts for failed non-streamed calls.
    #[serde(default)]
    pub max_retries: u32,
    /// Generated text is cut at the first of these (case-insensitive).
    #[serde(default = "default_stop_sequences")]
    pub stop_sequences: Vec<String>,
    /// Sampling parameters.
    #[serde(default)]
    pub model_params: ModelParams,
}

impl LlmConfig {
    /// Resolve the provider string.
    ///
    /// # Errors
    /// Returns [`FabulaError::Config`] for an unknown provider.
    pub fn provider(&self) -> Result<LlmProvider> {
        let base_url = self.endpoint_url.trim_end_matches('/').to_string();
        match self.provider.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama { base_url }),
            "openai" => Ok(LlmProvider::OpenAiCompatible {
                base_url,
                api_key: self.api_key.clone(),
            }),
            "textgen" => Ok(LlmProvider::TextGenWebUi { base_url }),
            "none" => Ok(LlmProvider::None),
            other => Err(FabulaError::Config(format!(
                "unknown llm.provider '{other}' (expected ollama, openai, textgen or none)"
            ))),
        }
    }

    /// Build the client described by this section.
    ///
    /// # Errors
    /// Returns [`FabulaError::Config`] for an unknown provider.
    pub fn build_client(&self) -> Result<LlmClient> {
        Ok(LlmClient::new(self.provider()?, self.model.clone())
            .with_params(self.model_params.clone())
            .with_stop_sequences(self.stop_sequences.clone())
            .with_timeout(self.timeout_ms)
            .with_max_retries(self.max_retries))
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            endpoint_url: "http://localhost:11434".to_string(),
            api_key: String::new(),
            model: "mistral:7b-instruct".to_string(),
            timeout_ms: None,
            max_retries: 0,
            stop_sequences: default_stop_sequences(),
            model_params: ModelParams::default(),
        }
    }
}

/// Embedding service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Full URL of the embedding endpoint.
    #[serde(default = "default_embedding_url")]
    pub endpoint_url: String,
    /// Bearer token, if the service wants one.  Prefer `FABULA_EMBEDDING_API_KEY`.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Per-request timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl EmbeddingConfig {
    /// Build the client described by this section.
    #[must_use]
    pub fn build_client(&self) -> HttpEmbeddingClient {
        let api_key = Some(self.api_key.clone()).filter(|k| !k.is_empty());
        HttpEmbeddingClient::new(self.endpoint_url.clone())
            .with_api_key(api_key)
            .with_timeout(self.timeout_ms)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://localhost:6000/embed".to_string(),
            api_key: String::new(),
            timeout_ms: None,
        }
    }
}

/// Dialogue window and long-term memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Characters kept in the in-context window.
    #[serde(default = "default_2000")]
    pub char_budget: usize,
    /// Memories recalled per turn.
    #[serde(default = "default_1_usize")]
    pub recall_top_k: usize,
    /// Entries below which search is exhaustive rather than HNSW.
    #[serde(default = "default_100")]
    pub brute_force_threshold: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            char_budget: 2000,
            recall_top_k: 1,
            brute_force_threshold: 100,
        }
    }
}

/// Outline and scene progression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryConfig {
    /// Outline JSON document.
    #[serde(default)]
    pub outline_path: Option<PathBuf>,
    /// Top level of the outline: "stage", "campaign", or "scene".
    #[serde(default = "default_stage")]
    pub highest_level: String,
    /// Interactions a scene needs before it may end.
    #[serde(default = "default_3")]
    pub min_interactions: u32,
    /// Interactions after which the next scene is foreshadowed.
    #[serde(default = "default_3")]
    pub foreshadow_threshold: u32,
    /// "evaluate" asks the model; "always" advances unconditionally.
    #[serde(default)]
    pub advance_policy: AdvancePolicy,
    /// Rewrite each concluded scene's summary from what actually happened.
    #[serde(default)]
    pub rewrite_scenes: bool,
    /// Question put to the scene evaluator.
    #[serde(default = "default_objective")]
    pub evaluation_objective: String,
}

impl StoryConfig {
    /// Resolve the highest level string.
    ///
    /// # Errors
    /// Returns [`FabulaError::Config`] for an unknown level.
    pub fn highest_level(&self) -> Result<StoryLevel> {
        self.highest_level.parse()
    }
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            outline_path: None,
            highest_level: "stage".to_string(),
            min_interactions: 3,
            foreshadow_threshold: 3,
            advance_policy: AdvancePolicy::Evaluate,
            rewrite_scenes: false,
            evaluation_objective: default_objective(),
        }
    }
}

/// Turn loop and prompt framing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Narrator genre.
    #[serde(default)]
    pub genre: Genre,
    /// Prefix of player lines.
    #[serde(default = "default_human_prefix")]
    pub human_prefix: String,
    /// Prefix of storyteller lines.
    #[serde(default = "default_ai_prefix")]
    pub ai_prefix: String,
    /// Input of the synthetic opening turn.
    #[serde(default = "default_opening_input")]
    pub opening_input: String,
    /// Input that asks the storyteller to keep going.
    #[serde(default = "default_continue")]
    pub continue_keyword: String,
    /// Description of an autonomous character playing instead of a human.
    #[serde(default)]
    pub character: Option<String>,
    /// Cap on retries after empty generations.  Unbounded when absent.
    #[serde(default)]
    pub max_empty_retries: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            genre: Genre::default(),
            human_prefix: default_human_prefix(),
            ai_prefix: default_ai_prefix(),
            opening_input: default_opening_input(),
            continue_keyword: default_continue(),
            character: None,
            max_empty_retries: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_log_level() -> String { "info".to_string() }
fn default_ollama() -> String { "ollama".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_model() -> String { "mistral:7b-instruct".to_string() }
fn default_stop_sequences() -> Vec<String> { vec!["player:".to_string()] }
fn default_embedding_url() -> String { "http://localhost:6000/embed".to_string() }
fn default_stage() -> String { "stage".to_string() }
fn default_objective() -> String { SCENE_EVALUATION_OBJECTIVE.to_string() }
fn default_human_prefix() -> String { "Player: ".to_string() }
fn default_ai_prefix() -> String { "Storyteller: ".to_string() }
fn default_opening_input() -> String { "begin the story".to_string() }
fn default_continue() -> String { "continue".to_string() }
fn default_1_usize() -> usize { 1 }
fn default_3() -> u32 { 3 }
fn default_100() -> usize { 100 }
fn default_2000() -> usize { 2000 }
