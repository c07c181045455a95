//! Configuration loading, validation, and management for RAGFlow.
//!
//! Loads configuration from `~/.ragflow/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use ragflow_core::TieBreak;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.ragflow/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default log filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub clarify: ClarifyConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Text-generation backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Provider name ("openrouter", "openai", "ollama", ...)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Overrides the provider's well-known base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "mistralai/devstral-2512:free".into()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_max_tokens() -> u32 {
    1024
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Corpus, chunking, and decision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Directory scanned recursively for `*.md` documents
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Chunks requested from the retriever per query
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,

    /// Chunks considered by the decision policy
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Best distance above this routes to clarification
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,

    #[serde(default)]
    pub tie_break: TieBreak,

    /// "hashing" (built in) or "openai" (embeddings endpoint of the generator provider)
    #[serde(default = "default_embedder")]
    pub embedder: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Vector width of the hashing embedder
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    120
}
fn default_fetch_k() -> usize {
    5
}
fn default_top_k() -> usize {
    2
}
fn default_distance_threshold() -> f32 {
    0.9
}
fn default_embedder() -> String {
    "hashing".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embedding_dimensions() -> usize {
    384
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            fetch_k: default_fetch_k(),
            top_k: default_top_k(),
            distance_threshold: default_distance_threshold(),
            tie_break: TieBreak::default(),
            embedder: default_embedder(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
        }
    }
}

/// Retry and timeout policy for collaborator calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Ceiling for each attempt, and for each gap between streamed fragments
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_multiplier() -> f64 {
    1.5
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_step_timeout_secs() -> u64 {
    30
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

/// Session memory bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Turns kept per session; oldest evicted first
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Sessions kept in the process; least recently used evicted first
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Append clarification turns to the session
    #[serde(default = "default_true")]
    pub record_clarifications: bool,

    /// Render recorded clarification turns into later prompts
    #[serde(default = "default_true")]
    pub clarifications_in_history: bool,
}

fn default_max_turns() -> usize {
    20
}
fn default_max_sessions() -> usize {
    1000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_sessions: default_max_sessions(),
            record_clarifications: true,
            clarifications_in_history: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClarifyMode {
    /// Render `clarify.template`; no generator call
    #[default]
    Template,
    /// Ask the generator for a clarification question
    Generate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarifyConfig {
    #[serde(default)]
    pub mode: ClarifyMode,

    /// Supports `{query}` and `{distance}` placeholders
    #[serde(default = "default_clarify_template")]
    pub template: String,
}

fn default_clarify_template() -> String {
    "I couldn't find anything in the documents that clearly matches \"{query}\" \
     (closest match distance: {distance}). Could you rephrase the question or \
     add more detail about what you're looking for?"
        .into()
}

impl Default for ClarifyConfig {
    fn default() -> Self {
        Self { mode: ClarifyMode::default(), template: default_clarify_template() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Allowed CORS origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    8008
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { port: default_port(), host: default_host(), cors_origins: Vec::new() }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ragflow/config.toml).
    ///
    /// Environment overrides:
    /// - `RAGFLOW_API_KEY`, then `OPENROUTER_API_KEY`, then `OPENAI_API_KEY`
    /// - `RAGFLOW_MODEL`, `RAGFLOW_DATA_DIR`, `RAGFLOW_DISTANCE_THRESHOLD`, `RAGFLOW_LOG_LEVEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.generator.api_key.is_none() {
            self.generator.api_key = lookup("RAGFLOW_API_KEY")
                .or_else(|| lookup("OPENROUTER_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(model) = lookup("RAGFLOW_MODEL") {
            self.generator.model = model;
        }

        if let Some(dir) = lookup("RAGFLOW_DATA_DIR") {
            self.retrieval.data_dir = PathBuf::from(dir);
        }

        if let Some(level) = lookup("RAGFLOW_LOG_LEVEL") {
            self.log_level = level;
        }

        if let Some(raw) = lookup("RAGFLOW_DISTANCE_THRESHOLD") {
            match raw.parse::<f32>() {
                Ok(threshold) => self.retrieval.distance_threshold = threshold,
                Err(_) => tracing::warn!(value = %raw, "Ignoring unparsable RAGFLOW_DISTANCE_THRESHOLD"),
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ragflow")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationError(msg.into()));

        if !(0.0..=2.0).contains(&self.generator.temperature) {
            return fail("generator.temperature must be between 0.0 and 2.0");
        }
        if !self.retrieval.distance_threshold.is_finite() || self.retrieval.distance_threshold < 0.0 {
            return fail("retrieval.distance_threshold must be a non-negative number");
        }
        if self.retrieval.top_k == 0 {
            return fail("retrieval.top_k must be at least 1");
        }
        if self.retrieval.fetch_k < self.retrieval.top_k {
            return fail("retrieval.fetch_k must be >= retrieval.top_k");
        }
        if self.retrieval.chunk_size == 0 || self.retrieval.chunk_overlap >= self.retrieval.chunk_size {
            return fail("retrieval.chunk_overlap must be smaller than a non-zero chunk_size");
        }
        if self.retrieval.embedding_dimensions == 0 {
            return fail("retrieval.embedding_dimensions must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1");
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return fail("retry.multiplier must be >= 1.0");
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return fail("retry.max_delay_ms must be >= retry.base_delay_ms");
        }
        if self.retry.step_timeout_secs == 0 {
            return fail("retry.step_timeout_secs must be at least 1");
        }
        if self.memory.max_turns == 0 || self.memory.max_sessions == 0 {
            return fail("memory.max_turns and memory.max_sessions must be at least 1");
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.generator.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            generator: GeneratorConfig::default(),
            retrieval: RetrievalConfig::default(),
            retry: RetryConfig::default(),
            memory: MemoryConfig::default(),
            clarify: ClarifyConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
