//! Configuration
//!
//! Loaded once at startup, in increasing precedence:
//! - Built-in defaults
//! - TOML file (`seer.toml` in the working directory, or `--config-file`)
//! - Environment variables (`ANTHROPIC_API_KEY`, `SEER_*`)
//! - `--config key=value` overrides
//!
//! The result is validated eagerly; workers receive it by reference.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{ConfigError, GenerationParams};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub raw: RawConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub pacer: PacerConfig,

    #[serde(default)]
    pub slow: SlowConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// RAW stream coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawConfig {
    /// Fast-input events kept in the prompt window
    #[serde(default = "default_max_inputs")]
    pub max_inputs: usize,

    /// Emitted characters retained on the tape
    #[serde(default = "default_max_memory")]
    pub max_memory: usize,

    /// Back-off after a failed generation call
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,

    /// Abandon a generation stream that sends nothing for this long
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: f64,

    /// Shutdown polling granularity for blocked workers
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            max_inputs: default_max_inputs(),
            max_memory: default_max_memory(),
            retry_delay_secs: default_retry_delay_secs(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Model settings
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub name: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub top_k: Option<u32>,

    #[serde(default)]
    pub top_p: Option<f32>,

    #[serde(default = "default_stop_sequences")]
    pub stop_sequences: Vec<String>,

    /// System prompt file (built-in prompt when unset)
    #[serde(default)]
    pub system_prompt_file: Option<PathBuf>,

    /// User prompt template file (built-in template when unset)
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,

    /// API key (usually from ANTHROPIC_API_KEY)
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Base URL override
    #[serde(default)]
    pub base_url: Option<String>,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("name", &self.name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("top_k", &self.top_k)
            .field("top_p", &self.top_p)
            .field("stop_sequences", &self.stop_sequences)
            .field("system_prompt_file", &self.system_prompt_file)
            .field("prompt_file", &self.prompt_file)
            .field("api_key", &self.api_key.as_ref().map(|_| "<REDACTED>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_k: None,
            top_p: None,
            stop_sequences: default_stop_sequences(),
            system_prompt_file: None,
            prompt_file: None,
            api_key: None,
            base_url: None,
        }
    }
}

impl ModelConfig {
    /// Sampling parameters for the generator
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            model: self.name.clone(),
            temperature: Some(self.temperature),
            max_tokens: self.max_tokens,
            stop_sequences: self.stop_sequences.clone(),
            top_k: self.top_k,
            top_p: self.top_p,
        }
    }
}

/// Output pacing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacerConfig {
    /// Target output rate
    #[serde(default = "default_chars_per_sec")]
    pub chars_per_sec: f64,

    /// Log-normal jitter scale (0 = metronomic)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            chars_per_sec: default_chars_per_sec(),
            jitter: default_jitter(),
        }
    }
}

/// How the slow sampler picks the next thought
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SlowMode {
    #[default]
    Random,
    Walk,
}

/// Slow-thought sampler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlowConfig {
    /// Corpus of seed thoughts (one per line, or JSONL with a `thought` field)
    #[serde(default)]
    pub thoughts_file: Option<PathBuf>,

    #[serde(default)]
    pub mode: SlowMode,

    /// Walk steps before teleporting to a random thought
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// RNG seed (random when unset)
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SlowConfig {
    fn default() -> Self {
        Self {
            thoughts_file: None,
            mode: SlowMode::default(),
            max_steps: default_max_steps(),
            embedding_dimension: default_embedding_dimension(),
            seed: None,
        }
    }
}

/// Logging
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for `seer.log` (stderr when unset)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_max_inputs() -> usize {
    crate::DEFAULT_MAX_INPUTS
}

fn default_max_memory() -> usize {
    crate::DEFAULT_MAX_MEMORY
}

fn default_retry_delay_secs() -> f64 {
    crate::DEFAULT_RETRY_DELAY_SECS
}

fn default_chunk_timeout_secs() -> f64 {
    crate::DEFAULT_CHUNK_TIMEOUT_SECS
}

fn default_poll_interval_ms() -> u64 {
    crate::DEFAULT_POLL_INTERVAL_MS
}

fn default_model() -> String {
    crate::DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_stop_sequences() -> Vec<String> {
    vec!["```".to_string()]
}

fn default_chars_per_sec() -> f64 {
    crate::DEFAULT_CHARS_PER_SEC
}

fn default_jitter() -> f64 {
    crate::DEFAULT_JITTER
}

fn default_max_steps() -> usize {
    8
}

fn default_embedding_dimension() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from an explicit file, or from `seer.toml` when it exists
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(crate::DEFAULT_CONFIG_FILE), false),
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(crate::provider::anthropic::API_KEY_ENV) {
            self.model.api_key = Some(key);
        }
        if let Some(model) = lookup("SEER_MODEL") {
            self.model.name = model;
        }
        if let Some(level) = lookup("SEER_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(dir) = lookup("SEER_LOG_DIR") {
            self.log.dir = Some(PathBuf::from(dir));
        }
    }

    /// Apply `key=value` overrides in order
    pub fn apply_overrides<S: AsRef<str>>(&mut self, overrides: &[S]) -> Result<(), ConfigError> {
        for item in overrides {
            let item = item.as_ref();
            let (key, value) = item.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                key: item.to_string(),
                value: String::new(),
                reason: "expected key=value".to_string(),
            })?;
            self.set(key.trim(), value.trim())?;
        }
        Ok(())
    }

    /// Set a configuration value by its dotted key
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "raw.max_inputs" => self.raw.max_inputs = parse(key, value)?,
            "raw.max_memory" => self.raw.max_memory = parse(key, value)?,
            "raw.retry_delay_secs" => self.raw.retry_delay_secs = parse(key, value)?,
            "raw.chunk_timeout_secs" => self.raw.chunk_timeout_secs = parse(key, value)?,
            "raw.poll_interval_ms" => self.raw.poll_interval_ms = parse(key, value)?,
            "model.name" => self.model.name = value.to_string(),
            "model.temperature" => self.model.temperature = parse(key, value)?,
            "model.max_tokens" => self.model.max_tokens = parse(key, value)?,
            "model.top_k" => self.model.top_k = Some(parse(key, value)?),
            "model.top_p" => self.model.top_p = Some(parse(key, value)?),
            "model.system_prompt_file" => self.model.system_prompt_file = Some(PathBuf::from(value)),
            "model.prompt_file" => self.model.prompt_file = Some(PathBuf::from(value)),
            "model.base_url" => self.model.base_url = Some(value.to_string()),
            "pacer.chars_per_sec" => self.pacer.chars_per_sec = parse(key, value)?,
            "pacer.jitter" => self.pacer.jitter = parse(key, value)?,
            "slow.thoughts_file" => self.slow.thoughts_file = Some(PathBuf::from(value)),
            "slow.mode" => {
                self.slow.mode = match value {
                    "random" => SlowMode::Random,
                    "walk" => SlowMode::Walk,
                    _ => return Err(invalid(key, value, "expected `random` or `walk`")),
                }
            }
            "slow.max_steps" => self.slow.max_steps = parse(key, value)?,
            "slow.embedding_dimension" => self.slow.embedding_dimension = parse(key, value)?,
            "slow.seed" => self.slow.seed = Some(parse(key, value)?),
            "log.level" => self.log.level = value.to_string(),
            "log.dir" => self.log.dir = Some(PathBuf::from(value)),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Reject values the workers cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.raw.max_inputs == 0 {
            return Err(invalid("raw.max_inputs", "0", "must be at least 1"));
        }
        if self.raw.poll_interval_ms == 0 {
            return Err(invalid("raw.poll_interval_ms", "0", "must be at least 1"));
        }
        if !(self.raw.retry_delay_secs.is_finite() && self.raw.retry_delay_secs >= 0.0) {
            return Err(invalid(
                "raw.retry_delay_secs",
                &self.raw.retry_delay_secs.to_string(),
                "must be a non-negative number",
            ));
        }
        if !(self.raw.chunk_timeout_secs.is_finite() && self.raw.chunk_timeout_secs > 0.0) {
            return Err(invalid(
                "raw.chunk_timeout_secs",
                &self.raw.chunk_timeout_secs.to_string(),
                "must be positive",
            ));
        }
        if !(self.pacer.chars_per_sec.is_finite() && self.pacer.chars_per_sec > 0.0) {
            return Err(invalid(
                "pacer.chars_per_sec",
                &self.pacer.chars_per_sec.to_string(),
                "must be positive",
            ));
        }
        if !(self.pacer.jitter.is_finite() && self.pacer.jitter >= 0.0) {
            return Err(invalid(
                "pacer.jitter",
                &self.pacer.jitter.to_string(),
                "must be a non-negative number",
            ));
        }
        if !(self.model.temperature.is_finite() && self.model.temperature >= 0.0) {
            return Err(invalid(
                "model.temperature",
                &self.model.temperature.to_string(),
                "must be a non-negative number",
            ));
        }
        if self.model.max_tokens == 0 {
            return Err(invalid("model.max_tokens", "0", "must be at least 1"));
        }
        if self.slow.embedding_dimension == 0 {
            return Err(invalid("slow.embedding_dimension", "0", "must be at least 1"));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| invalid(key, value, &e.to_string()))
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
