//! Error taxonomy
//!
//! Transient failures (generation, malformed input, bad embeddings) are
//! recovered inside the loop that owns them. Invariant violations are defects
//! and are never recovered from.

use thiserror::Error;

/// A slot had nothing to hand out (non-blocking call or timeout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("slot is empty")]
pub struct SlotEmpty;

/// Failure while opening or consuming a model stream
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("model sent nothing for {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed stream event: {0}")]
    Protocol(String),

    #[error("missing API key (set {0})")]
    MissingApiKey(&'static str),
}

/// A fast-input line that could not be used
#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid JSON input `{line}`: {source}")]
    Json {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid frame payload: {0}")]
    Frame(#[from] base64::DecodeError),
}

/// An embedding vector that must not be used
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    #[error("embedding has a non-finite component at index {index}")]
    NonFinite { index: usize },

    #[error("embedding has zero norm")]
    ZeroNorm,

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding resources exhausted: {0}")]
    ResourceExhausted(String),
}

/// Configuration could not be loaded or is inconsistent
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown configuration key `{0}`")]
    UnknownKey(String),

    #[error("invalid value `{value}` for `{key}`: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A programming error: the caller broke a documented contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invariant violation: {0}")]
pub struct InvariantViolation(pub String);
