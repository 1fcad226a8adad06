//! Seer: RAW thought tape
//!
//! Narrations of a live video feed (fast input) and sampled seed thoughts
//! (slow input) steer a streaming language model whose output is written to a
//! shared tape and paced out to the terminal one character at a time.

pub mod config;
pub mod core;
pub mod provider;
pub mod types;

// =============================================================================
// TAPE
// =============================================================================

/// Marker rendered at the tape head (between emitted and pending text)
pub const HEAD_MARKER: char = '↪';

/// ANSI sequence that homes the cursor and clears the screen (rolling tape frames)
pub const CLEAR_SCREEN: &str = "\x1b[H\x1b[J";

// =============================================================================
// DEFAULTS [C] - Overridable through seer.toml or --config
// =============================================================================

/// Fast-input events kept in the prompt window
pub const DEFAULT_MAX_INPUTS: usize = 10;

/// Characters of already-emitted history retained on the tape
pub const DEFAULT_MAX_MEMORY: usize = 2000;

/// Target output rate of the pacer (characters per second)
pub const DEFAULT_CHARS_PER_SEC: f64 = 15.0;

/// Log-normal jitter scale applied to every inter-character interval
pub const DEFAULT_JITTER: f64 = 0.5;

/// Back-off after a failed generation call (seconds)
pub const DEFAULT_RETRY_DELAY_SECS: f64 = 1.0;

/// A generation stream silent for this long is abandoned and retried (seconds)
pub const DEFAULT_CHUNK_TIMEOUT_SECS: f64 = 30.0;

/// How often blocked workers re-check for shutdown (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default model
pub const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "seer.toml";

// =============================================================================
// VERSION
// =============================================================================

pub const VERSION: &str = "1.0.0";
