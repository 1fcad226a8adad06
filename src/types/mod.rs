//! Core types for Seer

mod error;
mod event;
mod prompt;
mod usage;

pub use error::{ConfigError, EmbeddingError, GenerationError, InputError, InvariantViolation, SlotEmpty};
pub use event::{unix_now, InputEvent, InputWindow};
pub use prompt::{GenerationParams, Prompt, PromptPart};
pub use usage::Usage;
