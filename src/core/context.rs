//! Shared state handed to every worker
//!
//! Workers communicate only through the tape and the slots held here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::Config;
use crate::core::slot::{BidirectionalSlot, Slot};
use crate::core::tape::Tape;
use crate::types::{ConfigError, InputWindow};

/// Request sent from the coordinator down to the slow sampler
#[derive(Debug, Clone, PartialEq)]
pub enum SamplerRequest {
    /// Produce a new slow thought; `raw_thoughts` is what has been thought so far
    Next { raw_thoughts: String },
    /// Stop sampling
    Shutdown,
}

/// Runtime switches chosen on the command line
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOptions {
    /// Wait on and prompt with fast input
    pub fast: bool,
    /// Run the slow sampler and prompt with its thoughts
    pub slow: bool,
    /// Never attach frames to prompts
    pub ignore_frames: bool,
    /// Redraw the whole tape on every character
    pub rolling_tape: bool,
    /// Dim pending text in rolling mode
    pub color: bool,
    /// Ask for ASCII art alongside the thoughts
    pub ascii: bool,
    /// Wall-clock time the recorded input started at (replayed sessions)
    pub time_offset: Option<f64>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            fast: true,
            slow: true,
            ignore_frames: false,
            rolling_tape: false,
            color: true,
            ascii: false,
            time_offset: None,
        }
    }
}

impl StreamOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fast && !self.slow {
            return Err(ConfigError::Invalid(
                "--no-fast and --no-slow leave nothing to think about".to_string(),
            ));
        }
        if let Some(offset) = self.time_offset {
            if !offset.is_finite() {
                return Err(ConfigError::InvalidValue {
                    key: "time-offset".to_string(),
                    value: offset.to_string(),
                    reason: "must be finite".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Everything the workers share
pub struct Context {
    pub tape: Tape,
    /// Latest snapshot of the fast-input window
    pub fast: Slot<InputWindow>,
    /// Slow thoughts up, sampler requests down
    pub slow: BidirectionalSlot<String, SamplerRequest>,
    pub config: Config,
    pub options: StreamOptions,
    shutdown: AtomicBool,
}

impl Context {
    pub fn new(config: Config, options: StreamOptions) -> Self {
        Self {
            tape: Tape::new(),
            fast: Slot::new(),
            slow: BidirectionalSlot::new(),
            config,
            options,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Ask every worker to stop at its next poll
    pub fn request_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            tracing::info!("Shutdown requested");
            self.slow.put_downwards(SamplerRequest::Shutdown);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// How long blocked workers wait before re-checking for shutdown
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.raw.poll_interval_ms)
    }
}
