//! Go-ahead policy: how much of the tape the next prompt gets to see
//!
//! The pacer trails the generator, so at prompt time the tape usually holds
//! text that is buffered but not yet emitted. Only the part the pacer will
//! emit before the next call yields its first token is kept; the rest is cut
//! because the new call will supersede it. Emitted history is bounded by
//! `max_memory`.

use std::time::Duration;

use crate::core::tape::Tape;

/// Look-ahead parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoAhead {
    /// Pacer target rate (characters per second)
    pub output_chars_per_sec: f64,
    /// Emitted characters retained behind the head
    pub max_memory: usize,
}

impl GoAhead {
    pub fn new(output_chars_per_sec: f64, max_memory: usize) -> Self {
        Self {
            output_chars_per_sec,
            max_memory,
        }
    }

    /// Pending characters the pacer will still emit while the next call starts up
    ///
    /// An unknown time to first token counts as infinite: all pending text is kept.
    pub fn expected_unconsumed(&self, pending: usize, time_to_first_token: Option<Duration>) -> usize {
        match time_to_first_token {
            None => pending,
            Some(ttft) => {
                let chars = (ttft.as_secs_f64() * self.output_chars_per_sec).ceil();
                if chars.is_finite() && chars >= 0.0 {
                    (chars as usize).min(pending)
                } else {
                    pending
                }
            }
        }
    }

    /// Trim the tape for the next prompt and return the RAW thoughts it should see
    ///
    /// Cuts the stale look-ahead first (`Keep::Left`), then bounds history
    /// (`Keep::Right`), both under a single tape lock.
    pub fn apply(&self, tape: &Tape, time_to_first_token: Option<Duration>) -> String {
        tape.trim(
            |pending| self.expected_unconsumed(pending, time_to_first_token),
            self.max_memory,
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
