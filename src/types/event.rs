//! Fast-input events and the bounded window handed to the coordinator
//!
//! - Event = one narration of a tile of video frames
//! - Window = the most recent `max_inputs` events, oldest evicted first

use std::collections::VecDeque;

use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::InputError;

/// Current wall-clock time as fractional Unix seconds
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// A single narration event produced upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Wall-clock time of the narration (Unix seconds)
    #[serde(alias = "t")]
    pub timestamp: f64,
    /// What the narrator saw
    #[serde(alias = "text")]
    pub narration: String,
    /// Optional base64-encoded JPEG of the narrated frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
}

impl InputEvent {
    /// Create an event without a frame
    pub fn new(timestamp: f64, narration: impl Into<String>) -> Self {
        Self {
            timestamp,
            narration: narration.into(),
            frame: None,
        }
    }

    /// Parse one JSON line from the narration stream
    pub fn parse_line(line: &str) -> Result<Self, InputError> {
        serde_json::from_str(line).map_err(|source| InputError::Json {
            line: line.trim_end().to_string(),
            source,
        })
    }

    /// Seconds elapsed between the event and `now`
    pub fn age_secs(&self, now: f64) -> f64 {
        now - self.timestamp
    }

    /// Shift the timestamp back by `offset` seconds
    pub fn rebase(&mut self, offset: f64) {
        self.timestamp -= offset;
    }

    /// Decode the frame payload, if any
    pub fn frame_bytes(&self) -> Option<Result<Vec<u8>, InputError>> {
        self.frame.as_ref().map(|data| {
            base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(InputError::from)
        })
    }
}

/// Bounded FIFO of recent events
#[derive(Debug, Clone, PartialEq)]
pub struct InputWindow {
    events: VecDeque<InputEvent>,
    capacity: usize,
}

impl Default for InputWindow {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_INPUTS)
    }
}

impl InputWindow {
    /// Create an empty window holding at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an event, evicting the oldest when full
    pub fn push(&mut self, event: InputEvent) {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Events, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &InputEvent> {
        self.events.iter()
    }

    /// Most recent event
    pub fn latest(&self) -> Option<&InputEvent> {
        self.events.back()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Render the window as prompt lines, newest last, ages measured at `now`
    pub fn format_at(&self, now: f64) -> String {
        self.events
            .iter()
            .map(|e| format!("({:.2}s ago) {}", e.age_secs(now), e.narration.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// TESTS
// =============================================================================
