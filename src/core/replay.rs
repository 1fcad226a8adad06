//! Replay of recorded narration sessions
//!
//! Re-emits a `.jsonl` recording with its original inter-event timing
//! (multiplied by `scale`). In JSONL mode each event is restamped with the
//! current time so it can be piped straight into the RAW stream.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;

use crate::types::{unix_now, InputEvent};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayOptions {
    /// Multiplier on recorded gaps (0.5 = twice as fast)
    pub scale: f64,
    /// Emit JSON lines instead of bare narrations
    pub jsonl: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self { scale: 1.0, jsonl: true }
    }
}

/// Parse a recording; blank lines are skipped, malformed ones are errors
pub fn parse_events<R: BufRead>(reader: R) -> anyhow::Result<Vec<InputEvent>> {
    let mut events = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.context("failed to read recording")?;
        if line.trim().is_empty() {
            continue;
        }
        let event = InputEvent::parse_line(&line).with_context(|| format!("line {}", n + 1))?;
        events.push(event);
    }
    Ok(events)
}

pub fn load_events(path: &Path) -> anyhow::Result<Vec<InputEvent>> {
    let file = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    parse_events(BufReader::new(file)).with_context(|| format!("in {}", path.display()))
}

/// Write `events` to `out`, calling `sleep` for each recorded gap
pub fn replay<W, S>(events: &[InputEvent], out: &mut W, options: ReplayOptions, mut sleep: S) -> anyhow::Result<()>
where
    W: Write,
    S: FnMut(Duration),
{
    if !(options.scale.is_finite() && options.scale >= 0.0) {
        anyhow::bail!("replay scale must be a non-negative number, got {}", options.scale);
    }

    for (i, event) in events.iter().enumerate() {
        if options.jsonl {
            let mut restamped = event.clone();
            restamped.timestamp = unix_now();
            serde_json::to_writer(&mut *out, &restamped)?;
            writeln!(out)?;
        } else {
            writeln!(out, "{}", event.narration)?;
        }
        out.flush()?;

        if let Some(next) = events.get(i + 1) {
            let gap = (next.timestamp - event.timestamp) * options.scale;
            if gap > 0.0 {
                sleep(Duration::from_secs_f64(gap));
            }
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    const RECORDING: &str = concat!(
        "{\"t\": 100.0, \"text\": \"A man sits down.\"}\n",
        "\n",
        "{\"t\": 102.0, \"text\": \"He waves.\"}\n",
        "{\"t\": 101.5, \"text\": \"Out of order.\"}\n",
    );

    #[test]
    fn test_plain_replay_with_scaled_gaps() {
        let events = parse_events(Cursor::new(RECORDING)).unwrap();
        let mut out = Vec::new();
        let mut slept = Vec::new();
        replay(
            &events,
            &mut out,
            ReplayOptions { scale: 0.5, jsonl: false },
            |d| slept.push(d),
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "A man sits down.\nHe waves.\nOut of order.\n"
        );
        assert_eq!(slept, vec![Duration::from_secs(1)]);
    }

    #[test]
    fn test_jsonl_replay_restamps() {
        let events = parse_events(Cursor::new(RECORDING)).unwrap();
        let before = unix_now();
        let mut out = Vec::new();
        replay(&events[..1], &mut out, ReplayOptions::default(), |_| {}).unwrap();
        let line = String::from_utf8(out).unwrap();
        let event = InputEvent::parse_line(line.trim()).unwrap();
        assert_eq!(event.narration, "A man sits down.");
        assert!(event.timestamp >= before);
    }

    #[test]
    fn test_malformed_recording_is_an_error() {
        assert!(parse_events(Cursor::new("{\"t\": 1.0}\n")).is_err());
    }

    #[test]
    fn test_rejects_negative_scale() {
        let mut out = Vec::new();
        assert!(replay(&[], &mut out, ReplayOptions { scale: -1.0, jsonl: false }, |_| {}).is_err());
    }
}
