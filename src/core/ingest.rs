//! Input workers
//!
//! - Fast reader: narration JSON lines → input window → fast slot
//! - Slow sampler: answers coordinator requests with fresh slow thoughts

use std::io::BufRead;

use anyhow::Context as _;

use crate::core::context::{Context, SamplerRequest};
use crate::core::thoughts::SlowThoughtSource;
use crate::types::{InputEvent, InputWindow, SlotEmpty};

/// Timestamp shift for sessions whose input was recorded earlier
///
/// Input stamped at `time_offset` is treated as if it arrived at
/// `process_start`.
pub fn rebase_offset(time_offset: Option<f64>, process_start: f64) -> f64 {
    time_offset.map_or(0.0, |offset| offset - process_start)
}

/// Read narration lines until EOF, publishing the window after every event
///
/// Malformed lines are logged and skipped. Returns `Ok` at end of input.
pub fn run_fast_reader<R: BufRead>(ctx: &Context, reader: R, process_start: f64) -> anyhow::Result<()> {
    let offset = rebase_offset(ctx.options.time_offset, process_start);
    let mut window = InputWindow::new(ctx.config.raw.max_inputs);
    let mut accepted = 0usize;

    for line in reader.lines() {
        if ctx.is_shutdown() {
            break;
        }
        let line = line.context("failed to read fast input")?;
        if line.trim().is_empty() {
            continue;
        }
        let mut event = match InputEvent::parse_line(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Skipping malformed input line");
                continue;
            }
        };
        event.rebase(offset);
        tracing::debug!(timestamp = event.timestamp, narration = %event.narration, "Fast input");
        window.push(event);
        ctx.fast.put(window.clone());
        accepted += 1;
    }

    tracing::info!(events = accepted, "Fast input ended");
    Ok(())
}

/// Serve slow thoughts to the coordinator until asked to stop
pub fn run_slow_sampler(ctx: &Context, source: &mut dyn SlowThoughtSource) -> anyhow::Result<()> {
    let thought = source.initial();
    tracing::info!(thought = %thought, "Initial slow thought");
    ctx.slow.put_upwards(thought);

    loop {
        if ctx.is_shutdown() {
            return Ok(());
        }
        match ctx.slow.get_from_above_timeout(ctx.poll_interval()) {
            Err(SlotEmpty) => continue,
            Ok(SamplerRequest::Shutdown) => return Ok(()),
            Ok(SamplerRequest::Next { raw_thoughts }) => {
                let thought = source.next_thought(&raw_thoughts);
                tracing::info!(thought = %thought, "New slow thought");
                ctx.slow.put_upwards(thought);
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
