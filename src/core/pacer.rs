//! Output pacer
//!
//! Drains the tape one character at a time at a jittered target rate. The
//! interval after each character is
//!
//!   max(0, 1/R - elapsed) * exp(J*z - J²/2),  z ~ N(0, 1)
//!
//! where `elapsed` is the time already spent since the previous character
//! (waiting for text, rendering). The multiplier has mean 1, so the average
//! rate converges to R. Characters are never dropped.

use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use colored::Colorize;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::core::context::Context;
use crate::core::tape::Tape;

/// Jittered inter-character interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    interval: f64,
    scale: f64,
}

impl Jitter {
    pub fn new(chars_per_sec: f64, scale: f64) -> Self {
        Self {
            interval: 1.0 / chars_per_sec,
            scale,
        }
    }

    /// Target interval in seconds
    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Log-normal multiplier with mean 1
    pub fn multiplier<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.scale == 0.0 {
            return 1.0;
        }
        let z: f64 = rng.sample(StandardNormal);
        (self.scale * z - self.scale * self.scale / 2.0).exp()
    }

    /// How long to sleep after a character, given time already spent
    pub fn sleep_time<R: Rng + ?Sized>(&self, elapsed: Duration, rng: &mut R) -> Duration {
        let remaining = (self.interval - elapsed.as_secs_f64()).max(0.0);
        let secs = remaining * self.multiplier(rng);
        if secs.is_finite() {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

/// How emitted characters reach the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Print each character as it is consumed
    Plain,
    /// Clear the screen and redraw the tape, head marker included
    Rolling { color: bool },
}

/// Render the whole tape for rolling mode
pub fn render_rolling(tape: &Tape, color: bool) -> String {
    let (emitted, pending) = tape.split();
    if color {
        format!(
            "{}{}{}{}",
            crate::CLEAR_SCREEN,
            emitted,
            crate::HEAD_MARKER.to_string().bold(),
            pending.dimmed()
        )
    } else {
        format!("{}{}{}{}", crate::CLEAR_SCREEN, emitted, crate::HEAD_MARKER, pending)
    }
}

/// Paces tape output to a writer
pub struct OutputPacer<W: Write> {
    out: W,
    jitter: Jitter,
    mode: RenderMode,
    rng: StdRng,
    last: Instant,
}

impl<W: Write> OutputPacer<W> {
    pub fn new(out: W, jitter: Jitter, mode: RenderMode) -> Self {
        Self {
            out,
            jitter,
            mode,
            rng: StdRng::from_entropy(),
            last: Instant::now(),
        }
    }

    /// Fix the jitter RNG (tests)
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Consume and render one character; `None` if nothing arrived within `timeout`
    pub fn emit_next(&mut self, tape: &Tape, timeout: Duration) -> anyhow::Result<Option<char>> {
        let Some(c) = tape.get_char_timeout(timeout) else {
            return Ok(None);
        };
        let written = match self.mode {
            RenderMode::Plain => write!(self.out, "{}", c),
            RenderMode::Rolling { color } => write!(self.out, "{}", render_rolling(tape, color)),
        };
        written.context("failed to write output")?;
        self.out.flush().context("failed to flush output")?;

        let pause = self.jitter.sleep_time(self.last.elapsed(), &mut self.rng);
        std::thread::sleep(pause);
        self.last = Instant::now();
        Ok(Some(c))
    }

    /// Drain the tape until shutdown
    pub fn run(&mut self, ctx: &Context) -> anyhow::Result<()> {
        let poll = ctx.poll_interval();
        let mut emitted = 0u64;
        while !ctx.is_shutdown() {
            if self.emit_next(&ctx.tape, poll)?.is_some() {
                emitted += 1;
            }
        }
        tracing::info!(emitted, "Pacer stopped");
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

// =============================================================================
// TESTS
// =============================================================================
