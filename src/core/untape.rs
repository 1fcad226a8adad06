//! Untape: recover plain text from a rolling-tape recording
//!
//! Rolling mode prints, for every emitted character, a clear-screen sequence
//! followed by the whole tape with the head marker. The character just
//! before the marker of each frame is the one that was emitted.

use std::io::{Read, Write};

use anyhow::Context as _;
use lazy_static::lazy_static;
use regex::Regex;

use crate::{CLEAR_SCREEN, HEAD_MARKER};

lazy_static! {
    static ref RE_ANSI: Regex = Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap();
}

/// Remove ANSI escape sequences (colours, cursor movement)
pub fn strip_ansi(text: &str) -> String {
    RE_ANSI.replace_all(text, "").into_owned()
}

/// Character emitted by one rolling-tape frame
pub fn emitted_char(frame: &str) -> Option<char> {
    let plain = strip_ansi(frame);
    let (emitted, _) = plain.split_once(HEAD_MARKER)?;
    emitted.chars().last()
}

/// Incremental frame splitter
#[derive(Debug, Default)]
pub struct Untaper {
    buffer: Vec<u8>,
}

impl Untaper {
    /// Feed raw terminal bytes; returns characters of every completed frame
    pub fn feed(&mut self, bytes: &[u8]) -> String {
        self.buffer.extend_from_slice(bytes);
        let clear = CLEAR_SCREEN.as_bytes();
        let mut out = String::new();
        while let Some(pos) = find(&self.buffer, clear) {
            let frame: Vec<u8> = self.buffer.drain(..pos + clear.len()).take(pos).collect();
            out.extend(emitted_char(&String::from_utf8_lossy(&frame)));
        }
        out
    }

    /// Flush the last frame, which has no clear-screen after it
    pub fn finish(&mut self) -> String {
        let frame = std::mem::take(&mut self.buffer);
        emitted_char(&String::from_utf8_lossy(&frame)).map(String::from).unwrap_or_default()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decode a whole recording from `reader` to `writer`
pub fn run_untape<R: Read, W: Write>(mut reader: R, mut writer: W) -> anyhow::Result<()> {
    let mut untaper = Untaper::default();
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).context("failed to read recording")?;
        if n == 0 {
            break;
        }
        let text = untaper.feed(&chunk[..n]);
        if !text.is_empty() {
            writer.write_all(text.as_bytes())?;
            writer.flush()?;
        }
    }
    writer.write_all(untaper.finish().as_bytes())?;
    writer.flush()?;
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
