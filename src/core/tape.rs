//! Tape: a head-indexed character buffer shared by generation and output
//!
//! Characters left of the head have been emitted; characters from the head
//! onward are buffered and still pending. `peek` and `cut` address positions
//! relative to the head: negative indices reach into emitted history, zero and
//! positive indices into pending text.
//!
//! All access goes through one mutex. `get_char` waits on a condition variable
//! that `put_string` notifies.

use std::fmt;
use std::ops::{Bound, RangeBounds};
use std::str::FromStr;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::types::InvariantViolation;
use crate::HEAD_MARKER;

/// Which side of a cut survives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    /// Keep everything before the cut point
    Left,
    /// Keep everything from the cut point on
    Right,
}

impl FromStr for Keep {
    type Err = InvariantViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Keep::Left),
            "right" => Ok(Keep::Right),
            other => Err(InvariantViolation(format!(
                "`keep` must be 'left' or 'right', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct TapeState {
    data: Vec<char>,
    head: usize,
}

impl TapeState {
    /// Absolute position of a head-relative index, clamped to the buffer
    fn clamp(&self, index: isize) -> usize {
        let absolute = self.head as isize + index;
        absolute.clamp(0, self.data.len() as isize) as usize
    }

    fn has_pending(&self) -> bool {
        self.head < self.data.len()
    }

    fn take(&mut self) -> char {
        let c = self.data[self.head];
        self.head += 1;
        c
    }

    fn cut(&mut self, index: isize, keep: Keep) {
        match keep {
            Keep::Left => {
                let end = self.clamp(index);
                self.data.truncate(end);
                self.head = if index < 0 { self.data.len() } else { self.head.min(end) };
            }
            Keep::Right => {
                let start = self.clamp(index);
                self.data.drain(..start);
                self.head = if index > 0 { 0 } else { self.head.min(index.unsigned_abs()) };
            }
        }
        debug_assert!(self.head <= self.data.len());
    }
}

/// Shared RAW thought tape
pub struct Tape {
    state: Mutex<TapeState>,
    incoming: Condvar,
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}

impl Tape {
    /// Create an empty tape with the head at 0
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TapeState::default()),
            incoming: Condvar::new(),
        }
    }

    /// Append `s` at the end and wake any blocked reader
    pub fn put_string(&self, s: &str) {
        if s.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        state.data.extend(s.chars());
        drop(state);
        self.incoming.notify_all();
    }

    /// Block until a character is pending at the head, consume it and return it
    ///
    /// Blocks forever on a tape that never receives data.
    pub fn get_char(&self) -> char {
        let mut state = self.state.lock();
        while !state.has_pending() {
            self.incoming.wait(&mut state);
        }
        state.take()
    }

    /// Like `get_char`, but give up after `timeout`
    pub fn get_char_timeout(&self, timeout: Duration) -> Option<char> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.has_pending() {
            if self.incoming.wait_until(&mut state, deadline).timed_out() {
                if state.has_pending() {
                    break;
                }
                return None;
            }
        }
        Some(state.take())
    }

    /// Character at a head-relative index, without consuming it
    pub fn peek(&self, index: isize) -> Option<char> {
        let state = self.state.lock();
        let absolute = state.head as isize + index;
        if absolute < 0 {
            return None;
        }
        state.data.get(absolute as usize).copied()
    }

    /// Characters in a head-relative range, without consuming them
    ///
    /// `peek_range(0..)` is the pending text, `peek_range(..0)` the emitted
    /// history still retained. Out-of-range bounds are clamped.
    pub fn peek_range<R: RangeBounds<isize>>(&self, range: R) -> String {
        let state = self.state.lock();
        let start = match range.start_bound() {
            Bound::Included(&s) => state.clamp(s),
            Bound::Excluded(&s) => state.clamp(s + 1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => state.clamp(e + 1),
            Bound::Excluded(&e) => state.clamp(e),
            Bound::Unbounded => state.data.len(),
        };
        if start >= end {
            return String::new();
        }
        state.data[start..end].iter().collect()
    }

    /// Destructively cut the tape at a head-relative index
    ///
    /// - `Keep::Left` discards everything from `index` on. With a negative
    ///   index everything retained is already emitted, so the head moves to the
    ///   new end.
    /// - `Keep::Right` discards everything before `index`. With a positive
    ///   index everything retained is pending, so the head resets to 0;
    ///   otherwise the head keeps pointing at the same character.
    ///
    /// Indices outside the tape clamp to its bounds.
    pub fn cut(&self, index: isize, keep: Keep) {
        self.state.lock().cut(index, keep);
    }

    /// Keep `ahead(pending)` pending characters and `behind` emitted ones
    ///
    /// Same as `cut(+ahead, Left)` then `cut(-behind, Right)`, but the pending
    /// count and both cuts happen under one lock so the pacer cannot move the
    /// head in between. Returns the remaining contents.
    pub fn trim(&self, ahead: impl FnOnce(usize) -> usize, behind: usize) -> String {
        let mut state = self.state.lock();
        let pending = state.data.len() - state.head;
        let keep_ahead = ahead(pending);
        state.cut(keep_ahead as isize, Keep::Left);
        state.cut(-(behind as isize), Keep::Right);
        state.data.iter().collect()
    }

    /// Total number of characters (emitted + pending)
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }

    /// Absolute head position
    pub fn head(&self) -> usize {
        self.state.lock().head
    }

    /// Number of characters buffered ahead of the head
    pub fn pending_len(&self) -> usize {
        let state = self.state.lock();
        state.data.len() - state.head
    }

    /// Whole tape content without the head marker
    pub fn contents(&self) -> String {
        self.state.lock().data.iter().collect()
    }

    /// Emitted and pending text, read under a single lock
    pub fn split(&self) -> (String, String) {
        let state = self.state.lock();
        let (emitted, pending) = state.data.split_at(state.head);
        (emitted.iter().collect(), pending.iter().collect())
    }
}

impl fmt::Display for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (emitted, pending) = self.split();
        write!(f, "{}{}{}", emitted, HEAD_MARKER, pending)
    }
}

impl fmt::Debug for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (emitted, pending) = self.split();
        let rendered = format!("{}{}{}", emitted, HEAD_MARKER, pending);
        let len = emitted.chars().count() + pending.chars().count();
        write!(f, "Tape({:?}, len={})", rendered, len)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(50);

    fn consumed(tape: &Tape, n: usize) -> String {
        (0..n).map(|_| tape.get_char()).collect()
    }

    #[test]
    fn test_hello_in_order_then_blocks() {
        let tape = Tape::new();
        tape.put_string("Hello");
        assert_eq!(consumed(&tape, 5), "Hello");
        assert_eq!(tape.get_char_timeout(SHORT), None);
    }

    #[test]
    fn test_display_marks_head() {
        let tape = Tape::new();
        tape.put_string("Hello");
        consumed(&tape, 5);
        tape.put_string(" world");
        assert_eq!(tape.peek_range(0..), " world");
        assert_eq!(tape.to_string(), "Hello↪ world");
        assert_eq!(format!("{:?}", tape), "Tape(\"Hello↪ world\", len=11)");
    }

    #[test]
    fn test_peek_relative_to_head() {
        let tape = Tape::new();
        tape.put_string("abcdef");
        consumed(&tape, 2);
        assert_eq!(tape.peek(0), Some('c'));
        assert_eq!(tape.peek(-1), Some('b'));
        assert_eq!(tape.peek(-2), Some('a'));
        assert_eq!(tape.peek(-3), None);
        assert_eq!(tape.peek(4), None);
        assert_eq!(tape.peek_range(..0), "ab");
        assert_eq!(tape.peek_range(-1..=1), "bcd");
        assert_eq!(tape.peek_range(..), "abcdef");
        assert_eq!(tape.peek_range(3..1), "");
        assert_eq!(tape.head(), 2);
    }

    #[test]
    fn test_trim_matches_left_then_right_cut() {
        let trimmed = Tape::new();
        let cut = Tape::new();
        for tape in [&trimmed, &cut] {
            tape.put_string("abcdefghijKLMNOPQRST");
            consumed(tape, 10);
        }
        let mut seen = None;
        let raw = trimmed.trim(
            |pending| {
                seen = Some(pending);
                2
            },
            3,
        );
        cut.cut(2, Keep::Left);
        cut.cut(-3, Keep::Right);

        assert_eq!(seen, Some(10));
        assert_eq!(raw, "hijKL");
        assert_eq!(trimmed.to_string(), cut.to_string());
    }

    #[test]
    fn test_trim_blocks_readers_until_both_cuts_are_done() {
        let tape = Arc::new(Tape::new());
        tape.put_string("abcdefgh");
        consumed(&tape, 2);

        let mut reader = None;
        let raw = tape.trim(
            |pending| {
                let tape = tape.clone();
                reader = Some(thread::spawn(move || tape.get_char()));
                thread::sleep(SHORT);
                assert_eq!(pending, 6);
                2
            },
            10,
        );
        assert_eq!(raw, "abcd");
        // The reader only got through after the look-ahead was cut
        assert_eq!(reader.unwrap().join().unwrap(), 'c');
        assert_eq!(tape.to_string(), "abc↪d");
    }

    #[test]
    fn test_cut_left_keeps_lookahead() {
        let tape = Tape::new();
        tape.put_string("xyzABCDE");
        consumed(&tape, 3);
        tape.cut(2, Keep::Left);
        assert_eq!(tape.to_string(), "xyz↪AB");
        assert_eq!(tape.get_char(), 'A');
        assert_eq!(tape.get_char(), 'B');
        assert_eq!(tape.get_char_timeout(SHORT), None);
    }

    #[test]
    fn test_cut_left_negative_marks_everything_emitted() {
        let tape = Tape::new();
        tape.put_string("0123456789");
        consumed(&tape, 6);
        tape.cut(-2, Keep::Left);
        assert_eq!(tape.to_string(), "0123↪");
        assert_eq!(tape.pending_len(), 0);
    }

    #[test]
    fn test_cut_right_keeps_tail_of_history() {
        let tape = Tape::new();
        tape.put_string("Hello world");
        consumed(&tape, 11);
        tape.cut(-3, Keep::Right);
        assert_eq!(tape.to_string(), "rld↪");
        assert_eq!(tape.len(), 3);
    }

    #[test]
    fn test_cut_right_preserves_pending() {
        let tape = Tape::new();
        tape.put_string("Hello world");
        consumed(&tape, 5);
        tape.cut(-3, Keep::Right);
        assert_eq!(tape.to_string(), "llo↪ world");
    }

    #[test]
    fn test_cut_right_positive_makes_rest_pending() {
        let tape = Tape::new();
        tape.put_string("Hello world");
        consumed(&tape, 5);
        tape.cut(2, Keep::Right);
        assert_eq!(tape.to_string(), "↪orld");
        assert_eq!(tape.get_char(), 'o');
    }

    #[test]
    fn test_cut_out_of_range_clamps() {
        let tape = Tape::new();
        tape.put_string("abc");
        consumed(&tape, 1);
        tape.cut(100, Keep::Left);
        assert_eq!(tape.to_string(), "a↪bc");
        tape.cut(-100, Keep::Right);
        assert_eq!(tape.to_string(), "a↪bc");
        tape.cut(-100, Keep::Left);
        assert_eq!(tape.to_string(), "↪");
        assert!(tape.is_empty());
    }

    #[test]
    fn test_keep_parse() {
        assert_eq!("left".parse::<Keep>(), Ok(Keep::Left));
        assert_eq!("right".parse::<Keep>(), Ok(Keep::Right));
        assert!("middle".parse::<Keep>().is_err());
    }

    #[test]
    fn test_cut_then_put_continues_stream() {
        // Consume some, cut the stale lookahead, append fresh text
        let tape = Tape::new();
        tape.put_string("Hello, how are you? I am fine, thank you.");
        assert_eq!(consumed(&tape, 20), "Hello, how are you? ");
        tape.cut(5, Keep::Left);
        tape.put_string("CUT LEFT");
        assert_eq!(consumed(&tape, 10), "I am CUT L");
        tape.cut(-10, Keep::Right);
        assert_eq!(consumed(&tape, 3), "EFT");
        assert_eq!(format!("{:?}", tape), "Tape(\"I am CUT LEFT↪\", len=13)");
    }

    #[test]
    fn test_head_invariant_under_random_ops() {
        let mut rng = StdRng::seed_from_u64(7);
        let tape = Tape::new();
        for _ in 0..5000 {
            match rng.gen_range(0..4) {
                0 => tape.put_string(&"abc"[..rng.gen_range(0..=3)]),
                1 => {
                    let _ = tape.get_char_timeout(Duration::ZERO);
                }
                2 => tape.cut(rng.gen_range(-20..20), Keep::Left),
                _ => tape.cut(rng.gen_range(-20..20), Keep::Right),
            }
            assert!(tape.head() <= tape.len());
        }
    }

    #[test]
    fn test_fifo_across_threads() {
        let tape = Arc::new(Tape::new());
        let reader = {
            let tape = Arc::clone(&tape);
            thread::spawn(move || consumed(&tape, 26))
        };
        for c in 'a'..='z' {
            tape.put_string(&c.to_string());
        }
        assert_eq!(reader.join().unwrap(), "abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn test_blocked_reader_wakes_on_put() {
        let tape = Arc::new(Tape::new());
        let reader = {
            let tape = Arc::clone(&tape);
            thread::spawn(move || {
                let start = Instant::now();
                let c = tape.get_char();
                (c, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(100));
        let put_at = Instant::now();
        tape.put_string("x");
        let (c, waited) = reader.join().unwrap();
        assert_eq!(c, 'x');
        assert!(waited >= Duration::from_millis(90));
        assert!(put_at.elapsed() < Duration::from_millis(500));
    }
}
