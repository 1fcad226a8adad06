//! Streaming text generation
//!
//! A `TextGenerator` opens a stream of chunks for a prompt. The coordinator
//! consumes it through `GenerationStream`, which drives the async stream from
//! a plain worker thread and can be closed between any two chunks.

pub mod anthropic;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::runtime::Handle;

use crate::types::{GenerationError, GenerationParams, Prompt, Usage};

pub use anthropic::AnthropicGenerator;

/// One item of a model stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Generated text
    Text(String),
    /// Token usage reported by the model
    Usage(Usage),
}

/// Raw event stream returned by a generator
pub type ChunkStream = BoxStream<'static, Result<StreamEvent, GenerationError>>;

/// A model that streams text for a prompt
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Start generating; the returned stream yields chunks as they arrive
    async fn open(&self, prompt: &Prompt, params: &GenerationParams) -> Result<ChunkStream, GenerationError>;
}

/// Cancellable, blocking view of an in-flight generation
pub struct GenerationStream {
    inner: Option<ChunkStream>,
    runtime: Handle,
    usage: Usage,
    idle_timeout: Duration,
    cancelled: bool,
}

impl GenerationStream {
    /// Open a stream; blocks the calling thread until the first response arrives
    ///
    /// `idle_timeout` bounds the wait for the response and for every later
    /// event. Must not be called from inside the async runtime.
    pub fn open(
        generator: &dyn TextGenerator,
        prompt: &Prompt,
        params: &GenerationParams,
        runtime: &Handle,
        idle_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let inner = runtime
            .block_on(tokio::time::timeout(idle_timeout, generator.open(prompt, params)))
            .map_err(|_| GenerationError::Timeout(idle_timeout))??;
        Ok(Self {
            inner: Some(inner),
            runtime: runtime.clone(),
            usage: Usage::default(),
            idle_timeout,
            cancelled: false,
        })
    }

    /// Wait for the next non-empty text chunk
    ///
    /// Returns `None` once the stream has ended or been closed. An error
    /// closes the stream, including `GenerationError::Timeout` when nothing
    /// arrives within the idle timeout.
    pub fn next_chunk(&mut self) -> Option<Result<String, GenerationError>> {
        let idle_timeout = self.idle_timeout;
        self.next_chunk_unless(idle_timeout, || false)
    }

    /// Like `next_chunk`, but checks `cancel` every `poll` while waiting
    ///
    /// A stalled stream is closed as soon as `cancel` returns `true`; the
    /// call then returns `None` and `is_cancelled` reports it.
    pub fn next_chunk_unless<F>(&mut self, poll: Duration, cancel: F) -> Option<Result<String, GenerationError>>
    where
        F: Fn() -> bool,
    {
        let slice = poll.min(self.idle_timeout).max(Duration::from_millis(1));
        let mut last_event = Instant::now();
        loop {
            let inner = self.inner.as_mut()?;
            match self.runtime.block_on(tokio::time::timeout(slice, inner.next())) {
                Err(_elapsed) => {
                    if cancel() {
                        self.cancelled = true;
                        self.inner = None;
                        return None;
                    }
                    if last_event.elapsed() >= self.idle_timeout {
                        self.inner = None;
                        return Some(Err(GenerationError::Timeout(self.idle_timeout)));
                    }
                }
                Ok(None) => {
                    self.inner = None;
                    return None;
                }
                Ok(Some(Ok(StreamEvent::Text(text)))) => {
                    if !text.is_empty() {
                        return Some(Ok(text));
                    }
                    last_event = Instant::now();
                }
                Ok(Some(Ok(StreamEvent::Usage(usage)))) => {
                    self.usage.add(usage);
                    last_event = Instant::now();
                }
                Ok(Some(Err(e))) => {
                    self.inner = None;
                    return Some(Err(e));
                }
            }
        }
    }

    /// Stop generating; dropping the stream aborts the underlying request
    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Closed by a `cancel` check while waiting for data
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Usage reported so far
    pub fn usage(&self) -> Usage {
        self.usage
    }
}

impl Iterator for GenerationStream {
    type Item = Result<String, GenerationError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk()
    }
}
