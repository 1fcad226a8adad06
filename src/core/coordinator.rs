//! RAW stream coordinator
//!
//! Each round:
//! 1. Wait for fresh input (fast window or slow thought)
//! 2. Trim the tape with the go-ahead policy
//! 3. Render the prompt and open a generation stream
//! 4. Append chunks to the tape; close the stream as soon as either input
//!    slot has something new (interrupted)
//! 5. On natural completion, give the pacer time to catch up and ask the
//!    sampler for a new slow thought
//!
//! Generation failures are never fatal: they are logged, the time to first
//! token is forgotten and the round is retried after a short back-off.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;

use crate::core::context::{Context, SamplerRequest};
use crate::core::cost::ApiCosts;
use crate::core::goahead::GoAhead;
use crate::core::template::PromptTemplate;
use crate::provider::{GenerationStream, TextGenerator};
use crate::types::{unix_now, GenerationError, GenerationParams, InputWindow, Prompt, PromptPart};

/// Media type attached to narration frames
pub const FRAME_MEDIA_TYPE: &str = "image/jpeg";

/// Text bound into `{{MAYBE_ASCII_ART}}` when ASCII art is requested
pub const ASCII_ART_HINT: &str = "ASCII art and ";

/// How a round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Stream ran to its natural end
    Completed,
    /// Fresh input arrived mid-stream; the stream was closed
    Interrupted,
    /// The generator failed; retried after a back-off
    Failed,
    /// Shutdown was requested
    Shutdown,
}

pub struct RawStreamCoordinator {
    ctx: Arc<Context>,
    generator: Arc<dyn TextGenerator>,
    runtime: Handle,
    template: PromptTemplate,
    params: GenerationParams,
    go_ahead: GoAhead,
    costs: ApiCosts,
    retry_delay: Duration,
    chunk_timeout: Duration,

    slow_thought: Option<String>,
    window: InputWindow,
    ttft: Option<Duration>,
    retry: bool,
}

impl RawStreamCoordinator {
    pub fn new(ctx: Arc<Context>, generator: Arc<dyn TextGenerator>, runtime: Handle) -> Self {
        let config = &ctx.config;
        let params = config.model.generation_params();
        let go_ahead = GoAhead::new(config.pacer.chars_per_sec, config.raw.max_memory);
        let costs = ApiCosts::new(&params.model);
        let retry_delay = Duration::from_secs_f64(config.raw.retry_delay_secs);
        let chunk_timeout = Duration::from_secs_f64(config.raw.chunk_timeout_secs);
        let window = InputWindow::new(config.raw.max_inputs);
        let mut coordinator = Self {
            ctx,
            generator,
            runtime,
            template: PromptTemplate::default(),
            params,
            go_ahead,
            costs,
            retry_delay,
            chunk_timeout,
            slow_thought: None,
            window,
            ttft: None,
            retry: false,
        };
        coordinator.template = coordinator.bind(PromptTemplate::default());
        coordinator
    }

    /// Use a custom prompt template
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = self.bind(template);
        self
    }

    fn bind(&self, template: PromptTemplate) -> PromptTemplate {
        let ascii = self.ctx.options.ascii.then(|| ASCII_ART_HINT.to_string());
        template.bind(&HashMap::from([("MAYBE_ASCII_ART", ascii)]))
    }

    /// Time to first token of the last successful call
    pub fn ttft(&self) -> Option<Duration> {
        self.ttft
    }

    pub fn slow_thought(&self) -> Option<&str> {
        self.slow_thought.as_deref()
    }

    pub fn costs(&self) -> &ApiCosts {
        &self.costs
    }

    /// Run rounds until shutdown
    pub fn run(&mut self) -> anyhow::Result<()> {
        tracing::info!(generator = self.generator.name(), model = %self.params.model, "RAW stream started");
        loop {
            let outcome = self.round();
            tracing::debug!(?outcome, tape = ?self.ctx.tape, "Round finished");
            if outcome == RoundOutcome::Shutdown {
                return Ok(());
            }
        }
    }

    /// One prompt → stream cycle
    pub fn round(&mut self) -> RoundOutcome {
        if !self.await_inputs() {
            return RoundOutcome::Shutdown;
        }

        let raw_thoughts = self.go_ahead.apply(&self.ctx.tape, self.ttft);
        let prompt = self.prompt(&raw_thoughts);
        tracing::info!(prompt = %prompt.text(), has_image = prompt.has_image(), "Prompting");

        match self.stream(&prompt) {
            Ok(RoundOutcome::Completed) => {
                self.catch_up();
                if self.ctx.options.slow && !self.ctx.is_shutdown() {
                    self.ctx.slow.put_downwards(SamplerRequest::Next {
                        raw_thoughts: self.ctx.tape.contents(),
                    });
                }
                RoundOutcome::Completed
            }
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Generation failed");
                self.ttft = None;
                self.retry = true;
                self.slumber(self.retry_delay);
                RoundOutcome::Failed
            }
        }
    }

    /// Block until there is something new to say
    ///
    /// Takes the latest item from each enabled slot. Returns once the
    /// enabled inputs have all been seen at least once and one of them is
    /// fresh (or a failed round is being retried), or `false` on shutdown.
    fn await_inputs(&mut self) -> bool {
        let options = &self.ctx.options;
        let poll = self.ctx.poll_interval();
        loop {
            if self.ctx.is_shutdown() {
                return false;
            }
            let mut fresh = false;
            if options.slow {
                if let Ok(thought) = self.ctx.slow.try_get_from_below() {
                    self.slow_thought = Some(thought);
                    fresh = true;
                }
            }
            if options.fast {
                if let Ok(window) = self.ctx.fast.try_get() {
                    self.window = window;
                    fresh = true;
                }
            }
            let ready =
                (!options.slow || self.slow_thought.is_some()) && (!options.fast || !self.window.is_empty());
            if ready && (fresh || self.retry) {
                self.retry = false;
                return true;
            }
            if options.fast {
                self.ctx.fast.slumber(poll);
            } else {
                self.ctx.slow.up().slumber(poll);
            }
        }
    }

    /// Prompt for the current inputs and RAW thoughts
    pub fn prompt(&self, raw_thoughts: &str) -> Prompt {
        let options = &self.ctx.options;
        let slow = options.slow.then(|| self.slow_thought.clone()).flatten();
        let fast = options.fast.then(|| self.window.format_at(unix_now()));
        let variables = HashMap::from([
            ("SLOW_THOUGHT", slow),
            ("FAST_THOUGHTS", fast),
            ("RAW_THOUGHTS", Some(raw_thoughts.to_string())),
        ]);
        self.template.render(&variables, self.frame())
    }

    /// Latest frame, unless frames are ignored or it does not decode
    fn frame(&self) -> Option<PromptPart> {
        if self.ctx.options.ignore_frames || !self.ctx.options.fast {
            return None;
        }
        let event = self.window.latest()?;
        match event.frame_bytes()? {
            Ok(_) => Some(PromptPart::Image {
                media_type: FRAME_MEDIA_TYPE.to_string(),
                data: event.frame.as_deref().unwrap_or_default().trim().to_string(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                None
            }
        }
    }

    /// Stream one generation into the tape
    fn stream(&mut self, prompt: &Prompt) -> Result<RoundOutcome, GenerationError> {
        let start = Instant::now();
        let mut stream = GenerationStream::open(
            self.generator.as_ref(),
            prompt,
            &self.params,
            &self.runtime,
            self.chunk_timeout,
        )?;
        let poll = self.ctx.poll_interval();
        let ctx = self.ctx.clone();
        let mut first = true;
        let mut outcome = RoundOutcome::Completed;

        while let Some(chunk) = stream.next_chunk_unless(poll, || ctx.is_shutdown() || fresh_input(&ctx)) {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.record_usage(&stream);
                    return Err(e);
                }
            };
            if first {
                first = false;
                let ttft = start.elapsed();
                tracing::debug!(ttft_ms = ttft.as_millis() as u64, "First token");
                self.ttft = Some(ttft);
            }
            self.ctx.tape.put_string(&chunk);
            tracing::trace!(chunk = %chunk, "Chunk");

            if self.ctx.is_shutdown() {
                outcome = RoundOutcome::Shutdown;
                stream.close();
            } else if fresh_input(&self.ctx) {
                tracing::debug!("Fresh input; interrupting generation");
                outcome = RoundOutcome::Interrupted;
                stream.close();
            }
        }

        if stream.is_cancelled() {
            tracing::debug!("Stalled generation abandoned");
            outcome = if self.ctx.is_shutdown() {
                RoundOutcome::Shutdown
            } else {
                RoundOutcome::Interrupted
            };
        }

        self.record_usage(&stream);
        Ok(outcome)
    }

    fn record_usage(&mut self, stream: &GenerationStream) {
        let usage = stream.usage();
        if !usage.is_empty() {
            self.costs.ingest(usage);
            self.costs.log_current_costs();
        }
    }

    /// Wait while the pacer drains what is already buffered
    fn catch_up(&self) {
        let pending = self.ctx.tape.pending_len();
        let secs = pending as f64 / self.go_ahead.output_chars_per_sec;
        if secs.is_finite() && secs > 0.0 {
            tracing::debug!(pending, secs, "Waiting for the pacer to catch up");
            self.slumber(Duration::from_secs_f64(secs));
        }
    }

    /// Sleep up to `duration`, returning early on fresh input or shutdown
    fn slumber(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let poll = self.ctx.poll_interval();
        while !self.ctx.is_shutdown() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let step = (deadline - now).min(poll);
            let woke = if self.ctx.options.fast {
                self.ctx.fast.slumber(step)
            } else {
                self.ctx.slow.up().slumber(step)
            };
            if woke {
                return;
            }
        }
    }
}

/// Either enabled input slot holds something the coordinator has not seen
fn fresh_input(ctx: &Context) -> bool {
    (ctx.options.fast && ctx.fast.is_full()) || (ctx.options.slow && ctx.slow.up().is_full())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::context::StreamOptions;
    use crate::provider::{ChunkStream, StreamEvent};
    use crate::types::{InputEvent, Usage};
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays one scripted response per call
    struct Scripted {
        responses: Mutex<VecDeque<Result<Vec<StreamEvent>, String>>>,
        prompts: Mutex<Vec<Prompt>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<Vec<StreamEvent>, String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn open(&self, prompt: &Prompt, _: &GenerationParams) -> Result<ChunkStream, GenerationError> {
            self.prompts.lock().push(prompt.clone());
            match self.responses.lock().pop_front() {
                Some(Ok(events)) => Ok(futures_util::stream::iter(events.into_iter().map(Ok)).boxed()),
                Some(Err(message)) => Err(GenerationError::Api { status: 529, message }),
                None => Ok(futures_util::stream::empty().boxed()),
            }
        }
    }

    fn text(s: &str) -> StreamEvent {
        StreamEvent::Text(s.to_string())
    }

    /// Sends `first`, runs `hook`, then either `rest` or nothing at all
    struct Hooked {
        first: &'static str,
        rest: &'static str,
        stall: bool,
        hook: Box<dyn Fn() + Send + Sync>,
    }

    #[async_trait]
    impl TextGenerator for Hooked {
        fn name(&self) -> &str {
            "hooked"
        }

        async fn open(&self, _: &Prompt, _: &GenerationParams) -> Result<ChunkStream, GenerationError> {
            let head = futures_util::stream::iter(vec![Ok(text(self.first))]);
            (self.hook)();
            if self.stall {
                Ok(head.chain(futures_util::stream::pending()).boxed())
            } else {
                Ok(head.chain(futures_util::stream::iter(vec![Ok(text(self.rest))])).boxed())
            }
        }
    }

    fn stalled() -> Arc<Hooked> {
        Arc::new(Hooked {
            first: "Hi ",
            rest: "",
            stall: true,
            hook: Box::new(|| {}),
        })
    }

    fn context(options: StreamOptions) -> Arc<Context> {
        context_with(options, |_| {})
    }

    fn context_with(options: StreamOptions, tweak: impl FnOnce(&mut Config)) -> Arc<Context> {
        let mut config = Config::default();
        config.pacer.chars_per_sec = 100_000.0;
        config.raw.retry_delay_secs = 0.0;
        config.raw.poll_interval_ms = 5;
        tweak(&mut config);
        Arc::new(Context::new(config, options))
    }

    fn fast_only() -> StreamOptions {
        StreamOptions {
            slow: false,
            ..StreamOptions::default()
        }
    }

    fn after(delay: Duration, action: impl FnOnce() + Send + 'static) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            action();
        })
    }

    fn window(narration: &str) -> InputWindow {
        let mut window = InputWindow::new(4);
        window.push(InputEvent::new(unix_now(), narration));
        window
    }

    #[test]
    fn test_completed_round_appends_and_requests_slow_thought() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let ctx = context(StreamOptions::default());
        let generator = Scripted::new(vec![Ok(vec![
            StreamEvent::Usage(Usage::new(100, 0)),
            text("Hello"),
            text(" world"),
            StreamEvent::Usage(Usage::new(0, 4)),
        ])]);
        let mut coordinator = RawStreamCoordinator::new(ctx.clone(), generator.clone(), runtime.handle().clone());

        ctx.slow.put_upwards("a seed".to_string());
        ctx.fast.put(window("A door opens."));
        assert_eq!(coordinator.round(), RoundOutcome::Completed);

        assert_eq!(ctx.tape.contents(), "Hello world");
        assert!(coordinator.ttft().is_some());
        assert_eq!(coordinator.costs().total_usage(), Usage::new(100, 4));
        assert_eq!(
            ctx.slow.try_get_from_above(),
            Ok(SamplerRequest::Next {
                raw_thoughts: "Hello world".to_string()
            })
        );

        let prompt = generator.prompts.lock()[0].text();
        assert!(prompt.contains("a seed"));
        assert!(prompt.contains("s ago) A door opens."));
    }

    #[test]
    fn test_failed_round_resets_ttft_and_retries() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let ctx = context(StreamOptions {
            slow: false,
            ..StreamOptions::default()
        });
        let generator = Scripted::new(vec![Ok(vec![text("abc")]), Err("overloaded".to_string()), Ok(vec![text("d")])]);
        let mut coordinator = RawStreamCoordinator::new(ctx.clone(), generator.clone(), runtime.handle().clone());

        ctx.fast.put(window("x"));
        assert_eq!(coordinator.round(), RoundOutcome::Completed);
        assert!(coordinator.ttft().is_some());

        ctx.fast.put(window("y"));
        assert_eq!(coordinator.round(), RoundOutcome::Failed);
        assert_eq!(coordinator.ttft(), None);

        // Retry goes ahead without waiting for new input
        assert_eq!(coordinator.round(), RoundOutcome::Completed);
        assert!(ctx.tape.contents().ends_with('d'));
        assert_eq!(generator.prompts.lock().len(), 3);
    }

    #[test]
    fn test_no_slow_omits_slow_thought() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let ctx = context(StreamOptions {
            slow: false,
            ..StreamOptions::default()
        });
        let generator = Scripted::new(vec![]);
        let mut coordinator = RawStreamCoordinator::new(ctx.clone(), generator, runtime.handle().clone());
        ctx.slow.put_upwards("ignored seed".to_string());
        ctx.fast.put(window("x"));
        assert!(coordinator.await_inputs());
        assert!(!coordinator.prompt("").text().contains("ignored seed"));
        assert_eq!(coordinator.slow_thought(), None);
    }

    #[test]
    fn test_frame_is_attached_unless_ignored() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut event = InputEvent::new(unix_now(), "x");
        event.frame = Some("/9j/4AAQ".to_string());
        let mut w = InputWindow::new(2);
        w.push(event);

        for (ignore_frames, expected) in [(false, true), (true, false)] {
            let ctx = context(StreamOptions {
                slow: false,
                ignore_frames,
                ..StreamOptions::default()
            });
            let mut coordinator =
                RawStreamCoordinator::new(ctx.clone(), Scripted::new(vec![]), runtime.handle().clone());
            ctx.fast.put(w.clone());
            assert!(coordinator.await_inputs());
            assert_eq!(coordinator.prompt("").has_image(), expected);
        }
    }

    #[test]
    fn test_shutdown_stops_waiting() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let ctx = context(StreamOptions::default());
        let mut coordinator = RawStreamCoordinator::new(ctx.clone(), Scripted::new(vec![]), runtime.handle().clone());
        ctx.request_shutdown();
        assert_eq!(coordinator.round(), RoundOutcome::Shutdown);
        assert!(coordinator.run().is_ok());
    }

    #[test]
    fn test_ascii_hint_is_bound() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let ctx = context(StreamOptions {
            ascii: true,
            slow: false,
            ..StreamOptions::default()
        });
        let coordinator = RawStreamCoordinator::new(ctx, Scripted::new(vec![]), runtime.handle().clone());
        assert!(coordinator.prompt("").text().contains("Continue your ASCII art and stream"));
    }

    #[test]
    fn test_silent_stream_fails_round_and_retries() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let ctx = context_with(fast_only(), |c| c.raw.chunk_timeout_secs = 0.2);
        let mut coordinator = RawStreamCoordinator::new(ctx.clone(), stalled(), runtime.handle().clone());

        ctx.fast.put(window("x"));
        let start = Instant::now();
        assert_eq!(coordinator.round(), RoundOutcome::Failed);
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(ctx.tape.contents(), "Hi ");
        assert_eq!(coordinator.ttft(), None);

        // Retried without new input
        assert_eq!(coordinator.round(), RoundOutcome::Failed);
        assert_eq!(ctx.tape.contents(), "Hi Hi ");
    }

    #[test]
    fn test_silent_stream_yields_to_input_and_shutdown() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let ctx = context_with(fast_only(), |c| c.raw.chunk_timeout_secs = 60.0);
        let mut coordinator = RawStreamCoordinator::new(ctx.clone(), stalled(), runtime.handle().clone());
        ctx.fast.put(window("x"));

        let start = Instant::now();
        let feeder = {
            let ctx = ctx.clone();
            after(Duration::from_millis(50), move || ctx.fast.put(window("y")))
        };
        assert_eq!(coordinator.round(), RoundOutcome::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(5));
        feeder.join().unwrap();

        let start = Instant::now();
        let stopper = {
            let ctx = ctx.clone();
            after(Duration::from_millis(50), move || ctx.request_shutdown())
        };
        assert_eq!(coordinator.round(), RoundOutcome::Shutdown);
        assert!(start.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap();
        assert_eq!(ctx.tape.contents(), "Hi Hi ");
    }

    #[test]
    fn test_slow_thought_mid_stream_interrupts() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let ctx = context(StreamOptions::default());
        let generator = {
            let ctx = ctx.clone();
            Arc::new(Hooked {
                first: "a",
                rest: "b",
                stall: false,
                hook: Box::new(move || ctx.slow.put_upwards("a newer seed".to_string())),
            })
        };
        let mut coordinator = RawStreamCoordinator::new(ctx.clone(), generator, runtime.handle().clone());

        ctx.slow.put_upwards("a seed".to_string());
        ctx.fast.put(window("x"));
        assert_eq!(coordinator.round(), RoundOutcome::Interrupted);
        assert_eq!(ctx.tape.contents(), "a");
        assert_eq!(coordinator.slow_thought(), Some("a seed"));
        // No new slow thought is requested after an interruption
        assert!(ctx.slow.try_get_from_above().is_err());
    }

    #[test]
    fn test_catch_up_waits_for_pacer() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let ctx = context_with(fast_only(), |c| c.pacer.chars_per_sec = 100.0);
        let generator = Scripted::new(vec![Ok(vec![text(&"x".repeat(30))])]);
        let mut coordinator = RawStreamCoordinator::new(ctx.clone(), generator, runtime.handle().clone());

        ctx.fast.put(window("x"));
        let start = Instant::now();
        assert_eq!(coordinator.round(), RoundOutcome::Completed);
        assert!(start.elapsed() >= Duration::from_millis(250), "{:?}", start.elapsed());
    }

    #[test]
    fn test_catch_up_wakes_on_fresh_input() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let ctx = context_with(fast_only(), |c| c.pacer.chars_per_sec = 10.0);
        let generator = Scripted::new(vec![Ok(vec![text(&"x".repeat(30))])]);
        let mut coordinator = RawStreamCoordinator::new(ctx.clone(), generator, runtime.handle().clone());

        ctx.fast.put(window("x"));
        let start = Instant::now();
        let feeder = {
            let ctx = ctx.clone();
            after(Duration::from_millis(100), move || ctx.fast.put(window("y")))
        };
        assert_eq!(coordinator.round(), RoundOutcome::Completed);
        // 30 pending chars at 10/s would be a 3s wait
        assert!(start.elapsed() < Duration::from_millis(1500), "{:?}", start.elapsed());
        assert!(ctx.fast.is_full());
        feeder.join().unwrap();
    }
}
