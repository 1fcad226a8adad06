//! Seer CLI
//!
//! Usage:
//!   narrate | seer                          # RAW thoughts from narrations on stdin
//!   narrate | seer --rolling-tape           # Redraw the tape on every character
//!   seer --no-fast                          # Slow thoughts only, no video
//!   seer --replay session.jsonl --scale 0.5 # Re-emit a recorded narration session
//!   seer --untape < recording.cast          # Rolling-tape recording back to text

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tokio::runtime::Handle;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use seer::config::{Config, LogConfig, SlowConfig, SlowMode};
use seer::core::{
    load_events, replay, run_fast_reader, run_slow_sampler, run_untape, Context, HashingEmbedder, Jitter,
    OutputPacer, PromptTemplate, RandomSampler, RawStreamCoordinator, RenderMode, ReplayOptions, SemanticWalker,
    SlowThoughtSource, StreamOptions, Supervisor, ThoughtCorpus,
};
use seer::provider::AnthropicGenerator;
use seer::types::unix_now;
use seer::VERSION;

/// Grace period for workers to stop after the first one exits
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(
    name = "seer",
    version = VERSION,
    about = "Seer - a stream of consciousness for a camera",
    long_about = "Seer turns narrations of a live video feed into a paced stream of RAW thoughts.\n\n\
                  Fast input: JSON lines on stdin ({\"timestamp\": .., \"narration\": .., \"frame\": ..})\n\
                  Slow input: seed thoughts sampled from a corpus\n\n\
                  Modes:\n  \
                  (default)      RAW thought stream\n  \
                  --replay FILE  Re-emit a recorded narration session\n  \
                  --untape       Decode a rolling-tape recording from stdin"
)]
struct Args {
    /// Redraw the whole tape (with head marker) on every character
    #[arg(long)]
    rolling_tape: bool,

    /// Wall-clock start of recorded input; timestamps are rebased to now
    #[arg(long, allow_hyphen_values = true)]
    time_offset: Option<f64>,

    /// Disable the slow-thought stream
    #[arg(long)]
    no_slow: bool,

    /// Disable the fast-input stream
    #[arg(long)]
    no_fast: bool,

    /// Never attach frames to prompts
    #[arg(long)]
    ignore_frames: bool,

    /// Encourage ASCII art
    #[arg(long)]
    ascii: bool,

    /// Disable colors in output
    #[arg(long)]
    no_color: bool,

    /// Config file (default: ./seer.toml if present)
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Override a config value, e.g. --config pacer.chars_per_sec=20
    #[arg(long = "config", value_name = "KEY=VALUE")]
    config: Vec<String>,

    /// Replay a recorded narration .jsonl file to stdout
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Replay speed factor applied to recorded gaps
    #[arg(long, default_value_t = 1.0)]
    scale: f64,

    /// Replay bare narrations instead of JSON lines
    #[arg(long)]
    text: bool,

    /// Decode rolling-tape output from stdin to plain text
    #[arg(long)]
    untape: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            let message = format!("{:#}", e);
            tracing::error!(error = %message, "Fatal error");
            eprintln!("seer: {}", message);
            1
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<i32> {
    if args.no_color {
        colored::control::set_override(false);
    }

    if args.untape {
        tokio::task::spawn_blocking(|| run_untape(io::stdin().lock(), io::stdout().lock())).await??;
        return Ok(0);
    }

    let config = load_config(&args)?;
    init_logging(&config.log)?;
    tracing::debug!(?config, "Configuration loaded");

    if let Some(path) = args.replay.clone() {
        return run_replay(path, &args).await;
    }

    run_stream(args, config).await
}

/// Defaults < config file < environment < --config overrides
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = Config::load(args.config_file.as_deref())?;
    config.apply_env();
    config.apply_overrides(&args.config)?;
    config.validate()?;
    Ok(config)
}

/// Log to `log.dir/seer.log`, or stderr; stdout belongs to the tape
fn init_logging(log: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);

    match &log.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
            let path = dir.join("seer.log");
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .try_init()?;
        }
        None => registry.with(fmt::layer().with_writer(io::stderr)).try_init()?,
    }
    Ok(())
}

async fn run_replay(path: PathBuf, args: &Args) -> anyhow::Result<i32> {
    let events = load_events(&path)?;
    tracing::info!(events = events.len(), path = %path.display(), scale = args.scale, "Replaying");
    let options = ReplayOptions {
        scale: args.scale,
        jsonl: !args.text,
    };
    tokio::task::spawn_blocking(move || replay(&events, &mut io::stdout().lock(), options, std::thread::sleep))
        .await??;
    Ok(0)
}

fn slow_source(slow: &SlowConfig) -> anyhow::Result<Box<dyn SlowThoughtSource>> {
    let corpus = match &slow.thoughts_file {
        Some(path) => ThoughtCorpus::load(path)?,
        None => ThoughtCorpus::builtin(),
    };
    let source: Box<dyn SlowThoughtSource> = match slow.mode {
        SlowMode::Random => Box::new(RandomSampler::new(corpus, slow.seed)),
        SlowMode::Walk => {
            let embedder = Arc::new(HashingEmbedder::new(slow.embedding_dimension));
            let walker = SemanticWalker::new(corpus, embedder, slow.max_steps, slow.seed)
                .context("failed to embed thought corpus")?;
            Box::new(walker)
        }
    };
    Ok(source)
}

/// Run the four workers until the first one exits
async fn run_stream(args: Args, config: Config) -> anyhow::Result<i32> {
    let options = StreamOptions {
        fast: !args.no_fast,
        slow: !args.no_slow,
        ignore_frames: args.ignore_frames,
        rolling_tape: args.rolling_tape,
        color: !args.no_color,
        ascii: args.ascii,
        time_offset: args.time_offset,
    };
    options.validate()?;

    let mut generator = AnthropicGenerator::new(config.model.api_key.clone().unwrap_or_default())?;
    if let Some(url) = &config.model.base_url {
        generator = generator.with_base_url(url.as_str());
    }
    let template = PromptTemplate::load(
        config.model.system_prompt_file.as_deref(),
        config.model.prompt_file.as_deref(),
    )
    .context("failed to load prompt templates")?;
    let source = if options.slow { Some(slow_source(&config.slow)?) } else { None };

    let jitter = Jitter::new(config.pacer.chars_per_sec, config.pacer.jitter);
    let mode = if options.rolling_tape {
        RenderMode::Rolling { color: options.color }
    } else {
        RenderMode::Plain
    };
    let process_start = unix_now();
    let ctx = Arc::new(Context::new(config, options));
    let poll = ctx.poll_interval();

    tracing::info!(
        version = VERSION,
        fast = ctx.options.fast,
        slow = ctx.options.slow,
        rolling_tape = ctx.options.rolling_tape,
        "Seer starting"
    );

    let mut supervisor = Supervisor::new(ctx.clone());

    let mut coordinator =
        RawStreamCoordinator::new(ctx.clone(), Arc::new(generator), Handle::current()).with_template(template);
    supervisor.spawn("coordinator", move || coordinator.run())?;

    let pacer_ctx = ctx.clone();
    supervisor.spawn("pacer", move || OutputPacer::new(io::stdout(), jitter, mode).run(&pacer_ctx))?;

    if ctx.options.fast {
        let fast_ctx = ctx.clone();
        supervisor.spawn("fast-reader", move || {
            run_fast_reader(&fast_ctx, io::stdin().lock(), process_start)
        })?;
    }

    if let Some(mut source) = source {
        let slow_ctx = ctx.clone();
        supervisor.spawn("slow-sampler", move || run_slow_sampler(&slow_ctx, source.as_mut()))?;
    }

    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_ctx.request_shutdown();
        }
    });

    let exit = tokio::task::spawn_blocking(move || {
        let first = supervisor.wait_first(poll);
        supervisor.shutdown(SHUTDOWN_GRACE);
        first
    })
    .await?;

    Ok(match exit {
        Some((worker, exit)) => {
            tracing::info!(worker = %worker, ?exit, "Seer stopping");
            exit.exit_code()
        }
        None => 0,
    })
}
