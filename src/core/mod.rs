//! Core modules for Seer

pub mod context;
pub mod coordinator;
pub mod cost;
pub mod embed;
pub mod goahead;
pub mod ingest;
pub mod pacer;
pub mod replay;
pub mod slot;
pub mod supervisor;
pub mod tape;
pub mod template;
pub mod thoughts;
pub mod untape;

pub use context::{Context, SamplerRequest, StreamOptions};
pub use coordinator::{RawStreamCoordinator, RoundOutcome};
pub use cost::ApiCosts;
pub use embed::{Embedder, Embedding, HashingEmbedder};
pub use goahead::GoAhead;
pub use ingest::{run_fast_reader, run_slow_sampler};
pub use pacer::{Jitter, OutputPacer, RenderMode};
pub use replay::{load_events, replay, ReplayOptions};
pub use slot::{BidirectionalSlot, Slot};
pub use supervisor::{Supervisor, WorkerExit};
pub use tape::{Keep, Tape};
pub use template::PromptTemplate;
pub use thoughts::{RandomSampler, SemanticWalker, SlowThoughtSource, ThoughtCorpus};
pub use untape::{run_untape, Untaper};
