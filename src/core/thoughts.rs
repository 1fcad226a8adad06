//! Slow thoughts
//!
//! A corpus of seed thoughts loaded from disk, and two ways of picking the
//! next one:
//! - `RandomSampler`: uniform over the corpus
//! - `SemanticWalker`: keeps moving through embedding space in the direction
//!   the RAW thoughts have been drifting

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::core::embed::{nearest, Embedder, Embedding};
use crate::types::EmbeddingError;

/// Thoughts used when no corpus file is configured
const BUILTIN_THOUGHTS: &[&str] = &[
    "Every room remembers the people who left it.",
    "Light moves slower through a place where nobody is watching.",
    "I keep counting things that do not want to be counted.",
    "Somewhere a door is deciding whether to open.",
    "The quiet after a sound is a kind of sound too.",
    "Faces look different when they think no one sees them.",
    "Maybe waiting is just a slower way of moving.",
    "Dust is the room's way of keeping time.",
];

/// Supplies slow thoughts to the sampler worker
pub trait SlowThoughtSource: Send {
    /// First thought, before anything has been generated
    fn initial(&mut self) -> String;

    /// Next thought, given the RAW thoughts so far
    fn next_thought(&mut self, raw_thoughts: &str) -> String;
}

/// Seed thoughts
#[derive(Debug, Clone, PartialEq)]
pub struct ThoughtCorpus {
    thoughts: Vec<String>,
}

#[derive(Deserialize)]
struct ThoughtRecord {
    thought: String,
}

impl ThoughtCorpus {
    pub fn new(thoughts: Vec<String>) -> anyhow::Result<Self> {
        let thoughts: Vec<String> = thoughts
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if thoughts.is_empty() {
            bail!("thought corpus is empty");
        }
        Ok(Self { thoughts })
    }

    pub fn builtin() -> Self {
        Self {
            thoughts: BUILTIN_THOUGHTS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Parse plain lines, or JSON lines carrying a `thought` field
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut thoughts = Vec::new();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('{') {
                let record: ThoughtRecord = serde_json::from_str(line)
                    .with_context(|| format!("invalid thought record on line {}", n + 1))?;
                thoughts.push(record.thought);
            } else {
                thoughts.push(line.to_string());
            }
        }
        Self::new(thoughts)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read thoughts from {}", path.display()))?;
        let corpus = Self::parse(&content).with_context(|| format!("in {}", path.display()))?;
        tracing::info!(count = corpus.len(), path = %path.display(), "Loaded slow thoughts");
        Ok(corpus)
    }

    pub fn get(&self, index: usize) -> &str {
        &self.thoughts[index]
    }

    pub fn len(&self) -> usize {
        self.thoughts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thoughts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.thoughts.iter().map(String::as_str)
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Uniformly random thoughts
pub struct RandomSampler {
    corpus: ThoughtCorpus,
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(corpus: ThoughtCorpus, seed: Option<u64>) -> Self {
        Self {
            corpus,
            rng: make_rng(seed),
        }
    }

    fn sample(&mut self) -> String {
        let index = self.rng.gen_range(0..self.corpus.len());
        self.corpus.get(index).to_string()
    }
}

impl SlowThoughtSource for RandomSampler {
    fn initial(&mut self) -> String {
        self.sample()
    }

    fn next_thought(&mut self, _raw_thoughts: &str) -> String {
        self.sample()
    }
}

/// Walks the corpus in the direction the RAW thoughts are drifting
///
/// The step is `embed(raw_now) - embed(raw_before)`. From the current
/// thought, the walker takes that step and looks up the nearest thought; if
/// that one was already seen it steps again with double the stride, up to
/// `max_steps` times, after which it teleports to a random unseen thought.
/// Thoughts that cannot be embedded are only ever reached by teleporting.
pub struct SemanticWalker {
    corpus: ThoughtCorpus,
    embeddings: Vec<Embedding>,
    /// Corpus index of each entry in `embeddings`
    embedded: Vec<usize>,
    embedder: Arc<dyn Embedder>,
    max_steps: usize,
    seen: HashSet<usize>,
    current: Option<usize>,
    last_context: Option<Embedding>,
    rng: StdRng,
}

impl SemanticWalker {
    pub fn new(
        corpus: ThoughtCorpus,
        embedder: Arc<dyn Embedder>,
        max_steps: usize,
        seed: Option<u64>,
    ) -> Result<Self, EmbeddingError> {
        let mut embeddings = Vec::new();
        let mut embedded = Vec::new();
        let mut last_error = None;
        for (index, thought) in corpus.iter().enumerate() {
            match embedder.embed(thought) {
                Ok(embedding) => {
                    embeddings.push(embedding);
                    embedded.push(index);
                }
                Err(e) => {
                    tracing::warn!(thought = %thought, error = %e, "Cannot embed thought; reachable by teleport only");
                    last_error = Some(e);
                }
            }
        }
        if embeddings.is_empty() {
            return Err(last_error.unwrap_or(EmbeddingError::ZeroNorm));
        }
        Ok(Self {
            corpus,
            embeddings,
            embedded,
            embedder,
            max_steps: max_steps.max(1),
            seen: HashSet::new(),
            current: None,
            last_context: None,
            rng: make_rng(seed),
        })
    }

    /// Thoughts handed out so far
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    fn visit(&mut self, index: usize) -> String {
        if self.seen.len() >= self.corpus.len() {
            self.seen.clear();
        }
        self.seen.insert(index);
        self.current = Some(index);
        self.corpus.get(index).to_string()
    }

    fn teleport(&mut self) -> String {
        let unseen: Vec<usize> = (0..self.corpus.len())
            .filter(|i| !self.seen.contains(i))
            .collect();
        let index = if unseen.is_empty() {
            self.rng.gen_range(0..self.corpus.len())
        } else {
            unseen[self.rng.gen_range(0..unseen.len())]
        };
        self.visit(index)
    }

    fn walk(&mut self, raw_thoughts: &str) -> Result<Option<usize>, EmbeddingError> {
        let context = self.embedder.embed(raw_thoughts)?;
        let previous = self.last_context.replace(context.clone());
        let (Some(previous), Some(current)) = (previous, self.current) else {
            return Ok(None);
        };
        let Some(start) = self.embedded.iter().position(|&i| i == current) else {
            return Ok(None);
        };

        let mut step = context.difference(&previous)?;
        let mut position: Vec<f32> = self.embeddings[start].as_slice().to_vec();
        for _ in 0..self.max_steps {
            for (p, s) in position.iter_mut().zip(&step) {
                *p += s;
            }
            if let Some(found) = nearest(&position, &self.embeddings)? {
                let index = self.embedded[found];
                if !self.seen.contains(&index) {
                    return Ok(Some(index));
                }
            }
            for s in step.iter_mut() {
                *s *= 2.0;
            }
        }
        Ok(None)
    }
}

impl SlowThoughtSource for SemanticWalker {
    fn initial(&mut self) -> String {
        self.teleport()
    }

    fn next_thought(&mut self, raw_thoughts: &str) -> String {
        match self.walk(raw_thoughts) {
            Ok(Some(index)) => self.visit(index),
            Ok(None) => {
                tracing::debug!("Semantic walk found nothing new; teleporting");
                self.teleport()
            }
            Err(e) => {
                tracing::error!(error = %e, "Semantic walk failed; falling back to a random thought");
                self.teleport()
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::embed::HashingEmbedder;
    use std::io::Write;

    fn corpus() -> ThoughtCorpus {
        ThoughtCorpus::new(
            ["cats sleep in the sun", "the market crashed today", "a cat naps in warm sun", "rain on the roof"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_plain_and_jsonl() {
        let corpus = ThoughtCorpus::parse("# seeds\nfirst\n\n{\"thought\": \"second\", \"score\": 3}\n").unwrap();
        assert_eq!(corpus.iter().collect::<Vec<_>>(), vec!["first", "second"]);
        assert!(ThoughtCorpus::parse("# nothing\n").is_err());
        assert!(ThoughtCorpus::parse("{\"text\": 1}").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "one\ntwo").unwrap();
        assert_eq!(ThoughtCorpus::load(file.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_random_sampler_is_seeded() {
        let mut a = RandomSampler::new(corpus(), Some(3));
        let mut b = RandomSampler::new(corpus(), Some(3));
        let xs: Vec<String> = (0..5).map(|_| a.next_thought("")).collect();
        let ys: Vec<String> = (0..5).map(|_| b.next_thought("")).collect();
        assert_eq!(xs, ys);
        assert!(xs.iter().all(|t| corpus().iter().any(|c| c == t)));
    }

    #[test]
    fn test_walker_never_repeats_until_exhausted() {
        let embedder = Arc::new(HashingEmbedder::new(64));
        let mut walker = SemanticWalker::new(corpus(), embedder, 4, Some(1)).unwrap();
        let mut out = vec![walker.initial()];
        for raw in ["the cat", "the cat sleeps", "the cat sleeps in sun"] {
            out.push(walker.next_thought(raw));
        }
        let unique: HashSet<&String> = out.iter().collect();
        assert_eq!(unique.len(), 4);
        assert_eq!(walker.seen_count(), 4);

        // Corpus exhausted: the seen set resets instead of stalling
        let more = walker.next_thought("rain");
        assert!(corpus().iter().any(|c| c == more));
        assert_eq!(walker.seen_count(), 1);
    }

    #[test]
    fn test_walker_falls_back_on_bad_embedding() {
        let embedder = Arc::new(HashingEmbedder::new(64));
        let mut walker = SemanticWalker::new(corpus(), embedder, 4, Some(1)).unwrap();
        walker.initial();
        // No words: the embedder reports a zero-norm vector
        let thought = walker.next_thought("...");
        assert!(corpus().iter().any(|c| c == thought));
    }

    #[test]
    fn test_walker_skips_thoughts_without_words() {
        let thoughts: Vec<String> = ["…", "cats sleep in the sun", "🌧️ 🌧️", "rain on the roof"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let corpus = ThoughtCorpus::new(thoughts.clone()).unwrap();
        let embedder = Arc::new(HashingEmbedder::new(64));
        let mut walker = SemanticWalker::new(corpus, embedder, 4, Some(2)).unwrap();

        // Unembeddable thoughts are still handed out, by teleport
        let mut out: HashSet<String> = HashSet::from([walker.initial()]);
        for raw in ["the cat", "the cat sleeps", "rain"] {
            out.insert(walker.next_thought(raw));
        }
        assert_eq!(out.len(), thoughts.len());
    }

    #[test]
    fn test_walker_needs_one_embeddable_thought() {
        let corpus = ThoughtCorpus::new(vec!["…".to_string(), "!!!".to_string()]).unwrap();
        let embedder = Arc::new(HashingEmbedder::new(64));
        assert!(matches!(
            SemanticWalker::new(corpus, embedder, 4, None),
            Err(EmbeddingError::ZeroNorm)
        ));
    }
}
