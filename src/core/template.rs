//! Prompt templates
//!
//! Prompt files are plain text; lines starting with `#` are comments.
//! `{{NAME}}` placeholders are substituted from a variable map. The
//! `{{OPTIONAL_FRAME}}` placeholder splits the prompt around an image part.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::types::{Prompt, PromptPart};

/// Placeholder replaced by the latest frame, when there is one
pub const FRAME_PLACEHOLDER: &str = "{{OPTIONAL_FRAME}}";

lazy_static! {
    static ref RE_VARIABLE: Regex = Regex::new(r"\{\{([A-Z][A-Z0-9_]*)\}\}").unwrap();
}

/// Built-in system prompt used when no file is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are the inner voice of a camera watching a room. You think in a loose, \
associative stream of consciousness: short fragments, no lists, no \
explanations, never addressing anyone.";

/// Built-in user prompt used when no file is configured
pub const DEFAULT_USER_PROMPT: &str = "\
A thought that has been on your mind:
<slow_thought>
{{SLOW_THOUGHT}}
</slow_thought>

What you have been seeing, newest last:
<video_narration>
{{FAST_THOUGHTS}}
</video_narration>
{{OPTIONAL_FRAME}}
Continue your {{MAYBE_ASCII_ART}}stream of consciousness exactly where it leaves off, \
without repeating it:
```
{{RAW_THOUGHTS}}";

/// Drop `#` comment lines
pub fn strip_comments(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .map(|line| format!("{}\n", line))
        .collect()
}

/// Read a prompt file, dropping comment lines
pub fn read_prompt_file(path: &Path) -> io::Result<String> {
    let text = std::fs::read_to_string(path)?;
    Ok(strip_comments(&text))
}

/// Substitute `{{NAME}}` placeholders
///
/// `None` values remove the placeholder. Names missing from `variables` are
/// left untouched so later passes can fill them.
pub fn replace_variables(template: &str, variables: &HashMap<&str, Option<String>>) -> String {
    RE_VARIABLE
        .replace_all(template, |caps: &Captures| match variables.get(&caps[1]) {
            Some(Some(value)) => value.clone(),
            Some(None) => String::new(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// System and user templates for the RAW stream
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub system: Option<String>,
    pub user: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            user: DEFAULT_USER_PROMPT.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Load templates from files, falling back to the built-in prompts
    pub fn load(system_file: Option<&Path>, user_file: Option<&Path>) -> io::Result<Self> {
        let mut template = Self::default();
        if let Some(path) = system_file {
            template.system = Some(read_prompt_file(path)?);
        }
        if let Some(path) = user_file {
            template.user = read_prompt_file(path)?;
        }
        Ok(template)
    }

    /// Fix variables that do not change between rounds (e.g. `MAYBE_ASCII_ART`)
    pub fn bind(mut self, variables: &HashMap<&str, Option<String>>) -> Self {
        self.user = replace_variables(&self.user, variables);
        self.system = self.system.map(|s| replace_variables(&s, variables));
        self
    }

    /// Build a prompt from the per-round variables and an optional frame
    pub fn render(&self, variables: &HashMap<&str, Option<String>>, frame: Option<PromptPart>) -> Prompt {
        let mut prompt = Prompt::new();
        prompt.system = self.system.clone();

        // Split before substituting: variable values may contain the placeholder text
        let mut pieces = self.user.splitn(2, FRAME_PLACEHOLDER);
        prompt.push_text(&replace_variables(pieces.next().unwrap_or_default(), variables));
        if let Some(rest) = pieces.next() {
            if let Some(frame) = frame {
                prompt.parts.push(frame);
            }
            prompt.push_text(&replace_variables(rest, variables));
        }
        prompt
    }
}

// =============================================================================
// TESTS
// =============================================================================
