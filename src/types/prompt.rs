//! Prompts handed to the streaming generator

use serde::{Deserialize, Serialize};

/// One piece of a user prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptPart {
    Text { text: String },
    Image { media_type: String, data: String },
}

/// An ordered sequence of text and image parts plus an optional system prompt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub system: Option<String>,
    pub parts: Vec<PromptPart>,
}

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Append text, merging with a preceding text part
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(PromptPart::Text { text: last }) = self.parts.last_mut() {
            last.push_str(text);
        } else {
            self.parts.push(PromptPart::Text {
                text: text.to_string(),
            });
        }
    }

    /// Append a base64-encoded image
    pub fn push_image(&mut self, media_type: impl Into<String>, data: impl Into<String>) {
        self.parts.push(PromptPart::Image {
            media_type: media_type.into(),
            data: data.into(),
        });
    }

    pub fn has_image(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, PromptPart::Image { .. }))
    }

    /// Text rendering for logs; images are masked
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|p| match p {
                PromptPart::Text { text } => text.as_str(),
                PromptPart::Image { .. } => "<image>",
            })
            .collect()
    }
}

/// Sampling parameters for one generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_MODEL.to_string(),
            temperature: None,
            max_tokens: 1000,
            stop_sequences: Vec::new(),
            top_k: None,
            top_p: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_text_merges() {
        let mut prompt = Prompt::new();
        prompt.push_text("Hello ");
        prompt.push_text("world");
        prompt.push_image("image/jpeg", "AAAA");
        prompt.push_text("after");
        assert_eq!(prompt.parts.len(), 3);
        assert!(prompt.has_image());
        assert_eq!(prompt.text(), "Hello world<image>after");
    }
}
