//! Prompt construction for fall screening.
//!
//! Every note is embedded verbatim in one fixed instruction template. The
//! template is ChatML, which is what the bundled Qwen 2.5 instruct weights
//! expect; other weights can use a custom template through
//! [`PromptBuilder::with_template`].

use crate::models::{Note, PromptRequest};
use crate::{Error, Result};

/// Placeholder replaced by the note text.
pub const NOTE_PLACEHOLDER: &str = "{note}";

/// Marker appended to notes shortened to fit the length bound.
pub const TRUNCATION_MARKER: &str = " [... note truncated ...]";

/// The default fall-screening template.
pub const FALL_SCREEN_TEMPLATE: &str = "<|im_start|>system
You are a careful auditing assistant with extensive aged care nursing experience.<|im_end|>
<|im_start|>user
Does the following progress note describe a fall incident involving the resident?
Answer with exactly one word: true if the note describes a fall, false if it does not.
Do not explain your answer.

Progress note:
{note}<|im_end|>
<|im_start|>assistant
";

/// Builds inference requests from notes.
///
/// Pure: the same note always produces the same request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBuilder {
    prefix: String,
    suffix: String,
    max_note_chars: usize,
}

impl PromptBuilder {
    /// Creates a builder using [`FALL_SCREEN_TEMPLATE`].
    ///
    /// Notes longer than `max_note_chars` characters are truncated.
    #[must_use]
    pub fn new(max_note_chars: usize) -> Self {
        let (prefix, suffix) = FALL_SCREEN_TEMPLATE
            .split_once(NOTE_PLACEHOLDER)
            .unwrap_or((FALL_SCREEN_TEMPLATE, ""));
        Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            max_note_chars,
        }
    }

    /// Replaces the instruction template.
    ///
    /// The note is inserted at the first `{note}` placeholder; any later
    /// occurrences are left as literal text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the template has no `{note}` placeholder.
    pub fn with_template(mut self, template: &str) -> Result<Self> {
        let (prefix, suffix) = template.split_once(NOTE_PLACEHOLDER).ok_or_else(|| {
            Error::InvalidInput(format!(
                "prompt template must contain a {NOTE_PLACEHOLDER} placeholder"
            ))
        })?;
        self.prefix = prefix.to_string();
        self.suffix = suffix.to_string();
        Ok(self)
    }

    /// Returns the configured maximum note length in characters.
    #[must_use]
    pub const fn max_note_chars(&self) -> usize {
        self.max_note_chars
    }

    /// Builds the inference request for a note.
    #[must_use]
    pub fn build(&self, note: &Note) -> PromptRequest {
        let text = note.as_str();
        let truncated = note.char_len() > self.max_note_chars;

        let mut prompt = String::with_capacity(
            self.prefix.len()
                + text.len().min(self.max_note_chars.saturating_mul(4))
                + self.suffix.len()
                + TRUNCATION_MARKER.len(),
        );
        prompt.push_str(&self.prefix);
        if truncated {
            prompt.extend(text.chars().take(self.max_note_chars));
            prompt.push_str(TRUNCATION_MARKER);
        } else {
            prompt.push_str(text);
        }
        prompt.push_str(&self.suffix);

        PromptRequest::new(prompt, truncated).with_answer_marker(self.suffix.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_embedded_verbatim() {
        let builder = PromptBuilder::new(1_000);
        let note = Note::new("Resident said \"I'm fine\"\nafter sliding off chair");
        let request = builder.build(&note);

        assert!(request.text().contains(note.as_str()));
        assert!(request.text().starts_with("<|im_start|>system"));
        assert!(request.text().ends_with("<|im_start|>assistant\n"));
        assert!(!request.was_truncated());
    }

    #[test]
    fn test_answer_marker_is_template_tail() {
        let request = PromptBuilder::new(100).build(&Note::new("fell"));
        assert_eq!(
            request.answer_marker(),
            Some("<|im_end|>\n<|im_start|>assistant")
        );

        let bare = PromptBuilder::new(100).with_template("{note}\n").unwrap();
        assert_eq!(bare.build(&Note::new("fell")).answer_marker(), None);
    }

    #[test]
    fn test_unbounded_limit_does_not_overflow() {
        let request = PromptBuilder::new(usize::MAX).build(&Note::new("fell"));
        assert!(request.text().contains("Progress note:\nfell<|im_end|>"));
        assert!(!request.was_truncated());
    }

    #[test]
    fn test_empty_note_accepted() {
        let request = PromptBuilder::new(10).build(&Note::new(""));
        assert!(request.text().contains("Progress note:\n<|im_end|>"));
        assert!(!request.was_truncated());
    }

    #[test]
    fn test_long_note_truncated_with_marker() {
        let builder = PromptBuilder::new(5);
        let request = builder.build(&Note::new("abcdefghij"));

        assert!(request.was_truncated());
        assert!(request.text().contains(&format!("abcde{TRUNCATION_MARKER}")));
        assert!(!request.text().contains("abcdef"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let builder = PromptBuilder::new(3).with_template("[{note}]").unwrap();
        let request = builder.build(&Note::new("ééééé"));
        assert_eq!(request.text(), format!("[ééé{TRUNCATION_MARKER}]"));
    }

    #[test]
    fn test_note_at_exact_limit_is_kept_whole() {
        let builder = PromptBuilder::new(4).with_template("{note}").unwrap();
        let request = builder.build(&Note::new("fell"));
        assert_eq!(request.text(), "fell");
        assert!(!request.was_truncated());
    }

    #[test]
    fn test_custom_template_requires_placeholder() {
        let result = PromptBuilder::new(10).with_template("no placeholder here");
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_placeholder_inside_note_is_not_expanded() {
        let builder = PromptBuilder::new(100).with_template("<{note}>").unwrap();
        let request = builder.build(&Note::new("{note}"));
        assert_eq!(request.text(), "<{note}>");
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = PromptBuilder::new(50);
        let note = Note::new("Found on floor beside bed");
        assert_eq!(builder.build(&note), builder.build(&note));
    }
}
