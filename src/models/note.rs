//! Note, prompt and raw response types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker appended to single-line previews that were shortened.
const PREVIEW_ELLIPSIS: char = '…';

/// One raw progress-note text record.
///
/// No internal structure is assumed. A note may be empty, contain embedded
/// newlines or quotes, and be arbitrarily long.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Note(String);

impl Note {
    /// Creates a new note.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Returns the note text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the length of the note in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }

    /// Returns a single-line preview of at most `max_chars` characters.
    ///
    /// Runs of whitespace (including newlines) collapse to one space. When the
    /// note is longer than `max_chars`, the preview ends with `…`.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        let collapsed = self.0.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() <= max_chars {
            return collapsed;
        }
        let mut preview: String = collapsed.chars().take(max_chars.saturating_sub(1)).collect();
        preview.push(PREVIEW_ELLIPSIS);
        preview
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Note {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Note {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A fully-specified inference request derived from one note.
///
/// Owned by exactly one inference call; deliberately not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct PromptRequest {
    text: String,
    truncated: bool,
    answer_marker: Option<String>,
}

impl PromptRequest {
    /// Creates a request from already-rendered prompt text.
    #[must_use]
    pub fn new(text: impl Into<String>, truncated: bool) -> Self {
        Self {
            text: text.into(),
            truncated,
            answer_marker: None,
        }
    }

    /// Sets the text that closes the prompt and precedes the model's answer.
    ///
    /// An empty or all-whitespace marker is ignored.
    #[must_use]
    pub fn with_answer_marker(mut self, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        self.answer_marker = (!marker.trim().is_empty()).then_some(marker);
        self
    }

    /// Returns the answer marker, if the prompt has one.
    #[must_use]
    pub fn answer_marker(&self) -> Option<&str> {
        self.answer_marker.as_deref()
    }

    /// Returns the rendered prompt text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the embedded note was shortened to fit the length bound.
    #[must_use]
    pub const fn was_truncated(&self) -> bool {
        self.truncated
    }
}

/// Unstructured text captured from the inference process's standard output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse(String);

impl RawResponse {
    /// Wraps captured output.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Returns the captured text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the output contains nothing but whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for RawResponse {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_collapses_whitespace() {
        let note = Note::new("Resident found\non floor\t at  0300");
        assert_eq!(note.preview(80), "Resident found on floor at 0300");
    }

    #[test]
    fn test_preview_truncates_with_ellipsis() {
        let note = Note::new("Resident slept well overnight");
        let preview = note.preview(10);
        assert_eq!(preview.chars().count(), 10);
        assert!(preview.ends_with('…'));
        assert!(preview.starts_with("Resident "));
    }

    #[test]
    fn test_preview_of_empty_note() {
        assert_eq!(Note::new("").preview(20), "");
    }

    #[test]
    fn test_char_len_counts_chars_not_bytes() {
        assert_eq!(Note::new("café").char_len(), 4);
    }

    #[test]
    fn test_raw_response_blank() {
        assert!(RawResponse::new(" \n\t").is_blank());
        assert!(!RawResponse::new("false").is_blank());
    }
}
