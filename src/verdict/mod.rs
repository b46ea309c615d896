//! Reduction of free-form model output to a [`Verdict`].
//!
//! Extraction is a substring heuristic over model text. The policy is that
//! ambiguity is never resolved towards "no fall":
//!
//! - both affirmative and negative tokens present → unparseable
//! - neither present → unparseable
//! - empty output → unparseable
//!
//! Mapping ambiguous output to `false` would report a broken model or
//! integration as a negative clinical finding. Changing this needs clinical
//! sign-off.
//!
//! Before the token scan, a JSON answer of the form `{"falls": ...}` is looked
//! for (last fenced ```` ```json ```` block first, then a bare object). When
//! present, only its value is classified.

use crate::models::{RawResponse, Verdict};
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Tokens that signal a fall.
pub const AFFIRMATIVE_TOKENS: &[&str] = &["true", "yes"];

/// Tokens that signal no fall.
pub const NEGATIVE_TOKENS: &[&str] = &["false", "no"];

/// JSON keys accepted as the structured answer.
const ANSWER_KEYS: &[&str] = &["falls", "fall"];

/// Diagnostic for blank output.
pub const NO_RESPONSE_REASON: &str = "no response from model";

/// Default cap on the raw text carried in an unparseable diagnostic.
pub const DEFAULT_MAX_REASON_CHARS: usize = 200;

#[allow(clippy::expect_used)]
static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").expect("static regex: fenced json block")
});

/// A structured answer found in the output.
#[derive(Debug, PartialEq, Eq)]
enum StructuredAnswer {
    Bool(bool),
    Text(String),
}

/// Reduces raw model output to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerdictExtractor {
    max_reason_chars: usize,
}

impl Default for VerdictExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl VerdictExtractor {
    /// Creates an extractor with the default diagnostic length cap.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_reason_chars: DEFAULT_MAX_REASON_CHARS,
        }
    }

    /// Sets the maximum number of raw-text characters kept in a diagnostic.
    #[must_use]
    pub const fn with_max_reason_chars(mut self, max_reason_chars: usize) -> Self {
        self.max_reason_chars = max_reason_chars;
        self
    }

    /// Classifies a raw response.
    ///
    /// Total: always returns exactly one verdict and never panics.
    #[must_use]
    pub fn extract(&self, response: &RawResponse) -> Verdict {
        let raw = response.as_str().trim();
        if raw.is_empty() {
            return Verdict::unparseable(NO_RESPONSE_REASON);
        }

        let answer: Cow<'_, str> = match structured_answer(raw) {
            Some(StructuredAnswer::Bool(true)) => return Verdict::Fall,
            Some(StructuredAnswer::Bool(false)) => return Verdict::NoFall,
            Some(StructuredAnswer::Text(text)) => Cow::Owned(text),
            None => Cow::Borrowed(raw),
        };

        match classify_tokens(&answer) {
            Some(true) => Verdict::Fall,
            Some(false) => Verdict::NoFall,
            None => Verdict::unparseable(self.diagnostic(raw)),
        }
    }

    fn diagnostic(&self, raw: &str) -> String {
        if raw.chars().count() <= self.max_reason_chars {
            return raw.to_string();
        }
        let mut reason: String = raw.chars().take(self.max_reason_chars).collect();
        reason.push('…');
        reason
    }
}

/// Looks for a `{"falls": ...}` answer, preferring the last fenced block.
fn structured_answer(raw: &str) -> Option<StructuredAnswer> {
    let candidate = FENCED_JSON
        .captures_iter(raw)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .or_else(|| bare_object(raw))?;

    let value: serde_json::Value = serde_json::from_str(candidate).ok()?;
    let object = value.as_object()?;
    let answer = ANSWER_KEYS.iter().find_map(|key| object.get(*key))?;
    match answer {
        serde_json::Value::Bool(b) => Some(StructuredAnswer::Bool(*b)),
        serde_json::Value::String(s) => Some(StructuredAnswer::Text(s.clone())),
        _ => None,
    }
}

/// Returns the text from the first `{` to the last `}`.
fn bare_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Returns `Some(true)` / `Some(false)` when exactly one token class is present.
fn classify_tokens(text: &str) -> Option<bool> {
    let lowered = text.to_lowercase();
    let mut affirmative = false;
    let mut negative = false;

    for token in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        if AFFIRMATIVE_TOKENS.contains(&token) {
            affirmative = true;
        } else if NEGATIVE_TOKENS.contains(&token) {
            negative = true;
        }
    }

    match (affirmative, negative) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}
