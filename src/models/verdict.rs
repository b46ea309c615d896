//! Classification outcome for a single note.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The classification outcome for a note.
///
/// `Unparseable` always carries a non-empty diagnostic so an auditor can tell
/// "the model said no" apart from "the model or integration broke".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    /// The note describes a fall.
    Fall,
    /// The note does not describe a fall.
    NoFall,
    /// No unambiguous answer could be obtained.
    Unparseable(String),
}

impl Verdict {
    /// Creates an unparseable verdict, substituting a placeholder for a blank reason.
    #[must_use]
    pub fn unparseable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if reason.trim().is_empty() {
            Self::Unparseable("unparseable response".to_string())
        } else {
            Self::Unparseable(reason)
        }
    }

    /// Returns a stable label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Fall => "true",
            Self::NoFall => "false",
            Self::Unparseable(_) => "unparseable",
        }
    }

    /// Renders the verdict as written to the output column.
    ///
    /// `true`, `false`, or the diagnostic text for unparseable rows.
    #[must_use]
    pub fn as_output(&self) -> &str {
        match self {
            Self::Fall => "true",
            Self::NoFall => "false",
            Self::Unparseable(reason) => reason,
        }
    }

    /// Returns the diagnostic when the verdict is unparseable.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Unparseable(reason) => Some(reason),
            Self::Fall | Self::NoFall => None,
        }
    }

    /// Whether the verdict is unparseable.
    #[must_use]
    pub const fn is_unparseable(&self) -> bool {
        matches!(self, Self::Unparseable(_))
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_output())
    }
}
