//! # fall-audit
//!
//! Batch screening of clinical progress notes for fall incidents using a
//! locally-running large language model.
//!
//! Every note goes through the same pipeline:
//!
//! 1. [`PromptBuilder`] wraps the note in a fixed instruction template.
//! 2. An [`InferenceBackend`] (normally [`ProcessInvoker`], which drives a
//!    `llamafile`-style executable) turns the prompt into free text.
//! 3. [`VerdictExtractor`] reduces that text to a [`Verdict`].
//!
//! [`BatchRunner`] sequences the pipeline over an ordered collection of notes.
//! Row-level failures become [`Verdict::Unparseable`] instead of aborting the
//! batch, and the output always has one row per input note, in input order.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fall_audit::{
//!     BatchRunner, CancellationToken, NoProgress, Note, PromptBuilder, ProcessInvoker,
//! };
//!
//! let invoker = ProcessInvoker::new(config.inference_settings()?);
//! let runner = BatchRunner::new(invoker, PromptBuilder::new(4_000), config.row_timeout()?);
//! let notes = vec![Note::new("Resident fell in bathroom at 3pm")];
//! let report = runner.process(&notes, &mut NoProgress, &CancellationToken::new())?;
//! assert_eq!(report.rows.len(), 1);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod batch;
pub mod config;
pub mod inference;
pub mod io;
pub mod models;
pub mod observability;
pub mod prompt;
pub mod verdict;

pub use batch::{BatchRunner, CancellationToken, NoProgress, ProgressSink};
pub use config::{AuditConfig, InferenceSettings, PromptChannel};
pub use inference::{InferenceBackend, InvocationError, ProcessInvoker};
pub use models::{
    BatchReport, BatchStatus, Note, PromptRequest, RawResponse, ResultRow, RowProgress, RowState,
    Verdict, VerdictCounts,
};
pub use prompt::PromptBuilder;
pub use verdict::VerdictExtractor;

/// Error type for fall-audit operations.
///
/// Row-level problems (timeouts, crashed inference processes, ambiguous model
/// output) are never reported through this type; they are folded into
/// [`Verdict::Unparseable`]. This type covers failures that stop a whole run.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Missing required settings, bad CSV column selection, wrong file extension |
/// | `OperationFailed` | I/O errors, CSV or TOML parse failures, logging init failures |
/// | `Setup` | Inference executable or model weights missing before any row runs |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - `timeout_ms` or `max_note_chars` is not configured
    /// - A prompt template has no `{note}` placeholder
    /// - A requested CSV column does not exist
    /// - An input or output path is not a `.csv` file
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - Reading or writing CSV files fails
    /// - The configuration file cannot be read, parsed, or written
    /// - The tracing subscriber cannot be installed
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The inference setup cannot possibly succeed for any row.
    ///
    /// Raised by [`InferenceBackend::preflight`] before the first row is
    /// attempted, e.g. when the executable path does not exist.
    #[error("inference setup invalid: {0}")]
    Setup(String),
}

/// Result type alias for fall-audit operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("timeout_ms is required".to_string());
        assert_eq!(err.to_string(), "invalid input: timeout_ms is required");

        let err = Error::OperationFailed {
            operation: "read_csv".to_string(),
            cause: "unexpected EOF".to_string(),
        };
        assert_eq!(err.to_string(), "operation 'read_csv' failed: unexpected EOF");

        let err = Error::Setup("executable not found".to_string());
        assert_eq!(err.to_string(), "inference setup invalid: executable not found");
    }
}
