//! Inference backends.
//!
//! A backend turns one [`PromptRequest`] into free text within a time budget.
//! [`ProcessInvoker`] is the production backend; tests substitute scripted
//! backends through the [`InferenceBackend`] trait.

mod process;

pub use process::ProcessInvoker;

use crate::models::{PromptRequest, RawResponse};
use std::time::Duration;
use thiserror::Error as ThisError;

/// Why a single inference call produced no usable output.
///
/// Row-level: the batch runner folds these into
/// [`Verdict::Unparseable`](crate::Verdict::Unparseable) and moves on.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum InvocationError {
    /// The call exceeded its budget and the process was terminated.
    #[error("timeout: inference exceeded {}ms budget", .0.as_millis())]
    Timeout(Duration),

    /// The process could not be started, crashed, or exited non-zero.
    #[error("process failure: {0}")]
    ProcessFailure(String),
}

impl InvocationError {
    /// Returns a short label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::ProcessFailure(_) => "process_failure",
        }
    }
}

/// Trait for inference backends.
pub trait InferenceBackend: Send + Sync {
    /// The backend name.
    fn name(&self) -> &'static str;

    /// Checks, before any row runs, that the backend can possibly succeed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Setup`] if the setup is unusable for every row.
    fn preflight(&self) -> crate::Result<()> {
        Ok(())
    }

    /// Runs one inference call.
    ///
    /// A successful call returns the captured output, which may be empty.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError::Timeout`] if `timeout` elapses, or
    /// [`InvocationError::ProcessFailure`] if the call fails.
    fn run(
        &self,
        request: &PromptRequest,
        timeout: Duration,
    ) -> Result<RawResponse, InvocationError>;
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn preflight(&self) -> crate::Result<()> {
        (**self).preflight()
    }

    fn run(
        &self,
        request: &PromptRequest,
        timeout: Duration,
    ) -> Result<RawResponse, InvocationError> {
        (**self).run(request, timeout)
    }
}
