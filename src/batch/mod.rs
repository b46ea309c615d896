//! Sequential batch processing.
//!
//! Each note moves through `Pending → Built → Invoked → Classified`, or ends
//! in `Errored` when the backend fails. Row faults are folded into the row's
//! verdict and never abort the batch; the report always lists processed rows
//! in input order.

mod cancel;

pub use cancel::CancellationToken;

use crate::Result;
use crate::inference::InferenceBackend;
use crate::models::{
    BatchReport, BatchStatus, Note, ResultRow, RowProgress, RowState, Verdict,
};
use crate::prompt::PromptBuilder;
use crate::verdict::VerdictExtractor;
use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Length of the note preview carried in progress notifications.
pub const PREVIEW_CHARS: usize = 60;

/// Receives one notification per completed row.
///
/// Called synchronously between rows, never while an inference call is in
/// flight.
pub trait ProgressSink {
    /// Called after the row has reached a terminal state.
    fn on_row(&mut self, progress: &RowProgress<'_>);
}

impl<F> ProgressSink for F
where
    F: FnMut(&RowProgress<'_>),
{
    fn on_row(&mut self, progress: &RowProgress<'_>) {
        self(progress);
    }
}

/// A sink that discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_row(&mut self, _progress: &RowProgress<'_>) {}
}

/// Runs the screening pipeline over an ordered collection of notes.
#[derive(Debug)]
pub struct BatchRunner<B: InferenceBackend> {
    backend: B,
    prompt: PromptBuilder,
    extractor: VerdictExtractor,
    timeout: Duration,
}

impl<B: InferenceBackend> BatchRunner<B> {
    /// Creates a runner with the given per-row timeout.
    #[must_use]
    pub fn new(backend: B, prompt: PromptBuilder, timeout: Duration) -> Self {
        Self {
            backend,
            prompt,
            extractor: VerdictExtractor::new(),
            timeout,
        }
    }

    /// Returns the backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the per-row timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Processes every note in order.
    ///
    /// The token is checked before each row; once it is set, the rows done so
    /// far are returned with [`BatchStatus::Cancelled`]. Cancellation is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Setup`] if the backend preflight fails. No row
    /// is attempted in that case. Row-level failures never surface here.
    pub fn process<S>(
        &self,
        notes: &[Note],
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<BatchReport>
    where
        S: ProgressSink + ?Sized,
    {
        self.backend.preflight()?;

        let total = notes.len();
        let started_at = Utc::now();
        let mut rows = Vec::with_capacity(total);
        info!(total, backend = self.backend.name(), "Starting batch");

        let mut status = BatchStatus::Completed;
        for (index, note) in notes.iter().enumerate() {
            if cancel.is_cancelled() {
                let remaining = total - index;
                info!(completed = index, remaining, "Batch cancelled");
                status = BatchStatus::Cancelled { remaining };
                break;
            }

            let row = self.classify(index, note);
            sink.on_row(&RowProgress {
                index,
                total,
                note_preview: note.preview(PREVIEW_CHARS),
                verdict: &row.verdict,
                state: row.state,
            });
            rows.push(row);
        }

        let report = BatchReport {
            rows,
            total,
            status,
            started_at,
            finished_at: Utc::now(),
        };
        let counts = report.counts();
        info!(
            processed = report.rows.len(),
            falls = counts.falls,
            no_falls = counts.no_falls,
            unparseable = counts.unparseable,
            "Batch finished"
        );
        Ok(report)
    }

    /// Runs one note through build, invoke and extract.
    ///
    /// Never fails: an invocation error yields an `Errored` row whose verdict
    /// is unparseable with the error description.
    pub fn classify(&self, index: usize, note: &Note) -> ResultRow {
        let span = tracing::info_span!("audit.row", index);
        let _enter = span.enter();

        let mut state = RowState::Pending;
        let request = self.prompt.build(note);
        if request.was_truncated() {
            debug!(
                chars = note.char_len(),
                max = self.prompt.max_note_chars(),
                "Note truncated for prompt"
            );
        }
        advance(&mut state, RowState::Built);

        advance(&mut state, RowState::Invoked);
        let started = Instant::now();
        let outcome = self.backend.run(&request, self.timeout);
        metrics::histogram!("fall_audit_invocation_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);

        let verdict = match outcome {
            Ok(response) => {
                metrics::counter!("fall_audit_invocations_total", "status" => "success")
                    .increment(1);
                let verdict = self.extractor.extract(&response);
                advance(&mut state, RowState::Classified);
                verdict
            },
            Err(e) => {
                metrics::counter!("fall_audit_invocations_total", "status" => e.kind())
                    .increment(1);
                warn!(error = %e, "Inference failed for row");
                advance(&mut state, RowState::Errored);
                Verdict::unparseable(e.to_string())
            },
        };
        metrics::counter!("fall_audit_rows_total", "verdict" => verdict.label()).increment(1);

        ResultRow {
            index,
            note: note.clone(),
            verdict,
            state,
        }
    }
}

fn advance(state: &mut RowState, next: RowState) {
    debug!(from = state.as_str(), to = next.as_str(), "Row state transition");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::InvocationError;
    use crate::models::{PromptRequest, RawResponse};
    use std::sync::Mutex;

    /// Replies from a fixed script, one entry per call.
    struct Scripted {
        replies: Mutex<Vec<std::result::Result<&'static str, InvocationError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<std::result::Result<&'static str, InvocationError>>) -> Self {
            let mut replies = replies;
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl InferenceBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn run(
            &self,
            request: &PromptRequest,
            _timeout: Duration,
        ) -> std::result::Result<RawResponse, InvocationError> {
            self.prompts.lock().unwrap().push(request.text().to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(""))
                .map(RawResponse::from)
        }
    }

    fn runner(replies: Vec<std::result::Result<&'static str, InvocationError>>) -> BatchRunner<Scripted> {
        BatchRunner::new(
            Scripted::new(replies),
            PromptBuilder::new(100),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_rows_follow_input_order() {
        let runner = runner(vec![Ok("true"), Ok("false")]);
        let notes = [Note::new("fell"), Note::new("slept")];

        let report = runner
            .process(&notes, &mut NoProgress, &CancellationToken::new())
            .unwrap();

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].verdict, Verdict::Fall);
        assert_eq!(report.rows[1].verdict, Verdict::NoFall);
        assert_eq!(report.status, BatchStatus::Completed);

        let prompts = runner.backend().prompts.lock().unwrap();
        assert!(prompts[0].contains("fell"));
        assert!(prompts[1].contains("slept"));
    }

    #[test]
    fn test_invocation_error_marks_row_errored() {
        let runner = runner(vec![Err(InvocationError::ProcessFailure(
            "exited with code 1".to_string(),
        ))]);
        let row = runner.classify(0, &Note::new("x"));

        assert_eq!(row.state, RowState::Errored);
        assert_eq!(
            row.verdict.reason(),
            Some("process failure: exited with code 1")
        );
    }

    #[test]
    fn test_closure_sink_sees_every_row() {
        let runner = runner(vec![Ok("yes"), Ok("no"), Ok("maybe")]);
        let notes = [Note::new("a"), Note::new("b"), Note::new("c")];
        let mut seen = Vec::new();

        let mut sink = |p: &RowProgress<'_>| seen.push((p.index, p.total, p.verdict.label()));
        runner
            .process(&notes, &mut sink, &CancellationToken::new())
            .unwrap();

        assert_eq!(
            seen,
            vec![(0, 3, "true"), (1, 3, "false"), (2, 3, "unparseable")]
        );
    }

    #[test]
    fn test_progress_preview_is_capped() {
        let runner = runner(vec![Ok("false")]);
        let notes = [Note::new("Resident settled.\n".repeat(20))];
        let mut previews = Vec::new();

        let mut sink = |p: &RowProgress<'_>| previews.push(p.note_preview.clone());
        runner
            .process(&notes, &mut sink, &CancellationToken::new())
            .unwrap();

        assert_eq!(previews[0].chars().count(), PREVIEW_CHARS);
        assert!(previews[0].starts_with("Resident settled. Resident"));
        assert!(previews[0].ends_with('…'));
    }

    #[test]
    fn test_cancelled_before_start_returns_no_rows() {
        let runner = runner(vec![Ok("true")]);
        let token = CancellationToken::new();
        token.cancel();

        let report = runner
            .process(&[Note::new("a")], &mut NoProgress, &token)
            .unwrap();

        assert!(report.rows.is_empty());
        assert_eq!(report.status, BatchStatus::Cancelled { remaining: 1 });
        assert!(runner.backend().prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_batch_completes() {
        let report = runner(vec![])
            .process(&[], &mut NoProgress, &CancellationToken::new())
            .unwrap();
        assert!(report.rows.is_empty());
        assert_eq!(report.total, 0);
        assert!(!report.is_cancelled());
    }
}
