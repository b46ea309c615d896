//! Per-row results and batch-level reporting.

use super::{Note, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one row as it moves through the pipeline.
///
/// `Pending → Built → Invoked → Classified`, or `Invoked → Errored` when the
/// inference process fails. `Classified` and `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowState {
    /// Not yet started.
    Pending,
    /// Prompt constructed.
    Built,
    /// Inference process launched.
    Invoked,
    /// Model output reduced to a verdict.
    Classified,
    /// Inference failed; the verdict carries the failure.
    Errored,
}

impl RowState {
    /// Returns the state as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Built => "built",
            Self::Invoked => "invoked",
            Self::Classified => "classified",
            Self::Errored => "errored",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Classified | Self::Errored)
    }
}

/// One processed note, positionally tied to its input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Zero-based position in the input sequence.
    pub index: usize,
    /// The original note.
    pub note: Note,
    /// The verdict for the note.
    pub verdict: Verdict,
    /// Terminal state reached by the row.
    pub state: RowState,
}

/// Progress notification emitted after each row completes.
#[derive(Debug, Clone)]
pub struct RowProgress<'a> {
    /// Zero-based index of the row just completed.
    pub index: usize,
    /// Number of notes in the batch.
    pub total: usize,
    /// Single-line, shortened preview of the note.
    pub note_preview: String,
    /// The verdict produced for the row.
    pub verdict: &'a Verdict,
    /// Terminal state reached by the row.
    pub state: RowState,
}

impl RowProgress<'_> {
    /// Number of rows completed so far, including this one.
    #[must_use]
    pub const fn completed(&self) -> usize {
        self.index + 1
    }
}

/// How a batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every note was processed.
    Completed,
    /// A cooperative stop was requested between rows.
    Cancelled {
        /// Notes left unprocessed.
        remaining: usize,
    },
}

/// Tally of verdicts in a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    /// Rows classified as describing a fall.
    pub falls: usize,
    /// Rows classified as not describing a fall.
    pub no_falls: usize,
    /// Rows where the model answer was ambiguous or missing.
    pub unparseable: usize,
    /// Subset of `unparseable` caused by inference failures.
    pub errored: usize,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Processed rows in input order.
    pub rows: Vec<ResultRow>,
    /// Number of notes supplied to the run.
    pub total: usize,
    /// How the run ended.
    pub status: BatchStatus,
    /// When the first row started.
    pub started_at: DateTime<Utc>,
    /// When the run returned.
    pub finished_at: DateTime<Utc>,
}

/// Row-free summary of a batch, suitable for JSON export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of notes supplied to the run.
    pub total: usize,
    /// Number of rows processed.
    pub processed: usize,
    /// How the run ended.
    pub status: BatchStatus,
    /// Verdict tally.
    pub counts: VerdictCounts,
    /// When the first row started.
    pub started_at: DateTime<Utc>,
    /// When the run returned.
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    /// Whether the run stopped early on request.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.status, BatchStatus::Cancelled { .. })
    }

    /// Tallies the verdicts of the processed rows.
    #[must_use]
    pub fn counts(&self) -> VerdictCounts {
        self.rows
            .iter()
            .fold(VerdictCounts::default(), |mut counts, row| {
                match row.verdict {
                    Verdict::Fall => counts.falls += 1,
                    Verdict::NoFall => counts.no_falls += 1,
                    Verdict::Unparseable(_) => counts.unparseable += 1,
                }
                if row.state == RowState::Errored {
                    counts.errored += 1;
                }
                counts
            })
    }

    /// Builds a summary without the per-row data.
    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.total,
            processed: self.rows.len(),
            status: self.status,
            counts: self.counts(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(index: usize, verdict: Verdict, state: RowState) -> ResultRow {
        ResultRow {
            index,
            note: Note::new(format!("note {index}")),
            verdict,
            state,
        }
    }

    #[test]
    fn test_counts_split_errored_from_unparseable() {
        let now = Utc::now();
        let report = BatchReport {
            rows: vec![
                row(0, Verdict::Fall, RowState::Classified),
                row(1, Verdict::NoFall, RowState::Classified),
                row(2, Verdict::unparseable("maybe"), RowState::Classified),
                row(3, Verdict::unparseable("timeout"), RowState::Errored),
            ],
            total: 4,
            status: BatchStatus::Completed,
            started_at: now,
            finished_at: now,
        };

        let counts = report.counts();
        assert_eq!(counts.falls, 1);
        assert_eq!(counts.no_falls, 1);
        assert_eq!(counts.unparseable, 2);
        assert_eq!(counts.errored, 1);
        assert!(!report.is_cancelled());
    }

    #[test]
    fn test_summary_reports_remaining() {
        let now = Utc::now();
        let report = BatchReport {
            rows: vec![row(0, Verdict::Fall, RowState::Classified)],
            total: 3,
            status: BatchStatus::Cancelled { remaining: 2 },
            started_at: now,
            finished_at: now,
        };
        let summary = report.summary();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.total, 3);
        assert!(report.is_cancelled());

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"]["status"], "cancelled");
        assert_eq!(json["status"]["remaining"], 2);
    }

    #[test]
    fn test_terminal_states() {
        assert!(RowState::Classified.is_terminal());
        assert!(RowState::Errored.is_terminal());
        assert!(!RowState::Invoked.is_terminal());
    }
}
