//! Data models for fall-audit.
//!
//! Notes flow through the pipeline as `Note` → `PromptRequest` →
//! `RawResponse` → `Verdict`, and are collected as `ResultRow`s inside a
//! `BatchReport`.

mod note;
mod report;
mod verdict;

pub use note::{Note, PromptRequest, RawResponse};
pub use report::{
    BatchReport, BatchStatus, BatchSummary, ResultRow, RowProgress, RowState, VerdictCounts,
};
pub use verdict::Verdict;
