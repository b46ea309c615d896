//! File input and output.
//!
//! Notes are read from a `.csv` file and results are written to a `.csv`
//! file with two columns: the original note text and the verdict
//! (`true`, `false`, or the diagnostic text of an unparseable row). A batch
//! summary can also be exported as JSON.

mod csv;

pub use self::csv::{CsvNoteOptions, CsvNoteSource, CsvResultSink, NoteColumn, RESULT_HEADERS};

use crate::models::{BatchSummary, Note, ResultRow};
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

/// Checks that a path has a `.csv` extension (case-insensitive).
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] naming the role of the path otherwise.
pub fn require_csv_extension(path: &Path, role: &str) -> Result<()> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{role} file must be a .csv file: {}",
            path.display()
        )))
    }
}

/// Reads every note from a CSV file.
///
/// # Errors
///
/// Returns an error if the path is not a `.csv` file, cannot be opened, or
/// cannot be parsed.
pub fn read_notes(path: &Path, options: &CsvNoteOptions) -> Result<Vec<Note>> {
    require_csv_extension(path, "input")?;
    let file = File::open(path).map_err(|e| Error::OperationFailed {
        operation: "open_input".to_string(),
        cause: format!("{}: {e}", path.display()),
    })?;
    let notes = CsvNoteSource::new(BufReader::new(file), options)?.read_all()?;
    info!(path = %path.display(), notes = notes.len(), "Read notes");
    Ok(notes)
}

/// Writes result rows to a CSV file, replacing it.
///
/// # Errors
///
/// Returns an error if the path is not a `.csv` file or the write fails.
pub fn write_results(path: &Path, rows: &[ResultRow]) -> Result<()> {
    require_csv_extension(path, "output")?;
    let file = File::create(path).map_err(|e| Error::OperationFailed {
        operation: "create_output".to_string(),
        cause: format!("{}: {e}", path.display()),
    })?;
    let mut sink = CsvResultSink::new(BufWriter::new(file));
    for row in rows {
        sink.write_row(row)?;
    }
    sink.finish()?;
    info!(path = %path.display(), rows = rows.len(), "Wrote results");
    Ok(())
}

/// Writes a batch summary as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_summary_json(path: &Path, summary: &BatchSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).map_err(|e| Error::OperationFailed {
        operation: "serialize_summary".to_string(),
        cause: e.to_string(),
    })?;
    std::fs::write(path, json).map_err(|e| Error::OperationFailed {
        operation: "write_summary".to_string(),
        cause: format!("{}: {e}", path.display()),
    })
}
