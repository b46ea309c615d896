//! CSV adapters for notes in and verdicts out.
//!
//! Every input row is a note unless the file is declared to have a header
//! row. By default every field of a row is joined with a single space and
//! trimmed, so exports that split a note across several columns still produce
//! one note per row. A single column can be selected by header name or index
//! instead.

use crate::models::{Note, ResultRow};
use crate::{Error, Result};
use std::io::{BufRead, Write};

/// Header of the result file.
pub const RESULT_HEADERS: [&str; 2] = ["Progress note", "Falls Detected?"];

/// Which part of a CSV row is the note.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NoteColumn {
    /// All fields joined with a space and trimmed.
    #[default]
    AllJoined,
    /// The column with this header (case-insensitive, surrounding whitespace ignored).
    Named(String),
    /// The column at this zero-based index.
    Index(usize),
}

/// Options for reading notes.
///
/// The default reads every row, the first included, as a note.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CsvNoteOptions {
    /// Note column selection.
    pub column: NoteColumn,
    /// Whether the first row is a header row rather than a note.
    pub has_headers: bool,
}

/// Reads notes from CSV.
pub struct CsvNoteSource<R: BufRead> {
    reader: csv::Reader<R>,
    selector: Selector,
    row: usize,
}

/// Resolved column selection.
#[derive(Debug, Clone, Copy)]
enum Selector {
    All,
    Column(usize),
}

impl<R: BufRead> CsvNoteSource<R> {
    /// Creates a new note source.
    ///
    /// # Errors
    ///
    /// Returns an error if the headers cannot be read, a named column is
    /// requested without a header row, or the named column does not exist.
    pub fn new(reader: R, options: &CsvNoteOptions) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(options.has_headers)
            .flexible(true)
            .from_reader(reader);

        let selector = match &options.column {
            NoteColumn::AllJoined => Selector::All,
            NoteColumn::Index(index) => Selector::Column(*index),
            NoteColumn::Named(name) => {
                if !options.has_headers {
                    return Err(Error::InvalidInput(format!(
                        "column '{name}' selected by name but the file has no header row"
                    )));
                }
                let headers = csv_reader.headers().map_err(|e| Error::OperationFailed {
                    operation: "read_csv_headers".to_string(),
                    cause: e.to_string(),
                })?;
                let wanted = name.trim().to_lowercase();
                let index = headers
                    .iter()
                    .position(|h| h.trim().to_lowercase() == wanted)
                    .ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "CSV has no '{name}' column (found: {})",
                            headers.iter().collect::<Vec<_>>().join(", ")
                        ))
                    })?;
                Selector::Column(index)
            },
        };

        Ok(Self {
            reader: csv_reader,
            selector,
            row: 0,
        })
    }

    /// Reads the next note, or `None` at end of input.
    ///
    /// A row shorter than the selected column yields an empty note.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or is not valid UTF-8.
    pub fn next_note(&mut self) -> Result<Option<Note>> {
        let mut record = csv::StringRecord::new();
        let has_record =
            self.reader
                .read_record(&mut record)
                .map_err(|e| Error::OperationFailed {
                    operation: "read_csv".to_string(),
                    cause: format!("row {}: {e}", self.row + 1),
                })?;
        if !has_record {
            return Ok(None);
        }
        self.row += 1;

        let text = match self.selector {
            Selector::All => record.iter().collect::<Vec<_>>().join(" ").trim().to_string(),
            Selector::Column(index) => record.get(index).unwrap_or_default().to_string(),
        };
        Ok(Some(Note::new(text)))
    }

    /// Reads every remaining note.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn read_all(mut self) -> Result<Vec<Note>> {
        let mut notes = Vec::new();
        while let Some(note) = self.next_note()? {
            notes.push(note);
        }
        Ok(notes)
    }
}

/// Writes result rows as CSV.
pub struct CsvResultSink<W: Write> {
    writer: csv::Writer<W>,
    headers_written: bool,
}

impl<W: Write> CsvResultSink<W> {
    /// Creates a new result sink.
    pub fn new(writer: W) -> Self {
        let csv_writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        Self {
            writer: csv_writer,
            headers_written: false,
        }
    }

    fn ensure_headers(&mut self) -> Result<()> {
        if !self.headers_written {
            self.writer
                .write_record(RESULT_HEADERS)
                .map_err(|e| Error::OperationFailed {
                    operation: "write_csv_headers".to_string(),
                    cause: e.to_string(),
                })?;
            self.headers_written = true;
        }
        Ok(())
    }

    /// Writes one row: original note text and the rendered verdict.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_row(&mut self, row: &ResultRow) -> Result<()> {
        self.ensure_headers()?;
        self.writer
            .write_record([row.note.as_str(), row.verdict.as_output()])
            .map_err(|e| Error::OperationFailed {
                operation: "write_csv".to_string(),
                cause: e.to_string(),
            })
    }

    /// Writes the header (if nothing was written yet) and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn finish(mut self) -> Result<()> {
        self.ensure_headers()?;
        self.writer.flush().map_err(|e| Error::OperationFailed {
            operation: "flush_csv".to_string(),
            cause: e.to_string(),
        })
    }
}
