//! Lazy CSV record reader.
//!
//! Reads the header row once, then yields one [`RawRecord`] per data line
//! keyed by header name. The underlying file handle is owned by the
//! [`RecordSource`] and released when it is dropped, on every exit path.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead as _, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use csv_ingest_models::{Encoding, RawRecord};

use crate::SourceError;

/// UTF-8 byte-order mark.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Single-pass iterator over the data records of a delimited file.
pub struct RecordSource<R: Read = File> {
    path: PathBuf,
    encoding: Encoding,
    headers: Vec<String>,
    reader: csv::Reader<BufReader<R>>,
    record: csv::ByteRecord,
    done: bool,
}

impl RecordSource<File> {
    /// Opens `path` and reads its header row.
    ///
    /// # Errors
    ///
    /// * [`SourceError::NotFound`] if the file does not exist
    /// * [`SourceError::MalformedHeader`] if the header is empty, blank, or
    ///   has duplicate names
    /// * [`SourceError::Io`] for any other I/O failure
    pub fn open(path: &Path, encoding: Encoding) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                SourceError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                SourceError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;

        Self::from_reader(path, file, encoding)
    }
}

impl<R: Read> RecordSource<R> {
    /// Wraps an arbitrary reader. `path` is only used for error messages.
    ///
    /// # Errors
    ///
    /// See [`RecordSource::open`].
    pub fn from_reader(path: &Path, inner: R, encoding: Encoding) -> Result<Self, SourceError> {
        let mut buffered = BufReader::new(inner);
        let has_bom = buffered
            .fill_buf()
            .map_err(|e| SourceError::Io {
                path: path.to_path_buf(),
                source: e,
            })?
            .starts_with(UTF8_BOM);
        if has_bom {
            buffered.consume(UTF8_BOM.len());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(buffered);

        let mut header = csv::ByteRecord::new();
        let has_header = reader.read_byte_record(&mut header).map_err(|e| {
            if e.is_io_error() {
                io_error(path, e)
            } else {
                SourceError::MalformedHeader {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !has_header {
            return Err(SourceError::MalformedHeader {
                path: path.to_path_buf(),
                reason: "file is empty".to_string(),
            });
        }

        let headers = decode_fields(&header, encoding)
            .map_err(|reason| SourceError::MalformedHeader {
                path: path.to_path_buf(),
                reason,
            })?;
        validate_headers(&headers).map_err(|reason| SourceError::MalformedHeader {
            path: path.to_path_buf(),
            reason,
        })?;

        log::debug!(
            "Opened {} ({encoding}, bom={has_bom}) with {} columns",
            path.display(),
            headers.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            encoding,
            headers,
            reader,
            record: csv::ByteRecord::new(),
            done: false,
        })
    }

    /// Header names in file order.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Path this source reads from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn current_line(&self) -> u64 {
        self.record.position().map_or(0, csv::Position::line)
    }

    fn build_record(&self) -> Result<RawRecord, SourceError> {
        let line = self.current_line();
        let values = decode_fields(&self.record, self.encoding)
            .map_err(|reason| SourceError::MalformedRecord { line, reason })?;

        if values.len() > self.headers.len() {
            log::debug!(
                "{}: line {line} has {} values for {} columns, ignoring the extras",
                self.path.display(),
                values.len(),
                self.headers.len()
            );
        }

        // Short rows leave trailing fields absent rather than blank.
        let fields: BTreeMap<String, String> = self.headers.iter().cloned().zip(values).collect();

        Ok(RawRecord { line, fields })
    }
}

impl<R: Read> Iterator for RecordSource<R> {
    type Item = Result<RawRecord, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.reader.read_byte_record(&mut self.record) {
            Ok(false) => {
                self.done = true;
                None
            }
            Ok(true) => Some(self.build_record()),
            Err(e) if e.is_io_error() => {
                self.done = true;
                Some(Err(io_error(&self.path, e)))
            }
            Err(e) => {
                let line = e.position().map_or_else(|| self.current_line(), csv::Position::line);
                Some(Err(SourceError::MalformedRecord {
                    line,
                    reason: e.to_string(),
                }))
            }
        }
    }
}

fn io_error(path: &Path, e: csv::Error) -> SourceError {
    let source = match e.into_kind() {
        csv::ErrorKind::Io(io) => io,
        other => std::io::Error::other(format!("{other:?}")),
    };
    SourceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Decodes and trims every field of `record`.
fn decode_fields(record: &csv::ByteRecord, encoding: Encoding) -> Result<Vec<String>, String> {
    record
        .iter()
        .enumerate()
        .map(|(i, bytes)| {
            let value = match encoding {
                Encoding::Utf8 => std::str::from_utf8(bytes)
                    .map(str::to_owned)
                    .map_err(|e| format!("field {} is not valid UTF-8: {e}", i + 1))?,
                Encoding::Latin1 => bytes.iter().copied().map(char::from).collect(),
            };
            Ok(value.trim().to_owned())
        })
        .collect()
}

fn validate_headers(headers: &[String]) -> Result<(), String> {
    if headers.iter().all(String::is_empty) {
        return Err("header row is blank".to_string());
    }

    let mut seen = std::collections::BTreeSet::new();
    for name in headers {
        if !seen.insert(name.as_str()) {
            return Err(format!("duplicate column name '{name}'"));
        }
    }

    Ok(())
}
