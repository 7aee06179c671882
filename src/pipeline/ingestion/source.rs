use csv::{Reader, ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::fields::FieldMap;
use crate::error::{EtlError, Result};
use crate::types::RawRecord;

/// A raw trip file on disk.
///
/// Each call to `chunks` reopens the file, so a source can be replayed from
/// the start as many times as needed.
#[derive(Debug, Clone)]
pub struct TripSource {
    path: PathBuf,
}

impl TripSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file and return a lazy sequence of batches of at most `chunk_size` records
    pub fn chunks(&self, chunk_size: usize) -> Result<RecordChunks<BufReader<File>>> {
        let file = File::open(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EtlError::InputNotFound {
                path: self.path.clone(),
            },
            _ => EtlError::Io(e),
        })?;
        RecordChunks::from_reader(BufReader::new(file), chunk_size)
    }
}

/// Iterator over bounded batches of normalized records.
///
/// Rows shorter than the header read their missing trailing cells as absent.
/// A row longer than the header, or bytes the CSV reader cannot parse, yield
/// `Err(MalformedInput)` once and then stop the iteration.
pub struct RecordChunks<R: Read> {
    reader: Reader<R>,
    fields: FieldMap,
    width: usize,
    chunk_size: usize,
    row: StringRecord,
    finished: bool,
}

impl<R: Read> RecordChunks<R> {
    pub fn from_reader(reader: R, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(EtlError::Config("chunk_size must be greater than zero".into()));
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let headers = reader.headers().map_err(malformed)?.clone();
        let fields = FieldMap::from_headers(&headers)?;
        debug!("Resolved input columns: {:?}", fields);
        Ok(Self {
            reader,
            fields,
            width: headers.len(),
            chunk_size,
            row: StringRecord::new(),
            finished: false,
        })
    }
}

impl<R: Read> Iterator for RecordChunks<R> {
    type Item = Result<Vec<RawRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut batch = Vec::with_capacity(self.chunk_size.min(8192));
        while batch.len() < self.chunk_size {
            match self.reader.read_record(&mut self.row) {
                Ok(true) if self.row.len() > self.width => {
                    self.finished = true;
                    let line = self.row.position().map(|p| p.line()).unwrap_or_default();
                    return Some(Err(EtlError::MalformedInput(format!(
                        "line {}: found {} fields, but the header has {}",
                        line,
                        self.row.len(),
                        self.width
                    ))));
                }
                Ok(true) => batch.push(self.fields.normalize(&self.row)),
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(malformed(e)));
                }
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

fn malformed(e: csv::Error) -> EtlError {
    match e.position() {
        Some(pos) => EtlError::MalformedInput(format!("line {}: {}", pos.line(), e)),
        None => EtlError::MalformedInput(e.to_string()),
    }
}
