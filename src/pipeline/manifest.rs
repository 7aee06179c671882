use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::processing::AnomalyReport;
use crate::error::{EtlError, Result};

pub const STATUS_COMPLETED: &str = "completed";

/// Counts for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_records: u64,
    pub cleaned_records: u64,
    pub excluded_records: u64,
    pub chunks: u64,
    /// Occurrences of each reason code; a record may contribute several
    pub reason_counts: BTreeMap<String, u64>,
    pub speed_anomalies: AnomalyReport,
}

/// Completion marker written after both output files are in place.
///
/// Its absence means the last run did not finish and the output files must
/// not be trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub status: String,
    pub input_path: PathBuf,
    pub input_sha256: String,
    pub chunk_size: usize,
    pub cleaned_file: PathBuf,
    pub excluded_file: PathBuf,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub summary: RunSummary,
}

impl RunManifest {
    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }

    pub fn read(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => EtlError::IncompleteRun(format!(
                "no run manifest at {}; the last cleaning run did not complete",
                path.display()
            )),
            _ => EtlError::Io(e),
        })?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Fails with `IncompleteRun` unless this manifest marks `cleaned_file` as complete
    pub fn ensure_covers(&self, cleaned_file: &Path) -> Result<()> {
        if !self.is_completed() {
            return Err(EtlError::IncompleteRun(format!(
                "run {} has status '{}'",
                self.run_id, self.status
            )));
        }
        if !same_file(&self.cleaned_file, cleaned_file) {
            return Err(EtlError::IncompleteRun(format!(
                "manifest describes {}, not {}",
                self.cleaned_file.display(),
                cleaned_file.display()
            )));
        }
        Ok(())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ac), Ok(bc)) => ac == bc,
        _ => a == b,
    }
}

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => EtlError::InputNotFound {
            path: path.to_path_buf(),
        },
        _ => EtlError::Io(e),
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut BufReader::new(file), &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
