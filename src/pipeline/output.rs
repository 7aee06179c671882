use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::constants::{PARTIAL_SUFFIX, PREVIOUS_SUFFIX};
use crate::error::{EtlError, Result};
use crate::types::{output_header, ValidatedRecord};

/// Destination for classified records (one for clean, one for excluded)
pub trait RecordSink {
    fn write_record(&mut self, record: ValidatedRecord) -> Result<()>;
}

impl RecordSink for Vec<ValidatedRecord> {
    fn write_record(&mut self, record: ValidatedRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// `<path>.partial`, the in-progress sibling of an output file
pub fn partial_path(path: &Path) -> PathBuf {
    sibling_path(path, PARTIAL_SUFFIX)
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| EtlError::output_write(parent, e))
        }
        _ => Ok(()),
    }
}

/// Streams records to `<path>.partial`. The file only moves into place
/// through `commit_all`; dropping a sink that was never committed deletes
/// the partial file.
pub struct CsvRecordSink {
    path: PathBuf,
    partial: PathBuf,
    writer: Option<csv::Writer<BufWriter<File>>>,
    with_reason: bool,
    committed: bool,
}

impl CsvRecordSink {
    pub fn create(path: impl Into<PathBuf>, with_reason: bool) -> Result<Self> {
        let path = path.into();
        ensure_parent(&path)?;
        let partial = partial_path(&path);
        let file = File::create(&partial).map_err(|e| EtlError::output_write(&partial, e))?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer
            .write_record(output_header(with_reason))
            .map_err(|e| EtlError::output_write(&partial, e.into()))?;
        debug!("Writing {} via {}", path.display(), partial.display());
        Ok(Self {
            path,
            partial,
            writer: Some(writer),
            with_reason,
            committed: false,
        })
    }

    /// Flush and close the partial file so it can be renamed
    fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| EtlError::output_write(&self.partial, e))?;
            let inner = writer
                .into_inner()
                .map_err(|e| EtlError::output_write(&self.partial, e.into_error()))?;
            let file = inner
                .into_inner()
                .map_err(|e| EtlError::output_write(&self.partial, e.into_error()))?;
            file.sync_all()
                .map_err(|e| EtlError::output_write(&self.partial, e))?;
        }
        Ok(())
    }

    /// An existing target must be a regular file we can replace
    fn check_target(&self) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(meta) if !meta.is_file() => Err(EtlError::output_write(
                &self.path,
                io::Error::new(io::ErrorKind::Other, "target exists and is not a regular file"),
            )),
            _ => Ok(()),
        }
    }

    /// Rename the partial file over the target, keeping any previous target
    /// as `<path>.previous` until the caller settles the commit.
    fn install(&self) -> Result<Option<PathBuf>> {
        let backup = if self.path.exists() {
            let backup = sibling_path(&self.path, PREVIOUS_SUFFIX);
            fs::rename(&self.path, &backup).map_err(|e| EtlError::output_write(&self.path, e))?;
            Some(backup)
        } else {
            None
        };
        if let Err(e) = fs::rename(&self.partial, &self.path) {
            if let Some(backup) = &backup {
                restore(backup, &self.path);
            }
            return Err(EtlError::output_write(&self.path, e));
        }
        Ok(backup)
    }

    /// Undo a successful `install`
    fn roll_back(&self, backup: Option<&Path>) {
        match backup {
            Some(backup) => restore(backup, &self.path),
            None => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!("Could not remove {} during rollback: {}", self.path.display(), e);
                }
            }
        }
    }
}

fn restore(backup: &Path, target: &Path) {
    if let Err(e) = fs::rename(backup, target) {
        warn!(
            "Could not restore {} from {}: {}",
            target.display(),
            backup.display(),
            e
        );
    }
}

/// Move every sink's partial file into place, or none of them.
///
/// All sinks are flushed and every target checked before the first rename.
/// If a later rename still fails, targets already replaced get their previous
/// contents back. On error all partial files are removed as the sinks drop.
pub fn commit_all(mut sinks: Vec<CsvRecordSink>) -> Result<()> {
    for sink in sinks.iter_mut() {
        sink.finish()?;
    }
    for sink in &sinks {
        sink.check_target()?;
    }

    let mut installed: Vec<(usize, Option<PathBuf>)> = Vec::with_capacity(sinks.len());
    for (i, sink) in sinks.iter().enumerate() {
        match sink.install() {
            Ok(backup) => installed.push((i, backup)),
            Err(e) => {
                for (j, backup) in installed.iter().rev() {
                    sinks[*j].roll_back(backup.as_deref());
                }
                return Err(e);
            }
        }
    }

    for sink in sinks.iter_mut() {
        sink.committed = true;
    }
    for (_, backup) in installed {
        if let Some(backup) = backup {
            if let Err(e) = fs::remove_file(&backup) {
                warn!("Could not remove {}: {}", backup.display(), e);
            }
        }
    }
    Ok(())
}

impl RecordSink for CsvRecordSink {
    fn write_record(&mut self, record: ValidatedRecord) -> Result<()> {
        let writer = match self.writer.as_mut() {
            Some(w) => w,
            None => {
                return Err(EtlError::output_write(
                    &self.partial,
                    io::Error::new(io::ErrorKind::Other, "sink already closed"),
                ))
            }
        };
        writer
            .write_record(record.to_row(self.with_reason))
            .map_err(|e| EtlError::output_write(&self.partial, e.into()))?;
        Ok(())
    }
}

impl Drop for CsvRecordSink {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.writer.take();
        match fs::remove_file(&self.partial) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove partial output {}: {}", self.partial.display(), e),
        }
    }
}

/// Write `value` as pretty JSON to a temporary sibling, then rename it into place
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let partial = partial_path(path);
    let body = serde_json::to_vec_pretty(value)?;
    let mut file = File::create(&partial).map_err(|e| EtlError::output_write(&partial, e))?;
    file.write_all(&body)
        .and_then(|_| file.sync_all())
        .map_err(|e| EtlError::output_write(&partial, e))?;
    fs::rename(&partial, path).map_err(|e| EtlError::output_write(path, e))
}

/// Remove a file if present; a missing file is fine
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EtlError::output_write(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RawRecord, ReasonCode};
    use tempfile::tempdir;

    fn excluded_record() -> ValidatedRecord {
        ValidatedRecord {
            raw: RawRecord {
                id: Some("id1".into()),
                ..Default::default()
            },
            trip_duration_s: None,
            trip_distance_km: None,
            trip_speed_kmph: None,
            reasons: vec![ReasonCode::MissingPickupCoord, ReasonCode::MissingDropoffCoord],
        }
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("data/cleaned.csv")),
            PathBuf::from("data/cleaned.csv.partial")
        );
    }

    #[test]
    fn commit_moves_file_into_place() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out/excluded.csv");
        let mut sink = CsvRecordSink::create(&target, true).unwrap();
        sink.write_record(excluded_record()).unwrap();
        assert!(partial_path(&target).exists());
        assert!(!target.exists());

        commit_all(vec![sink]).unwrap();
        assert!(target.exists());
        assert!(!partial_path(&target).exists());

        let content = fs::read_to_string(&target).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().ends_with(",reason"));
        assert!(lines
            .next()
            .unwrap()
            .ends_with("missing_pickup_coord;missing_dropoff_coord"));
    }

    #[test]
    fn dropped_sink_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("cleaned.csv");
        {
            let mut sink = CsvRecordSink::create(&target, false).unwrap();
            sink.write_record(excluded_record()).unwrap();
        }
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[test]
    fn commit_all_leaves_old_outputs_when_a_target_is_blocked() {
        let dir = tempdir().unwrap();
        let cleaned_target = dir.path().join("cleaned.csv");
        let excluded_target = dir.path().join("excluded.csv");
        fs::write(&cleaned_target, "previous run").unwrap();
        fs::create_dir(&excluded_target).unwrap();
        fs::write(excluded_target.join("keep"), "x").unwrap();

        let mut cleaned = CsvRecordSink::create(&cleaned_target, false).unwrap();
        let mut excluded = CsvRecordSink::create(&excluded_target, true).unwrap();
        cleaned.write_record(excluded_record()).unwrap();
        excluded.write_record(excluded_record()).unwrap();

        let err = commit_all(vec![cleaned, excluded]).unwrap_err();
        assert!(matches!(err, EtlError::OutputWriteFailed { .. }));
        assert_eq!(fs::read_to_string(&cleaned_target).unwrap(), "previous run");
        assert!(!partial_path(&cleaned_target).exists());
        assert!(!partial_path(&excluded_target).exists());
        assert!(!sibling_path(&cleaned_target, PREVIOUS_SUFFIX).exists());
    }

    #[test]
    fn commit_all_replaces_existing_outputs() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("cleaned.csv");
        fs::write(&target, "previous run").unwrap();

        let sink = CsvRecordSink::create(&target, false).unwrap();
        commit_all(vec![sink]).unwrap();
        assert!(fs::read_to_string(&target).unwrap().starts_with("id,"));
        assert!(!sibling_path(&target, PREVIOUS_SUFFIX).exists());
    }

    #[test]
    fn uncreatable_parent_is_output_write_failure() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "").unwrap();
        let err = CsvRecordSink::create(blocker.join("out/cleaned.csv"), false).err().unwrap();
        assert!(matches!(err, EtlError::OutputWriteFailed { .. }));
    }

    #[test]
    fn json_is_written_atomically() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("manifest.json");
        write_json_atomic(&target, &serde_json::json!({"status": "completed"})).unwrap();
        let back: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(back["status"], "completed");
        assert!(!partial_path(&target).exists());
        remove_if_exists(&target).unwrap();
        remove_if_exists(&target).unwrap();
    }
}
