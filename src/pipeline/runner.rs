use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::ingestion::TripSource;
use super::manifest::{sha256_file, RunManifest, RunSummary, STATUS_COMPLETED};
use super::output::{commit_all, remove_if_exists, write_json_atomic, CsvRecordSink, RecordSink};
use super::processing::{AnomalyDetector, ClassifierPolicy, RecordClassifier, RunContext};
use crate::config::{EtlConfig, PathsConfig};
use crate::error::Result;
use crate::metrics;
use crate::types::ValidatedRecord;

/// Both partitions of one run, plus its summary
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub cleaned: Vec<ValidatedRecord>,
    pub excluded: Vec<ValidatedRecord>,
    pub summary: RunSummary,
}

/// Where a file-backed run writes its artifacts
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub cleaned: PathBuf,
    pub excluded: PathBuf,
    pub manifest: PathBuf,
}

impl From<&PathsConfig> for OutputPaths {
    fn from(paths: &PathsConfig) -> Self {
        Self {
            cleaned: paths.clean_file.clone(),
            excluded: paths.excluded_file.clone(),
            manifest: paths.manifest.clone(),
        }
    }
}

#[derive(Default)]
struct RunTally {
    total: u64,
    cleaned: u64,
    excluded: u64,
    chunks: u64,
    reason_counts: BTreeMap<String, u64>,
    cleaned_speeds: Vec<f64>,
}

/// Streams a trip file in bounded chunks through the classifier.
///
/// One `RunContext` is shared by every chunk of a run, so duplicate
/// detection does not depend on where chunk boundaries fall.
pub struct ChunkedPipelineRunner {
    classifier: RecordClassifier,
    anomalies: AnomalyDetector,
}

impl Default for ChunkedPipelineRunner {
    fn default() -> Self {
        Self::new(RecordClassifier::default(), AnomalyDetector::default())
    }
}

impl ChunkedPipelineRunner {
    pub fn new(classifier: RecordClassifier, anomalies: AnomalyDetector) -> Self {
        Self {
            classifier,
            anomalies,
        }
    }

    pub fn from_config(config: &EtlConfig) -> Self {
        Self::new(
            RecordClassifier::new(ClassifierPolicy::from(&config.policy)),
            AnomalyDetector::new(config.policy.anomaly_z_threshold),
        )
    }

    /// Run over `source` and collect both partitions in memory
    pub fn run(&self, source: &TripSource, chunk_size: usize) -> Result<PipelineResult> {
        let mut cleaned = Vec::new();
        let mut excluded = Vec::new();
        let summary = self.run_into(source, chunk_size, &mut cleaned, &mut excluded)?;
        Ok(PipelineResult {
            cleaned,
            excluded,
            summary,
        })
    }

    /// Run over `source`, routing each classified record to one of the sinks
    #[instrument(skip(self, cleaned, excluded), fields(input = %source.path().display()))]
    pub fn run_into(
        &self,
        source: &TripSource,
        chunk_size: usize,
        cleaned: &mut dyn RecordSink,
        excluded: &mut dyn RecordSink,
    ) -> Result<RunSummary> {
        let chunks = source.chunks(chunk_size)?;
        let mut ctx = RunContext::new();
        let mut tally = RunTally::default();

        for chunk in chunks {
            let chunk = chunk?;
            tally.chunks += 1;
            info!("Processing chunk {} of size {}", tally.chunks, chunk.len());
            metrics::pipeline::chunk_processed(chunk.len());

            for raw in chunk {
                let record = self.classifier.classify(raw, &mut ctx);
                tally.total += 1;
                if record.is_clean() {
                    tally.cleaned += 1;
                    if let Some(speed) = record.trip_speed_kmph {
                        tally.cleaned_speeds.push(speed);
                    }
                    metrics::pipeline::record_cleaned();
                    cleaned.write_record(record)?;
                } else {
                    tally.excluded += 1;
                    for reason in &record.reasons {
                        *tally.reason_counts.entry(reason.to_string()).or_insert(0) += 1;
                    }
                    metrics::pipeline::record_excluded(&record.reasons);
                    excluded.write_record(record)?;
                }
            }
        }

        let speed_anomalies = self.anomalies.report(&tally.cleaned_speeds);
        info!(
            "Speed anomalies: {} of {} clean trips exceed z={} (reported only)",
            speed_anomalies.anomaly_count, speed_anomalies.sample_size, speed_anomalies.threshold
        );
        debug!("Distinct trip signatures: {}", ctx.signatures().len());

        Ok(RunSummary {
            total_records: tally.total,
            cleaned_records: tally.cleaned,
            excluded_records: tally.excluded,
            chunks: tally.chunks,
            reason_counts: tally.reason_counts,
            speed_anomalies,
        })
    }

    /// Run over `source` and write the cleaned file, the excluded file and,
    /// last, the run manifest.
    ///
    /// Outputs are written to `.partial` siblings and renamed into place only
    /// after the whole input has been processed. On any error the partial
    /// files are removed and no manifest exists.
    pub fn run_to_files(
        &self,
        source: &TripSource,
        chunk_size: usize,
        outputs: &OutputPaths,
    ) -> Result<RunManifest> {
        let started_at = Utc::now();
        let timer = Instant::now();
        info!("🚀 Starting cleaning run for {}", source.path().display());

        remove_if_exists(&outputs.manifest)?;
        let result = self.write_outputs(source, chunk_size, outputs);
        let (input_sha256, summary) = match result {
            Ok(done) => done,
            Err(e) => {
                error!("Cleaning run failed: {}", e);
                metrics::pipeline::run_failed();
                return Err(e);
            }
        };

        let manifest = RunManifest {
            run_id: Uuid::new_v4(),
            status: STATUS_COMPLETED.to_string(),
            input_path: source.path().to_path_buf(),
            input_sha256,
            chunk_size,
            cleaned_file: outputs.cleaned.clone(),
            excluded_file: outputs.excluded.clone(),
            started_at,
            completed_at: Utc::now(),
            summary,
        };
        write_json_atomic(&outputs.manifest, &manifest)?;

        let elapsed = timer.elapsed().as_secs_f64();
        metrics::pipeline::run_completed(elapsed, manifest.summary.speed_anomalies.anomaly_count);
        info!(
            "✅ Saved {} cleaned trips, {} excluded trips in {:.2}s",
            manifest.summary.cleaned_records, manifest.summary.excluded_records, elapsed
        );
        Ok(manifest)
    }

    fn write_outputs(
        &self,
        source: &TripSource,
        chunk_size: usize,
        outputs: &OutputPaths,
    ) -> Result<(String, RunSummary)> {
        let input_sha256 = sha256_file(source.path())?;
        let mut cleaned = CsvRecordSink::create(&outputs.cleaned, false)?;
        let mut excluded = CsvRecordSink::create(&outputs.excluded, true)?;
        let summary = self.run_into(source, chunk_size, &mut cleaned, &mut excluded)?;
        commit_all(vec![cleaned, excluded])?;
        Ok((input_sha256, summary))
    }
}
