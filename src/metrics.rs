//! Pipeline metrics.
//!
//! Counters go through the `metrics` facade, so they are no-ops until
//! `init_metrics` installs the Prometheus recorder. Batch runs have no scrape
//! endpoint; the CLI writes a text snapshot instead.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::error::{EtlError, Result};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Idempotent; returns false if no recorder could be installed.
pub fn init_metrics() -> bool {
    if HANDLE.get().is_some() {
        return true;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = HANDLE.set(handle);
            info!("Prometheus recorder installed");
            true
        }
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
            false
        }
    }
}

/// Current metrics in Prometheus text format
pub fn render() -> Option<String> {
    HANDLE.get().map(PrometheusHandle::render)
}

pub fn write_snapshot(path: &Path) -> Result<()> {
    let body = render().unwrap_or_default();
    std::fs::write(path, body).map_err(|e| EtlError::output_write(path, e))
}

pub mod pipeline {
    use crate::types::ReasonCode;

    pub fn chunk_processed(records: usize) {
        ::metrics::counter!("etl_chunks_processed_total").increment(1);
        ::metrics::histogram!("etl_chunk_size").record(records as f64);
    }

    pub fn record_cleaned() {
        ::metrics::counter!("etl_records_total", "outcome" => "cleaned").increment(1);
    }

    pub fn record_excluded(reasons: &[ReasonCode]) {
        ::metrics::counter!("etl_records_total", "outcome" => "excluded").increment(1);
        for reason in reasons {
            ::metrics::counter!("etl_records_excluded_total", "reason" => reason.as_str()).increment(1);
        }
    }

    pub fn run_completed(duration_secs: f64, speed_anomalies: usize) {
        ::metrics::histogram!("etl_run_duration_seconds").record(duration_secs);
        ::metrics::gauge!("etl_speed_anomalies").set(speed_anomalies as f64);
    }

    pub fn run_failed() {
        ::metrics::counter!("etl_runs_failed_total").increment(1);
    }
}

pub mod loader {
    pub fn load_finished(inserted: u64, skipped: u64, rejected: u64) {
        ::metrics::counter!("etl_trips_loaded_total").increment(inserted);
        ::metrics::counter!("etl_trips_skipped_total").increment(skipped);
        ::metrics::counter!("etl_trips_rejected_total").increment(rejected);
    }
}
