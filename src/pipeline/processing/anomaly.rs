//! z-score outlier detection over a numeric column.
//!
//! This is a reporting signal only: nothing here feeds back into exclusion.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::constants::{DEFAULT_ANOMALY_Z_THRESHOLD, MAX_REPORTED_ANOMALIES};
use crate::error::{EtlError, Result};
use crate::pipeline::processing::parse_finite;

/// Values whose z-score magnitude exceeds `threshold`, in input order.
///
/// Uses the population standard deviation. Returns nothing for an empty
/// input or when every value is identical.
pub fn detect_anomalies(values: &[f64], threshold: f64) -> Vec<f64> {
    match mean_and_std_dev(values) {
        Some((mean, std_dev)) if std_dev > 0.0 => values
            .iter()
            .copied()
            .filter(|x| ((x - mean) / std_dev).abs() > threshold)
            .collect(),
        _ => Vec::new(),
    }
}

fn mean_and_std_dev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Summary of one anomaly pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub sample_size: usize,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub threshold: f64,
    pub anomaly_count: usize,
    /// First anomalous values, capped
    pub anomalies: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    threshold: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_ANOMALY_Z_THRESHOLD)
    }
}

impl AnomalyDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn detect(&self, values: &[f64]) -> Vec<f64> {
        detect_anomalies(values, self.threshold)
    }

    pub fn report(&self, values: &[f64]) -> AnomalyReport {
        let stats = mean_and_std_dev(values);
        let mut anomalies = self.detect(values);
        let anomaly_count = anomalies.len();
        anomalies.truncate(MAX_REPORTED_ANOMALIES);
        AnomalyReport {
            sample_size: values.len(),
            mean: stats.map(|(m, _)| m),
            std_dev: stats.map(|(_, s)| s),
            threshold: self.threshold,
            anomaly_count,
            anomalies,
        }
    }
}

/// Finite values of one numeric column of a CSV file. Empty and
/// non-numeric cells are skipped.
pub fn read_numeric_column(path: &Path, column: &str) -> Result<Vec<f64>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EtlError::InputNotFound {
            path: path.to_path_buf(),
        },
        _ => EtlError::Io(e),
    })?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));
    let index = reader
        .headers()?
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(column))
        .ok_or_else(|| {
            EtlError::MalformedInput(format!("{} has no '{}' column", path.display(), column))
        })?;

    let mut values = Vec::new();
    for row in reader.records() {
        let row = row?;
        if let Some(v) = row.get(index).and_then(parse_finite) {
            values.push(v);
        }
    }
    Ok(values)
}
