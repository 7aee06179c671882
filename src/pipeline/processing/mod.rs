// Pipeline processing: per-record validation, derived metrics and classification

pub mod anomaly;
pub mod classifier;
pub mod dedup;
pub mod duration;
pub mod geo;

pub use anomaly::{detect_anomalies, read_numeric_column, AnomalyDetector, AnomalyReport};
pub use classifier::{ClassifierPolicy, RecordClassifier, RunContext};
pub use dedup::{DuplicateDetector, DuplicateSignature, SignatureSet};
pub use duration::{DurationResolution, DurationResolver};
pub use geo::GeoValidator;

/// Parse a raw cell as a finite number. `NaN` and infinities count as unparsable.
pub fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
