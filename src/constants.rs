/// Policy defaults for the trip cleaning pipeline.
/// Every value here can be overridden through `EtlConfig`.

// NYC bounding box used for coordinate validation
pub const MIN_LAT: f64 = 40.4774;
pub const MAX_LAT: f64 = 40.9176;
pub const MIN_LON: f64 = -74.2591;
pub const MAX_LON: f64 = -73.7004;

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Speeds above this are flagged `outlier_speed`
pub const DEFAULT_MAX_SPEED_KMPH: f64 = 200.0;

/// z-score magnitude above which a speed is reported as anomalous
pub const DEFAULT_ANOMALY_Z_THRESHOLD: f64 = 3.0;

pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Upper bound on anomalous values echoed into a report
pub const MAX_REPORTED_ANOMALIES: usize = 100;

// Default artifact locations (relative to the working directory)
pub const DEFAULT_CONFIG_FILE: &str = "etl.toml";
pub const DEFAULT_RAW_FILE: &str = "data/train.csv";
pub const DEFAULT_CLEAN_FILE: &str = "data/cleaned_trips.csv";
pub const DEFAULT_EXCLUDED_FILE: &str = "data/excluded_trips.csv";
pub const DEFAULT_MANIFEST_FILE: &str = "data/etl_run.json";
pub const DEFAULT_DATABASE_FILE: &str = "data/urban_mobility.db";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Cell values read as "absent"
pub const NULL_TOKENS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"];

/// Suffix for in-progress output files, renamed away on success
pub const PARTIAL_SUFFIX: &str = "partial";
pub const PREVIOUS_SUFFIX: &str = "previous";

/// Returns true when a raw cell should be treated as missing
pub fn is_null_token(value: &str) -> bool {
    let trimmed = value.trim();
    NULL_TOKENS.iter().any(|t| *t == trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_tokens_are_recognized() {
        assert!(is_null_token(""));
        assert!(is_null_token("  NaN "));
        assert!(is_null_token("None"));
        assert!(!is_null_token("0"));
        assert!(!is_null_token("40.7"));
    }
}
