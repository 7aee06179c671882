use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants;
use crate::error::{EtlError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub paths: PathsConfig,
    pub pipeline: PipelineConfig,
    pub policy: PolicyConfig,
    /// File the configuration was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_file: PathBuf,
    pub clean_file: PathBuf,
    pub excluded_file: PathBuf,
    pub manifest: PathBuf,
    pub database: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_file: constants::DEFAULT_RAW_FILE.into(),
            clean_file: constants::DEFAULT_CLEAN_FILE.into(),
            excluded_file: constants::DEFAULT_EXCLUDED_FILE.into(),
            manifest: constants::DEFAULT_MANIFEST_FILE.into(),
            database: constants::DEFAULT_DATABASE_FILE.into(),
            log_dir: constants::DEFAULT_LOG_DIR.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Policy thresholds that decide what counts as a bad trip
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_speed_kmph: f64,
    pub anomaly_z_threshold: f64,
    pub bounding_box: BoundingBox,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_speed_kmph: constants::DEFAULT_MAX_SPEED_KMPH,
            anomaly_z_threshold: constants::DEFAULT_ANOMALY_Z_THRESHOLD,
            bounding_box: BoundingBox::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min_lat: constants::MIN_LAT,
            max_lat: constants::MAX_LAT,
            min_lon: constants::MIN_LON,
            max_lon: constants::MAX_LON,
        }
    }
}

impl EtlConfig {
    /// Load configuration.
    ///
    /// With an explicit path the file must exist. Without one, `ETL_CONFIG` is
    /// consulted, then `etl.toml` in the working directory; a missing default
    /// file falls back to built-in defaults. Environment overrides are applied
    /// last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with_default(explicit, Path::new(constants::DEFAULT_CONFIG_FILE))
    }

    fn load_with_default(explicit: Option<&Path>, default_path: &Path) -> Result<Self> {
        let env_path = std::env::var("ETL_CONFIG").ok().map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => {
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    debug!("No {} found, using built-in defaults", default_path.display());
                    Self::default()
                }
            }
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let mut config: EtlConfig = toml::from_str(&content)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var("ETL_CHUNK_SIZE") {
            self.pipeline.chunk_size = raw.trim().parse().map_err(|_| {
                EtlError::Config(format!("ETL_CHUNK_SIZE is not a valid size: '{}'", raw))
            })?;
        }
        if let Ok(db) = std::env::var("ETL_DATABASE") {
            if !db.trim().is_empty() {
                self.paths.database = PathBuf::from(db.trim());
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.chunk_size == 0 {
            return Err(EtlError::Config("chunk_size must be greater than zero".into()));
        }
        if !(self.policy.max_speed_kmph > 0.0) {
            return Err(EtlError::Config("max_speed_kmph must be positive".into()));
        }
        if !(self.policy.anomaly_z_threshold > 0.0) {
            return Err(EtlError::Config("anomaly_z_threshold must be positive".into()));
        }
        let bbox = &self.policy.bounding_box;
        if !(bbox.min_lat < bbox.max_lat) || !(bbox.min_lon < bbox.max_lon) {
            return Err(EtlError::Config(format!("bounding box is empty or inverted: {:?}", bbox)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_constants() {
        let config = EtlConfig::default();
        assert_eq!(config.pipeline.chunk_size, 100_000);
        assert_eq!(config.policy.max_speed_kmph, 200.0);
        assert_eq!(config.policy.anomaly_z_threshold, 3.0);
        assert_eq!(config.policy.bounding_box.min_lat, 40.4774);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: EtlConfig = toml::from_str(
            r#"
            [pipeline]
            chunk_size = 500

            [policy]
            max_speed_kmph = 120.0
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.chunk_size, 500);
        assert_eq!(config.policy.max_speed_kmph, 120.0);
        assert_eq!(config.policy.anomaly_z_threshold, 3.0);
        assert_eq!(config.paths.clean_file, PathBuf::from("data/cleaned_trips.csv"));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let mut config = EtlConfig::default();
        config.pipeline.chunk_size = 0;
        assert!(matches!(config.validate(), Err(EtlError::Config(_))));
    }

    #[test]
    fn rejects_inverted_bounding_box() {
        let mut config = EtlConfig::default();
        config.policy.bounding_box.min_lat = 41.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = EtlConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    // Environment variables are process-wide; serialize the tests that touch them
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    struct EnvVars(&'static [&'static str]);

    impl EnvVars {
        fn set(vars: &'static [&'static str], values: &[&str]) -> Self {
            for name in ["ETL_CONFIG", "ETL_CHUNK_SIZE", "ETL_DATABASE"] {
                std::env::remove_var(name);
            }
            for (name, value) in vars.iter().zip(values) {
                std::env::set_var(name, value);
            }
            Self(vars)
        }
    }

    impl Drop for EnvVars {
        fn drop(&mut self) {
            for name in self.0 {
                std::env::remove_var(name);
            }
        }
    }

    #[test]
    fn env_overrides_chunk_size_and_database() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let _env = EnvVars::set(&["ETL_CHUNK_SIZE", "ETL_DATABASE"], &["250", " /tmp/trips.db "]);

        let config = EtlConfig::load_with_default(None, &dir.path().join("etl.toml")).unwrap();
        assert_eq!(config.pipeline.chunk_size, 250);
        assert_eq!(config.paths.database, PathBuf::from("/tmp/trips.db"));
        assert_eq!(config.source, None);
    }

    #[test]
    fn unparsable_env_chunk_size_is_config_error() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let _env = EnvVars::set(&["ETL_CHUNK_SIZE"], &["lots"]);

        let err = EtlConfig::load_with_default(None, &dir.path().join("etl.toml")).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn falls_back_to_default_file_then_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _env = EnvVars::set(&[], &[]);
        let dir = tempfile::tempdir().unwrap();
        let default_path = dir.path().join("etl.toml");

        let config = EtlConfig::load_with_default(None, &default_path).unwrap();
        assert_eq!(config.pipeline.chunk_size, constants::DEFAULT_CHUNK_SIZE);
        assert_eq!(config.source, None);

        fs::write(&default_path, "[pipeline]\nchunk_size = 42\n").unwrap();
        let config = EtlConfig::load_with_default(None, &default_path).unwrap();
        assert_eq!(config.pipeline.chunk_size, 42);
        assert_eq!(config.source.as_deref(), Some(default_path.as_path()));
    }

    #[test]
    fn etl_config_env_beats_default_file() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let default_path = dir.path().join("etl.toml");
        let chosen = dir.path().join("chosen.toml");
        fs::write(&default_path, "[pipeline]\nchunk_size = 42\n").unwrap();
        fs::write(&chosen, "[pipeline]\nchunk_size = 7\n").unwrap();
        let _env = EnvVars::set(&["ETL_CONFIG"], &[chosen.to_str().unwrap()]);

        let config = EtlConfig::load_with_default(None, &default_path).unwrap();
        assert_eq!(config.pipeline.chunk_size, 7);
    }
}
