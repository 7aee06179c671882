use std::path::PathBuf;
use thiserror::Error;

/// Run-level faults. Per-record data-quality problems never show up here;
/// they are carried as `ReasonCode`s on the record instead.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Input file not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Failed to write output '{}': {source}", path.display())]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Incomplete run: {0}")]
    IncompleteRun(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    pub fn output_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EtlError::OutputWriteFailed {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
