pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use config::EtlConfig;
pub use error::{EtlError, Result};
pub use pipeline::{ChunkedPipelineRunner, OutputPaths, PipelineResult, RunManifest, RunSummary, TripSource};
pub use storage::{LoadReport, TripFilter, TripStore};
pub use types::{RawRecord, ReasonCode, ValidatedRecord};
