// Trip cleaning pipeline: ingestion, per-record processing, outputs and the chunked runner

pub mod ingestion;
pub mod manifest;
pub mod output;
pub mod processing;
pub mod runner;

pub use ingestion::TripSource;
pub use manifest::{RunManifest, RunSummary};
pub use runner::{ChunkedPipelineRunner, OutputPaths, PipelineResult};
