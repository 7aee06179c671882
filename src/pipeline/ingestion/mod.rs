// Pipeline ingestion: header normalization and chunked reading of raw trip files

pub mod fields;
pub mod source;

pub use fields::{FieldMap, TripField};
pub use source::{RecordChunks, TripSource};
