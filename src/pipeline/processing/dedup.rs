use std::collections::HashSet;

use super::parse_finite;
use crate::types::RawRecord;

/// Normalized duplicate key: pickup/dropoff timestamps, the four coordinates
/// and the passenger count, each as a string.
///
/// Numeric cells are rendered through `f64` so `40.70` and `40.7` collide;
/// everything else is compared as trimmed text and absent cells as "".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DuplicateSignature([String; 7]);

/// Signatures seen so far in one pipeline run. Entries are never removed.
#[derive(Debug, Default)]
pub struct SignatureSet {
    seen: HashSet<DuplicateSignature>,
}

impl SignatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.seen.len()
    }
}

pub struct DuplicateDetector;

impl DuplicateDetector {
    pub fn signature(record: &RawRecord) -> DuplicateSignature {
        DuplicateSignature([
            text_component(&record.pickup_datetime),
            text_component(&record.dropoff_datetime),
            numeric_component(&record.pickup_latitude),
            numeric_component(&record.pickup_longitude),
            numeric_component(&record.dropoff_latitude),
            numeric_component(&record.dropoff_longitude),
            numeric_component(&record.passenger_count),
        ])
    }

    /// Returns true if `signature` was already seen; otherwise records it and returns false.
    pub fn check_and_record(signature: DuplicateSignature, seen: &mut SignatureSet) -> bool {
        !seen.seen.insert(signature)
    }
}

fn text_component(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn numeric_component(value: &Option<String>) -> String {
    match value.as_deref() {
        Some(raw) => match parse_finite(raw) {
            Some(v) => v.to_string(),
            None => raw.trim().to_string(),
        },
        None => String::new(),
    }
}
