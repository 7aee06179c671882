//! Trip duration resolution from a supplied duration cell and/or the
//! pickup/dropoff timestamps.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use super::parse_finite;
use crate::types::ReasonCode;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a trip timestamp. Offsets in RFC 3339 input are normalized to UTC.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Outcome of duration resolution for one record
#[derive(Debug, Clone, PartialEq)]
pub struct DurationResolution {
    pub pickup: Option<NaiveDateTime>,
    pub dropoff: Option<NaiveDateTime>,
    pub duration_s: Option<f64>,
    pub reasons: Vec<ReasonCode>,
}

/// Reconciles the duration cell with the timestamps. Never fails: anything
/// unparsable degrades to `None` plus a reason code.
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationResolver;

impl DurationResolver {
    pub fn resolve(
        &self,
        raw_duration: Option<&str>,
        pickup_raw: Option<&str>,
        dropoff_raw: Option<&str>,
    ) -> DurationResolution {
        let mut reasons = Vec::new();
        let pickup = pickup_raw.and_then(parse_timestamp);
        let dropoff = dropoff_raw.and_then(parse_timestamp);

        match (pickup, dropoff) {
            (Some(p), Some(d)) => {
                if p >= d {
                    reasons.push(ReasonCode::NonpositiveDurationFromTimestamps);
                }
            }
            _ => reasons.push(ReasonCode::InvalidDatetime),
        }

        // The supplied duration wins when it parses, even if it is not positive
        let mut duration_s = None;
        if let Some(raw) = raw_duration {
            match parse_finite(raw) {
                Some(value) => {
                    if value <= 0.0 {
                        reasons.push(ReasonCode::NonpositiveDuration);
                    }
                    duration_s = Some(value);
                }
                None => reasons.push(ReasonCode::BadTripDurationValue),
            }
        }

        if duration_s.is_none() {
            if let (Some(p), Some(d)) = (pickup, dropoff) {
                let seconds = d.signed_duration_since(p).num_milliseconds() as f64 / 1000.0;
                if seconds <= 0.0 {
                    reasons.push(ReasonCode::NonpositiveDuration);
                }
                duration_s = Some(seconds);
            } else if raw_duration.is_none() {
                reasons.push(ReasonCode::CannotComputeDuration);
            }
        }

        DurationResolution {
            pickup,
            dropoff,
            duration_s,
            reasons,
        }
    }
}
