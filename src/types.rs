use serde::{Deserialize, Serialize};
use std::fmt;

/// One input row in a fixed shape, every cell kept as raw text.
///
/// `None` means the cell was absent or held a null token. Values are only
/// interpreted (parsed as numbers or timestamps) by the processing stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: Option<String>,
    pub vendor_id: Option<String>,
    pub pickup_datetime: Option<String>,
    pub dropoff_datetime: Option<String>,
    pub passenger_count: Option<String>,
    pub pickup_longitude: Option<String>,
    pub pickup_latitude: Option<String>,
    pub dropoff_longitude: Option<String>,
    pub dropoff_latitude: Option<String>,
    pub store_and_fwd_flag: Option<String>,
    pub trip_duration: Option<String>,
}

impl RawRecord {
    /// Raw fields in output column order (see `RAW_COLUMNS`)
    pub fn fields(&self) -> [&Option<String>; 11] {
        [
            &self.id,
            &self.vendor_id,
            &self.pickup_datetime,
            &self.dropoff_datetime,
            &self.passenger_count,
            &self.pickup_longitude,
            &self.pickup_latitude,
            &self.dropoff_longitude,
            &self.dropoff_latitude,
            &self.store_and_fwd_flag,
            &self.trip_duration,
        ]
    }
}

/// Raw columns written to both output files, in order
pub const RAW_COLUMNS: [&str; 11] = [
    "id",
    "vendor_id",
    "pickup_datetime",
    "dropoff_datetime",
    "passenger_count",
    "pickup_longitude",
    "pickup_latitude",
    "dropoff_longitude",
    "dropoff_latitude",
    "store_and_fwd_flag",
    "trip_duration",
];

/// Derived columns appended after the raw ones
pub const DERIVED_COLUMNS: [&str; 3] = ["trip_duration_s", "trip_distance_km", "trip_speed_kmph"];

pub const REASON_COLUMN: &str = "reason";

/// Why a record was excluded. Several may apply to one record; they are kept
/// in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    InvalidDatetime,
    NonpositiveDurationFromTimestamps,
    NonpositiveDuration,
    BadTripDurationValue,
    CannotComputeDuration,
    MissingPickupCoord,
    InvalidPickupCoord,
    MissingDropoffCoord,
    InvalidDropoffCoord,
    CannotComputeDistance,
    BadDistance,
    OutlierSpeed,
    Duplicate,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 13] = [
        ReasonCode::InvalidDatetime,
        ReasonCode::NonpositiveDurationFromTimestamps,
        ReasonCode::NonpositiveDuration,
        ReasonCode::BadTripDurationValue,
        ReasonCode::CannotComputeDuration,
        ReasonCode::MissingPickupCoord,
        ReasonCode::InvalidPickupCoord,
        ReasonCode::MissingDropoffCoord,
        ReasonCode::InvalidDropoffCoord,
        ReasonCode::CannotComputeDistance,
        ReasonCode::BadDistance,
        ReasonCode::OutlierSpeed,
        ReasonCode::Duplicate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::InvalidDatetime => "invalid_datetime",
            ReasonCode::NonpositiveDurationFromTimestamps => "nonpositive_duration_from_timestamps",
            ReasonCode::NonpositiveDuration => "nonpositive_duration",
            ReasonCode::BadTripDurationValue => "bad_trip_duration_value",
            ReasonCode::CannotComputeDuration => "cannot_compute_duration",
            ReasonCode::MissingPickupCoord => "missing_pickup_coord",
            ReasonCode::InvalidPickupCoord => "invalid_pickup_coord",
            ReasonCode::MissingDropoffCoord => "missing_dropoff_coord",
            ReasonCode::InvalidDropoffCoord => "invalid_dropoff_coord",
            ReasonCode::CannotComputeDistance => "cannot_compute_distance",
            ReasonCode::BadDistance => "bad_distance",
            ReasonCode::OutlierSpeed => "outlier_speed",
            ReasonCode::Duplicate => "duplicate",
        }
    }

    pub fn parse(tag: &str) -> Option<ReasonCode> {
        ReasonCode::ALL.iter().copied().find(|r| r.as_str() == tag.trim())
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw record with its derived metrics and exclusion reasons attached.
///
/// Derived fields are filled in whenever they can be computed, including on
/// records that end up excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRecord {
    pub raw: RawRecord,
    pub trip_duration_s: Option<f64>,
    pub trip_distance_km: Option<f64>,
    pub trip_speed_kmph: Option<f64>,
    pub reasons: Vec<ReasonCode>,
}

impl ValidatedRecord {
    pub fn is_clean(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn has_reason(&self, reason: ReasonCode) -> bool {
        self.reasons.contains(&reason)
    }

    /// Semicolon-joined reason list, as written to the excluded file
    pub fn reason(&self) -> String {
        self.reasons
            .iter()
            .map(ReasonCode::as_str)
            .collect::<Vec<_>>()
            .join(";")
    }

    /// CSV cells for this record: raw columns, derived columns and, when
    /// asked for, the joined reason.
    pub fn to_row(&self, with_reason: bool) -> Vec<String> {
        let mut row: Vec<String> = self
            .raw
            .fields()
            .iter()
            .map(|v| v.as_deref().unwrap_or_default().to_string())
            .collect();
        for value in [self.trip_duration_s, self.trip_distance_km, self.trip_speed_kmph] {
            row.push(value.map(|v| v.to_string()).unwrap_or_default());
        }
        if with_reason {
            row.push(self.reason());
        }
        row
    }
}

/// Header row for an output file
pub fn output_header(with_reason: bool) -> Vec<&'static str> {
    let mut header: Vec<&'static str> = RAW_COLUMNS.to_vec();
    header.extend_from_slice(&DERIVED_COLUMNS);
    if with_reason {
        header.push(REASON_COLUMN);
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_round_trip_through_tags() {
        for reason in ReasonCode::ALL {
            assert_eq!(ReasonCode::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(ReasonCode::parse("not_a_reason"), None);
    }

    #[test]
    fn reason_string_keeps_detection_order() {
        let record = ValidatedRecord {
            raw: RawRecord::default(),
            trip_duration_s: None,
            trip_distance_km: None,
            trip_speed_kmph: None,
            reasons: vec![ReasonCode::InvalidPickupCoord, ReasonCode::Duplicate],
        };
        assert_eq!(record.reason(), "invalid_pickup_coord;duplicate");
        assert!(!record.is_clean());
    }

    #[test]
    fn row_width_matches_header() {
        let record = ValidatedRecord {
            raw: RawRecord {
                id: Some("id1".into()),
                ..Default::default()
            },
            trip_duration_s: Some(600.0),
            trip_distance_km: None,
            trip_speed_kmph: None,
            reasons: Vec::new(),
        };
        assert_eq!(record.to_row(false).len(), output_header(false).len());
        assert_eq!(record.to_row(true).len(), output_header(true).len());
        let row = record.to_row(false);
        assert_eq!(row[0], "id1");
        assert_eq!(row[11], "600");
        assert_eq!(row[12], "");
    }
}
