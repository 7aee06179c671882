use csv::StringRecord;

use crate::constants::is_null_token;
use crate::error::{EtlError, Result};
use crate::types::RawRecord;

/// Logical trip fields, independent of how the input file names its columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripField {
    Id,
    VendorId,
    PickupDatetime,
    DropoffDatetime,
    PassengerCount,
    PickupLongitude,
    PickupLatitude,
    DropoffLongitude,
    DropoffLatitude,
    StoreAndFwdFlag,
    TripDuration,
}

impl TripField {
    pub const ALL: [TripField; 11] = [
        TripField::Id,
        TripField::VendorId,
        TripField::PickupDatetime,
        TripField::DropoffDatetime,
        TripField::PassengerCount,
        TripField::PickupLongitude,
        TripField::PickupLatitude,
        TripField::DropoffLongitude,
        TripField::DropoffLatitude,
        TripField::StoreAndFwdFlag,
        TripField::TripDuration,
    ];

    /// Accepted column names, most preferred first
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            TripField::Id => &["id", "trip_id"],
            TripField::VendorId => &["vendor_id", "vendorid"],
            TripField::PickupDatetime => &["pickup_datetime", "tpep_pickup_datetime"],
            TripField::DropoffDatetime => &["dropoff_datetime", "tpep_dropoff_datetime"],
            TripField::PassengerCount => &["passenger_count"],
            TripField::PickupLongitude => &["pickup_longitude", "pickup_lon", "pickup_lng"],
            TripField::PickupLatitude => &["pickup_latitude", "pickup_lat"],
            TripField::DropoffLongitude => &["dropoff_longitude", "dropoff_lon", "dropoff_lng"],
            TripField::DropoffLatitude => &["dropoff_latitude", "dropoff_lat"],
            TripField::StoreAndFwdFlag => &["store_and_fwd_flag"],
            TripField::TripDuration => &["trip_duration", "trip_duration_s"],
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

/// Column positions of each logical field, resolved once from the header row
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMap {
    positions: [Option<usize>; 11],
}

impl FieldMap {
    pub fn from_headers(headers: &StringRecord) -> Result<Self> {
        if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
            return Err(EtlError::MalformedInput("input has no header row".into()));
        }

        let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let mut positions = [None; 11];
        for field in TripField::ALL {
            positions[field.slot()] = field
                .aliases()
                .iter()
                .find_map(|alias| normalized.iter().position(|h| h == alias));
        }

        if positions.iter().all(Option::is_none) {
            return Err(EtlError::MalformedInput(format!(
                "header has no recognizable trip columns: {}",
                normalized.join(",")
            )));
        }
        Ok(Self { positions })
    }

    pub fn position(&self, field: TripField) -> Option<usize> {
        self.positions[field.slot()]
    }

    pub fn has(&self, field: TripField) -> bool {
        self.position(field).is_some()
    }

    fn cell(&self, row: &StringRecord, field: TripField) -> Option<String> {
        let value = row.get(self.position(field)?)?;
        if is_null_token(value) {
            None
        } else {
            Some(value.trim().to_string())
        }
    }

    /// Project a data row onto the fixed internal record shape
    pub fn normalize(&self, row: &StringRecord) -> RawRecord {
        RawRecord {
            id: self.cell(row, TripField::Id),
            vendor_id: self.cell(row, TripField::VendorId),
            pickup_datetime: self.cell(row, TripField::PickupDatetime),
            dropoff_datetime: self.cell(row, TripField::DropoffDatetime),
            passenger_count: self.cell(row, TripField::PassengerCount),
            pickup_longitude: self.cell(row, TripField::PickupLongitude),
            pickup_latitude: self.cell(row, TripField::PickupLatitude),
            dropoff_longitude: self.cell(row, TripField::DropoffLongitude),
            dropoff_latitude: self.cell(row, TripField::DropoffLatitude),
            store_and_fwd_flag: self.cell(row, TripField::StoreAndFwdFlag),
            trip_duration: self.cell(row, TripField::TripDuration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cells: &[&str]) -> StringRecord {
        StringRecord::from(cells.to_vec())
    }

    #[test]
    fn resolves_short_coordinate_aliases() {
        let headers = record(&["ID", "pickup_lat", "pickup_lon", "dropoff_lat", "dropoff_lon"]);
        let map = FieldMap::from_headers(&headers).unwrap();
        assert_eq!(map.position(TripField::Id), Some(0));
        assert_eq!(map.position(TripField::PickupLatitude), Some(1));
        assert_eq!(map.position(TripField::DropoffLongitude), Some(4));
        assert!(!map.has(TripField::TripDuration));
    }

    #[test]
    fn prefers_full_column_name_over_alias() {
        let headers = record(&["pickup_lat", "pickup_latitude"]);
        let map = FieldMap::from_headers(&headers).unwrap();
        assert_eq!(map.position(TripField::PickupLatitude), Some(1));
    }

    #[test]
    fn null_tokens_become_absent() {
        let headers = record(&["id", "pickup_latitude", "trip_duration"]);
        let map = FieldMap::from_headers(&headers).unwrap();
        let raw = map.normalize(&record(&["id9", " NaN ", ""]));
        assert_eq!(raw.id.as_deref(), Some("id9"));
        assert_eq!(raw.pickup_latitude, None);
        assert_eq!(raw.trip_duration, None);
        assert_eq!(raw.vendor_id, None);
    }

    #[test]
    fn unrecognized_header_is_malformed() {
        let err = FieldMap::from_headers(&record(&["foo", "bar"])).unwrap_err();
        assert!(matches!(err, EtlError::MalformedInput(_)));
    }
}
