//! Coordinate validation against a bounding box and great-circle distance.

use crate::config::BoundingBox;
use crate::constants::EARTH_RADIUS_KM;

use super::parse_finite;

#[derive(Debug, Clone, Copy, Default)]
pub struct GeoValidator {
    bbox: BoundingBox,
}

impl GeoValidator {
    pub fn new(bbox: BoundingBox) -> Self {
        Self { bbox }
    }

    /// True iff both values are finite and inside the bounding box (edges inclusive)
    pub fn is_valid_coordinate(&self, lat: f64, lon: f64) -> bool {
        if !lat.is_finite() || !lon.is_finite() {
            return false;
        }
        (self.bbox.min_lat..=self.bbox.max_lat).contains(&lat)
            && (self.bbox.min_lon..=self.bbox.max_lon).contains(&lon)
    }

    /// Same check on raw cells. Fails closed on anything that is not a finite number.
    pub fn is_valid_raw(&self, lat: &str, lon: &str) -> bool {
        match (parse_finite(lat), parse_finite(lon)) {
            (Some(lat), Some(lon)) => self.is_valid_coordinate(lat, lon),
            _ => false,
        }
    }
}

/// Haversine distance in kilometres, or `None` if any input is not a finite number.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Option<f64> {
    if ![lat1, lon1, lat2, lon2].iter().all(|v| v.is_finite()) {
        return None;
    }
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    Some(EARTH_RADIUS_KM * c)
}

/// Haversine over raw cells
pub fn haversine_km_raw(lat1: &str, lon1: &str, lat2: &str, lon2: &str) -> Option<f64> {
    haversine_km(
        parse_finite(lat1)?,
        parse_finite(lon1)?,
        parse_finite(lat2)?,
        parse_finite(lon2)?,
    )
}
