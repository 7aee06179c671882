use tracing::debug;

use super::dedup::{DuplicateDetector, SignatureSet};
use super::duration::DurationResolver;
use super::geo::{haversine_km_raw, GeoValidator};
use crate::config::{BoundingBox, PolicyConfig};
use crate::constants::DEFAULT_MAX_SPEED_KMPH;
use crate::types::{RawRecord, ReasonCode, ValidatedRecord};

/// Thresholds the classifier applies to every record
#[derive(Debug, Clone, Copy)]
pub struct ClassifierPolicy {
    pub bounding_box: BoundingBox,
    pub max_speed_kmph: f64,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            bounding_box: BoundingBox::default(),
            max_speed_kmph: DEFAULT_MAX_SPEED_KMPH,
        }
    }
}

impl From<&PolicyConfig> for ClassifierPolicy {
    fn from(policy: &PolicyConfig) -> Self {
        Self {
            bounding_box: policy.bounding_box,
            max_speed_kmph: policy.max_speed_kmph,
        }
    }
}

/// State that lives for exactly one pipeline run and is shared by every chunk.
///
/// Each run gets its own context, so separate runs never see each other's
/// signatures.
#[derive(Debug, Default)]
pub struct RunContext {
    signatures: SignatureSet,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signatures(&self) -> &SignatureSet {
        &self.signatures
    }
}

/// Validates one raw record, derives its metrics and collects every reason
/// it should be excluded for.
#[derive(Debug, Clone)]
pub struct RecordClassifier {
    geo: GeoValidator,
    durations: DurationResolver,
    max_speed_kmph: f64,
}

impl Default for RecordClassifier {
    fn default() -> Self {
        Self::new(ClassifierPolicy::default())
    }
}

impl RecordClassifier {
    pub fn new(policy: ClassifierPolicy) -> Self {
        Self {
            geo: GeoValidator::new(policy.bounding_box),
            durations: DurationResolver,
            max_speed_kmph: policy.max_speed_kmph,
        }
    }

    /// Classify a record. Checks run in a fixed order and reasons are kept in
    /// that order; the record's signature is added to `ctx`.
    pub fn classify(&self, raw: RawRecord, ctx: &mut RunContext) -> ValidatedRecord {
        let resolution = self.durations.resolve(
            raw.trip_duration.as_deref(),
            raw.pickup_datetime.as_deref(),
            raw.dropoff_datetime.as_deref(),
        );
        let trip_duration_s = resolution.duration_s;
        let mut reasons = resolution.reasons;

        if let Some(reason) = self.check_point(
            raw.pickup_latitude.as_deref(),
            raw.pickup_longitude.as_deref(),
            ReasonCode::MissingPickupCoord,
            ReasonCode::InvalidPickupCoord,
        ) {
            reasons.push(reason);
        }
        if let Some(reason) = self.check_point(
            raw.dropoff_latitude.as_deref(),
            raw.dropoff_longitude.as_deref(),
            ReasonCode::MissingDropoffCoord,
            ReasonCode::InvalidDropoffCoord,
        ) {
            reasons.push(reason);
        }

        let mut trip_distance_km = None;
        if let (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) = (
            raw.pickup_latitude.as_deref(),
            raw.pickup_longitude.as_deref(),
            raw.dropoff_latitude.as_deref(),
            raw.dropoff_longitude.as_deref(),
        ) {
            match haversine_km_raw(lat1, lon1, lat2, lon2) {
                Some(distance) => {
                    if distance <= 0.0 {
                        reasons.push(ReasonCode::BadDistance);
                    }
                    trip_distance_km = Some(distance);
                }
                None => reasons.push(ReasonCode::CannotComputeDistance),
            }
        }

        let trip_speed_kmph = match (trip_distance_km, trip_duration_s) {
            (Some(distance), Some(duration)) if duration > 0.0 => {
                let speed = distance / (duration / 3600.0);
                if speed > self.max_speed_kmph {
                    reasons.push(ReasonCode::OutlierSpeed);
                }
                Some(speed)
            }
            _ => None,
        };

        let signature = DuplicateDetector::signature(&raw);
        if DuplicateDetector::check_and_record(signature, &mut ctx.signatures) {
            reasons.push(ReasonCode::Duplicate);
        }

        if !reasons.is_empty() {
            debug!(
                trip_id = raw.id.as_deref().unwrap_or("<none>"),
                reasons = ?reasons,
                "Record excluded"
            );
        }

        ValidatedRecord {
            raw,
            trip_duration_s,
            trip_distance_km,
            trip_speed_kmph,
            reasons,
        }
    }

    fn check_point(
        &self,
        lat: Option<&str>,
        lon: Option<&str>,
        missing: ReasonCode,
        invalid: ReasonCode,
    ) -> Option<ReasonCode> {
        match (lat, lon) {
            (Some(lat), Some(lon)) if self.geo.is_valid_raw(lat, lon) => None,
            (Some(_), Some(_)) => Some(invalid),
            _ => Some(missing),
        }
    }
}
