use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use crate::error::{EtlError, Result};
use crate::metrics;
use crate::pipeline::manifest::RunManifest;
use crate::pipeline::processing::duration::parse_timestamp;
use crate::pipeline::processing::parse_finite;

const SCHEMA: &str = r#"
    PRAGMA foreign_keys=ON;
    CREATE TABLE IF NOT EXISTS locations (
        location_id INTEGER PRIMARY KEY,
        latitude    REAL NOT NULL,
        longitude   REAL NOT NULL,
        lat_e6      INTEGER NOT NULL,
        lon_e6      INTEGER NOT NULL,
        UNIQUE (lat_e6, lon_e6)
    );
    CREATE TABLE IF NOT EXISTS trips (
        trip_id             TEXT PRIMARY KEY,
        vendor_id           INTEGER,
        pickup_datetime     TEXT,
        dropoff_datetime    TEXT,
        passenger_count     INTEGER,
        store_and_fwd_flag  TEXT,
        trip_duration_s     REAL,
        trip_distance_km    REAL,
        trip_speed_kmph     REAL,
        pickup_location_id  INTEGER REFERENCES locations(location_id),
        dropoff_location_id INTEGER REFERENCES locations(location_id)
    );
    CREATE INDEX IF NOT EXISTS idx_trips_pickup_datetime ON trips(pickup_datetime);
    CREATE INDEX IF NOT EXISTS idx_trips_trip_distance_km ON trips(trip_distance_km);
"#;

const STORED_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One row of a cleaned trip file, as the loader needs it
#[derive(Debug, Deserialize)]
struct CleanedTripRow {
    id: Option<String>,
    vendor_id: Option<String>,
    pickup_datetime: Option<String>,
    dropoff_datetime: Option<String>,
    passenger_count: Option<String>,
    pickup_longitude: Option<String>,
    pickup_latitude: Option<String>,
    dropoff_longitude: Option<String>,
    dropoff_latitude: Option<String>,
    store_and_fwd_flag: Option<String>,
    trip_duration_s: Option<f64>,
    trip_distance_km: Option<f64>,
    trip_speed_kmph: Option<f64>,
}

/// Outcome of loading one cleaned file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub rows_read: u64,
    pub inserted: u64,
    /// Trip ids already present in the store
    pub skipped_existing: u64,
    /// Rows without an id or usable coordinates
    pub rejected: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyDuration {
    pub hour: Option<String>,
    pub avg_duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassengerBucket {
    pub passenger_count: Option<i64>,
    pub trip_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PickupHotspot {
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickups: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VendorSummary {
    pub vendor_id: Option<i64>,
    pub total_trips: i64,
    pub avg_trip_duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripRow {
    pub trip_id: String,
    pub vendor_id: Option<i64>,
    pub pickup_datetime: Option<String>,
    pub dropoff_datetime: Option<String>,
    pub passenger_count: Option<i64>,
    pub trip_duration_s: Option<f64>,
    pub trip_distance_km: Option<f64>,
    pub trip_speed_kmph: Option<f64>,
}

/// Distance and pickup-time window for `search_trips`. Times compare as
/// `YYYY-MM-DD HH:MM:SS` text.
#[derive(Debug, Clone)]
pub struct TripFilter {
    pub min_distance_km: f64,
    pub max_distance_km: f64,
    pub start: String,
    pub end: String,
    pub limit: u32,
}

impl Default for TripFilter {
    fn default() -> Self {
        Self {
            min_distance_km: 0.0,
            max_distance_km: 1000.0,
            start: "0000-01-01 00:00:00".to_string(),
            end: "9999-12-31 23:59:59".to_string(),
            limit: 1000,
        }
    }
}

/// Lat/lon rounded to 6 decimals, as integer micro-degrees
fn location_key(lat: f64, lon: f64) -> (i64, i64) {
    ((lat * 1e6).round() as i64, (lon * 1e6).round() as i64)
}

fn parse_integer(raw: Option<&str>) -> Option<i64> {
    parse_finite(raw?).filter(|v| v.fract() == 0.0).map(|v| v as i64)
}

fn normalize_datetime(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    Some(
        parse_timestamp(raw)
            .map(|ts| ts.format(STORED_DATETIME_FORMAT).to_string())
            .unwrap_or_else(|| raw.to_string()),
    )
}

fn point(lat: Option<&str>, lon: Option<&str>) -> Option<(f64, f64)> {
    Some((parse_finite(lat?)?, parse_finite(lon?)?))
}

/// SQLite store for cleaned trips, shaped for the analytical queries
pub struct TripStore {
    conn: Connection,
}

impl TripStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Load a cleaned file only if a completed run manifest vouches for it
    pub fn load_completed_run(&mut self, cleaned: &Path, manifest: &Path) -> Result<LoadReport> {
        RunManifest::read(manifest)?.ensure_covers(cleaned)?;
        self.load_cleaned_file(cleaned)
    }

    /// Load a cleaned trip file in one transaction. Trips whose id is already
    /// stored are skipped, so loading the same file twice is harmless.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn load_cleaned_file(&mut self, path: &Path) -> Result<LoadReport> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EtlError::InputNotFound {
                path: path.to_path_buf(),
            },
            _ => EtlError::Io(e),
        })?;
        let mut reader = csv::Reader::from_reader(BufReader::new(file));
        let mut report = LoadReport::default();
        let mut location_ids: HashMap<(i64, i64), i64> = HashMap::new();

        let tx = self.conn.transaction()?;
        {
            let mut insert_location = tx.prepare_cached(
                "INSERT OR IGNORE INTO locations (latitude, longitude, lat_e6, lon_e6) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut select_location =
                tx.prepare_cached("SELECT location_id FROM locations WHERE lat_e6 = ?1 AND lon_e6 = ?2")?;
            let mut insert_trip = tx.prepare_cached(
                "INSERT OR IGNORE INTO trips (
                    trip_id, vendor_id, pickup_datetime, dropoff_datetime, passenger_count,
                    store_and_fwd_flag, trip_duration_s, trip_distance_km, trip_speed_kmph,
                    pickup_location_id, dropoff_location_id
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;

            let mut location_id = |lat: f64, lon: f64| -> Result<i64> {
                let key = location_key(lat, lon);
                if let Some(id) = location_ids.get(&key) {
                    return Ok(*id);
                }
                insert_location.execute(params![
                    key.0 as f64 / 1e6,
                    key.1 as f64 / 1e6,
                    key.0,
                    key.1
                ])?;
                let id: i64 = select_location.query_row(params![key.0, key.1], |row| row.get(0))?;
                location_ids.insert(key, id);
                Ok(id)
            };

            for row in reader.deserialize::<CleanedTripRow>() {
                let row = row.map_err(|e| {
                    EtlError::MalformedInput(format!("{}: {}", path.display(), e))
                })?;
                report.rows_read += 1;

                let trip_id = row.id.as_deref().map(str::trim).filter(|s| !s.is_empty());
                let pickup = point(row.pickup_latitude.as_deref(), row.pickup_longitude.as_deref());
                let dropoff = point(row.dropoff_latitude.as_deref(), row.dropoff_longitude.as_deref());
                let (trip_id, pickup, dropoff) = match (trip_id, pickup, dropoff) {
                    (Some(id), Some(p), Some(d)) => (id, p, d),
                    _ => {
                        warn!("Rejecting cleaned row {} without id or coordinates", report.rows_read);
                        report.rejected += 1;
                        continue;
                    }
                };

                let pickup_location_id = location_id(pickup.0, pickup.1)?;
                let dropoff_location_id = location_id(dropoff.0, dropoff.1)?;

                let changed = insert_trip.execute(params![
                    trip_id,
                    parse_integer(row.vendor_id.as_deref()),
                    normalize_datetime(row.pickup_datetime.as_deref()),
                    normalize_datetime(row.dropoff_datetime.as_deref()),
                    parse_integer(row.passenger_count.as_deref()),
                    row.store_and_fwd_flag,
                    row.trip_duration_s,
                    row.trip_distance_km,
                    row.trip_speed_kmph,
                    pickup_location_id,
                    dropoff_location_id,
                ])?;
                if changed == 1 {
                    report.inserted += 1;
                } else {
                    debug!("Trip {} already loaded, skipping", trip_id);
                    report.skipped_existing += 1;
                }
            }
        }
        tx.commit()?;

        metrics::loader::load_finished(report.inserted, report.skipped_existing, report.rejected);
        info!(
            "💾 Loaded {} trips ({} already present, {} rejected) from {} rows",
            report.inserted, report.skipped_existing, report.rejected, report.rows_read
        );
        Ok(report)
    }

    pub fn trip_count(&self) -> Result<u64> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM trips", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn location_count(&self) -> Result<u64> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn trip(&self, trip_id: &str) -> Result<Option<TripRow>> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE trip_id = ?1", TRIP_SELECT),
                params![trip_id],
                trip_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn duration_by_hour(&self) -> Result<Vec<HourlyDuration>> {
        let mut stmt = self.conn.prepare(
            "SELECT strftime('%H', pickup_datetime) AS hour, AVG(trip_duration_s) AS avg_duration
             FROM trips GROUP BY hour ORDER BY hour",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(HourlyDuration {
                    hour: row.get(0)?,
                    avg_duration: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn passenger_distribution(&self) -> Result<Vec<PassengerBucket>> {
        let mut stmt = self.conn.prepare(
            "SELECT passenger_count, COUNT(*) AS trip_count
             FROM trips GROUP BY passenger_count ORDER BY passenger_count",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PassengerBucket {
                    passenger_count: row.get(0)?,
                    trip_count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn pickup_locations(&self) -> Result<Vec<PickupHotspot>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.latitude, l.longitude, COUNT(*) AS pickups
             FROM trips t JOIN locations l ON t.pickup_location_id = l.location_id
             GROUP BY t.pickup_location_id
             ORDER BY pickups DESC, l.location_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PickupHotspot {
                    pickup_latitude: row.get(0)?,
                    pickup_longitude: row.get(1)?,
                    pickups: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn vendor_summary(&self) -> Result<Vec<VendorSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT vendor_id, COUNT(*) AS total_trips, ROUND(AVG(trip_duration_s), 2) AS avg_trip_duration
             FROM trips GROUP BY vendor_id ORDER BY vendor_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(VendorSummary {
                    vendor_id: row.get(0)?,
                    total_trips: row.get(1)?,
                    avg_trip_duration: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn search_trips(&self, filter: &TripFilter) -> Result<Vec<TripRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE trip_distance_km BETWEEN ?1 AND ?2
               AND pickup_datetime BETWEEN ?3 AND ?4
             ORDER BY pickup_datetime ASC
             LIMIT ?5",
            TRIP_SELECT
        ))?;
        let rows = stmt
            .query_map(
                params![
                    filter.min_distance_km,
                    filter.max_distance_km,
                    filter.start,
                    filter.end,
                    filter.limit
                ],
                trip_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

const TRIP_SELECT: &str = "SELECT trip_id, vendor_id, pickup_datetime, dropoff_datetime, passenger_count,
        trip_duration_s, trip_distance_km, trip_speed_kmph
 FROM trips";

fn trip_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TripRow> {
    Ok(TripRow {
        trip_id: row.get(0)?,
        vendor_id: row.get(1)?,
        pickup_datetime: row.get(2)?,
        dropoff_datetime: row.get(3)?,
        passenger_count: row.get(4)?,
        trip_duration_s: row.get(5)?,
        trip_distance_km: row.get(6)?,
        trip_speed_kmph: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const CLEANED: &str = "\
id,vendor_id,pickup_datetime,dropoff_datetime,passenger_count,pickup_longitude,pickup_latitude,dropoff_longitude,dropoff_latitude,store_and_fwd_flag,trip_duration,trip_duration_s,trip_distance_km,trip_speed_kmph
id1,2,2016-03-14 17:24:55,2016-03-14 17:32:30,1,-73.9821548,40.7679367,-73.9646301,40.7656021,N,455,455,1.5,11.9
id2,1,2016-03-14 08:00:00,2016-03-14 08:10:00,2,-73.98215481,40.76793671,-73.95,40.78,N,600,600,2.0,12.0
id3,2,2016-03-15 09:00:00,2016-03-15 09:30:00,1,,40.7,-73.95,40.78,N,1800,1800,3.0,6.0
";

    fn cleaned_file(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("cleaned.csv");
        fs::write(&path, CLEANED).unwrap();
        path
    }

    #[test]
    fn rounds_locations_to_six_decimals() {
        assert_eq!(location_key(40.76793671, -73.98215481), (40_767_937, -73_982_155));
        assert_eq!(location_key(40.7679367, -73.9821548), (40_767_937, -73_982_155));
    }

    #[test]
    fn loads_trips_and_shares_rounded_locations() {
        let dir = tempdir().unwrap();
        let mut store = TripStore::open_in_memory().unwrap();
        let report = store.load_cleaned_file(&cleaned_file(dir.path())).unwrap();

        assert_eq!(report.rows_read, 3);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(store.trip_count().unwrap(), 2);
        // id1 and id2 share a pickup once rounded; two distinct dropoffs
        assert_eq!(store.location_count().unwrap(), 3);

        let trip = store.trip("id1").unwrap().unwrap();
        assert_eq!(trip.vendor_id, Some(2));
        assert_eq!(trip.passenger_count, Some(1));
        assert_eq!(trip.trip_duration_s, Some(455.0));
    }

    #[test]
    fn reloading_skips_existing_trips() {
        let dir = tempdir().unwrap();
        let path = cleaned_file(dir.path());
        let mut store = TripStore::open(dir.path().join("db/trips.db")).unwrap();
        store.load_cleaned_file(&path).unwrap();
        let second = store.load_cleaned_file(&path).unwrap();

        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped_existing, 2);
        assert_eq!(store.trip_count().unwrap(), 2);
    }

    #[test]
    fn analytical_queries() {
        let dir = tempdir().unwrap();
        let mut store = TripStore::open_in_memory().unwrap();
        store.load_cleaned_file(&cleaned_file(dir.path())).unwrap();

        let hours = store.duration_by_hour().unwrap();
        assert_eq!(hours.len(), 2);
        assert_eq!(hours[0].hour.as_deref(), Some("08"));
        assert_eq!(hours[0].avg_duration, Some(600.0));

        let passengers = store.passenger_distribution().unwrap();
        assert_eq!(passengers.len(), 2);

        let hotspots = store.pickup_locations().unwrap();
        assert_eq!(hotspots.len(), 1);
        assert_eq!(hotspots[0].pickups, 2);

        let vendors = store.vendor_summary().unwrap();
        assert_eq!(vendors.len(), 2);
        assert_eq!(vendors[0].vendor_id, Some(1));

        let found = store
            .search_trips(&TripFilter {
                min_distance_km: 1.8,
                ..TripFilter::default()
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].trip_id, "id2");
    }

    #[test]
    fn refuses_file_without_completed_run() {
        let dir = tempdir().unwrap();
        let path = cleaned_file(dir.path());
        let mut store = TripStore::open_in_memory().unwrap();
        let err = store
            .load_completed_run(&path, &dir.path().join("etl_run.json"))
            .unwrap_err();
        assert!(matches!(err, EtlError::IncompleteRun(_)));
        assert_eq!(store.trip_count().unwrap(), 0);
    }
}
