use std::fs;

use mobility_etl::{ChunkedPipelineRunner, EtlError, OutputPaths, TripSource, TripStore};
use tempfile::tempdir;

const INPUT: &str = "\
id,vendor_id,pickup_datetime,dropoff_datetime,passenger_count,pickup_longitude,pickup_latitude,dropoff_longitude,dropoff_latitude,store_and_fwd_flag,trip_duration
id2875421,2,2016-03-14 17:24:55,2016-03-14 17:32:30,1,-73.982154846191406,40.767936706542969,-73.964630126953125,40.765602111816406,N,455
id2377394,1,2016-06-12 00:43:35,2016-06-12 00:54:38,1,-73.980415344238281,40.738563537597656,-73.999481201171875,40.731151580810547,N,663
id3858529,2,2016-01-19 11:35:24,2016-01-19 12:10:48,1,-73.979026794433594,40.763938903808594,-74.005332946777344,40.710086822509766,N,2124
";

#[test]
fn cleaned_run_loads_once() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("train.csv");
    fs::write(&input, INPUT).unwrap();
    let paths = OutputPaths {
        cleaned: dir.path().join("cleaned.csv"),
        excluded: dir.path().join("excluded.csv"),
        manifest: dir.path().join("etl_run.json"),
    };
    ChunkedPipelineRunner::default()
        .run_to_files(&TripSource::new(&input), 2, &paths)
        .unwrap();

    let mut store = TripStore::open(dir.path().join("urban_mobility.db")).unwrap();
    let first = store.load_completed_run(&paths.cleaned, &paths.manifest).unwrap();
    assert_eq!(first.rows_read, 3);
    assert_eq!(first.inserted, 3);

    let second = store.load_completed_run(&paths.cleaned, &paths.manifest).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped_existing, 3);
    assert_eq!(store.trip_count().unwrap(), 3);

    let vendors = store.vendor_summary().unwrap();
    let total: i64 = vendors.iter().map(|v| v.total_trips).sum();
    assert_eq!(total, 3);
}

#[test]
fn load_refuses_stray_cleaned_file() {
    let dir = tempdir().unwrap();
    let cleaned = dir.path().join("cleaned.csv");
    fs::write(&cleaned, "id\n").unwrap();
    let mut store = TripStore::open_in_memory().unwrap();
    let err = store
        .load_completed_run(&cleaned, &dir.path().join("etl_run.json"))
        .unwrap_err();
    assert!(matches!(err, EtlError::IncompleteRun(_)));
}
