use std::path::{Path, PathBuf};
use std::{env, fs};

use chrono::NaiveDate;
use transit_wrangler::aggregate::monthly::{MonthlyTrip, MonthlyTripStop};
use transit_wrangler::aggregate::rollup::{MonthlyRoute, MonthlySystem};
use transit_wrangler::aggregate::weights::MonthlyFare;
use transit_wrangler::calendar::{DayOfWeek, TimePeriod};
use transit_wrangler::config::Config;
use transit_wrangler::expand::daily::{DailyTrip, DailyTripStop};
use transit_wrangler::expand::{TripRecord, TripStopEvent};
use transit_wrangler::fares::FareTap;
use transit_wrangler::pipeline::{Step, StepError, parse_steps, run, tables};
use transit_wrangler::store::{StoreError, TableStore};

#[test]
fn test_full_pipeline() {
    let dir = temp_dir("full_pipeline");
    let config = fixture_config(&dir, fixture("gtfs"));

    let steps = parse_steps(&["aggregate", "fares", "join", "expand"]).unwrap();
    run(&config, &steps).unwrap();

    let store = TableStore::open(&config.store_dir).unwrap();

    let events: Vec<TripStopEvent> = store.read(tables::GTFS_STOPS).unwrap();
    assert_eq!(events.len(), 8);
    let trips: Vec<TripRecord> = store.read(tables::GTFS_TRIPS).unwrap();
    let mut labels: Vec<u32> = trips.iter().map(|t| t.trip).collect();
    labels.sort();
    assert_eq!(labels, vec![130, 700, 800]);

    // Mon 13th and Tue 14th carry weekday service, the Saturday observation matches nothing
    let daily_stops: Vec<DailyTripStop> = store.read(tables::DAILY_STOPS).unwrap();
    assert_eq!(daily_stops.len(), 16);
    assert_eq!(daily_stops.iter().filter(|s| s.observed).count(), 5);
    let daily_trips: Vec<DailyTrip> = store.read(tables::DAILY_TRIPS).unwrap();
    assert_eq!(daily_trips.len(), 6);
    assert_eq!(daily_trips.iter().filter(|t| t.observed).count(), 3);

    let monthly_stops: Vec<MonthlyTripStop> = store.read(tables::MONTHLY_STOPS).unwrap();
    assert_eq!(monthly_stops.len(), 8);
    let monthly_trips: Vec<MonthlyTrip> = store.read(tables::MONTHLY_TRIPS).unwrap();
    assert_eq!(monthly_trips.len(), 3);
    let morning = monthly_trips.iter().find(|t| t.trip == 800).unwrap();
    assert_eq!(morning.numdays, 2);
    assert_eq!(morning.obsdays, 2);
    assert_eq!(morning.on, Some(6.0));
    assert_eq!(morning.tod, TimePeriod::AmPeak);

    let routes: Vec<MonthlyRoute> = store.read(tables::MONTHLY_ROUTES).unwrap();
    assert_eq!(routes.len(), 5);
    let route_5 = routes
        .iter()
        .find(|r| r.route_short_name == "5" && r.tod == TimePeriod::Daily)
        .unwrap();
    assert_eq!(route_5.trips, 2);
    assert_eq!(route_5.obs_trips, 1);
    assert_eq!(route_5.weight, 2.0);
    assert_eq!(route_5.on, Some(12.0));

    let system: Vec<MonthlySystem> = store.read(tables::MONTHLY_SYSTEM).unwrap();
    assert_eq!(system.len(), 3);
    let daily = system.iter().find(|s| s.tod == TimePeriod::Daily).unwrap();
    assert_eq!(daily.routes, 2);
    assert_eq!(daily.trips, 3);
    assert_eq!(daily.on, Some(13.0));

    let taps: Vec<FareTap> = store.read(tables::FARE_TAPS).unwrap();
    assert_eq!(taps.len(), 5);
    let transfers: Vec<&FareTap> = taps.iter().filter(|t| t.transfer).collect();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].card_id, "1001");
    assert_eq!(transfers[0].from_route_id.as_deref(), Some("5"));
    assert_eq!(transfers[0].timediff_tagon, 30.0);

    let fares: Vec<MonthlyFare> = store.read(tables::FARE_MONTHLY).unwrap();
    assert_eq!(fares.len(), 3);
    let route_5 = fares
        .iter()
        .find(|f| f.route_id == "5" && f.dow == DayOfWeek::Weekday)
        .unwrap();
    assert_eq!(route_5.num_days, 2);
    assert_eq!(route_5.boardings, 1.5);

    drop(store);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_months_aggregated_in_sequence() {
    let dir = temp_dir("months_in_sequence");
    let mut config = fixture_config(&dir, fixture("gtfs"));
    run(&config, &[Step::Join, Step::Aggregate]).unwrap();

    config.avl_files = vec![fixture("avl_feb.csv")];
    run(&config, &[Step::Join, Step::Aggregate]).unwrap();
    // Nothing new to add
    run(&config, &[Step::Aggregate]).unwrap();

    let store = TableStore::open(&config.store_dir).unwrap();
    let monthly_stops: Vec<MonthlyTripStop> = store.read(tables::MONTHLY_STOPS).unwrap();
    assert_eq!(monthly_stops.len(), 16);

    let first_stop: Vec<&MonthlyTripStop> = monthly_stops
        .iter()
        .filter(|m| m.trip == 800 && m.stop_sequence == 1)
        .collect();
    let months: Vec<NaiveDate> = first_stop.iter().map(|m| m.month).collect();
    assert_eq!(months, vec![ymd(2014, 1, 1), ymd(2014, 2, 1)]);
    assert_eq!(first_stop[0].on, Some(5.0));
    assert_eq!(first_stop[1].on, Some(3.0));

    // February saw only the first stop, the rest carry January forward
    let second_stop = monthly_stops
        .iter()
        .find(|m| m.trip == 800 && m.stop_sequence == 2 && m.month == ymd(2014, 2, 1))
        .unwrap();
    assert_eq!(second_stop.obsdays, 0);
    assert_eq!(second_stop.impdays, 1);
    assert_eq!(second_stop.on, Some(2.0));

    let monthly_trips: Vec<MonthlyTrip> = store.read(tables::MONTHLY_TRIPS).unwrap();
    assert_eq!(monthly_trips.len(), 6);
    let routes: Vec<MonthlyRoute> = store.read(tables::MONTHLY_ROUTES).unwrap();
    assert_eq!(routes.len(), 10);
    let route_10 = routes
        .iter()
        .find(|r| {
            r.route_short_name == "10" && r.tod == TimePeriod::Daily && r.month == ymd(2014, 2, 1)
        })
        .unwrap();
    assert_eq!(route_10.obs_trips, 0);
    assert_eq!(route_10.imp_trips, 1);
    assert_eq!(route_10.on, Some(1.0));
    let system: Vec<MonthlySystem> = store.read(tables::MONTHLY_SYSTEM).unwrap();
    assert_eq!(system.len(), 6);

    drop(store);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_unknown_step_rejected() {
    let err = parse_steps(&["expand", "aggregat"]).unwrap_err();
    let StepError::Unknown { name, valid } = err;
    assert_eq!(name, "aggregat");
    assert!(valid.contains("aggregate"));
}

#[test]
fn test_repeated_expand_appends() {
    let dir = temp_dir("repeated_expand");
    let config = fixture_config(&dir, fixture("gtfs"));

    run(&config, &[Step::Expand]).unwrap();
    run(&config, &[Step::Expand]).unwrap();

    let store = TableStore::open(&config.store_dir).unwrap();
    let events: Vec<TripStopEvent> = store.read(tables::GTFS_STOPS).unwrap();
    assert_eq!(events.len(), 16);

    drop(store);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_wider_feed_rejected_without_writing() {
    let dir = temp_dir("wider_feed");
    let config = fixture_config(&dir, fixture("gtfs"));
    run(&config, &[Step::Expand]).unwrap();

    // Same feed with a route name wider than anything stored so far
    let wide = dir.join("gtfs_wide");
    fs::create_dir_all(&wide).unwrap();
    for entry in fs::read_dir(fixture("gtfs")).unwrap() {
        let entry = entry.unwrap();
        fs::copy(entry.path(), wide.join(entry.file_name())).unwrap();
    }
    fs::write(
        wide.join("routes.txt"),
        "route_id,agency_id,route_short_name,route_long_name,route_type\n\
         5,,5,FULTON VIA GOLDEN GATE PARK AND OCEAN BEACH,3\n\
         10,,10,TOWNSEND,3\n",
    )
    .unwrap();

    let err = run(&fixture_config(&dir, wide), &[Step::Expand]).unwrap_err();
    match err.downcast_ref::<StoreError>() {
        Some(StoreError::SchemaMismatch { table, .. }) => assert_eq!(table, tables::GTFS_STOPS),
        other => panic!("expected a schema mismatch, got {other:?}"),
    }

    let store = TableStore::open(&config.store_dir).unwrap();
    let events: Vec<TripStopEvent> = store.read(tables::GTFS_STOPS).unwrap();
    assert_eq!(events.len(), 8);

    drop(store);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_locked_store_refuses_run() {
    let dir = temp_dir("locked_store");
    let config = fixture_config(&dir, fixture("gtfs"));

    let held = TableStore::open(&config.store_dir).unwrap();
    let err = run(&config, &[Step::Expand]).unwrap_err();
    assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Locked(_))));
    assert!(!held.contains(tables::GTFS_STOPS));

    drop(held);
    fs::remove_dir_all(&dir).unwrap();
}

// Helper functions for tests
fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn fixture_config(dir: &Path, gtfs: PathBuf) -> Config {
    Config {
        store_dir: dir.join("store"),
        gtfs_feeds: vec![gtfs],
        avl_files: vec![fixture("avl.csv")],
        fare_files: vec![fixture("fares.csv")],
        transfer_threshold_minutes: 90.0,
    }
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = env::temp_dir().join(format!("transit_wrangler_it_{name}"));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}
