//! Named processing steps and the loop that runs them against a table store.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::info;

use crate::aggregate::monthly::{
    MonthlyTrip, MonthlyTripStop, aggregate_trip_stops, aggregate_trips,
};
use crate::aggregate::rollup::{MonthlyRoute, MonthlySystem, roll_up_routes, roll_up_system};
use crate::aggregate::weights::{MonthlyFare, apply_weights, summarize_fares};
use crate::aggregate::{impute_from_previous_month, retain_unwritten};
use crate::config::Config;
use crate::expand::daily::{DailyTrip, DailyTripStop, join_observations, load_observations, roll_up_trips};
use crate::expand::{expand_feed, expand_trips};
use crate::fares::{FareTap, clean_taps, infer_transfers, load_taps};
use crate::gtfs::Feed;
use crate::store::TableStore;

/// Logical table names in the store.
pub mod tables {
    pub const GTFS_STOPS: &str = "gtfs_stops";
    pub const GTFS_TRIPS: &str = "gtfs_trips";
    pub const DAILY_STOPS: &str = "daily_stops";
    pub const DAILY_TRIPS: &str = "daily_trips";
    pub const MONTHLY_STOPS: &str = "monthly_stops";
    pub const MONTHLY_TRIPS: &str = "monthly_trips";
    pub const MONTHLY_ROUTES: &str = "monthly_routes";
    pub const MONTHLY_SYSTEM: &str = "monthly_system";
    pub const FARE_TAPS: &str = "fare_taps";
    pub const FARE_MONTHLY: &str = "fare_monthly";
}

/// A unit of work. Variants are declared in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    Expand,
    Join,
    Fares,
    Aggregate,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::Expand, Step::Join, Step::Fares, Step::Aggregate];

    pub fn name(self) -> &'static str {
        match self {
            Step::Expand => "expand",
            Step::Join => "join",
            Step::Fares => "fares",
            Step::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("unknown step `{name}`, expected one of: {valid}")]
    Unknown { name: String, valid: String },
}

impl FromStr for Step {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::ALL
            .into_iter()
            .find(|step| step.name() == s)
            .ok_or_else(|| StepError::Unknown {
                name: s.to_string(),
                valid: Step::ALL.map(Step::name).join(", "),
            })
    }
}

/// Validates every name, then returns the distinct steps in run order.
///
/// The first unknown name fails the whole list, so nothing runs on a typo.
pub fn parse_steps<S: AsRef<str>>(names: &[S]) -> Result<Vec<Step>, StepError> {
    let mut steps = names
        .iter()
        .map(|name| name.as_ref().parse())
        .collect::<Result<Vec<Step>, _>>()?;
    steps.sort();
    steps.dedup();
    Ok(steps)
}

/// Runs `steps` in order. The store stays locked for the whole run.
pub fn run(config: &Config, steps: &[Step]) -> Result<()> {
    let mut store = TableStore::open(&config.store_dir)
        .with_context(|| format!("opening store {}", config.store_dir.display()))?;

    for &step in steps {
        info!(step = %step, "Starting step");
        match step {
            Step::Expand => run_expand(config, &mut store)?,
            Step::Join => run_join(config, &mut store)?,
            Step::Fares => run_fares(config, &mut store)?,
            Step::Aggregate => run_aggregate(&mut store)?,
        }
    }

    info!(store = %store.dir().display(), steps = steps.len(), "Run complete");
    Ok(())
}

#[tracing::instrument(skip_all, fields(feeds = config.gtfs_feeds.len()))]
fn run_expand(config: &Config, store: &mut TableStore) -> Result<()> {
    for path in &config.gtfs_feeds {
        let feed = Feed::load(path)?;
        let events = expand_feed(&feed).with_context(|| format!("expanding {}", path.display()))?;
        let trips = expand_trips(&events);

        let stops = store.append(tables::GTFS_STOPS, &events)?;
        let trips = store.append(tables::GTFS_TRIPS, &trips)?;
        info!(feed = %path.display(), stops, trips, "Expanded feed");
    }
    Ok(())
}

#[tracing::instrument(
    skip_all,
    fields(feeds = config.gtfs_feeds.len(), avl_files = config.avl_files.len())
)]
fn run_join(config: &Config, store: &mut TableStore) -> Result<()> {
    for feed_path in &config.gtfs_feeds {
        let feed = Feed::load(feed_path)?;
        let events =
            expand_feed(&feed).with_context(|| format!("expanding {}", feed_path.display()))?;

        for avl_path in &config.avl_files {
            let observations = load_observations(avl_path)?;
            let stops = join_observations(&events, &observations);
            let trips = roll_up_trips(&stops);

            let stop_rows = store.append(tables::DAILY_STOPS, &stops)?;
            let trip_rows = store.append(tables::DAILY_TRIPS, &trips)?;
            info!(
                feed = %feed_path.display(),
                avl = %avl_path.display(),
                stop_rows,
                trip_rows,
                "Joined observations"
            );
        }
    }
    Ok(())
}

#[tracing::instrument(
    skip_all,
    fields(files = config.fare_files.len(), threshold = config.transfer_threshold_minutes)
)]
fn run_fares(config: &Config, store: &mut TableStore) -> Result<()> {
    for path in &config.fare_files {
        let raw = load_taps(path)?;
        let cleaned = clean_taps(raw).with_context(|| format!("cleaning {}", path.display()))?;
        let mut taps = infer_transfers(cleaned, config.transfer_threshold_minutes);
        apply_weights(&mut taps);

        let rows = store.append(tables::FARE_TAPS, &taps)?;
        let transfers = taps.iter().filter(|t| t.transfer).count();
        info!(file = %path.display(), rows, transfers, "Processed fare log");
    }
    Ok(())
}

/// Builds the monthly tables from everything stored so far.
///
/// Groups already in a monthly table are left alone, so running this after
/// each new month of input adds only that month.
#[tracing::instrument(skip_all)]
fn run_aggregate(store: &mut TableStore) -> Result<()> {
    let daily_stops: Vec<DailyTripStop> = store.read(tables::DAILY_STOPS)?;
    let stored_stops: Vec<MonthlyTripStop> = store.read(tables::MONTHLY_STOPS)?;
    let mut monthly_stops = aggregate_trip_stops(&daily_stops);
    retain_unwritten(&stored_stops, &mut monthly_stops);
    let imputed_stops = impute_from_previous_month(&mut monthly_stops, &stored_stops);
    store.append(tables::MONTHLY_STOPS, &monthly_stops)?;

    let daily_trips: Vec<DailyTrip> = store.read(tables::DAILY_TRIPS)?;
    let stored_trips: Vec<MonthlyTrip> = store.read(tables::MONTHLY_TRIPS)?;
    let mut monthly_trips = aggregate_trips(&daily_trips);
    retain_unwritten(&stored_trips, &mut monthly_trips);
    let imputed_trips = impute_from_previous_month(&mut monthly_trips, &stored_trips);
    store.append(tables::MONTHLY_TRIPS, &monthly_trips)?;

    let all_trips: Vec<MonthlyTrip> = stored_trips
        .into_iter()
        .chain(monthly_trips.iter().cloned())
        .collect();
    let stored_routes: Vec<MonthlyRoute> = store.read(tables::MONTHLY_ROUTES)?;
    let mut routes = roll_up_routes(&all_trips);
    let mut system = roll_up_system(&routes);
    retain_unwritten(&stored_routes, &mut routes);
    store.append(tables::MONTHLY_ROUTES, &routes)?;

    let stored_system: Vec<MonthlySystem> = store.read(tables::MONTHLY_SYSTEM)?;
    retain_unwritten(&stored_system, &mut system);
    store.append(tables::MONTHLY_SYSTEM, &system)?;

    if store.contains(tables::FARE_TAPS) {
        let taps: Vec<FareTap> = store.read(tables::FARE_TAPS)?;
        let stored_fares: Vec<MonthlyFare> = store.read(tables::FARE_MONTHLY)?;
        let mut monthly_fares = summarize_fares(&taps);
        retain_unwritten(&stored_fares, &mut monthly_fares);
        store.append(tables::FARE_MONTHLY, &monthly_fares)?;
    }

    info!(
        monthly_stops = monthly_stops.len(),
        monthly_trips = monthly_trips.len(),
        imputed_stops,
        imputed_trips,
        routes = routes.len(),
        "Aggregated monthly tables"
    );
    Ok(())
}
