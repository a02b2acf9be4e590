//! Reconciles the expanded schedule with AVL/APC observations.
//!
//! Every observed service date inside the schedule window gets a copy of the
//! events whose category matches that date, joined to the observation recorded
//! for the same route, direction, trip label and stop sequence.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::calendar::{DayOfWeek, service_dates};
use crate::expand::TripStopEvent;
use crate::store::{Column, Record};

const AVL_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// One cleaned AVL/APC stop event.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Observation {
    pub date: NaiveDate,
    pub route: String,
    pub dir: u8,
    pub trip: u32,
    pub seq: u32,
    pub on: f64,
    pub off: f64,
    pub load_arr: Option<f64>,
    pub load_dep: Option<f64>,
    #[serde(default, deserialize_with = "avl_timestamp")]
    pub arrival_time: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "avl_timestamp")]
    pub departure_time: Option<NaiveDateTime>,
}

fn avl_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    AVL_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp {raw:?}")))
}

/// Reads an AVL/APC observation file.
///
/// Timestamps may be blank or use either a space or a `T` separator. Any row
/// that fails to parse fails the whole file.
pub fn load_observations<P: AsRef<Path>>(path: P) -> Result<Vec<Observation>> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening AVL/APC file {}", path.display()))?;
    let mut observations = Vec::new();
    for result in rdr.deserialize() {
        let record: Observation =
            result.with_context(|| format!("parsing AVL/APC file {}", path.display()))?;
        observations.push(record);
    }
    debug!(rows = observations.len(), file = %path.display(), "Loaded observations");
    Ok(observations)
}

/// A scheduled stop visit on one service date, with what was observed there.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DailyTripStop {
    pub date: NaiveDate,
    pub dow: DayOfWeek,
    pub agency_id: String,
    pub route_id: String,
    pub route_short_name: String,
    pub direction_id: u8,
    pub trip_id: String,
    pub trip: u32,
    pub trip_headsign: String,
    pub stop_sequence: u32,
    pub stop_id: String,
    pub stop_name: String,
    pub stop_lat: f64,
    pub stop_lon: f64,
    pub fare: f64,
    pub sol: bool,
    pub eol: bool,
    pub arrival_time: NaiveDateTime,
    pub departure_time: NaiveDateTime,
    pub observed: bool,
    pub on: Option<f64>,
    pub off: Option<f64>,
    pub load_arr: Option<f64>,
    pub load_dep: Option<f64>,
    pub arrival_time_obs: Option<NaiveDateTime>,
    pub departure_time_obs: Option<NaiveDateTime>,
    /// Observed minus scheduled, in minutes
    pub arrival_deviation: Option<f64>,
    pub departure_deviation: Option<f64>,
}

impl DailyTripStop {
    fn new(date: NaiveDate, event: &TripStopEvent, observation: Option<&Observation>) -> Self {
        let shift = date - event.start_date;
        let arrival_time = event.arrival_time + shift;
        let departure_time = event.departure_time + shift;
        let arrival_time_obs = observation.and_then(|o| o.arrival_time);
        let departure_time_obs = observation.and_then(|o| o.departure_time);

        Self {
            date,
            dow: event.dow,
            agency_id: event.agency_id.clone(),
            route_id: event.route_id.clone(),
            route_short_name: event.route_short_name.clone(),
            direction_id: event.direction_id,
            trip_id: event.trip_id.clone(),
            trip: event.trip,
            trip_headsign: event.trip_headsign.clone(),
            stop_sequence: event.stop_sequence,
            stop_id: event.stop_id.clone(),
            stop_name: event.stop_name.clone(),
            stop_lat: event.stop_lat,
            stop_lon: event.stop_lon,
            fare: event.fare,
            sol: event.sol,
            eol: event.eol,
            arrival_time,
            departure_time,
            observed: observation.is_some(),
            on: observation.map(|o| o.on),
            off: observation.map(|o| o.off),
            load_arr: observation.and_then(|o| o.load_arr),
            load_dep: observation.and_then(|o| o.load_dep),
            arrival_time_obs,
            departure_time_obs,
            arrival_deviation: arrival_time_obs.map(|t| minutes_between(arrival_time, t)),
            departure_deviation: departure_time_obs.map(|t| minutes_between(departure_time, t)),
        }
    }

    fn same_trip(&self, other: &Self) -> bool {
        self.date == other.date
            && self.trip_id == other.trip_id
            && self.route_id == other.route_id
            && self.direction_id == other.direction_id
    }
}

impl Record for DailyTripStop {
    fn columns() -> Vec<Column> {
        vec![
            Column::date("DATE"),
            Column::int("DOW"),
            Column::text("AGENCY_ID", 10),
            Column::text("ROUTE_ID", 10),
            Column::text("ROUTE_SHORT_NAME", 32),
            Column::int("DIRECTION_ID"),
            Column::text("TRIP_ID", 20),
            Column::int("TRIP"),
            Column::text("TRIP_HEADSIGN", 32),
            Column::int("STOP_SEQUENCE"),
            Column::text("STOP_ID", 10),
            Column::text("STOP_NAME", 32),
            Column::float("STOP_LAT"),
            Column::float("STOP_LON"),
            Column::float("FARE"),
            Column::bool("SOL"),
            Column::bool("EOL"),
            Column::datetime("ARRIVAL_TIME"),
            Column::datetime("DEPARTURE_TIME"),
            Column::bool("OBSERVED"),
            Column::float("ON"),
            Column::float("OFF"),
            Column::float("LOAD_ARR"),
            Column::float("LOAD_DEP"),
            Column::datetime("ARRIVAL_TIME_OBS"),
            Column::datetime("DEPARTURE_TIME_OBS"),
            Column::float("ARRIVAL_DEVIATION"),
            Column::float("DEPARTURE_DEVIATION"),
        ]
    }
}

/// One scheduled trip on one service date.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DailyTrip {
    pub date: NaiveDate,
    pub dow: DayOfWeek,
    pub agency_id: String,
    pub route_id: String,
    pub route_short_name: String,
    pub direction_id: u8,
    pub trip_id: String,
    pub trip: u32,
    pub trip_headsign: String,
    pub fare: f64,
    pub trip_stops: u32,
    pub observed: bool,
    pub on: Option<f64>,
    pub off: Option<f64>,
    pub max_load: Option<f64>,
    pub first_departure: NaiveDateTime,
    pub last_arrival: NaiveDateTime,
}

impl Record for DailyTrip {
    fn columns() -> Vec<Column> {
        vec![
            Column::date("DATE"),
            Column::int("DOW"),
            Column::text("AGENCY_ID", 10),
            Column::text("ROUTE_ID", 10),
            Column::text("ROUTE_SHORT_NAME", 32),
            Column::int("DIRECTION_ID"),
            Column::text("TRIP_ID", 20),
            Column::int("TRIP"),
            Column::text("TRIP_HEADSIGN", 32),
            Column::float("FARE"),
            Column::int("TRIP_STOPS"),
            Column::bool("OBSERVED"),
            Column::float("ON"),
            Column::float("OFF"),
            Column::float("MAX_LOAD"),
            Column::datetime("FIRST_DEPARTURE"),
            Column::datetime("LAST_ARRIVAL"),
        ]
    }
}

type JoinKey<'a> = (NaiveDate, &'a str, u8, u32, u32);

/// Tallies of one join, reported as warnings when non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JoinCounts {
    /// Observations that repeat an earlier key
    duplicates: usize,
    /// Observation keys no scheduled stop matched
    unmatched: usize,
    /// Observation keys matched by more than one scheduled stop
    ambiguous: usize,
    /// Observation keys matched at least once
    observed: usize,
}

/// Lays `events` onto each observed date in their window and attaches the
/// matching observation, if any.
///
/// Observations that match no scheduled stop are counted and reported. When the
/// same key is observed twice the later row wins. Two trips of one route and
/// direction leaving in the same minute share a trip label, so one observation
/// can land on both; those are counted as ambiguous.
pub fn join_observations(
    events: &[TripStopEvent],
    observations: &[Observation],
) -> Vec<DailyTripStop> {
    join_with_counts(events, observations).0
}

fn join_with_counts(
    events: &[TripStopEvent],
    observations: &[Observation],
) -> (Vec<DailyTripStop>, JoinCounts) {
    let mut index: HashMap<JoinKey<'_>, &Observation> = HashMap::new();
    let mut duplicates = 0;
    for obs in observations {
        let key = (obs.date, obs.route.as_str(), obs.dir, obs.trip, obs.seq);
        if index.insert(key, obs).is_some() {
            duplicates += 1;
        }
    }
    if duplicates > 0 {
        warn!(duplicates, "Repeated observations, keeping the last of each");
    }

    let dates: BTreeSet<NaiveDate> = observations.iter().map(|o| o.date).collect();
    if let Some(first) = events.first() {
        for dow in DayOfWeek::ALL {
            let scheduled = service_dates(first.start_date, first.end_date, dow);
            let observed = scheduled.iter().filter(|d| dates.contains(*d)).count();
            debug!(?dow, scheduled = scheduled.len(), observed, "Observed share of service dates");
        }
    }
    let mut matched: HashMap<JoinKey<'_>, usize> = HashMap::new();
    let mut stops = Vec::new();
    for date in dates {
        let dow = DayOfWeek::of_date(date);
        let before = stops.len();
        for event in events
            .iter()
            .filter(|e| e.dow == dow && e.start_date <= date && date <= e.end_date)
        {
            let key = (
                date,
                event.route_short_name.as_str(),
                event.direction_id,
                event.trip,
                event.stop_sequence,
            );
            let observation = index.get(&key).copied();
            if observation.is_some() {
                *matched.entry(key).or_default() += 1;
            }
            stops.push(DailyTripStop::new(date, event, observation));
        }
        if stops.len() == before {
            debug!(%date, "No scheduled service for observed date");
        }
    }

    let counts = JoinCounts {
        duplicates,
        unmatched: index.len() - matched.len(),
        ambiguous: matched.values().filter(|&&n| n > 1).count(),
        observed: matched.len(),
    };
    if counts.unmatched > 0 {
        warn!(unmatched = counts.unmatched, "Observations matched no scheduled stop");
    }
    if counts.ambiguous > 0 {
        warn!(
            ambiguous = counts.ambiguous,
            "Observations matched several scheduled stops and count once for each"
        );
    }
    info!(
        rows = stops.len(),
        observed = counts.observed,
        duplicates = counts.duplicates,
        "Joined schedule with observations"
    );
    (stops, counts)
}

/// Rolls daily trip-stops, in the order [`join_observations`] returns them, up
/// to one row per trip and date.
pub fn roll_up_trips(stops: &[DailyTripStop]) -> Vec<DailyTrip> {
    stops
        .chunk_by(|a, b| a.same_trip(b))
        .filter_map(|group| {
            let first = group.first()?;
            let observed: Vec<&DailyTripStop> = group.iter().filter(|s| s.observed).collect();
            let any_observed = !observed.is_empty();
            let sum = |values: Vec<Option<f64>>| -> Option<f64> {
                any_observed.then(|| values.into_iter().flatten().sum())
            };

            Some(DailyTrip {
                date: first.date,
                dow: first.dow,
                agency_id: first.agency_id.clone(),
                route_id: first.route_id.clone(),
                route_short_name: first.route_short_name.clone(),
                direction_id: first.direction_id,
                trip_id: first.trip_id.clone(),
                trip: first.trip,
                trip_headsign: first.trip_headsign.clone(),
                fare: first.fare,
                trip_stops: group.len() as u32,
                observed: any_observed,
                on: sum(observed.iter().map(|s| s.on).collect()),
                off: sum(observed.iter().map(|s| s.off).collect()),
                max_load: observed
                    .iter()
                    .filter_map(|s| s.load_dep.or(s.load_arr))
                    .reduce(f64::max),
                first_departure: group.iter().map(|s| s.departure_time).min()?,
                last_arrival: group.iter().map(|s| s.arrival_time).max()?,
            })
        })
        .collect()
}

fn minutes_between(scheduled: NaiveDateTime, observed: NaiveDateTime) -> f64 {
    (observed - scheduled).num_seconds() as f64 / 60.0
}
