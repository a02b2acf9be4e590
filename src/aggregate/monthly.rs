use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::utility::mean_of;
use crate::aggregate::{DailyRecord, Imputable, MonthlyRecord, group_by_month};
use crate::calendar::{DayOfWeek, TimePeriod};
use crate::expand::daily::{DailyTrip, DailyTripStop};
use crate::store::{Column, Record};

impl DailyRecord for DailyTripStop {
    type Key = (String, String, u8, u32, u32);

    fn key(&self) -> Self::Key {
        (
            self.agency_id.clone(),
            self.route_short_name.clone(),
            self.direction_id,
            self.trip,
            self.stop_sequence,
        )
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn dow(&self) -> DayOfWeek {
        self.dow
    }
}

impl DailyRecord for DailyTrip {
    type Key = (String, String, u8, u32);

    fn key(&self) -> Self::Key {
        (
            self.agency_id.clone(),
            self.route_short_name.clone(),
            self.direction_id,
            self.trip,
        )
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn dow(&self) -> DayOfWeek {
        self.dow
    }
}

/// Average day at one stop of one trip, for a month and day-of-week category.
/// Metrics average over observed days only. A row with no observed days carries
/// the previous month's metrics, and `impdays` counts the days behind them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MonthlyTripStop {
    pub month: NaiveDate,
    pub dow: DayOfWeek,
    pub tod: TimePeriod,
    pub agency_id: String,
    pub route_short_name: String,
    pub direction_id: u8,
    pub trip: u32,
    pub stop_sequence: u32,
    pub route_id: String,
    pub trip_id: String,
    pub trip_headsign: String,
    pub stop_id: String,
    pub stop_name: String,
    pub stop_lat: f64,
    pub stop_lon: f64,
    pub fare: f64,
    pub sol: bool,
    pub eol: bool,
    pub numdays: u32,
    pub obsdays: u32,
    pub impdays: u32,
    pub on: Option<f64>,
    pub off: Option<f64>,
    pub load_arr: Option<f64>,
    pub load_dep: Option<f64>,
    pub arrival_deviation: Option<f64>,
    pub departure_deviation: Option<f64>,
}

impl Record for MonthlyTripStop {
    fn columns() -> Vec<Column> {
        vec![
            Column::date("MONTH"),
            Column::int("DOW"),
            Column::text("TOD", 9),
            Column::text("AGENCY_ID", 10),
            Column::text("ROUTE_SHORT_NAME", 32),
            Column::int("DIRECTION_ID"),
            Column::int("TRIP"),
            Column::int("STOP_SEQUENCE"),
            Column::text("ROUTE_ID", 10),
            Column::text("TRIP_ID", 20),
            Column::text("TRIP_HEADSIGN", 32),
            Column::text("STOP_ID", 10),
            Column::text("STOP_NAME", 32),
            Column::float("STOP_LAT"),
            Column::float("STOP_LON"),
            Column::float("FARE"),
            Column::bool("SOL"),
            Column::bool("EOL"),
            Column::int("NUMDAYS"),
            Column::int("OBSDAYS"),
            Column::int("IMPDAYS"),
            Column::float("ON"),
            Column::float("OFF"),
            Column::float("LOAD_ARR"),
            Column::float("LOAD_DEP"),
            Column::float("ARRIVAL_DEVIATION"),
            Column::float("DEPARTURE_DEVIATION"),
        ]
    }
}

/// Average day of one trip, for a month and day-of-week category.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MonthlyTrip {
    pub month: NaiveDate,
    pub dow: DayOfWeek,
    pub tod: TimePeriod,
    pub agency_id: String,
    pub route_short_name: String,
    pub direction_id: u8,
    pub trip: u32,
    pub route_id: String,
    pub trip_id: String,
    pub trip_headsign: String,
    pub fare: f64,
    pub trip_stops: u32,
    pub numdays: u32,
    pub obsdays: u32,
    pub impdays: u32,
    pub on: Option<f64>,
    pub off: Option<f64>,
    pub max_load: Option<f64>,
}

impl Record for MonthlyTrip {
    fn columns() -> Vec<Column> {
        vec![
            Column::date("MONTH"),
            Column::int("DOW"),
            Column::text("TOD", 9),
            Column::text("AGENCY_ID", 10),
            Column::text("ROUTE_SHORT_NAME", 32),
            Column::int("DIRECTION_ID"),
            Column::int("TRIP"),
            Column::text("ROUTE_ID", 10),
            Column::text("TRIP_ID", 20),
            Column::text("TRIP_HEADSIGN", 32),
            Column::float("FARE"),
            Column::int("TRIP_STOPS"),
            Column::int("NUMDAYS"),
            Column::int("OBSDAYS"),
            Column::int("IMPDAYS"),
            Column::float("ON"),
            Column::float("OFF"),
            Column::float("MAX_LOAD"),
        ]
    }
}

impl MonthlyRecord for MonthlyTripStop {
    type Key = (String, String, u8, u32, u32);

    fn key(&self) -> Self::Key {
        (
            self.agency_id.clone(),
            self.route_short_name.clone(),
            self.direction_id,
            self.trip,
            self.stop_sequence,
        )
    }

    fn month(&self) -> NaiveDate {
        self.month
    }

    fn dow(&self) -> DayOfWeek {
        self.dow
    }
}

impl Imputable for MonthlyTripStop {
    fn observed_days(&self) -> u32 {
        self.obsdays
    }

    fn imputed_days(&self) -> u32 {
        self.impdays
    }

    fn impute_from(&mut self, previous: &Self) {
        self.impdays = previous.obsdays + previous.impdays;
        self.on = previous.on;
        self.off = previous.off;
        self.load_arr = previous.load_arr;
        self.load_dep = previous.load_dep;
        self.arrival_deviation = previous.arrival_deviation;
        self.departure_deviation = previous.departure_deviation;
    }
}

impl MonthlyRecord for MonthlyTrip {
    type Key = (String, String, u8, u32);

    fn key(&self) -> Self::Key {
        (
            self.agency_id.clone(),
            self.route_short_name.clone(),
            self.direction_id,
            self.trip,
        )
    }

    fn month(&self) -> NaiveDate {
        self.month
    }

    fn dow(&self) -> DayOfWeek {
        self.dow
    }
}

impl Imputable for MonthlyTrip {
    fn observed_days(&self) -> u32 {
        self.obsdays
    }

    fn imputed_days(&self) -> u32 {
        self.impdays
    }

    fn impute_from(&mut self, previous: &Self) {
        self.impdays = previous.obsdays + previous.impdays;
        self.on = previous.on;
        self.off = previous.off;
        self.max_load = previous.max_load;
    }
}

/// Collapses daily trip-stops into one row per (trip-stop, month, category).
///
/// Schedule attributes come from the first record of each group. `numdays`
/// counts scheduled dates and `obsdays` the dates with an observation; metrics
/// average over the latter and stay empty when there are none. Nothing is
/// imputed here.
pub fn aggregate_trip_stops(stops: &[DailyTripStop]) -> Vec<MonthlyTripStop> {
    let rows: Vec<MonthlyTripStop> = group_by_month(stops)
        .into_iter()
        .filter_map(|group| {
            let first = group.first()?;

            let mut series: HashMap<&str, Vec<f64>> = HashMap::new();
            macro_rules! push_metric {
                ($name:expr, $value:expr) => {
                    if let Some(value) = $value {
                        series.entry($name).or_default().push(value);
                    }
                };
            }
            for stop in group.records.iter().filter(|s| s.observed) {
                push_metric!("ON", stop.on);
                push_metric!("OFF", stop.off);
                push_metric!("LOAD_ARR", stop.load_arr);
                push_metric!("LOAD_DEP", stop.load_dep);
                push_metric!("ARRIVAL_DEVIATION", stop.arrival_deviation);
                push_metric!("DEPARTURE_DEVIATION", stop.departure_deviation);
            }

            let (agency_id, route_short_name, direction_id, trip, stop_sequence) = group.key.clone();
            Some(MonthlyTripStop {
                month: group.month,
                dow: group.dow,
                agency_id,
                route_short_name,
                direction_id,
                trip,
                stop_sequence,
                tod: TimePeriod::of_hhmm(trip),
                route_id: first.route_id.clone(),
                trip_id: first.trip_id.clone(),
                trip_headsign: first.trip_headsign.clone(),
                stop_id: first.stop_id.clone(),
                stop_name: first.stop_name.clone(),
                stop_lat: first.stop_lat,
                stop_lon: first.stop_lon,
                fare: first.fare,
                sol: first.sol,
                eol: first.eol,
                numdays: group.num_days(),
                obsdays: group.observed_days(|s| s.observed),
                impdays: 0,
                on: mean_of(series.get("ON")),
                off: mean_of(series.get("OFF")),
                load_arr: mean_of(series.get("LOAD_ARR")),
                load_dep: mean_of(series.get("LOAD_DEP")),
                arrival_deviation: mean_of(series.get("ARRIVAL_DEVIATION")),
                departure_deviation: mean_of(series.get("DEPARTURE_DEVIATION")),
            })
        })
        .collect();

    info!(rows = rows.len(), "Aggregated trip-stops by month");
    rows
}

/// Collapses daily trips into one row per (trip, month, category), averaging
/// the observed daily totals.
pub fn aggregate_trips(trips: &[DailyTrip]) -> Vec<MonthlyTrip> {
    let rows: Vec<MonthlyTrip> = group_by_month(trips)
        .into_iter()
        .filter_map(|group| {
            let first = group.first()?;

            let mut series: HashMap<&str, Vec<f64>> = HashMap::new();
            macro_rules! push_metric {
                ($name:expr, $value:expr) => {
                    if let Some(value) = $value {
                        series.entry($name).or_default().push(value);
                    }
                };
            }
            for trip in group.records.iter().filter(|t| t.observed) {
                push_metric!("ON", trip.on);
                push_metric!("OFF", trip.off);
                push_metric!("MAX_LOAD", trip.max_load);
            }

            let (agency_id, route_short_name, direction_id, trip) = group.key.clone();
            Some(MonthlyTrip {
                month: group.month,
                dow: group.dow,
                agency_id,
                route_short_name,
                direction_id,
                trip,
                tod: TimePeriod::of_hhmm(trip),
                route_id: first.route_id.clone(),
                trip_id: first.trip_id.clone(),
                trip_headsign: first.trip_headsign.clone(),
                fare: first.fare,
                trip_stops: first.trip_stops,
                numdays: group.num_days(),
                obsdays: group.observed_days(|t| t.observed),
                impdays: 0,
                on: mean_of(series.get("ON")),
                off: mean_of(series.get("OFF")),
                max_load: mean_of(series.get("MAX_LOAD")),
            })
        })
        .collect();

    info!(rows = rows.len(), "Aggregated trips by month");
    rows
}
