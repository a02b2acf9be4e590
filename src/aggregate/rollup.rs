//! Route and system totals over monthly trips.
//!
//! Each route gets a row for every time period its trips start in, plus a
//! `Daily` row over all of them. Ridership sums only cover trips with observed
//! or imputed data, so they are factored up by the route's weight: scheduled
//! trips over trips with data.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::MonthlyRecord;
use crate::aggregate::monthly::MonthlyTrip;
use crate::aggregate::utility::mean;
use crate::calendar::{DayOfWeek, TimePeriod};
use crate::store::{Column, Record};

/// Average-day totals of one route, for a month, category and time period.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MonthlyRoute {
    pub month: NaiveDate,
    pub dow: DayOfWeek,
    pub tod: TimePeriod,
    pub agency_id: String,
    pub route_short_name: String,
    pub route_id: String,
    pub trips: u32,
    pub obs_trips: u32,
    pub imp_trips: u32,
    pub trip_stops: u32,
    pub numdays: u32,
    pub fare: f64,
    pub weight: f64,
    pub on: Option<f64>,
    pub off: Option<f64>,
    pub max_load: Option<f64>,
}

impl Record for MonthlyRoute {
    fn columns() -> Vec<Column> {
        vec![
            Column::date("MONTH"),
            Column::int("DOW"),
            Column::text("TOD", 9),
            Column::text("AGENCY_ID", 10),
            Column::text("ROUTE_SHORT_NAME", 32),
            Column::text("ROUTE_ID", 10),
            Column::int("TRIPS"),
            Column::int("OBS_TRIPS"),
            Column::int("IMP_TRIPS"),
            Column::int("TRIP_STOPS"),
            Column::int("NUMDAYS"),
            Column::float("FARE"),
            Column::float("WEIGHT"),
            Column::float("ON"),
            Column::float("OFF"),
            Column::float("MAX_LOAD"),
        ]
    }
}

impl MonthlyRecord for MonthlyRoute {
    type Key = (String, String, TimePeriod);

    fn key(&self) -> Self::Key {
        (self.agency_id.clone(), self.route_short_name.clone(), self.tod)
    }

    fn month(&self) -> NaiveDate {
        self.month
    }

    fn dow(&self) -> DayOfWeek {
        self.dow
    }
}

/// Average-day totals of one agency, for a month, category and time period.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MonthlySystem {
    pub month: NaiveDate,
    pub dow: DayOfWeek,
    pub tod: TimePeriod,
    pub agency_id: String,
    pub routes: u32,
    pub trips: u32,
    pub obs_trips: u32,
    pub imp_trips: u32,
    pub trip_stops: u32,
    pub numdays: u32,
    pub on: Option<f64>,
    pub off: Option<f64>,
}

impl Record for MonthlySystem {
    fn columns() -> Vec<Column> {
        vec![
            Column::date("MONTH"),
            Column::int("DOW"),
            Column::text("TOD", 9),
            Column::text("AGENCY_ID", 10),
            Column::int("ROUTES"),
            Column::int("TRIPS"),
            Column::int("OBS_TRIPS"),
            Column::int("IMP_TRIPS"),
            Column::int("TRIP_STOPS"),
            Column::int("NUMDAYS"),
            Column::float("ON"),
            Column::float("OFF"),
        ]
    }
}

impl MonthlyRecord for MonthlySystem {
    type Key = (String, TimePeriod);

    fn key(&self) -> Self::Key {
        (self.agency_id.clone(), self.tod)
    }

    fn month(&self) -> NaiveDate {
        self.month
    }

    fn dow(&self) -> DayOfWeek {
        self.dow
    }
}

type RouteGroup<'a> = (NaiveDate, DayOfWeek, &'a str, &'a str, TimePeriod);

/// Totals monthly trips per route and time period.
pub fn roll_up_routes(trips: &[MonthlyTrip]) -> Vec<MonthlyRoute> {
    let mut groups: BTreeMap<RouteGroup<'_>, Vec<&MonthlyTrip>> = BTreeMap::new();
    for trip in trips {
        for tod in [TimePeriod::Daily, trip.tod] {
            groups
                .entry((
                    trip.month,
                    trip.dow,
                    trip.agency_id.as_str(),
                    trip.route_short_name.as_str(),
                    tod,
                ))
                .or_default()
                .push(trip);
        }
    }

    let rows: Vec<MonthlyRoute> = groups
        .into_iter()
        .filter_map(|((month, dow, agency_id, route_short_name, tod), members)| {
            let first = members.first()?;
            let covered: Vec<&MonthlyTrip> =
                members.iter().copied().filter(|t| t.on.is_some()).collect();
            let weight = if covered.is_empty() {
                0.0
            } else {
                members.len() as f64 / covered.len() as f64
            };
            let total = |metric: fn(&MonthlyTrip) -> Option<f64>| {
                (!covered.is_empty())
                    .then(|| covered.iter().copied().filter_map(metric).sum::<f64>() * weight)
            };
            let fares: Vec<f64> = members.iter().map(|t| t.fare).collect();

            Some(MonthlyRoute {
                month,
                dow,
                tod,
                agency_id: agency_id.to_string(),
                route_short_name: route_short_name.to_string(),
                route_id: first.route_id.clone(),
                trips: members.len() as u32,
                obs_trips: members.iter().filter(|t| t.obsdays > 0).count() as u32,
                imp_trips: members
                    .iter()
                    .filter(|t| t.obsdays == 0 && t.impdays > 0)
                    .count() as u32,
                trip_stops: members.iter().map(|t| t.trip_stops).sum(),
                numdays: members.iter().map(|t| t.numdays).max().unwrap_or(0),
                fare: mean(&fares),
                weight,
                on: total(|t| t.on),
                off: total(|t| t.off),
                max_load: total(|t| t.max_load),
            })
        })
        .collect();

    info!(rows = rows.len(), "Rolled up trips by route");
    rows
}

/// Totals route rows per agency and time period.
pub fn roll_up_system(routes: &[MonthlyRoute]) -> Vec<MonthlySystem> {
    let mut groups: BTreeMap<(NaiveDate, DayOfWeek, &str, TimePeriod), MonthlySystem> =
        BTreeMap::new();
    for route in routes {
        let row = groups
            .entry((route.month, route.dow, route.agency_id.as_str(), route.tod))
            .or_insert_with(|| MonthlySystem {
                month: route.month,
                dow: route.dow,
                tod: route.tod,
                agency_id: route.agency_id.clone(),
                routes: 0,
                trips: 0,
                obs_trips: 0,
                imp_trips: 0,
                trip_stops: 0,
                numdays: 0,
                on: None,
                off: None,
            });
        row.routes += 1;
        row.trips += route.trips;
        row.obs_trips += route.obs_trips;
        row.imp_trips += route.imp_trips;
        row.trip_stops += route.trip_stops;
        row.numdays = row.numdays.max(route.numdays);
        row.on = add(row.on, route.on);
        row.off = add(row.off, route.off);
    }

    let rows: Vec<MonthlySystem> = groups.into_values().collect();
    info!(rows = rows.len(), "Rolled up routes by agency");
    rows
}

fn add(total: Option<f64>, value: Option<f64>) -> Option<f64> {
    match (total, value) {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs::testing::ymd;
    use crate::store::assert_columns_match;

    #[test]
    fn test_routes_factor_up_trips_without_data() {
        let trips = vec![
            trip("5", 800, 2, 0, Some(6.0)),
            trip("5", 830, 0, 0, None),
            trip("5", 1700, 0, 1, Some(3.0)),
            trip("10", 700, 1, 0, Some(1.0)),
        ];
        let routes = roll_up_routes(&trips);

        // Route 5: Daily, 0600-0859, 1600-1859. Route 10: Daily, 0600-0859.
        assert_eq!(routes.len(), 5);

        let daily = find(&routes, "5", TimePeriod::Daily);
        assert_eq!(daily.trips, 3);
        assert_eq!(daily.obs_trips, 1);
        assert_eq!(daily.imp_trips, 1);
        assert_eq!(daily.trip_stops, 9);
        assert_eq!(daily.weight, 1.5);
        assert_eq!(daily.on, Some(13.5));

        let peak = find(&routes, "5", TimePeriod::AmPeak);
        assert_eq!(peak.trips, 2);
        assert_eq!(peak.weight, 2.0);
        assert_eq!(peak.on, Some(12.0));
        assert_eq!(peak.max_load, Some(12.0));
    }

    #[test]
    fn test_route_without_data_has_no_totals() {
        let routes = roll_up_routes(&[trip("5", 130, 0, 0, None)]);
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|r| r.weight == 0.0 && r.on.is_none()));
        assert!(routes.iter().any(|r| r.tod == TimePeriod::LateNight));
    }

    #[test]
    fn test_system_sums_routes() {
        let trips = vec![
            trip("5", 800, 2, 0, Some(6.0)),
            trip("5", 130, 0, 0, None),
            trip("10", 700, 1, 0, Some(1.0)),
        ];
        let system = roll_up_system(&roll_up_routes(&trips));
        assert_eq!(system.len(), 3);

        let daily = system.iter().find(|s| s.tod == TimePeriod::Daily).unwrap();
        assert_eq!(daily.routes, 2);
        assert_eq!(daily.trips, 3);
        assert_eq!(daily.obs_trips, 2);
        assert_eq!(daily.on, Some(13.0));

        let late = system.iter().find(|s| s.tod == TimePeriod::LateNight).unwrap();
        assert_eq!(late.routes, 1);
        assert_eq!(late.on, None);
    }

    #[test]
    fn test_columns_match_fields() {
        let routes = roll_up_routes(&[trip("5", 800, 1, 0, Some(6.0))]);
        assert_columns_match(&routes[0]);
        assert_columns_match(&roll_up_system(&routes)[0]);
    }

    // Helper functions for tests
    fn find<'a>(routes: &'a [MonthlyRoute], route: &str, tod: TimePeriod) -> &'a MonthlyRoute {
        routes
            .iter()
            .find(|r| r.route_short_name == route && r.tod == tod)
            .unwrap()
    }

    fn trip(route: &str, label: u32, obsdays: u32, impdays: u32, on: Option<f64>) -> MonthlyTrip {
        MonthlyTrip {
            month: ymd(2014, 1, 1),
            dow: DayOfWeek::Weekday,
            tod: TimePeriod::of_hhmm(label),
            agency_id: "SFMTA".to_string(),
            route_short_name: route.to_string(),
            direction_id: 0,
            trip: label,
            route_id: route.to_string(),
            trip_id: format!("t{label}"),
            trip_headsign: "Ocean Beach".to_string(),
            fare: 2.0,
            trip_stops: 3,
            numdays: 2,
            obsdays,
            impdays,
            on,
            off: on.map(|v| v / 2.0),
            max_load: on,
        }
    }
}
