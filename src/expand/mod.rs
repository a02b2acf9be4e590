//! Schedule expansion.
//!
//! A feed becomes one [`TripStopEvent`] per scheduled stop visit and one
//! [`TripRecord`] per trip, all stamped with the feed's service window and
//! day-of-week category. [`daily`] then lays those events onto observed service
//! dates and joins them with AVL/APC counts.

pub mod daily;
pub mod fare;

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calendar::{DayOfWeek, hhmm, resolve_wrap_around_time};
use crate::gtfs::{Feed, GtfsStopTime};
use crate::ids::compare_ids;
use crate::store::{Column, Record};
pub use fare::FareTable;

/// One scheduled stop visit by one trip.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TripStopEvent {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub dow: DayOfWeek,
    pub route_id: String,
    pub direction_id: u8,
    pub trip_id: String,
    pub stop_sequence: u32,
    pub stop_id: String,
    /// `HHMM` of the trip's first departure, the label AVL/APC data knows it by.
    pub trip: u32,
    pub agency_id: String,
    pub block_id: String,
    pub shape_id: String,
    pub route_short_name: String,
    pub route_long_name: String,
    pub route_type: i32,
    pub trip_headsign: String,
    pub fare: f64,
    pub stop_name: String,
    pub stop_lat: f64,
    pub stop_lon: f64,
    /// Start of line
    pub sol: bool,
    /// End of line
    pub eol: bool,
    pub arrival_time: NaiveDateTime,
    pub departure_time: NaiveDateTime,
}

impl TripStopEvent {
    /// Whether two events belong to the same (window, category, route, direction, trip).
    pub fn same_trip(&self, other: &Self) -> bool {
        self.trip_id == other.trip_id
            && self.route_id == other.route_id
            && self.direction_id == other.direction_id
            && self.dow == other.dow
            && self.start_date == other.start_date
            && self.end_date == other.end_date
    }

    fn trip_key(&self) -> TripKey {
        TripKey {
            start_date: self.start_date,
            end_date: self.end_date,
            dow: self.dow,
            route_id: self.route_id.clone(),
            direction_id: self.direction_id,
            trip_id: self.trip_id.clone(),
        }
    }
}

impl Record for TripStopEvent {
    fn columns() -> Vec<Column> {
        vec![
            Column::date("START_DATE"),
            Column::date("END_DATE"),
            Column::int("DOW"),
            Column::text("ROUTE_ID", 10),
            Column::int("DIRECTION_ID"),
            Column::text("TRIP_ID", 20),
            Column::int("STOP_SEQUENCE"),
            Column::text("STOP_ID", 10),
            Column::int("TRIP"),
            Column::text("AGENCY_ID", 10),
            Column::text("BLOCK_ID", 10),
            Column::text("SHAPE_ID", 10),
            Column::text("ROUTE_SHORT_NAME", 32),
            Column::text("ROUTE_LONG_NAME", 32),
            Column::int("ROUTE_TYPE"),
            Column::text("TRIP_HEADSIGN", 32),
            Column::float("FARE"),
            Column::text("STOP_NAME", 32),
            Column::float("STOP_LAT"),
            Column::float("STOP_LON"),
            Column::bool("SOL"),
            Column::bool("EOL"),
            Column::datetime("ARRIVAL_TIME"),
            Column::datetime("DEPARTURE_TIME"),
        ]
    }
}

/// One scheduled trip.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TripRecord {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub dow: DayOfWeek,
    pub route_id: String,
    pub direction_id: u8,
    pub trip_id: String,
    pub trip: u32,
    pub agency_id: String,
    pub route_short_name: String,
    pub route_long_name: String,
    pub route_type: i32,
    pub trip_headsign: String,
    pub fare: f64,
    pub numstops: u32,
    pub first_departure: NaiveDateTime,
    pub last_arrival: NaiveDateTime,
}

impl Record for TripRecord {
    fn columns() -> Vec<Column> {
        vec![
            Column::date("START_DATE"),
            Column::date("END_DATE"),
            Column::int("DOW"),
            Column::text("ROUTE_ID", 10),
            Column::int("DIRECTION_ID"),
            Column::text("TRIP_ID", 20),
            Column::int("TRIP"),
            Column::text("AGENCY_ID", 10),
            Column::text("ROUTE_SHORT_NAME", 32),
            Column::text("ROUTE_LONG_NAME", 32),
            Column::int("ROUTE_TYPE"),
            Column::text("TRIP_HEADSIGN", 32),
            Column::float("FARE"),
            Column::int("NUMSTOPS"),
            Column::datetime("FIRST_DEPARTURE"),
            Column::datetime("LAST_ARRIVAL"),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TripKey {
    start_date: NaiveDate,
    end_date: NaiveDate,
    dow: DayOfWeek,
    route_id: String,
    direction_id: u8,
    trip_id: String,
}

#[derive(Debug, Clone, Copy)]
struct TripSummary {
    min_departure: NaiveDateTime,
    max_arrival: NaiveDateTime,
}

/// Expands every trip of `feed` into one event per stop time.
///
/// Times resolve against the first date of the feed's service window, so a trip
/// scheduled at `25:30:00` departs at 01:30 the following day and is labelled
/// `TRIP = 130`. Every stop tied for a trip's earliest departure is flagged start
/// of line, and likewise for the latest arrival and end of line.
///
/// The result is sorted by window, category, route, direction, trip and stop
/// sequence, with numeric ids compared by value.
pub fn expand_feed(feed: &Feed) -> Result<Vec<TripStopEvent>> {
    let Some((start_date, end_date)) = feed.date_range() else {
        bail!("Feed has no calendar to take a service window from");
    };
    let fares = FareTable::from_feed(feed);

    let mut events = Vec::new();
    let mut skipped = 0;
    for trip in &feed.trips {
        let Some(route) = feed.route(&trip.route_id) else {
            skipped += 1;
            continue;
        };
        let dow = feed
            .day_of_week(&trip.service_id)
            .with_context(|| format!("trip {}", trip.trip_id))?;
        let agency_id = feed.agency_id(route);
        let fare = fares.fare(&route.route_id);

        for stop_time in feed.stop_times(&trip.trip_id) {
            let Some(stop) = feed.stop(&stop_time.stop_id) else {
                bail!(
                    "Trip {} visits stop {} which is not in stops.txt",
                    trip.trip_id,
                    stop_time.stop_id
                );
            };
            let (arrival_time, departure_time) = scheduled_times(start_date, stop_time)
                .with_context(|| {
                    format!(
                        "trip {} stop_sequence {}",
                        trip.trip_id, stop_time.stop_sequence
                    )
                })?;

            events.push(TripStopEvent {
                start_date,
                end_date,
                dow,
                route_id: trip.route_id.clone(),
                direction_id: trip.direction_id.unwrap_or(0),
                trip_id: trip.trip_id.clone(),
                stop_sequence: stop_time.stop_sequence,
                stop_id: stop.stop_id.clone(),
                trip: 0,
                agency_id: agency_id.clone(),
                block_id: trip.block_id.clone().unwrap_or_default(),
                shape_id: trip.shape_id.clone().unwrap_or_default(),
                route_short_name: route.route_short_name.clone().unwrap_or_default(),
                route_long_name: route.route_long_name.clone().unwrap_or_default(),
                route_type: route.route_type,
                trip_headsign: trip.trip_headsign.clone().unwrap_or_default(),
                fare,
                stop_name: stop.stop_name.clone().unwrap_or_default(),
                stop_lat: stop.stop_lat,
                stop_lon: stop.stop_lon,
                sol: false,
                eol: false,
                arrival_time,
                departure_time,
            });
        }
    }
    if skipped > 0 {
        warn!(skipped, "Trips on routes missing from routes.txt were skipped");
    }

    let mut summaries: HashMap<TripKey, TripSummary> = HashMap::new();
    for event in &events {
        summaries
            .entry(event.trip_key())
            .and_modify(|summary| {
                summary.min_departure = summary.min_departure.min(event.departure_time);
                summary.max_arrival = summary.max_arrival.max(event.arrival_time);
            })
            .or_insert(TripSummary {
                min_departure: event.departure_time,
                max_arrival: event.arrival_time,
            });
    }
    for event in &mut events {
        if let Some(summary) = summaries.get(&event.trip_key()) {
            event.trip = hhmm(summary.min_departure);
            event.sol = event.departure_time == summary.min_departure;
            event.eol = event.arrival_time == summary.max_arrival;
        }
    }

    events.sort_by(event_order);
    info!(
        events = events.len(),
        trips = summaries.len(),
        %start_date,
        %end_date,
        "Expanded feed"
    );
    Ok(events)
}

/// Collapses events, in the order [`expand_feed`] returns them, into one record per trip.
pub fn expand_trips(events: &[TripStopEvent]) -> Vec<TripRecord> {
    events
        .chunk_by(|a, b| a.same_trip(b))
        .filter_map(|stops| {
            let first = stops.first()?;
            let first_departure = stops.iter().map(|e| e.departure_time).min()?;
            let last_arrival = stops.iter().map(|e| e.arrival_time).max()?;
            Some(TripRecord {
                start_date: first.start_date,
                end_date: first.end_date,
                dow: first.dow,
                route_id: first.route_id.clone(),
                direction_id: first.direction_id,
                trip_id: first.trip_id.clone(),
                trip: first.trip,
                agency_id: first.agency_id.clone(),
                route_short_name: first.route_short_name.clone(),
                route_long_name: first.route_long_name.clone(),
                route_type: first.route_type,
                trip_headsign: first.trip_headsign.clone(),
                fare: first.fare,
                numstops: stops.len() as u32,
                first_departure,
                last_arrival,
            })
        })
        .collect()
}

/// Arrival and departure of a stop time. A stop that only gives one of the two
/// uses it for both.
fn scheduled_times(
    service_date: NaiveDate,
    stop_time: &GtfsStopTime,
) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let arrival = stop_time.arrival_time.as_deref().filter(|t| !t.is_empty());
    let departure = stop_time.departure_time.as_deref().filter(|t| !t.is_empty());
    let (arrival, departure) = match (arrival, departure) {
        (Some(a), Some(d)) => (a, d),
        (Some(a), None) => (a, a),
        (None, Some(d)) => (d, d),
        (None, None) => bail!("Stop time has neither an arrival nor a departure time"),
    };
    Ok((
        resolve_wrap_around_time(service_date, arrival)?,
        resolve_wrap_around_time(service_date, departure)?,
    ))
}

fn event_order(a: &TripStopEvent, b: &TripStopEvent) -> Ordering {
    a.start_date
        .cmp(&b.start_date)
        .then(a.end_date.cmp(&b.end_date))
        .then(a.dow.cmp(&b.dow))
        .then_with(|| compare_ids(&a.route_id, &b.route_id))
        .then(a.direction_id.cmp(&b.direction_id))
        .then_with(|| compare_ids(&a.trip_id, &b.trip_id))
        .then(a.stop_sequence.cmp(&b.stop_sequence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs::testing::{sample_feed, stop_time, ymd};
    use crate::store::assert_columns_match;

    #[test]
    fn test_one_event_per_stop_time_in_order() {
        let events = expand_feed(&sample_feed()).unwrap();
        assert_eq!(events.len(), 8);

        let order: Vec<(&str, &str, u32)> = events
            .iter()
            .map(|e| (e.route_id.as_str(), e.trip_id.as_str(), e.stop_sequence))
            .collect();
        assert_eq!(
            order,
            vec![
                ("5", "t1", 1),
                ("5", "t1", 2),
                ("5", "t1", 3),
                ("5", "t2", 1),
                ("5", "t2", 2),
                ("10", "t3", 1),
                ("10", "t3", 2),
                ("10", "t3", 3),
            ]
        );

        let first = &events[0];
        assert_eq!(first.start_date, ymd(2014, 1, 11));
        assert_eq!(first.end_date, ymd(2014, 3, 31));
        assert_eq!(first.dow, DayOfWeek::Weekday);
        assert_eq!(first.agency_id, "SFMTA");
        assert_eq!(first.stop_name, "Main & 1st");
    }

    #[test]
    fn test_start_and_end_of_line() {
        let events = expand_feed(&sample_feed()).unwrap();
        let t1: Vec<&TripStopEvent> = events.iter().filter(|e| e.trip_id == "t1").collect();

        let sol: Vec<u32> = t1.iter().filter(|e| e.sol).map(|e| e.stop_sequence).collect();
        let eol: Vec<u32> = t1.iter().filter(|e| e.eol).map(|e| e.stop_sequence).collect();
        assert_eq!(sol, vec![1]);
        assert_eq!(eol, vec![3]);
        assert!(t1.iter().all(|e| e.trip == 800));
    }

    #[test]
    fn test_tied_departures_are_all_start_of_line() {
        let events = expand_feed(&sample_feed()).unwrap();
        let t3: Vec<&TripStopEvent> = events.iter().filter(|e| e.trip_id == "t3").collect();

        let sol: Vec<u32> = t3.iter().filter(|e| e.sol).map(|e| e.stop_sequence).collect();
        let eol: Vec<u32> = t3.iter().filter(|e| e.eol).map(|e| e.stop_sequence).collect();
        assert_eq!(sol, vec![1, 2]);
        assert_eq!(eol, vec![3]);
    }

    #[test]
    fn test_tied_arrivals_are_all_end_of_line() {
        let mut feed = sample_feed();
        feed.stop_times.insert(
            "t3".to_string(),
            vec![
                stop_time("t3", "101", 1, "07:00:00"),
                stop_time("t3", "102", 2, "07:06:00"),
                stop_time("t3", "103", 3, "07:06:00"),
            ],
        );
        let events = expand_feed(&feed).unwrap();
        let t3: Vec<&TripStopEvent> = events.iter().filter(|e| e.trip_id == "t3").collect();

        let sol: Vec<u32> = t3.iter().filter(|e| e.sol).map(|e| e.stop_sequence).collect();
        let eol: Vec<u32> = t3.iter().filter(|e| e.eol).map(|e| e.stop_sequence).collect();
        assert_eq!(sol, vec![1]);
        assert_eq!(eol, vec![2, 3]);
    }

    #[test]
    fn test_past_midnight_trip_label() {
        let events = expand_feed(&sample_feed()).unwrap();
        let t2: Vec<&TripStopEvent> = events.iter().filter(|e| e.trip_id == "t2").collect();

        assert!(t2.iter().all(|e| e.trip == 130));
        assert_eq!(
            t2[0].departure_time,
            ymd(2014, 1, 12).and_hms_opt(1, 30, 0).unwrap()
        );
        assert!(t2[0].sol);
        assert!(t2[1].eol);
    }

    #[test]
    fn test_fare_follows_route_rule() {
        let events = expand_feed(&sample_feed()).unwrap();
        for event in &events {
            let expected = if event.route_id == "5" { 2.0 } else { 0.0 };
            assert_eq!(event.fare, expected, "route {}", event.route_id);
        }
    }

    #[test]
    fn test_departure_only_stop_time() {
        let mut feed = sample_feed();
        if let Some(stop_times) = feed.stop_times.get_mut("t1") {
            stop_times[2].arrival_time = None;
        }
        let events = expand_feed(&feed).unwrap();
        let last = events
            .iter()
            .find(|e| e.trip_id == "t1" && e.stop_sequence == 3)
            .unwrap();
        assert_eq!(last.arrival_time, last.departure_time);
    }

    #[test]
    fn test_feed_without_calendar_fails() {
        let mut feed = sample_feed();
        feed.calendar.clear();
        assert!(expand_feed(&feed).is_err());
    }

    #[test]
    fn test_unknown_stop_fails() {
        let mut feed = sample_feed();
        feed.stops.remove("102");
        let err = expand_feed(&feed).unwrap_err();
        assert!(err.to_string().contains("102"));
    }

    #[test]
    fn test_expand_trips() {
        let events = expand_feed(&sample_feed()).unwrap();
        let trips = expand_trips(&events);
        assert_eq!(trips.len(), 3);

        let t1 = &trips[0];
        assert_eq!(t1.trip_id, "t1");
        assert_eq!(t1.numstops, 3);
        assert_eq!(t1.trip, 800);
        assert_eq!(
            t1.first_departure,
            ymd(2014, 1, 11).and_hms_opt(8, 0, 0).unwrap()
        );
        assert_eq!(
            t1.last_arrival,
            ymd(2014, 1, 11).and_hms_opt(8, 10, 0).unwrap()
        );
        assert_eq!(trips[1].numstops, 2);
        assert_eq!(trips[2].route_id, "10");
    }

    #[test]
    fn test_columns_match_fields() {
        let events = expand_feed(&sample_feed()).unwrap();
        assert_columns_match(&events[0]);
        assert_columns_match(&expand_trips(&events)[0]);
    }
}
