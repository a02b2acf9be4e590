//! In-memory feeds for unit tests.

use chrono::NaiveDate;

use super::*;

/// Muni route 5 with a daytime trip `t1` and a past-midnight trip `t2`, plus route
/// 10 whose trip `t3` leaves its first two stops at the same minute. Weekday
/// service from 2014-01-11 through 2014-03-31; only route 5 has a fare rule.
pub(crate) fn sample_feed() -> Feed {
    let mut feed = Feed {
        agencies: vec![GtfsAgency {
            agency_id: Some("SFMTA".to_string()),
            agency_name: "Muni".to_string(),
        }],
        trips: vec![trip("5", "t1"), trip("5", "t2"), trip("10", "t3")],
        calendar: vec![GtfsCalendar {
            service_id: "1".to_string(),
            monday: 1,
            tuesday: 1,
            wednesday: 1,
            thursday: 1,
            friday: 1,
            saturday: 0,
            sunday: 0,
            start_date: ymd(2014, 1, 11),
            end_date: ymd(2014, 3, 31),
        }],
        fare_attributes: vec![GtfsFareAttribute {
            fare_id: "adult".to_string(),
            price: 2.0,
        }],
        fare_rules: vec![GtfsFareRule {
            fare_id: "adult".to_string(),
            route_id: Some("5".to_string()),
        }],
        ..Default::default()
    };

    for (route_id, long_name) in [("5", "FULTON"), ("10", "TOWNSEND")] {
        feed.routes.insert(
            route_id.to_string(),
            GtfsRoute {
                route_id: route_id.to_string(),
                agency_id: None,
                route_short_name: Some(route_id.to_string()),
                route_long_name: Some(long_name.to_string()),
                route_type: 3,
            },
        );
    }
    for (stop_id, name) in [("101", "Main & 1st"), ("102", "Main & 2nd"), ("103", "Main & 3rd")] {
        feed.stops.insert(
            stop_id.to_string(),
            GtfsStop {
                stop_id: stop_id.to_string(),
                stop_name: Some(name.to_string()),
                stop_lat: 37.78,
                stop_lon: -122.40,
            },
        );
    }

    feed.stop_times.insert(
        "t1".to_string(),
        vec![
            stop_time("t1", "101", 1, "08:00:00"),
            stop_time("t1", "102", 2, "08:05:00"),
            stop_time("t1", "103", 3, "08:10:00"),
        ],
    );
    feed.stop_times.insert(
        "t2".to_string(),
        vec![
            stop_time("t2", "101", 1, "25:30:00"),
            stop_time("t2", "103", 2, "25:40:00"),
        ],
    );
    feed.stop_times.insert(
        "t3".to_string(),
        vec![
            stop_time("t3", "101", 1, "07:00:00"),
            stop_time("t3", "102", 2, "07:00:00"),
            stop_time("t3", "103", 3, "07:10:00"),
        ],
    );
    feed
}

pub(crate) fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn trip(route_id: &str, trip_id: &str) -> GtfsTrip {
    GtfsTrip {
        route_id: route_id.to_string(),
        service_id: "1".to_string(),
        trip_id: trip_id.to_string(),
        trip_headsign: Some("Ocean Beach".to_string()),
        direction_id: Some(0),
        block_id: Some("b1".to_string()),
        shape_id: Some("s1".to_string()),
    }
}

pub(crate) fn stop_time(
    trip_id: &str,
    stop_id: &str,
    stop_sequence: u32,
    time: &str,
) -> GtfsStopTime {
    GtfsStopTime {
        trip_id: trip_id.to_string(),
        arrival_time: Some(time.to_string()),
        departure_time: Some(time.to_string()),
        stop_id: stop_id.to_string(),
        stop_sequence,
    }
}
