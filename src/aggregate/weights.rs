//! Average-day weights for fare taps.
//!
//! A fare log samples a handful of days per month. Each tap is weighted by one
//! over the number of sampled days in its month and category, so weighted sums
//! estimate an average day. Transfers carry no linked-trip weight because the
//! trip they continue was already counted.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::MonthlyRecord;
use crate::calendar::DayOfWeek;
use crate::fares::FareTap;
use crate::store::{Column, Record};

/// Fills NUMDAYS and both weights on every tap.
///
/// A sampled day is a distinct (circadian day of week, random week id) pair.
pub fn apply_weights(taps: &mut [FareTap]) {
    let mut days: HashMap<(NaiveDate, DayOfWeek), HashSet<(u8, u32)>> = HashMap::new();
    for tap in taps.iter() {
        days.entry((tap.month_start, tap.dow))
            .or_default()
            .insert((tap.circadian_day_of_week, tap.random_week_id));
    }

    for tap in taps.iter_mut() {
        let num_days = days
            .get(&(tap.month_start, tap.dow))
            .map_or(1, |sampled| sampled.len().max(1)) as u32;
        tap.num_days = num_days;
        tap.weight_unlinked = 1.0 / f64::from(num_days);
        tap.weight_linked = if tap.transfer {
            0.0
        } else {
            tap.weight_unlinked
        };
    }
}

/// Average-day fare activity on one route, for a month and day-of-week category.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MonthlyFare {
    #[serde(rename = "AgencyID")]
    pub agency_id: String,
    #[serde(rename = "AgencyName")]
    pub agency_name: String,
    #[serde(rename = "RouteID")]
    pub route_id: String,
    #[serde(rename = "RouteName")]
    pub route_name: String,
    #[serde(rename = "MONTH")]
    pub month: NaiveDate,
    #[serde(rename = "DOW")]
    pub dow: DayOfWeek,
    #[serde(rename = "NUMDAYS")]
    pub num_days: u32,
    #[serde(rename = "BOARDINGS")]
    pub boardings: f64,
    #[serde(rename = "LINKED_TRIPS")]
    pub linked_trips: f64,
    #[serde(rename = "TRANSFERS")]
    pub transfers: f64,
    #[serde(rename = "FARE_REVENUE")]
    pub fare_revenue: f64,
}

impl Record for MonthlyFare {
    fn columns() -> Vec<Column> {
        vec![
            Column::text("AgencyID", 10),
            Column::text("AgencyName", 32),
            Column::text("RouteID", 10),
            Column::text("RouteName", 32),
            Column::date("MONTH"),
            Column::int("DOW"),
            Column::int("NUMDAYS"),
            Column::float("BOARDINGS"),
            Column::float("LINKED_TRIPS"),
            Column::float("TRANSFERS"),
            Column::float("FARE_REVENUE"),
        ]
    }
}

impl MonthlyRecord for MonthlyFare {
    type Key = (String, String);

    fn key(&self) -> Self::Key {
        (self.agency_id.clone(), self.route_id.clone())
    }

    fn month(&self) -> NaiveDate {
        self.month
    }

    fn dow(&self) -> DayOfWeek {
        self.dow
    }
}

/// Sums weighted taps per agency, route, month and category.
pub fn summarize_fares(taps: &[FareTap]) -> Vec<MonthlyFare> {
    let mut groups: BTreeMap<(&str, &str, NaiveDate, DayOfWeek), MonthlyFare> = BTreeMap::new();
    for tap in taps {
        let row = groups
            .entry((tap.agency_id.as_str(), tap.route_id.as_str(), tap.month_start, tap.dow))
            .or_insert_with(|| MonthlyFare {
                agency_id: tap.agency_id.clone(),
                agency_name: tap.agency_name.clone(),
                route_id: tap.route_id.clone(),
                route_name: tap.route_name.clone(),
                month: tap.month_start,
                dow: tap.dow,
                num_days: tap.num_days,
                boardings: 0.0,
                linked_trips: 0.0,
                transfers: 0.0,
                fare_revenue: 0.0,
            });
        row.boardings += tap.weight_unlinked;
        row.linked_trips += tap.weight_linked;
        if tap.transfer {
            row.transfers += tap.weight_unlinked;
        }
        row.fare_revenue += tap.fare_amount * tap.weight_unlinked;
    }

    let rows: Vec<MonthlyFare> = groups.into_values().collect();
    info!(rows = rows.len(), "Summarized fares by month");
    rows
}
