//! Monthly roll-ups.
//!
//! Daily records are grouped by key, calendar month and day-of-week category,
//! and each group becomes one average-day row. Categories are never mixed, so a
//! weekday row only ever summarizes weekdays.
//!
//! Monthly tables are written once per (key, month, category). A later run
//! only adds the groups that are not stored yet, and fills unobserved groups
//! from the month before.

pub mod monthly;
pub mod rollup;
pub mod utility;
pub mod weights;

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tracing::debug;

use crate::calendar::{DayOfWeek, first_of_month, previous_month};

/// A record describing one thing on one service date.
pub trait DailyRecord {
    type Key: Ord + Clone;

    fn key(&self) -> Self::Key;
    fn date(&self) -> NaiveDate;
    fn dow(&self) -> DayOfWeek;
}

/// Records sharing a key, month and category.
pub struct MonthGroup<'a, R: DailyRecord> {
    pub key: R::Key,
    pub month: NaiveDate,
    pub dow: DayOfWeek,
    pub records: Vec<&'a R>,
}

impl<R: DailyRecord> MonthGroup<'_, R> {
    /// Distinct dates that contributed to the group.
    pub fn num_days(&self) -> u32 {
        count_dates(self.records.iter().copied())
    }

    /// Distinct dates among the records `observed` accepts.
    pub fn observed_days(&self, observed: impl Fn(&R) -> bool) -> u32 {
        count_dates(self.records.iter().copied().filter(|r| observed(*r)))
    }

    pub fn first(&self) -> Option<&R> {
        self.records.first().copied()
    }
}

fn count_dates<'a, R: DailyRecord + 'a>(records: impl Iterator<Item = &'a R>) -> u32 {
    records.map(|r| r.date()).collect::<BTreeSet<_>>().len() as u32
}

/// Groups `records` by (key, month, category), in that order.
pub fn group_by_month<R: DailyRecord>(records: &[R]) -> Vec<MonthGroup<'_, R>> {
    let mut groups: BTreeMap<(R::Key, NaiveDate, DayOfWeek), Vec<&R>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.key(), first_of_month(record.date()), record.dow()))
            .or_default()
            .push(record);
    }
    groups
        .into_iter()
        .map(|((key, month, dow), records)| MonthGroup {
            key,
            month,
            dow,
            records,
        })
        .collect()
}

/// A row of a monthly table.
pub trait MonthlyRecord {
    type Key: Ord + Clone;

    fn key(&self) -> Self::Key;
    fn month(&self) -> NaiveDate;
    fn dow(&self) -> DayOfWeek;

    fn group(&self) -> (Self::Key, NaiveDate, DayOfWeek) {
        (self.key(), self.month(), self.dow())
    }
}

/// Drops rows whose group is already in `stored`. Returns how many were dropped.
pub fn retain_unwritten<R: MonthlyRecord>(stored: &[R], rows: &mut Vec<R>) -> usize {
    let written: BTreeSet<_> = stored.iter().map(MonthlyRecord::group).collect();
    let before = rows.len();
    rows.retain(|row| !written.contains(&row.group()));
    let skipped = before - rows.len();
    if skipped > 0 {
        debug!(skipped, "Groups already stored");
    }
    skipped
}

/// A monthly row whose metrics can be carried over from an earlier month.
pub trait Imputable: MonthlyRecord + Clone {
    fn observed_days(&self) -> u32;
    fn imputed_days(&self) -> u32;

    /// Takes the metrics of `previous`, the same group one month earlier.
    fn impute_from(&mut self, previous: &Self);

    fn has_data(&self) -> bool {
        self.observed_days() + self.imputed_days() > 0
    }
}

/// Fills rows with no observed days from the previous month's row of the same
/// key and category.
///
/// The previous row may come from `stored` or from `rows` itself, so a gap of
/// several months carries the last observed month forward. Returns the number
/// of rows filled.
pub fn impute_from_previous_month<R: Imputable>(rows: &mut [R], stored: &[R]) -> usize {
    let mut history: BTreeMap<(R::Key, NaiveDate, DayOfWeek), R> =
        stored.iter().map(|row| (row.group(), row.clone())).collect();

    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by_key(|&i| rows[i].month());

    let mut imputed = 0;
    for i in order {
        let row = &mut rows[i];
        if row.observed_days() == 0
            && let Some(month) = previous_month(row.month())
            && let Some(previous) = history.get(&(row.key(), month, row.dow()))
            && previous.has_data()
        {
            row.impute_from(previous);
            imputed += 1;
        }
        history.insert(row.group(), row.clone());
    }
    imputed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    struct Count {
        stop: &'static str,
        date: NaiveDate,
    }

    impl DailyRecord for Count {
        type Key = &'static str;

        fn key(&self) -> Self::Key {
            self.stop
        }

        fn date(&self) -> NaiveDate {
            self.date
        }

        fn dow(&self) -> DayOfWeek {
            DayOfWeek::of_date(self.date)
        }
    }

    #[test]
    fn test_groups_split_by_month_and_category() {
        let records = vec![
            count("101", 2014, 1, 13), // Monday
            count("101", 2014, 1, 14),
            count("101", 2014, 1, 14),
            count("101", 2014, 1, 18), // Saturday
            count("101", 2014, 2, 3),
            count("102", 2014, 1, 13),
        ];
        let groups = group_by_month(&records);
        assert_eq!(groups.len(), 4);

        let jan_weekday = &groups[0];
        assert_eq!(jan_weekday.key, "101");
        assert_eq!(jan_weekday.month, ymd(2014, 1, 1));
        assert_eq!(jan_weekday.dow, DayOfWeek::Weekday);
        assert_eq!(jan_weekday.records.len(), 3);
        assert_eq!(jan_weekday.num_days(), 2);

        let jan_saturday = &groups[1];
        assert_eq!(jan_saturday.dow, DayOfWeek::Saturday);
        assert_eq!(jan_saturday.num_days(), 1);

        assert_eq!(groups[2].month, ymd(2014, 2, 1));
        assert_eq!(groups[3].key, "102");

        for group in &groups {
            assert!(group.records.iter().all(|r| r.dow() == group.dow));
        }
    }

    #[test]
    fn test_observed_days() {
        let records = vec![count("101", 2014, 1, 13), count("101", 2014, 1, 14)];
        let groups = group_by_month(&records);
        let monday = ymd(2014, 1, 13);
        assert_eq!(groups[0].observed_days(|r| r.date == monday), 1);
    }

    #[test]
    fn test_retain_unwritten() {
        let stored = vec![tally("101", 2014, 1, 1, Some(4.0))];
        let mut rows = vec![
            tally("101", 2014, 1, 0, None),
            tally("101", 2014, 2, 1, Some(2.0)),
            tally("102", 2014, 1, 1, Some(3.0)),
        ];
        assert_eq!(retain_unwritten(&stored, &mut rows), 1);
        let left: Vec<(&str, u32)> = rows.iter().map(|r| (r.stop, r.month.month())).collect();
        assert_eq!(left, vec![("101", 2), ("102", 1)]);
    }

    #[test]
    fn test_imputation_chains_across_months() {
        let stored = vec![tally("101", 2014, 1, 2, Some(4.0))];
        let mut rows = vec![
            tally("101", 2014, 3, 0, None),
            tally("101", 2014, 2, 0, None),
            tally("102", 2014, 2, 0, None),
            tally("101", 2014, 4, 1, Some(9.0)),
        ];

        assert_eq!(impute_from_previous_month(&mut rows, &stored), 2);

        let march = &rows[0];
        assert_eq!(march.on, Some(4.0));
        assert_eq!(march.impdays, 2);
        assert_eq!(rows[1].on, Some(4.0));
        assert_eq!(rows[1].impdays, 2);
        // No earlier month for this stop
        assert_eq!(rows[2].on, None);
        // Observed rows keep their own values
        assert_eq!(rows[3].on, Some(9.0));
        assert_eq!(rows[3].impdays, 0);
    }

    #[test]
    fn test_imputation_needs_adjacent_month() {
        let stored = vec![tally("101", 2013, 11, 2, Some(4.0))];
        let mut rows = vec![tally("101", 2014, 1, 0, None)];
        assert_eq!(impute_from_previous_month(&mut rows, &stored), 0);
        assert_eq!(rows[0].on, None);
    }

    // Helper types and functions for tests
    #[derive(Clone)]
    struct Tally {
        stop: &'static str,
        month: NaiveDate,
        obsdays: u32,
        impdays: u32,
        on: Option<f64>,
    }

    impl MonthlyRecord for Tally {
        type Key = &'static str;

        fn key(&self) -> Self::Key {
            self.stop
        }

        fn month(&self) -> NaiveDate {
            self.month
        }

        fn dow(&self) -> DayOfWeek {
            DayOfWeek::Weekday
        }
    }

    impl Imputable for Tally {
        fn observed_days(&self) -> u32 {
            self.obsdays
        }

        fn imputed_days(&self) -> u32 {
            self.impdays
        }

        fn impute_from(&mut self, previous: &Self) {
            self.on = previous.on;
            self.impdays = previous.obsdays + previous.impdays;
        }
    }

    fn tally(stop: &'static str, y: i32, m: u32, obsdays: u32, on: Option<f64>) -> Tally {
        Tally {
            stop,
            month: ymd(y, m, 1),
            obsdays,
            impdays: 0,
            on,
        }
    }

    fn count(stop: &'static str, y: i32, m: u32, d: u32) -> Count {
        Count {
            stop,
            date: ymd(y, m, d),
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }
}
