//! Static schedule feed loading.
//!
//! [`Feed`] reads a GTFS archive (zip) or an unpacked directory and exposes the
//! pieces the schedule expander needs: trips, per-trip stop times, route and stop
//! lookup, fare rules and the feed-wide service window.

pub mod models;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use csv::{ReaderBuilder, Trim};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::calendar::DayOfWeek;
pub use models::*;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

enum Storage {
    Zip(PathBuf),
    Dir(PathBuf),
}

impl Storage {
    /// Raw bytes of `name`, or `None` if the feed does not carry that file.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self {
            Storage::Dir(dir) => {
                let path = dir.join(name);
                if !path.exists() {
                    return Ok(None);
                }
                Ok(Some(fs::read(&path)?))
            }
            Storage::Zip(path) => {
                let mut archive = ZipArchive::new(File::open(path)?)?;
                // Some agencies nest the tables one folder down
                let Some(entry) = archive
                    .file_names()
                    .find(|entry| *entry == name || entry.ends_with(&format!("/{name}")))
                    .map(str::to_string)
                else {
                    return Ok(None);
                };
                let mut file = archive.by_name(&entry)?;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                Ok(Some(buf))
            }
        }
    }
}

#[derive(Default, Debug)]
pub struct Feed {
    pub agencies: Vec<GtfsAgency>,
    pub trips: Vec<GtfsTrip>,
    pub calendar: Vec<GtfsCalendar>,
    pub calendar_dates: Vec<GtfsCalendarDate>,
    pub fare_attributes: Vec<GtfsFareAttribute>,
    pub fare_rules: Vec<GtfsFareRule>,
    pub(crate) routes: HashMap<String, GtfsRoute>,
    pub(crate) stops: HashMap<String, GtfsStop>,
    // Sorted by stop_sequence
    pub(crate) stop_times: HashMap<String, Vec<GtfsStopTime>>,
}

impl Feed {
    /// Loads a feed from either a `.zip` archive or a directory of `.txt` tables.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let storage = if path.is_dir() {
            Storage::Dir(path.to_path_buf())
        } else {
            Storage::Zip(path.to_path_buf())
        };
        Self::from_storage(&storage).with_context(|| format!("loading GTFS feed {}", path.display()))
    }

    fn from_storage(storage: &Storage) -> Result<Self> {
        let now = Instant::now();

        let routes: Vec<GtfsRoute> = required(storage, "routes.txt")?;
        let stops: Vec<GtfsStop> = required(storage, "stops.txt")?;
        let trips: Vec<GtfsTrip> = required(storage, "trips.txt")?;
        let raw_stop_times: Vec<GtfsStopTime> = required(storage, "stop_times.txt")?;

        let mut feed = Feed {
            agencies: optional(storage, "agency.txt")?,
            calendar: optional(storage, "calendar.txt")?,
            calendar_dates: optional(storage, "calendar_dates.txt")?,
            fare_attributes: optional(storage, "fare_attributes.txt")?,
            fare_rules: optional(storage, "fare_rules.txt")?,
            routes: routes
                .into_iter()
                .map(|route| (route.route_id.clone(), route))
                .collect(),
            stops: stops
                .into_iter()
                .map(|stop| (stop.stop_id.clone(), stop))
                .collect(),
            trips,
            stop_times: HashMap::new(),
        };

        for stop_time in raw_stop_times {
            feed.stop_times
                .entry(stop_time.trip_id.clone())
                .or_default()
                .push(stop_time);
        }
        for (trip_id, stop_times) in feed.stop_times.iter_mut() {
            stop_times.sort_by_key(|st| st.stop_sequence);
            if let Some(pair) = stop_times
                .windows(2)
                .find(|pair| pair[0].stop_sequence == pair[1].stop_sequence)
            {
                bail!(
                    "Trip {trip_id} repeats stop_sequence {}",
                    pair[0].stop_sequence
                );
            }
        }

        let known: HashSet<&str> = feed.trips.iter().map(|t| t.trip_id.as_str()).collect();
        let orphaned = feed
            .stop_times
            .keys()
            .filter(|trip_id| !known.contains(trip_id.as_str()))
            .count();
        if orphaned > 0 {
            warn!(orphaned, "Stop times defined for unknown trips");
        }

        debug!(
            routes = feed.routes.len(),
            trips = feed.trips.len(),
            stops = feed.stops.len(),
            "Loading feed took {:?}",
            now.elapsed()
        );
        Ok(feed)
    }

    pub fn route(&self, route_id: &str) -> Option<&GtfsRoute> {
        self.routes.get(route_id)
    }

    pub fn stop(&self, stop_id: &str) -> Option<&GtfsStop> {
        self.stops.get(stop_id)
    }

    /// Stop times of a trip in stop_sequence order.
    pub fn stop_times(&self, trip_id: &str) -> &[GtfsStopTime] {
        self.stop_times
            .get(trip_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Agency owning a route, falling back to the feed's only agency when the route
    /// leaves `agency_id` blank.
    pub fn agency_id(&self, route: &GtfsRoute) -> String {
        route
            .agency_id
            .clone()
            .or_else(|| match self.agencies.as_slice() {
                [only] => only.agency_id.clone(),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// First and last service date covered by the feed, counting dates added
    /// through calendar_dates.txt.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let starts = self.calendar.iter().map(|c| c.start_date);
        let ends = self.calendar.iter().map(|c| c.end_date);
        let added = self
            .calendar_dates
            .iter()
            .filter(|cd| cd.exception_type == 1)
            .map(|cd| cd.date);

        let start = starts.chain(added.clone()).min()?;
        let end = ends.chain(added).max()?;
        Some((start, end))
    }

    /// Schedule category of a service. Feeds that number their services 1/2/3 are
    /// taken at their word; otherwise the calendar.txt weekday flags decide.
    pub fn day_of_week(&self, service_id: &str) -> Result<DayOfWeek> {
        if let Ok(code) = service_id.trim().parse::<u8>()
            && let Ok(dow) = DayOfWeek::try_from(code)
        {
            return Ok(dow);
        }

        let Some(service) = self.calendar.iter().find(|c| c.service_id == service_id) else {
            bail!("Service {service_id} is neither a day-of-week code nor in calendar.txt");
        };
        if service.runs_on_weekdays() {
            Ok(DayOfWeek::Weekday)
        } else if service.saturday == 1 {
            Ok(DayOfWeek::Saturday)
        } else if service.sunday == 1 {
            Ok(DayOfWeek::Sunday)
        } else {
            bail!("Service {service_id} never runs on any day of the week")
        }
    }
}

fn required<T: DeserializeOwned>(storage: &Storage, name: &str) -> Result<Vec<T>> {
    match storage.read(name)? {
        Some(bytes) => parse_csv(&bytes, name),
        None => bail!("Could not find file with name: {name}"),
    }
}

fn optional<T: DeserializeOwned>(storage: &Storage, name: &str) -> Result<Vec<T>> {
    match storage.read(name)? {
        Some(bytes) => parse_csv(&bytes, name),
        None => {
            debug!(file = name, "Optional feed file not present");
            Ok(Vec::new())
        }
    }
}

fn parse_csv<T: DeserializeOwned>(bytes: &[u8], name: &str) -> Result<Vec<T>> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(bytes);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result.with_context(|| format!("parsing {name}"))?;
        rows.push(record);
    }
    Ok(rows)
}
