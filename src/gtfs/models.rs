use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize, Debug, Clone)]
pub struct GtfsAgency {
    pub agency_id: Option<String>,
    pub agency_name: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GtfsRoute {
    pub route_id: String,
    pub agency_id: Option<String>,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
    pub route_type: i32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GtfsTrip {
    pub route_id: String,
    pub service_id: String,
    pub trip_id: String,
    pub trip_headsign: Option<String>,
    pub direction_id: Option<u8>,
    pub block_id: Option<String>,
    pub shape_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GtfsStop {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub stop_lat: f64,
    pub stop_lon: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GtfsStopTime {
    pub trip_id: String,
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    pub stop_id: String,
    pub stop_sequence: u32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GtfsCalendar {
    pub service_id: String,
    pub monday: u8,
    pub tuesday: u8,
    pub wednesday: u8,
    pub thursday: u8,
    pub friday: u8,
    pub saturday: u8,
    pub sunday: u8,
    #[serde(deserialize_with = "gtfs_date")]
    pub start_date: NaiveDate,
    #[serde(deserialize_with = "gtfs_date")]
    pub end_date: NaiveDate,
}

impl GtfsCalendar {
    pub fn runs_on_weekdays(&self) -> bool {
        [
            self.monday,
            self.tuesday,
            self.wednesday,
            self.thursday,
            self.friday,
        ]
        .into_iter()
        .any(|flag| flag == 1)
    }
}

/// `exception_type` 1 adds service on `date`, 2 removes it.
#[derive(Deserialize, Debug, Clone)]
pub struct GtfsCalendarDate {
    pub service_id: String,
    #[serde(deserialize_with = "gtfs_date")]
    pub date: NaiveDate,
    pub exception_type: u8,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GtfsFareAttribute {
    pub fare_id: String,
    pub price: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GtfsFareRule {
    pub fare_id: String,
    pub route_id: Option<String>,
}

fn gtfs_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDate::parse_from_str(raw.trim(), "%Y%m%d").map_err(serde::de::Error::custom)
}
