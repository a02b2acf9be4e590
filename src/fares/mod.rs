//! Fare-card transaction logs.
//!
//! Raw logs follow the fare system's data dictionary: one row per tap, with tap
//! times given as `HH:MM:SS` and no date. Cleaning anchors those times to the
//! file's month, moves after-midnight taps onto the operating day they belong
//! to and maps the fare system's day codes onto schedule categories. The
//! result is ordered by card and trip sequence, ready for [`transfer`].

pub mod transfer;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, Trim};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::{DayOfWeek, apply_late_night_offset};
use crate::store::{Column, Record};
pub use transfer::{DEFAULT_THRESHOLD_MINUTES, NOT_APPLICABLE, infer_transfers};

/// One row of a raw fare log.
#[derive(Deserialize, Debug, Clone)]
pub struct RawTap {
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Month")]
    pub month: u32,
    /// 1 = Sunday ... 7 = Saturday, over a 3am-to-3am day
    #[serde(rename = "CircadianDayOfWeek")]
    pub circadian_day_of_week: u8,
    #[serde(rename = "RandomWeekID")]
    pub random_week_id: u32,
    #[serde(rename = "ClipperCardID")]
    pub card_id: String,
    #[serde(rename = "TripSequenceID")]
    pub trip_sequence_id: u32,
    #[serde(rename = "AgencyID")]
    pub agency_id: String,
    #[serde(rename = "AgencyName")]
    pub agency_name: String,
    #[serde(rename = "PaymentProductID")]
    pub payment_product_id: String,
    #[serde(rename = "PaymentProductName")]
    pub payment_product_name: String,
    #[serde(rename = "FareAmount")]
    pub fare_amount: f64,
    #[serde(rename = "TagOnTime_Time")]
    pub tag_on_time: String,
    #[serde(rename = "TagOnLocationId")]
    pub tag_on_location_id: String,
    #[serde(rename = "TagOnLocationName")]
    pub tag_on_location_name: String,
    #[serde(rename = "RouteID")]
    pub route_id: String,
    #[serde(rename = "RouteName")]
    pub route_name: String,
    #[serde(rename = "TagOffTime_Time")]
    pub tag_off_time: Option<String>,
    #[serde(rename = "TagOffLocationId")]
    pub tag_off_location_id: Option<String>,
    #[serde(rename = "TagOffLocationName")]
    pub tag_off_location_name: Option<String>,
}

/// A cleaned tap together with its transfer link and weights.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FareTap {
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Month")]
    pub month: u32,
    #[serde(rename = "CircadianDayOfWeek")]
    pub circadian_day_of_week: u8,
    #[serde(rename = "RandomWeekID")]
    pub random_week_id: u32,
    #[serde(rename = "ClipperCardID")]
    pub card_id: String,
    #[serde(rename = "TripSequenceID")]
    pub trip_sequence_id: u32,
    #[serde(rename = "AgencyID")]
    pub agency_id: String,
    #[serde(rename = "AgencyName")]
    pub agency_name: String,
    #[serde(rename = "PaymentProductID")]
    pub payment_product_id: String,
    #[serde(rename = "PaymentProductName")]
    pub payment_product_name: String,
    #[serde(rename = "FareAmount")]
    pub fare_amount: f64,
    #[serde(rename = "TagOnTime")]
    pub tag_on_time: NaiveDateTime,
    #[serde(rename = "TagOnLocationId")]
    pub tag_on_location_id: String,
    #[serde(rename = "TagOnLocationName")]
    pub tag_on_location_name: String,
    #[serde(rename = "RouteID")]
    pub route_id: String,
    #[serde(rename = "RouteName")]
    pub route_name: String,
    #[serde(rename = "TagOffTime")]
    pub tag_off_time: Option<NaiveDateTime>,
    #[serde(rename = "TagOffLocationId")]
    pub tag_off_location_id: Option<String>,
    #[serde(rename = "TagOffLocationName")]
    pub tag_off_location_name: Option<String>,
    #[serde(rename = "MONTH")]
    pub month_start: NaiveDate,
    #[serde(rename = "DOW")]
    pub dow: DayOfWeek,
    /// Minutes since the card's previous tag-on
    #[serde(rename = "TIMEDIFF_TAGON")]
    pub timediff_tagon: f64,
    /// Minutes since the card's previous tag-off, never negative
    #[serde(rename = "TIMEDIFF_TAGOFF")]
    pub timediff_tagoff: f64,
    #[serde(rename = "TRANSFER")]
    pub transfer: bool,
    #[serde(rename = "From_AgencyID")]
    pub from_agency_id: Option<String>,
    #[serde(rename = "From_RouteID")]
    pub from_route_id: Option<String>,
    #[serde(rename = "From_TagOnLocationID")]
    pub from_tag_on_location_id: Option<String>,
    #[serde(rename = "From_TagOffLocationID")]
    pub from_tag_off_location_id: Option<String>,
    #[serde(rename = "LinkedTripID")]
    pub linked_trip_id: u32,
    /// Transfers made over the whole linked trip
    #[serde(rename = "TRANSFERS")]
    pub transfers: u32,
    #[serde(rename = "NUMDAYS")]
    pub num_days: u32,
    #[serde(rename = "WEIGHT_UNLINKED")]
    pub weight_unlinked: f64,
    #[serde(rename = "WEIGHT_LINKED")]
    pub weight_linked: f64,
}

impl Record for FareTap {
    fn columns() -> Vec<Column> {
        vec![
            Column::int("Year"),
            Column::int("Month"),
            Column::int("CircadianDayOfWeek"),
            Column::int("RandomWeekID"),
            Column::text("ClipperCardID", 64),
            Column::int("TripSequenceID"),
            Column::text("AgencyID", 10),
            Column::text("AgencyName", 32),
            Column::text("PaymentProductID", 10),
            Column::text("PaymentProductName", 64),
            Column::float("FareAmount"),
            Column::datetime("TagOnTime"),
            Column::text("TagOnLocationId", 10),
            Column::text("TagOnLocationName", 64),
            Column::text("RouteID", 10),
            Column::text("RouteName", 32),
            Column::datetime("TagOffTime"),
            Column::text("TagOffLocationId", 10),
            Column::text("TagOffLocationName", 64),
            Column::date("MONTH"),
            Column::int("DOW"),
            Column::float("TIMEDIFF_TAGON"),
            Column::float("TIMEDIFF_TAGOFF"),
            Column::bool("TRANSFER"),
            Column::text("From_AgencyID", 10),
            Column::text("From_RouteID", 10),
            Column::text("From_TagOnLocationID", 10),
            Column::text("From_TagOffLocationID", 10),
            Column::int("LinkedTripID"),
            Column::int("TRANSFERS"),
            Column::int("NUMDAYS"),
            Column::float("WEIGHT_UNLINKED"),
            Column::float("WEIGHT_LINKED"),
        ]
    }
}

/// Reads a fare log, decompressing it first when the file name ends in `.gz`.
pub fn load_taps<P: AsRef<Path>>(path: P) -> Result<Vec<RawTap>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening fare log {}", path.display()))?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let mut taps = Vec::new();
    for result in rdr.deserialize() {
        let record: RawTap =
            result.with_context(|| format!("parsing fare log {}", path.display()))?;
        taps.push(record);
    }
    debug!(rows = taps.len(), file = %path.display(), "Loaded fare log");
    Ok(taps)
}

/// Normalizes raw taps and sorts them by card and trip sequence.
///
/// Transfer fields start out empty and weights at zero; [`infer_transfers`] and
/// the weighting step fill them in.
pub fn clean_taps(raw: Vec<RawTap>) -> Result<Vec<FareTap>> {
    let mut taps = raw
        .into_iter()
        .map(clean_tap)
        .collect::<Result<Vec<_>>>()?;
    // Card ids are opaque: "0100" and "100" are different cards
    taps.sort_by(|a, b| {
        a.card_id
            .cmp(&b.card_id)
            .then(a.trip_sequence_id.cmp(&b.trip_sequence_id))
    });
    Ok(taps)
}

fn clean_tap(raw: RawTap) -> Result<FareTap> {
    let Some(month_start) = NaiveDate::from_ymd_opt(raw.year, raw.month, 1) else {
        bail!("Invalid year/month {}/{} on card {}", raw.year, raw.month, raw.card_id);
    };
    let tag_on_time = tap_time(month_start, &raw.tag_on_time)
        .with_context(|| format!("tag-on of card {}", raw.card_id))?;
    let tag_off_time = match raw.tag_off_time.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(time) => Some(
            tap_time(month_start, time).with_context(|| format!("tag-off of card {}", raw.card_id))?,
        ),
    };

    Ok(FareTap {
        year: raw.year,
        month: raw.month,
        circadian_day_of_week: raw.circadian_day_of_week,
        random_week_id: raw.random_week_id,
        card_id: raw.card_id,
        trip_sequence_id: raw.trip_sequence_id,
        agency_id: raw.agency_id,
        agency_name: raw.agency_name,
        payment_product_id: raw.payment_product_id,
        payment_product_name: raw.payment_product_name,
        fare_amount: raw.fare_amount,
        tag_on_time,
        tag_on_location_id: raw.tag_on_location_id,
        tag_on_location_name: raw.tag_on_location_name,
        route_id: raw.route_id,
        route_name: raw.route_name,
        tag_off_time,
        tag_off_location_id: raw.tag_off_location_id.filter(|id| !id.is_empty()),
        tag_off_location_name: raw.tag_off_location_name.filter(|name| !name.is_empty()),
        month_start,
        dow: DayOfWeek::from_circadian(raw.circadian_day_of_week),
        timediff_tagon: NOT_APPLICABLE,
        timediff_tagoff: NOT_APPLICABLE,
        transfer: false,
        from_agency_id: None,
        from_route_id: None,
        from_tag_on_location_id: None,
        from_tag_off_location_id: None,
        linked_trip_id: 0,
        transfers: 0,
        num_days: 0,
        weight_unlinked: 0.0,
        weight_linked: 0.0,
    })
}

/// Anchors an `HH:MM:SS` tap time (fractional seconds allowed) to `base` and
/// applies the 3am operating-day rule.
fn tap_time(base: NaiveDate, time: &str) -> Result<NaiveDateTime> {
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S%.f")
        .with_context(|| format!("invalid tap time {time:?}"))?;
    Ok(apply_late_night_offset(base.and_time(time)))
}
