use chrono::NaiveDateTime;
use tracing::info;

use crate::fares::FareTap;

/// Time difference recorded when there is no earlier tap to measure from.
pub const NOT_APPLICABLE: f64 = 9999.0;

/// A Muni transfer lasts 90 minutes.
pub const DEFAULT_THRESHOLD_MINUTES: f64 = 90.0;

/// Links each tap to the tap just before it on the same card.
///
/// `taps` must be ordered by card and trip sequence. A tap made less than
/// `threshold_minutes` after the previous tag-on is a transfer and records where
/// the rider came from. Every other tap starts a new linked trip, numbered from 1
/// per card. Each tap also learns how many transfers its linked trip made.
pub fn infer_transfers(taps: Vec<FareTap>, threshold_minutes: f64) -> Vec<FareTap> {
    let capacity = taps.len();
    let mut linked = taps
        .into_iter()
        .fold(Vec::with_capacity(capacity), |mut out: Vec<FareTap>, mut tap| {
            match out.last().filter(|prev| prev.card_id == tap.card_id) {
                None => {
                    tap.timediff_tagon = NOT_APPLICABLE;
                    tap.timediff_tagoff = NOT_APPLICABLE;
                    tap.transfer = false;
                    clear_origin(&mut tap);
                    tap.linked_trip_id = 1;
                }
                Some(prev) => {
                    tap.timediff_tagon = minutes_between(prev.tag_on_time, tap.tag_on_time);
                    tap.timediff_tagoff = prev.tag_off_time.map_or(NOT_APPLICABLE, |tag_off| {
                        minutes_between(tag_off, tap.tag_on_time).max(0.0)
                    });
                    tap.transfer = tap.timediff_tagon < threshold_minutes;
                    if tap.transfer {
                        tap.from_agency_id = Some(prev.agency_id.clone());
                        tap.from_route_id = Some(prev.route_id.clone());
                        tap.from_tag_on_location_id = Some(prev.tag_on_location_id.clone());
                        tap.from_tag_off_location_id = prev.tag_off_location_id.clone();
                        tap.linked_trip_id = prev.linked_trip_id;
                    } else {
                        clear_origin(&mut tap);
                        tap.linked_trip_id = prev.linked_trip_id + 1;
                    }
                }
            }
            out.push(tap);
            out
        });

    for trip in linked.chunk_by_mut(|a, b| {
        a.card_id == b.card_id && a.linked_trip_id == b.linked_trip_id
    }) {
        let transfers = trip.iter().filter(|tap| tap.transfer).count() as u32;
        for tap in trip {
            tap.transfers = transfers;
        }
    }

    let transfers = linked.iter().filter(|tap| tap.transfer).count();
    info!(
        taps = linked.len(),
        transfers,
        threshold_minutes,
        "Inferred transfers"
    );
    linked
}

fn clear_origin(tap: &mut FareTap) {
    tap.from_agency_id = None;
    tap.from_route_id = None;
    tap.from_tag_on_location_id = None;
    tap.from_tag_off_location_id = None;
}

fn minutes_between(earlier: NaiveDateTime, later: NaiveDateTime) -> f64 {
    (later - earlier).num_seconds() as f64 / 60.0
}
