use std::collections::HashMap;

use tracing::debug;

use crate::gtfs::Feed;

/// Route fares derived from fare_attributes.txt and fare_rules.txt.
///
/// When several rules name the same route, the rule read last wins. Routes with
/// no rule cost 0.
#[derive(Debug, Default)]
pub struct FareTable {
    by_route: HashMap<String, f64>,
}

impl FareTable {
    pub fn from_feed(feed: &Feed) -> Self {
        let prices: HashMap<&str, f64> = feed
            .fare_attributes
            .iter()
            .map(|attr| (attr.fare_id.as_str(), attr.price))
            .collect();

        let mut by_route = HashMap::new();
        let mut overridden = 0;
        for rule in &feed.fare_rules {
            let (Some(route_id), Some(price)) = (&rule.route_id, prices.get(rule.fare_id.as_str()))
            else {
                continue;
            };
            if let Some(previous) = by_route.insert(route_id.clone(), *price)
                && previous != *price
            {
                overridden += 1;
            }
        }

        if overridden > 0 {
            debug!(overridden, "Routes matched by several fare rules, keeping the last");
        }
        Self { by_route }
    }

    pub fn fare(&self, route_id: &str) -> f64 {
        self.by_route.get(route_id).copied().unwrap_or(0.0)
    }
}
