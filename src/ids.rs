use std::cmp::Ordering;

/// Orders identifiers numerically when both parse as integers and lexically
/// otherwise, so route "10" sorts after route "9". Numeric ids sort before text ids.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ids_sort_by_value() {
        let mut ids = vec!["10", "9", "100", "1"];
        ids.sort_by(|a, b| compare_ids(a, b));
        assert_eq!(ids, vec!["1", "9", "10", "100"]);
    }

    #[test]
    fn test_mixed_ids() {
        let mut ids = vec!["N", "J", "5", "38R", "14"];
        ids.sort_by(|a, b| compare_ids(a, b));
        assert_eq!(ids, vec!["5", "14", "38R", "J", "N"]);
    }
}
