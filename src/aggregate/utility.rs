/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean of a metric series, or `None` when nothing was recorded for it.
pub fn mean_of(series: Option<&Vec<f64>>) -> Option<f64> {
    series.filter(|values| !values.is_empty()).map(|values| mean(values))
}
