//! Small numeric helpers shared by the analyzers.
//!
//! Every helper is total: empty inputs produce `0.0` instead of NaN so the
//! analyzers never divide by zero.

/// Round to 3 decimal places (half away from zero).
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Round to 1 decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Round a millisecond quantity to an integer.
pub fn round_ms(value: f64) -> u64 {
    if value <= 0.0 { 0 } else { value.round() as u64 }
}

/// `numerator / denominator`, or 0 when the denominator is zero.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Arithmetic mean, 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance, 0 with fewer than two samples.
pub fn population_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation, 0 with fewer than two samples.
pub fn population_std_dev(values: &[f64]) -> f64 {
    population_variance(values).sqrt()
}
