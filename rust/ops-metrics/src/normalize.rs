//! Numeric coercion and derived metrics shared by every report.
//!
//! Warehouse aggregates arrive as `Nullable(Float64)`. Everything here is total:
//! missing, `NaN` or infinite inputs become `0`, and no ratio divides by zero.

/// Decimal places kept on every derived rate.
pub const RATE_PRECISION: i32 = 4;

pub fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(places);
    let rounded = (value * factor).round() / factor;
    // Normalise -0.0 so serialized output never shows a signed zero.
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// `round(numerator / denominator, 4)`, or exactly `0` when the denominator is `0`.
pub fn rate(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() || !numerator.is_finite() {
        return 0.0;
    }
    round_to(numerator / denominator, RATE_PRECISION)
}

/// Percent change from `previous` to `current`; `0` when `previous` is `0`.
pub fn percent_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 || !previous.is_finite() || !current.is_finite() {
        return 0.0;
    }
    round_to((current - previous) / previous * 100.0, RATE_PRECISION)
}

pub fn absolute_change(current: f64, previous: f64) -> f64 {
    round_to(current - previous, RATE_PRECISION)
}

pub fn coerce_amount(value: Option<f64>) -> f64 {
    match value {
        Some(value) if value.is_finite() => value,
        _ => 0.0,
    }
}

/// Counters are whole and non-negative.
pub fn coerce_count(value: Option<f64>) -> u64 {
    let value = coerce_amount(value);
    if value <= 0.0 {
        0
    } else {
        value.round() as u64
    }
}
