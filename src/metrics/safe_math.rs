//! Absence-propagating arithmetic.
//!
//! Every helper returns `None` instead of NaN, infinity or a panic.

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// `n / d`, absent when either side is absent or `d == 0`
pub fn safe_div(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 => finite(n / d),
        _ => None,
    }
}

pub fn safe_mul(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    finite(a? * b?)
}

pub fn safe_sub(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    finite(a? - b?)
}

pub fn safe_add(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    finite(a? + b?)
}
