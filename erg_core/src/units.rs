//! Pace, power and energy conversions.
//!
//! All pace/power conversions use the Concept2 relation
//! `watts = 2.8 / (pace_per_500m / 500)^3`. Bike paces are quoted per
//! 1000 m and are halved to their 500 m equivalent first.

use crate::{Error, Result};

const C2_CONSTANT: f64 = 2.8;

/// Convert a pace (seconds per 500 m, or per 1000 m when `per_500m` is false) to watts
pub fn pace_to_watts(pace_seconds: f64, per_500m: bool) -> f64 {
    let pace_500 = if per_500m {
        pace_seconds
    } else {
        pace_seconds / 2.0
    };
    C2_CONSTANT / (pace_500 / 500.0).powi(3)
}

/// Inverse of [`pace_to_watts`]
pub fn watts_to_pace(watts: f64, per_500m: bool) -> f64 {
    let pace_500 = 500.0 * (C2_CONSTANT / watts).cbrt();
    if per_500m {
        pace_500
    } else {
        pace_500 * 2.0
    }
}

/// Linear approximation of energy expenditure
pub fn watts_to_calories_per_hour(watts: f64) -> f64 {
    4.0 * watts + 300.0
}

/// Format seconds as `M:SS.T`, truncating to tenths
pub fn format_pace(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let minutes = (seconds / 60.0).floor();
    let remainder = seconds - minutes * 60.0;
    let whole = remainder.floor();
    // Nudge before truncating so 55.3 stored as 55.2999.. still prints .3
    let tenths = (((remainder - whole) * 10.0) + 1e-9).floor().min(9.0);
    format!("{}:{:02}.{}", minutes as u64, whole as u64, tenths as u64)
}

/// Parse `M:SS` or `M:SS.T` into seconds
pub fn parse_pace(pace: &str) -> Result<f64> {
    let parts: Vec<&str> = pace.trim().split(':').collect();
    if parts.len() != 2 {
        return Err(Error::InvalidPaceFormat(pace.to_string()));
    }

    let minutes: f64 = parts[0]
        .trim()
        .parse()
        .map_err(|_| Error::InvalidPaceFormat(pace.to_string()))?;
    let seconds: f64 = parts[1]
        .trim()
        .parse()
        .map_err(|_| Error::InvalidPaceFormat(pace.to_string()))?;

    Ok(minutes * 60.0 + seconds)
}
