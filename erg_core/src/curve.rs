//! Power curve fitting and prediction.
//!
//! Bike calibrations model `watts = a * rpm^b`. Row calibrations model
//! `stroke_rate = a * watts^b`, using a synthetic stroke rate derived from
//! each sample's split and power. Both are fitted by ordinary least squares
//! in log-log space.

use crate::{CalibrationProfile, Error, Modality, Result, Sample};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const MIN_SAMPLES: usize = 3;
pub const MIN_R2: f64 = 0.95;

pub const RPM_MIN: f64 = 60.0;
pub const RPM_MAX: f64 = 120.0;
pub const STROKE_RATE_MIN: f64 = 18.0;
pub const STROKE_RATE_MAX: f64 = 32.0;

// Generic curves, scaled per damper notch away from 5
const GENERIC_BIKE_A: f64 = 0.00014;
const GENERIC_BIKE_B: f64 = 3.2;
const GENERIC_BIKE_STEP: f64 = 0.1;
const GENERIC_ROW_A: f64 = 4.0;
const GENERIC_ROW_B: f64 = 0.35;
const GENERIC_ROW_STEP: f64 = 0.05;

/// Coefficients of a fitted (or generic) power curve
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PowerCurveFit {
    pub a: f64,
    pub b: f64,
    pub r2: f64,
}

/// Inclusive rate band
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RateBand {
    pub min: f64,
    pub max: f64,
}

/// Fit a power curve to calibration samples
pub fn fit_power_curve(samples: &[Sample], modality: Modality) -> Result<PowerCurveFit> {
    if samples.len() < MIN_SAMPLES {
        return Err(Error::InsufficientSamples {
            required: MIN_SAMPLES,
            actual: samples.len(),
        });
    }

    let points = match modality {
        Modality::Bike => samples
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let rpm = s.rpm.ok_or_else(|| {
                    Error::MissingFieldData(format!("bike sample {} has no rpm", i + 1))
                })?;
                let rpm = positive(i, "rpm", rpm)?;
                let watts = positive(i, "watts", s.watts)?;
                Ok((rpm.ln(), watts.ln()))
            })
            .collect::<Result<Vec<_>>>()?,
        Modality::Row => samples
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let pace = s.pace_500.ok_or_else(|| {
                    Error::MissingFieldData(format!("row sample {} has no pace_500", i + 1))
                })?;
                let pace = positive(i, "pace_500", pace)?;
                let watts = positive(i, "watts", s.watts)?;
                Ok((watts.ln(), estimate_stroke_rate(pace, watts).ln()))
            })
            .collect::<Result<Vec<_>>>()?,
    };

    let fit = log_linear_regression(&points)?;
    tracing::debug!(
        "Fitted {:?} curve over {} samples: a={:.6} b={:.4} r2={:.4}",
        modality,
        samples.len(),
        fit.a,
        fit.b,
        fit.r2
    );
    Ok(fit)
}

/// Only finite, strictly positive values have a logarithm
fn positive(index: usize, field: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(Error::InvalidSample {
            index: index + 1,
            reason: format!("{} must be a positive number, got {}", field, value),
        })
    }
}

/// Empirical stroke rate for a row sample. The shape of this heuristic feeds
/// the R² acceptance threshold, so it must not be altered.
fn estimate_stroke_rate(pace_500: f64, watts: f64) -> f64 {
    let ratio = pace_500 / 500.0;
    let base_sr = 2.0 / ratio.sqrt() * 12.0;
    let efficiency = watts / (2.8 / ratio.powi(3));
    clamp_stroke_rate(base_sr * efficiency.powf(0.3))
}

/// OLS of y on x where both are already in log space; returns a = e^intercept
fn log_linear_regression(points: &[(f64, f64)]) -> Result<PowerCurveFit> {
    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON || !denominator.is_finite() {
        return Err(Error::DegenerateSamples(
            "samples need at least two distinct rates".into(),
        ));
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let mean_y = sum_y / n;
    let ss_tot: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    let r2 = if ss_tot == 0.0 {
        0.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    let fit = PowerCurveFit {
        a: intercept.exp(),
        b: slope,
        r2,
    };
    if !(fit.a.is_finite() && fit.a > 0.0 && fit.b.is_finite() && fit.r2.is_finite()) {
        return Err(Error::DegenerateSamples(format!(
            "fit produced unusable coefficients a={} b={} r2={}",
            fit.a, fit.b, fit.r2
        )));
    }
    Ok(fit)
}

/// Fit samples and wrap the result in a fresh, unsaved profile
pub fn build_profile(
    samples: Vec<Sample>,
    modality: Modality,
    damper: u8,
) -> Result<CalibrationProfile> {
    if !(1..=10).contains(&damper) {
        return Err(Error::InvalidDamper(damper));
    }
    let fit = fit_power_curve(&samples, modality)?;
    let now = Utc::now();
    Ok(CalibrationProfile {
        id: None,
        modality,
        damper,
        a: fit.a,
        b: fit.b,
        r2: fit.r2,
        samples,
        created_at: now,
        updated_at: now,
    })
}

/// Bike: watts at a cadence
pub fn predict_watts(rpm: f64, a: f64, b: f64) -> f64 {
    a * rpm.powf(b)
}

/// Row: stroke rate at a power
pub fn predict_stroke_rate(watts: f64, a: f64, b: f64) -> f64 {
    a * watts.powf(b)
}

/// Rate (stroke rate for row, RPM for bike) needed to hold `watts`
pub fn predict_rate(watts: f64, a: f64, b: f64, modality: Modality) -> f64 {
    match modality {
        Modality::Row => predict_stroke_rate(watts, a, b),
        Modality::Bike => (watts / a).powf(1.0 / b),
    }
}

/// A profile is trusted once it fits well over enough samples
pub fn validate_calibration(profile: &CalibrationProfile) -> bool {
    profile.r2 >= MIN_R2 && profile.samples.len() >= MIN_SAMPLES
}

/// Fallback bike curve for a damper setting
pub fn generic_calibration(damper: u8) -> PowerCurveFit {
    PowerCurveFit {
        a: GENERIC_BIKE_A * (1.0 + (f64::from(damper) - 5.0) * GENERIC_BIKE_STEP),
        b: GENERIC_BIKE_B,
        r2: 0.0,
    }
}

/// Fallback row curve for a damper setting
pub fn generic_row_calibration(damper: u8) -> PowerCurveFit {
    PowerCurveFit {
        a: GENERIC_ROW_A * (1.0 + (f64::from(damper) - 5.0) * GENERIC_ROW_STEP),
        b: GENERIC_ROW_B,
        r2: 0.0,
    }
}

/// Fallback curve for whichever modality is asked for
pub fn generic_for(modality: Modality, damper: u8) -> PowerCurveFit {
    match modality {
        Modality::Row => generic_row_calibration(damper),
        Modality::Bike => generic_calibration(damper),
    }
}

pub fn clamp_rpm(rpm: f64) -> f64 {
    rpm.clamp(RPM_MIN, RPM_MAX)
}

pub fn clamp_stroke_rate(spm: f64) -> f64 {
    spm.clamp(STROKE_RATE_MIN, STROKE_RATE_MAX)
}

/// Clamp a rate into the physical range for the modality
pub fn clamp_rate(rate: f64, modality: Modality) -> f64 {
    match modality {
        Modality::Row => clamp_stroke_rate(rate),
        Modality::Bike => clamp_rpm(rate),
    }
}

/// `target ± spread` RPM, clamped to range
pub fn rpm_band(target: f64, spread: f64) -> RateBand {
    RateBand {
        min: clamp_rpm(target - spread),
        max: clamp_rpm(target + spread),
    }
}

/// `target ± spread` strokes per minute, clamped to range
pub fn stroke_rate_band(target: f64, spread: f64) -> RateBand {
    RateBand {
        min: clamp_stroke_rate(target - spread),
        max: clamp_stroke_rate(target + spread),
    }
}
