//! Workout conversion between ergometers.
//!
//! Each interval's target is reduced to watts, then re-expressed as the
//! target machine's pace and rate. Distance only carries over when the
//! workout stays on the same machine; across machines the interval's time
//! at the source pace is carried instead.

use crate::curve::{clamp_rate, clamp_rpm, generic_calibration, generic_for, predict_rate, predict_watts};
use crate::units::{pace_to_watts, watts_to_pace};
use crate::{
    CalibrationProfile, ConversionResult, ConvertedInterval, Error, Interval, IntervalBasis,
    Modality, RestTargets, Result, TargetSpec, Workout,
};

const REST_RPM_MIN: f64 = 60.0;
const REST_RPM_MAX: f64 = 65.0;

/// Convert a whole workout for its target machine
///
/// A calibration is only mandatory for rpm-specified workouts; otherwise the
/// generic curve for the target modality and damper stands in. A supplied
/// calibration must belong to the target modality.
pub fn convert_workout(
    workout: &Workout,
    calibration: Option<&CalibrationProfile>,
) -> Result<ConversionResult> {
    let (a, b) = match calibration {
        Some(profile) if profile.modality != workout.target_modality => {
            return Err(Error::CalibrationMismatch {
                calibration: profile.modality,
                target: workout.target_modality,
            });
        }
        Some(profile) => (profile.a, profile.b),
        None if workout.target_spec == TargetSpec::Rpm => {
            return Err(Error::CalibrationRequired(
                "rpm targets need a fitted bike calibration".into(),
            ));
        }
        None => {
            let generic = generic_for(workout.target_modality, workout.damper_for_target);
            tracing::debug!(
                "No calibration supplied, using generic {:?} curve for damper {}",
                workout.target_modality,
                workout.damper_for_target
            );
            (generic.a, generic.b)
        }
    };

    let intervals = workout
        .intervals
        .iter()
        .enumerate()
        .map(|(i, interval)| convert_interval(workout, interval, i + 1, a, b))
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(
        "Converted {} intervals {:?} -> {:?} at damper {}",
        intervals.len(),
        workout.source_modality,
        workout.target_modality,
        workout.damper_for_target
    );

    Ok(ConversionResult {
        modality: workout.target_modality,
        intervals,
        rest_seconds: workout.rest,
        damper: workout.damper_for_target,
        rest: rest_targets(workout.damper_for_target, calibration),
    })
}

fn convert_interval(
    workout: &Workout,
    interval: &Interval,
    rep: usize,
    a: f64,
    b: f64,
) -> Result<ConvertedInterval> {
    let target = workout.target_modality;
    let watts = target_watts(workout.target_spec, interval.target_value, a, b);
    let pace = watts_to_pace(watts, target.pace_is_per_500m());
    let rate = clamp_rate(predict_rate(watts, a, b, target), target);

    let (basis, duration_seconds, distance_meters) =
        match (interval.distance, interval.duration) {
            (Some(distance), None) if workout.source_modality == target => {
                let duration = distance * pace / target.pace_unit_meters();
                (IntervalBasis::Distance, Some(duration), Some(distance))
            }
            (Some(distance), None) => {
                // Metres on one machine mean nothing on the other; carry time
                let (source_pace, unit) = source_pace(workout, interval.target_value, watts);
                (IntervalBasis::Duration, Some(distance * source_pace / unit), None)
            }
            (None, Some(duration)) if workout.source_modality == target => {
                let distance = duration / pace * target.pace_unit_meters();
                (IntervalBasis::Duration, Some(duration), Some(distance))
            }
            (None, Some(duration)) => (IntervalBasis::Duration, Some(duration), None),
            _ => return Err(Error::InvalidInterval(rep)),
        };

    Ok(ConvertedInterval {
        rep,
        target_watts: watts.round() as i64,
        target_rpm: rate.round() as i64,
        target_pace: round_tenth(pace),
        basis,
        duration_seconds: duration_seconds.map(round_tenth),
        distance_meters: distance_meters.map(round_tenth),
    })
}

fn target_watts(spec: TargetSpec, value: f64, a: f64, b: f64) -> f64 {
    match spec {
        TargetSpec::Pace500 => pace_to_watts(value, true),
        TargetSpec::Pace1000 => pace_to_watts(value, false),
        TargetSpec::Watts => value,
        TargetSpec::Rpm => predict_watts(value, a, b),
    }
}

/// Pace on the source machine and the distance that pace is quoted over
fn source_pace(workout: &Workout, value: f64, watts: f64) -> (f64, f64) {
    match workout.target_spec {
        TargetSpec::Pace500 => (value, 500.0),
        TargetSpec::Pace1000 => (value, 1000.0),
        TargetSpec::Watts | TargetSpec::Rpm => {
            let source = workout.source_modality;
            (
                watts_to_pace(watts, source.pace_is_per_500m()),
                source.pace_unit_meters(),
            )
        }
    }
}

/// Easy-spin recovery band and the power it corresponds to
pub fn rest_targets(damper: u8, calibration: Option<&CalibrationProfile>) -> RestTargets {
    let (a, b) = match calibration {
        Some(profile) if profile.modality == Modality::Bike => (profile.a, profile.b),
        _ => {
            let generic = generic_calibration(damper);
            (generic.a, generic.b)
        }
    };
    let midpoint = (REST_RPM_MIN + REST_RPM_MAX) / 2.0;

    RestTargets {
        rpm_min: clamp_rpm(REST_RPM_MIN) as i64,
        rpm_max: clamp_rpm(REST_RPM_MAX) as i64,
        watts: predict_watts(midpoint, a, b).round() as i64,
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
