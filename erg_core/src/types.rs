//! Core domain types for ergswap.
//!
//! This module defines the records shared by every layer:
//! - Calibration samples and fitted profiles
//! - Workouts, intervals and conversion results
//! - User profiles carried through backups

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Modality
// ============================================================================

/// Ergometer modality
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Row,
    Bike,
}

impl Modality {
    /// Rowing paces are quoted per 500 m, bike paces per 1000 m.
    pub fn pace_is_per_500m(self) -> bool {
        matches!(self, Modality::Row)
    }

    /// Distance (metres) one pace unit covers
    pub fn pace_unit_meters(self) -> f64 {
        match self {
            Modality::Row => 500.0,
            Modality::Bike => 1000.0,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Row => write!(f, "Row"),
            Modality::Bike => write!(f, "Bike"),
        }
    }
}

impl std::str::FromStr for Modality {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "row" | "rower" | "rowerg" => Ok(Modality::Row),
            "bike" | "bikeerg" => Ok(Modality::Bike),
            other => Err(crate::Error::Config(format!("Unknown modality: {}", other))),
        }
    }
}

// ============================================================================
// Calibration Types
// ============================================================================

/// Where a calibration sample came from
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    #[default]
    Manual,
    Ble,
}

/// One observed (rate or pace, watts) pair
///
/// Bike samples carry `rpm`, row samples carry `pace_500`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pace_500: Option<f64>,
    pub watts: f64,
    #[serde(default)]
    pub source: SampleSource,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: i64,
}

impl Sample {
    /// Bike sample at the given cadence
    pub fn bike(rpm: f64, watts: f64) -> Self {
        Self {
            rpm: Some(rpm),
            pace_500: None,
            watts,
            source: SampleSource::Manual,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Row sample at the given split
    pub fn row(pace_500: f64, watts: f64) -> Self {
        Self {
            rpm: None,
            pace_500: Some(pace_500),
            watts,
            source: SampleSource::Manual,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// A fitted, damper-specific power curve
///
/// Profiles are never re-fitted in place; a new profile supersedes an old one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CalibrationProfile {
    /// Storage-assigned identifier (local counter or remote UUID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub modality: Modality,
    pub damper: u8,
    pub a: f64,
    pub b: f64,
    pub r2: f64,
    pub samples: Vec<Sample>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Workout Types
// ============================================================================

/// Unit the workout's interval targets are expressed in
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetSpec {
    #[serde(rename = "pace_500")]
    Pace500,
    #[serde(rename = "pace_1000")]
    Pace1000,
    Watts,
    Rpm,
}

/// A single work interval; exactly one of distance/duration drives it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Interval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub target_value: f64,
}

/// A workout written for one machine, to be performed on another (or the same)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Workout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source_modality: Modality,
    pub target_modality: Modality,
    pub target_spec: TargetSpec,
    pub damper_for_target: u8,
    pub intervals: Vec<Interval>,
    /// Rest between intervals, seconds
    pub rest: f64,
}

/// Which quantity drives a converted interval
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntervalBasis {
    Distance,
    Duration,
}

/// One interval expressed in target-machine terms
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConvertedInterval {
    pub rep: usize,
    pub target_watts: i64,
    /// RPM for bike targets, stroke rate for row targets
    pub target_rpm: i64,
    /// Seconds per pace unit of the target modality, rounded to 0.1 s
    pub target_pace: f64,
    pub basis: IntervalBasis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
}

/// Recovery band between intervals
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RestTargets {
    pub rpm_min: i64,
    pub rpm_max: i64,
    pub watts: i64,
}

/// A converted workout
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConversionResult {
    pub modality: Modality,
    pub intervals: Vec<ConvertedInterval>,
    pub rest_seconds: f64,
    pub damper: u8,
    pub rest: RestTargets,
}

// ============================================================================
// User Profile
// ============================================================================

/// Athlete record carried through backups
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_modality: Option<Modality>,
    pub created_at: DateTime<Utc>,
}
