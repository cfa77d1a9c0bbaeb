#![forbid(unsafe_code)]

//! Core domain model and business logic for ergswap.
//!
//! This crate provides:
//! - Domain types (samples, calibration profiles, workouts)
//! - Pace/power unit conversions
//! - Power curve fitting and prediction
//! - Workout conversion between RowErg and BikeErg, with text/CSV export
//! - Local calibration store, remote endpoint and sync reconciliation
//! - JSON backup and restore

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod units;
pub mod curve;
pub mod convert;
pub mod export;
pub mod store;
pub mod remote;
pub mod network;
pub mod sync;
pub mod backup;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use curve::{build_profile, fit_power_curve, validate_calibration, PowerCurveFit};
pub use convert::{convert_workout, rest_targets};
pub use export::{format_conversion, ExportFormat};
pub use store::{CalibrationStore, JsonFileStore};
pub use remote::{HttpRemote, RemoteCalibrations};
pub use network::{ConnectivityMonitor, ConnectivitySignal};
pub use sync::{
    fingerprint, AutoSyncHandle, DeleteSummary, SyncReconciler, SyncState, SyncSummary,
};
