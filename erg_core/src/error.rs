//! Error types for the erg_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for erg_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A power curve fit was attempted with too few samples
    #[error("Insufficient samples: need at least {required}, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    /// A sample lacks the field its modality needs (rpm for bike, pace_500 for row)
    #[error("Missing field data: {0}")]
    MissingFieldData(String),

    /// A sample value that cannot be fitted in log space (zero, negative or not finite)
    #[error("Invalid sample {index}: {reason}")]
    InvalidSample { index: usize, reason: String },

    /// Every sample sits at the same regressor value, so no slope can be fitted
    #[error("Degenerate samples: {0}")]
    DegenerateSamples(String),

    /// An rpm-targeted workout was converted without a calibration
    #[error("Calibration required: {0}")]
    CalibrationRequired(String),

    /// A calibration fitted on one machine was offered for the other
    #[error("Calibration is for {calibration} but the workout targets {target}")]
    CalibrationMismatch {
        calibration: crate::Modality,
        target: crate::Modality,
    },

    /// Pace string was not `M:SS(.T)`
    #[error("Invalid pace format: {0:?}")]
    InvalidPaceFormat(String),

    /// Damper outside the 1..=10 range
    #[error("Invalid damper setting: {0} (expected 1-10)")]
    InvalidDamper(u8),

    /// Interval without exactly one of distance/duration
    #[error("Interval {0} must set exactly one of distance or duration")]
    InvalidInterval(usize),

    /// Sync attempted while the network is unavailable
    #[error("Offline: calibration sync needs network connectivity")]
    Offline,

    /// Another sync pass is already running
    #[error("A calibration sync is already in progress")]
    SyncInProgress,

    /// Remote endpoint returned an error, a non-2xx status or a malformed payload
    #[error("Remote request failed: {0}")]
    RemoteRequest(String),

    /// Local persistence failed
    #[error("Storage failure: {0}")]
    Storage(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::RemoteRequest(e.to_string())
    }
}
