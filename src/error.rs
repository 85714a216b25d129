// Error surface shared by the solver, calibrator and studies

use thiserror::Error;

/// Everything that can stop a simulation, a calibration or a study.
///
/// Input invariant violations are fatal to the current run. Gas-property
/// failures never reach the caller of `simulate` because the solver recovers
/// from them locally; the variant exists for providers and their tests.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("durations must be strictly increasing (index {index}: {previous} s -> {current} s)")]
    NonIncreasingDurations {
        index: usize,
        previous: f64,
        current: f64,
    },
    #[error("series needs at least {required} samples, got {actual}")]
    SeriesTooShort { required: usize, actual: usize },
    #[error("series channels have different lengths")]
    ChannelLengthMismatch,
    #[error("measured series is degenerate: {0}")]
    DegenerateSeries(String),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("linear system is singular at row {row}")]
    SingularSystem { row: usize },
    #[error("solution became non-finite at step {step}")]
    NonFiniteSolution { step: usize },
    #[error("gas property lookup failed for {gas} at p = {pressure} Pa, T = {temperature} K: {reason}")]
    GasProperty {
        gas: String,
        pressure: f64,
        temperature: f64,
        reason: String,
    },
    #[error("optimizer failed: {0}")]
    Optimizer(String),
    #[error("klinkenberg correction failed: {0}")]
    Klinkenberg(String),
    #[error("failed to read configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Config(err.to_string())
    }
}
