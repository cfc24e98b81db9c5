use thiserror::Error;

/// Failures of a single pipeline invocation. None of these are retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no data for {detector} in [{start}, {end}): {reason}")]
    DataUnavailable {
        detector: String,
        start: f64,
        end: f64,
        reason: String,
    },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("parameter mismatch: {0}")]
    ParameterMismatch(String),

    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Relative tolerance used when comparing sample spacings.
pub const SPACING_TOLERANCE: f64 = 1e-9;

pub fn same_spacing(a: f64, b: f64) -> bool {
    (a - b).abs() <= SPACING_TOLERANCE * a.abs().max(b.abs())
}
