//! Error taxonomy for the forecasting pipeline
//!
//! Every component returns `Result<T, ForecastError>` so the portfolio layer can
//! branch on the failure kind (drop an instrument, abort the request, ...).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    /// Not enough bars to build a single full sequence window
    #[error("insufficient history: need at least {required} rows, got {available}")]
    InsufficientHistory { required: usize, available: usize },

    /// The data provider returned nothing for one or more instruments
    #[error("empty or missing series for: {}", .missing.join(", "))]
    EmptyOrMissingSeries { missing: Vec<String> },

    /// Shape mismatch, out-of-range weight or weights not summing to 1
    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    #[error("model has not been trained")]
    ModelNotTrained,

    #[error("scaler has not been fitted")]
    ScalerNotFitted,

    /// Network / scaler pairing is broken
    #[error("artifact mismatch: {0}")]
    ArtifactMismatch(String),

    /// Degenerate numeric situation with no defined result
    #[error("computation error: {0}")]
    ComputationError(String),

    #[error("invalid series for {ticker}: {reason}")]
    InvalidSeries { ticker: String, reason: String },

    #[error("price provider failed for {ticker}: {reason}")]
    Provider { ticker: String, reason: String },

    #[error("fetch for {ticker} timed out after {millis}ms")]
    Timeout { ticker: String, millis: u64 },

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl ForecastError {
    /// Deployment/programming errors are always fatal and never retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ForecastError::ModelNotTrained
                | ForecastError::ScalerNotFitted
                | ForecastError::ArtifactMismatch(_)
                | ForecastError::InvalidWeights(_)
        )
    }
}

impl From<std::io::Error> for ForecastError {
    fn from(e: std::io::Error) -> Self {
        ForecastError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(e: serde_json::Error) -> Self {
        ForecastError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
