//! Pipeline error types

use std::path::PathBuf;
use thiserror::Error;

use esm_core::DataError;
use esm_models::ModelError;

/// Errors raised outside a single (model, estimator) unit
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for [`crate::RunConfig`]
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Model-layer error, including invalid configuration values
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Input data error
    #[error(transparent)]
    Data(#[from] DataError),

    /// Results could not be written as CSV
    #[error("CSV output error: {0}")]
    Csv(#[from] csv::Error),

    /// Results could not be written as JSON
    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),

    /// Output sink error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
