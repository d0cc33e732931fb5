//! Model-related error types

use thiserror::Error;

use esm_core::data::DataError;

/// Model-related errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// Data-related error
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Model specification failed validation
    #[error("Invalid model specification: {message}")]
    InvalidSpec {
        /// Validation message
        message: String,
    },

    /// Numerical computation error
    #[error("Numerical error: {message} (operation: {operation})")]
    NumericalError {
        /// Error message
        message: String,
        /// Operation that failed
        operation: String,
    },

    /// Insufficient data for model fitting
    #[error("Not enough data: {n_samples} samples for {n_predictors} predictors")]
    InsufficientData {
        /// Number of samples
        n_samples: usize,
        /// Number of predictors
        n_predictors: usize,
    },

    /// Optimizer exhausted its iteration budget
    #[error("Failed to converge after {max_iter} iterations (model: {model})")]
    NotConverged {
        /// Model that failed
        model: String,
        /// Maximum number of iterations attempted
        max_iter: usize,
    },

    /// Sampler could not proceed
    #[error("Sampler failure for model {model}: {message}")]
    SamplerFailure {
        /// Model that failed
        model: String,
        /// What went wrong
        message: String,
    },

    /// Point hypothesis requested on a fit without prior draws
    #[error("Prior samples are required to test '{hypothesis}'; refit with sample_prior enabled")]
    MissingPriorSamples {
        /// The hypothesis expression
        hypothesis: String,
    },

    /// Coefficient or random term not present in the fit
    #[error("Unknown parameter '{name}'")]
    UnknownParameter {
        /// Requested name
        name: String,
    },

    /// Hypothesis expression could not be parsed
    #[error("Invalid hypothesis '{expression}': {message}")]
    InvalidHypothesis {
        /// The offending expression
        expression: String,
        /// Parse failure
        message: String,
    },

    /// Invalid model configuration
    #[error("Invalid model configuration: {message}")]
    InvalidConfig {
        /// Configuration error message
        message: String,
    },
}

impl ModelError {
    pub(crate) fn numerical(message: impl std::fmt::Display, operation: &str) -> Self {
        ModelError::NumericalError {
            message: message.to_string(),
            operation: operation.to_string(),
        }
    }

    pub(crate) fn invalid_spec(message: impl Into<String>) -> Self {
        ModelError::InvalidSpec {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        ModelError::InvalidConfig {
            message: message.into(),
        }
    }
}
