//! Core traits and types for fitted models
//!
//! Both estimators hand back immutable fit objects implementing
//! [`FitResult`]; reporting and plotting code only sees this interface.

// Re-export core types
pub use coefficient::{Coefficient, ComponentKind, VarianceComponent};
pub use statistics::ModelStatistics;
pub use summary::{ModelSummary, ModelType};

pub use crate::error::ModelError;

use crate::bayes::PosteriorDraws;
use crate::spec::ModelSpec;

pub mod coefficient;
pub mod statistics;
pub mod summary;

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Named accessors shared by frequentist and Bayesian fits
pub trait FitResult: Send + Sync {
    /// The specification that was fitted
    fn spec(&self) -> &ModelSpec;

    /// Fixed-effect table, `Intercept` first
    fn fixed_effects(&self) -> &[Coefficient];

    /// Random-effect standard deviations, correlations and residual SD
    fn random_effects(&self) -> &[VarianceComponent];

    /// Number of observations in the modeling frame
    fn n_obs(&self) -> usize;

    /// Number of subjects
    fn n_groups(&self) -> usize;

    /// Fit statistics
    fn statistics(&self) -> &ModelStatistics;

    /// Model family tag
    fn model_type(&self) -> ModelType;

    /// Raw sampler output, for fits that have one
    fn draws(&self) -> Option<&PosteriorDraws> {
        None
    }

    /// Look up one fixed effect by name
    fn coefficient(&self, name: &str) -> Result<&Coefficient> {
        self.fixed_effects()
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ModelError::UnknownParameter {
                name: name.to_string(),
            })
    }

    /// Generate model summary
    fn summary(&self) -> ModelSummary {
        ModelSummary {
            model_type: self.model_type(),
            model: self.spec().name().to_string(),
            formula: self.spec().to_string(),
            n_obs: self.n_obs(),
            n_groups: self.n_groups(),
            coefficients: self.fixed_effects().to_vec(),
            random_effects: self.random_effects().to_vec(),
            model_statistics: *self.statistics(),
        }
    }
}
