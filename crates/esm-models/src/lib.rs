//! Linear mixed models for experience-sampling data
//!
//! A [`ModelSpec`] names an outcome, fixed covariates and a random-effects
//! structure. [`DataPreparer`] turns a raw [`esm_core::DataFrame`] into the
//! modeling frame for one spec, which either estimator then fits:
//!
//! - [`FrequentistEstimator`]: REML with Satterthwaite degrees of freedom and
//!   likelihood-ratio tests for every removable random term
//! - [`BayesianEstimator`]: NUTS over a non-centred parameterization, under a
//!   [`PriorSet`]
//!
//! [`HypothesisEngine`] evaluates directional and point hypotheses on either
//! kind of fit.

pub mod base;
pub mod bayes;
pub mod design;
pub mod error;
pub mod hypothesis;
pub mod lmm;
pub mod prepare;
pub mod spec;

#[cfg(test)]
mod fixtures;

pub use base::{
    Coefficient, ComponentKind, FitResult, ModelStatistics, ModelSummary, ModelType, Result,
    VarianceComponent,
};
pub use bayes::{BayesianEstimator, BayesianFit, PosteriorDraws, Prior, PriorSet, SamplerConfig};
pub use error::ModelError;
pub use hypothesis::{
    BayesianTest, Comparison, FrequentistKind, FrequentistTest, Hypothesis, HypothesisEngine,
};
pub use lmm::{FrequentistEstimator, FrequentistFit, LrTest, OptimizerConfig, OptimizerMethod};
pub use prepare::{ColumnRoles, DataPreparer, PreparedDataset, ScalingInfo};
pub use spec::{Grouping, INTERCEPT, ModelSpec, ModelSpecBuilder};
