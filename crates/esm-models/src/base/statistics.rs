//! Statistical structures for model results

use serde::{Deserialize, Serialize};

/// Model statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelStatistics {
    /// Residual standard error
    pub residual_std_error: Option<f64>,
    /// Restricted log-likelihood at the optimum
    pub log_likelihood: Option<f64>,
    /// REML criterion (-2 log-likelihood)
    pub reml_criterion: Option<f64>,
    /// AIC
    pub aic: Option<f64>,
    /// BIC
    pub bic: Option<f64>,
    /// Residual degrees of freedom
    pub df_residual: Option<usize>,
    /// Number of covariance parameters
    pub n_variance_params: Option<usize>,
    /// Number of iterations (optimizer) or draws per chain (sampler)
    pub iterations: Option<usize>,
    /// Convergence status
    pub converged: Option<bool>,
    /// Divergent transitions summed over chains
    pub divergences: Option<usize>,
}
