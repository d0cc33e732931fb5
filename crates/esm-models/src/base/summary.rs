//! Model summary structures

use super::coefficient::{Coefficient, ComponentKind, VarianceComponent};
use super::statistics::ModelStatistics;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comprehensive model summary structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    /// Model type
    pub model_type: ModelType,
    /// Model name from the specification
    pub model: String,
    /// Model formula, rendered from the specification
    pub formula: String,
    /// Number of observations
    pub n_obs: usize,
    /// Number of subjects
    pub n_groups: usize,
    /// Coefficients table
    pub coefficients: Vec<Coefficient>,
    /// Random-effects table
    pub random_effects: Vec<VarianceComponent>,
    /// Model statistics
    pub model_statistics: ModelStatistics,
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model Summary: {}", self.model)?;
        writeln!(f, "=============")?;
        writeln!(f, "Model Type: {}", self.model_type)?;
        writeln!(f, "Formula: {}", self.formula)?;
        writeln!(f, "Observations: {}", self.n_obs)?;
        writeln!(f, "Groups: {}", self.n_groups)?;
        writeln!(f)?;

        writeln!(f, "Random effects:")?;
        writeln!(f, "{:<20} {:<28} {:>12} {:>12}", "Group", "Term", "Estimate", "Error")?;
        for vc in &self.random_effects {
            let label = match vc.kind {
                ComponentKind::StdDev | ComponentKind::Residual => format!("sd({})", vc.term),
                ComponentKind::Correlation => format!("cor({})", vc.term),
            };
            writeln!(
                f,
                "{:<20} {:<28} {:>12.6} {:>12.6}",
                vc.group,
                label,
                vc.estimate,
                vc.std_error.unwrap_or(f64::NAN)
            )?;
        }
        writeln!(f)?;

        writeln!(f, "Fixed effects:")?;
        writeln!(
            f,
            "{:<20} {:>12} {:>12} {:>12} {:>12} {:>12}",
            "Term", "Estimate", "Std Error", "df", "t-value", "p-value"
        )?;
        writeln!(
            f,
            "{:-<20} {:-<12} {:-<12} {:-<12} {:-<12} {:-<12}",
            "", "", "", "", "", ""
        )?;

        for coeff in &self.coefficients {
            writeln!(
                f,
                "{:<20} {:>12.6} {:>12.6} {:>12.2} {:>12.6} {:>12.6}",
                coeff.name,
                coeff.estimate,
                coeff.std_error.unwrap_or(f64::NAN),
                coeff.df.unwrap_or(f64::NAN),
                coeff.t_stat.unwrap_or(f64::NAN),
                coeff.p_value.unwrap_or(f64::NAN)
            )?;
        }
        writeln!(f)?;

        writeln!(f, "Model Statistics:")?;
        if let Some(reml) = self.model_statistics.reml_criterion {
            writeln!(f, "  REML criterion: {:.4}", reml)?;
        }
        if let Some(aic) = self.model_statistics.aic {
            writeln!(f, "  AIC: {:.4}", aic)?;
        }
        if let Some(bic) = self.model_statistics.bic {
            writeln!(f, "  BIC: {:.4}", bic)?;
        }
        if let Some(resid_se) = self.model_statistics.residual_std_error {
            writeln!(f, "  Residual Std. Error: {:.4}", resid_se)?;
        }
        if let Some(iterations) = self.model_statistics.iterations {
            writeln!(f, "  Iterations: {}", iterations)?;
        }
        if let Some(divergences) = self.model_statistics.divergences {
            writeln!(f, "  Divergent transitions: {}", divergences)?;
        }

        Ok(())
    }
}

/// Model type enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    /// Linear mixed model fitted by REML
    LinearMixedModel,
    /// Linear mixed model fitted by MCMC
    BayesianLinearMixedModel,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::LinearMixedModel => write!(f, "Linear Mixed Model (REML)"),
            ModelType::BayesianLinearMixedModel => write!(f, "Bayesian Linear Mixed Model (NUTS)"),
        }
    }
}
