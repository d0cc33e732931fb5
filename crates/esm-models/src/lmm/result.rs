//! Fitted REML model

use serde::Serialize;
use std::fmt;

use crate::base::{
    Coefficient, FitResult, ModelError, ModelStatistics, ModelType, Result, VarianceComponent,
};
use crate::spec::ModelSpec;

/// Likelihood-ratio test for removing one random term
#[derive(Debug, Clone, Serialize)]
pub struct LrTest {
    /// Grouping factor of the removed term
    pub group: String,
    /// Removed term (`Intercept`, a slope covariate, or `nested intercept`)
    pub term: String,
    /// Covariance parameters in the reduced model
    pub n_params: usize,
    /// REML deviance of the reduced model
    pub deviance: Option<f64>,
    /// `max(0, d_reduced - d_full)`
    pub statistic: Option<f64>,
    /// Difference in covariance parameter counts
    pub df: usize,
    /// Upper-tail χ² probability
    pub p_value: Option<f64>,
    /// Why the reduced fit failed, if it did
    pub error: Option<String>,
}

/// REML fit of one linear mixed model
#[derive(Debug, Clone, Serialize)]
pub struct FrequentistFit {
    pub(crate) spec: ModelSpec,
    pub(crate) coefficients: Vec<Coefficient>,
    pub(crate) random_effects: Vec<VarianceComponent>,
    pub(crate) lr_tests: Vec<LrTest>,
    pub(crate) statistics: ModelStatistics,
    pub(crate) theta: Vec<f64>,
    pub(crate) sigma: f64,
    pub(crate) n_obs: usize,
    pub(crate) n_groups: usize,
}

impl FrequentistFit {
    /// Random-term likelihood-ratio tests, one per removable term
    pub fn lr_tests(&self) -> &[LrTest] {
        &self.lr_tests
    }

    /// LR test for removing `term` (`nested intercept` for the nested level)
    pub fn lr_test(&self, term: &str) -> Result<&LrTest> {
        self.lr_tests
            .iter()
            .find(|t| t.term == term)
            .ok_or_else(|| ModelError::UnknownParameter {
                name: term.to_string(),
            })
    }

    /// Covariance parameters at the optimum
    pub fn theta(&self) -> &[f64] {
        &self.theta
    }

    /// Residual standard deviation
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Whether the optimizer met its tolerances and passed the optional check
    pub fn converged(&self) -> bool {
        self.statistics.converged.unwrap_or(false)
    }
}

impl FitResult for FrequentistFit {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn fixed_effects(&self) -> &[Coefficient] {
        &self.coefficients
    }

    fn random_effects(&self) -> &[VarianceComponent] {
        &self.random_effects
    }

    fn n_obs(&self) -> usize {
        self.n_obs
    }

    fn n_groups(&self) -> usize {
        self.n_groups
    }

    fn statistics(&self) -> &ModelStatistics {
        &self.statistics
    }

    fn model_type(&self) -> ModelType {
        ModelType::LinearMixedModel
    }
}

impl fmt::Display for FrequentistFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())?;
        if !self.lr_tests.is_empty() {
            writeln!(f)?;
            writeln!(f, "Random-term likelihood-ratio tests:")?;
            writeln!(
                f,
                "{:<20} {:<20} {:>10} {:>6} {:>12}",
                "Group", "Term", "LRT", "df", "Pr(>Chisq)"
            )?;
            for test in &self.lr_tests {
                writeln!(
                    f,
                    "{:<20} {:<20} {:>10.4} {:>6} {:>12.6}",
                    test.group,
                    test.term,
                    test.statistic.unwrap_or(f64::NAN),
                    test.df,
                    test.p_value.unwrap_or(f64::NAN)
                )?;
            }
        }
        Ok(())
    }
}
