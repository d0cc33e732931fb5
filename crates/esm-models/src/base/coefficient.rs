//! Coefficient and variance-component definitions

use serde::{Deserialize, Serialize};

/// Coefficient estimate with statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coefficient {
    /// Coefficient name
    pub name: String,
    /// Coefficient estimate (posterior mean for Bayesian fits)
    pub estimate: f64,
    /// Standard error (posterior SD for Bayesian fits)
    pub std_error: Option<f64>,
    /// t-statistic
    pub t_stat: Option<f64>,
    /// Two-sided p-value
    pub p_value: Option<f64>,
    /// Lower bound of confidence/credible interval
    pub ci_lower: Option<f64>,
    /// Upper bound of confidence/credible interval
    pub ci_upper: Option<f64>,
    /// Degrees of freedom
    pub df: Option<f64>,
    /// Is this the intercept?
    pub is_intercept: bool,
}

impl Coefficient {
    /// Create a new coefficient
    pub fn new(name: impl Into<String>, estimate: f64) -> Self {
        Self {
            name: name.into(),
            estimate,
            std_error: None,
            t_stat: None,
            p_value: None,
            ci_lower: None,
            ci_upper: None,
            df: None,
            is_intercept: false,
        }
    }

    /// Set standard error
    pub fn with_std_error(mut self, se: f64) -> Self {
        self.std_error = Some(se);
        self
    }

    /// Set t-statistic
    pub fn with_t_stat(mut self, t: f64) -> Self {
        self.t_stat = Some(t);
        self
    }

    /// Set p-value
    pub fn with_p_value(mut self, p: f64) -> Self {
        self.p_value = Some(p);
        self
    }

    /// Set degrees of freedom
    pub fn with_df(mut self, df: f64) -> Self {
        self.df = Some(df);
        self
    }

    /// Set confidence interval
    pub fn with_ci(mut self, lower: f64, upper: f64) -> Self {
        self.ci_lower = Some(lower);
        self.ci_upper = Some(upper);
        self
    }

    /// Mark as intercept
    pub fn as_intercept(mut self) -> Self {
        self.is_intercept = true;
        self
    }
}

/// What a variance component measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentKind {
    /// Standard deviation of a random effect
    StdDev,
    /// Correlation between two random effects of the same group
    Correlation,
    /// Residual standard deviation
    Residual,
}

/// One row of the random-effects table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceComponent {
    /// Grouping factor (`subject`, `subject:day`, or `Residual`)
    pub group: String,
    /// Term name, `a,b` for correlations
    pub term: String,
    /// Kind of component
    pub kind: ComponentKind,
    /// Estimate (posterior mean for Bayesian fits)
    pub estimate: f64,
    /// Posterior SD, when available
    pub std_error: Option<f64>,
}

impl VarianceComponent {
    pub(crate) fn new(
        group: impl Into<String>,
        term: impl Into<String>,
        kind: ComponentKind,
        estimate: f64,
    ) -> Self {
        Self {
            group: group.into(),
            term: term.into(),
            kind,
            estimate,
            std_error: None,
        }
    }

    pub(crate) fn with_std_error(mut self, se: f64) -> Self {
        self.std_error = Some(se);
        self
    }
}
