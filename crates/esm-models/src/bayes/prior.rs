//! Prior distributions for fixed effects
//!
//! A [`PriorSet`] maps coefficient names (`Intercept` for the intercept) to a
//! [`Prior`]. Coefficients without an entry fall back to the set's default,
//! a weakly informative Student-t(3, 0, 2.5).

use indexmap::IndexMap;
use rand::Rng;
use rand_distr::{Distribution, Normal, StudentT};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;
use std::fmt;

use crate::base::{ModelError, Result};

/// A univariate prior family with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Prior {
    /// Normal(mean, sd)
    Normal { mean: f64, sd: f64 },
    /// Location-scale Student-t(df, location, scale)
    StudentT { df: f64, location: f64, scale: f64 },
}

impl Prior {
    /// Normal prior
    pub fn normal(mean: f64, sd: f64) -> Self {
        Prior::Normal { mean, sd }
    }

    /// Student-t prior
    pub fn student_t(df: f64, location: f64, scale: f64) -> Self {
        Prior::StudentT {
            df,
            location,
            scale,
        }
    }

    /// Default prior for coefficients and scale parameters
    pub fn weakly_informative() -> Self {
        Prior::student_t(3.0, 0.0, 2.5)
    }

    /// Check that the parameters define a proper distribution
    pub fn validate(&self) -> Result<()> {
        let ok = match *self {
            Prior::Normal { mean, sd } => mean.is_finite() && sd.is_finite() && sd > 0.0,
            Prior::StudentT {
                df,
                location,
                scale,
            } => {
                df.is_finite()
                    && df > 0.0
                    && location.is_finite()
                    && scale.is_finite()
                    && scale > 0.0
            }
        };
        if ok {
            Ok(())
        } else {
            Err(ModelError::invalid_config(format!("invalid prior {}", self)))
        }
    }

    /// Log density at `x`
    pub fn ln_pdf(&self, x: f64) -> f64 {
        match *self {
            Prior::Normal { mean, sd } => {
                let z = (x - mean) / sd;
                -0.5 * z * z - sd.ln() - 0.5 * (2.0 * PI).ln()
            }
            Prior::StudentT {
                df,
                location,
                scale,
            } => {
                let z = (x - location) / scale;
                ln_gamma((df + 1.0) / 2.0)
                    - ln_gamma(df / 2.0)
                    - 0.5 * (df * PI).ln()
                    - scale.ln()
                    - (df + 1.0) / 2.0 * (z * z / df).ln_1p()
            }
        }
    }

    /// Derivative of the log density at `x`
    pub fn grad_ln_pdf(&self, x: f64) -> f64 {
        match *self {
            Prior::Normal { mean, sd } => -(x - mean) / (sd * sd),
            Prior::StudentT {
                df,
                location,
                scale,
            } => {
                let d = x - location;
                -(df + 1.0) * d / (df * scale * scale + d * d)
            }
        }
    }

    /// One draw from the prior
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        match *self {
            Prior::Normal { mean, sd } => Normal::new(mean, sd)
                .map(|d| d.sample(rng))
                .map_err(|e| ModelError::invalid_config(e.to_string())),
            Prior::StudentT {
                df,
                location,
                scale,
            } => StudentT::new(df)
                .map(|d| location + scale * d.sample(rng))
                .map_err(|e| ModelError::invalid_config(e.to_string())),
        }
    }
}

impl fmt::Display for Prior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prior::Normal { mean, sd } => write!(f, "normal({}, {})", mean, sd),
            Prior::StudentT {
                df,
                location,
                scale,
            } => write!(f, "student_t({}, {}, {})", df, location, scale),
        }
    }
}

/// Half-distribution on `(0, ∞)` obtained by folding a zero-centred prior
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct HalfPrior(pub Prior);

impl HalfPrior {
    /// Log density of `exp(u)` plus the log Jacobian `u`, and its derivative in `u`
    pub fn ln_pdf_log_scale(&self, u: f64) -> (f64, f64) {
        let x = u.exp();
        let value = self.0.ln_pdf(x) + std::f64::consts::LN_2 + u;
        let grad = x * self.0.grad_ln_pdf(x) + 1.0;
        (value, grad)
    }
}

/// Named collection of coefficient priors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorSet {
    name: String,
    priors: IndexMap<String, Prior>,
    default: Prior,
}

impl PriorSet {
    /// Empty set; every coefficient takes the default prior
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priors: IndexMap::new(),
            default: Prior::weakly_informative(),
        }
    }

    /// Zero-centred unit-scale normal prior on each named coefficient
    pub fn non_informative<I, S>(coefficients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let priors = coefficients
            .into_iter()
            .map(|c| (c.into(), Prior::normal(0.0, 1.0)))
            .collect();
        Self {
            name: "non-informative".to_string(),
            priors,
            default: Prior::weakly_informative(),
        }
    }

    /// Add one entry; a coefficient may appear only once
    pub fn with_prior(mut self, coefficient: impl Into<String>, prior: Prior) -> Result<Self> {
        let coefficient = coefficient.into();
        prior.validate()?;
        if self.priors.contains_key(&coefficient) {
            return Err(ModelError::invalid_config(format!(
                "prior set '{}' already has an entry for '{}'",
                self.name, coefficient
            )));
        }
        self.priors.insert(coefficient, prior);
        Ok(self)
    }

    /// Replace the fallback prior
    pub fn with_default(mut self, prior: Prior) -> Result<Self> {
        prior.validate()?;
        self.default = prior;
        Ok(self)
    }

    /// Set name (`non-informative`, `informed`, ...)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prior for `coefficient`, falling back to the default
    pub fn get(&self, coefficient: &str) -> &Prior {
        self.priors.get(coefficient).unwrap_or(&self.default)
    }

    /// Whether `coefficient` has an explicit entry
    pub fn contains(&self, coefficient: &str) -> bool {
        self.priors.contains_key(coefficient)
    }

    /// Explicit entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Prior)> {
        self.priors.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Validate every entry
    pub fn validate(&self) -> Result<()> {
        self.default.validate()?;
        for prior in self.priors.values() {
            prior.validate()?;
        }
        Ok(())
    }
}
