//! Directional and point hypotheses on fitted models
//!
//! Frequentist fits are tested with one-sided t tests built from the
//! two-sided Satterthwaite p-value, or with the random-term LR test.
//! Bayesian fits are tested on pooled post-warmup draws: inequalities by the
//! share of draws satisfying them, point hypotheses by the Savage–Dickey
//! density ratio.

#[cfg(test)]
mod tests;

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::fmt;
use std::str::FromStr;

use crate::base::{ComponentKind, FitResult, ModelError, Result};
use crate::bayes::BayesianFit;
use crate::bayes::fit::{mean_sd, quantile_sorted};
use crate::design::RandomTerm;
use crate::lmm::FrequentistFit;
use crate::spec::INTERCEPT;

/// Relation asserted by the alternative (inequalities) or the null (equality)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    /// `coef < value`
    Less,
    /// `coef > value`
    Greater,
    /// `coef = value`
    Equal,
}

impl Comparison {
    fn symbol(self) -> &'static str {
        match self {
            Comparison::Less => "<",
            Comparison::Greater => ">",
            Comparison::Equal => "=",
        }
    }
}

/// A parsed hypothesis `coef < v`, `coef > v` or `coef = v`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hypothesis {
    pub coefficient: String,
    pub comparison: Comparison,
    pub value: f64,
}

impl Hypothesis {
    pub fn new(coefficient: impl Into<String>, comparison: Comparison, value: f64) -> Self {
        Self {
            coefficient: coefficient.into(),
            comparison,
            value,
        }
    }

    /// The complementary statement (`>` for `<`, and so on)
    pub fn negation(&self) -> String {
        let symbol = match self.comparison {
            Comparison::Less => ">=",
            Comparison::Greater => "<=",
            Comparison::Equal => "!=",
        };
        format!("{} {} {}", self.coefficient, symbol, self.value)
    }
}

impl fmt::Display for Hypothesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.coefficient,
            self.comparison.symbol(),
            self.value
        )
    }
}

impl FromStr for Hypothesis {
    type Err = ModelError;

    fn from_str(expression: &str) -> Result<Self> {
        let invalid = |message: &str| ModelError::InvalidHypothesis {
            expression: expression.to_string(),
            message: message.to_string(),
        };

        let position = expression
            .find(['<', '>', '='])
            .ok_or_else(|| invalid("expected one of '<', '>' or '='"))?;
        let comparison = match &expression[position..position + 1] {
            "<" => Comparison::Less,
            ">" => Comparison::Greater,
            _ => Comparison::Equal,
        };
        let coefficient = expression[..position].trim();
        let rest = expression[position + 1..].trim_start_matches('=').trim();

        if coefficient.is_empty() {
            return Err(invalid("missing coefficient name"));
        }
        if expression.contains('!') {
            return Err(invalid("negated comparisons are not supported"));
        }
        if rest.contains(['<', '>', '=']) {
            return Err(invalid("more than one comparison operator"));
        }
        let value: f64 = rest
            .parse()
            .map_err(|_| invalid("right-hand side is not a number"))?;

        Ok(Hypothesis::new(coefficient, comparison, value))
    }
}

/// Which frequentist test produced a p-value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrequentistKind {
    /// One-sided t test from the two-sided p-value
    OneSided,
    /// Two-sided t test of an equality
    TwoSided,
    /// χ² likelihood-ratio test for removing a random term (two-sided)
    LikelihoodRatio,
}

/// Outcome of a frequentist test
#[derive(Debug, Clone, Serialize)]
pub struct FrequentistTest {
    /// Tested statement, with the LR test written as `sd(term) > 0`
    pub hypothesis: String,
    pub kind: FrequentistKind,
    /// `coef - value`, or the random-term SD for LR tests
    pub estimate: f64,
    /// Standard error of `estimate`, absent for LR tests
    pub std_error: Option<f64>,
    /// t or χ² statistic
    pub statistic: f64,
    /// Degrees of freedom of `statistic`
    pub df: f64,
    /// p-value under the null, in the direction of the test
    pub p_value: f64,
}

/// Outcome of a Bayesian test
#[derive(Debug, Clone, Serialize)]
pub struct BayesianTest {
    pub hypothesis: Hypothesis,
    /// Posterior mean of `coef - value`
    pub estimate: f64,
    /// Posterior SD of `coef - value`
    pub est_error: f64,
    /// Lower credible bound: q05 for `>` (one-sided 95%), q025 for `=`;
    /// `None` for `<`
    pub ci_lower: Option<f64>,
    /// Upper credible bound: q95 for `<` (one-sided 95%), q975 for `=`;
    /// `None` for `>`
    pub ci_upper: Option<f64>,
    /// Posterior probability of the hypothesis
    pub posterior_prob: f64,
    /// `p / (1 - p)` for inequalities, the Bayes factor BF01 for equalities
    pub evidence_ratio: f64,
}

/// Runs hypothesis tests against fitted models
#[derive(Debug, Clone, Copy, Default)]
pub struct HypothesisEngine;

impl HypothesisEngine {
    pub fn new() -> Self {
        Self
    }

    fn require_converged(fit: &FrequentistFit) -> Result<()> {
        if fit.converged() {
            Ok(())
        } else {
            Err(ModelError::NotConverged {
                model: fit.spec().name().to_string(),
                max_iter: fit.statistics().iterations.unwrap_or(0),
            })
        }
    }

    /// t test of `coef <comparison> value` on a REML fit
    ///
    /// Inequalities report the one-sided p-value: half the two-sided value
    /// when the estimate lies on the side of the alternative, one minus half
    /// otherwise. Equalities report the two-sided p-value.
    pub fn test_fixed_effect(
        &self,
        fit: &FrequentistFit,
        hypothesis: &Hypothesis,
    ) -> Result<FrequentistTest> {
        Self::require_converged(fit)?;
        let coefficient = fit.coefficient(&hypothesis.coefficient)?;
        let missing = |what: &str| {
            ModelError::numerical(
                format!("coefficient '{}' has no {}", coefficient.name, what),
                "hypothesis",
            )
        };
        let se = coefficient.std_error.ok_or_else(|| missing("standard error"))?;
        let df = coefficient.df.ok_or_else(|| missing("degrees of freedom"))?;

        let estimate = coefficient.estimate - hypothesis.value;
        let t = estimate / se;
        let dist = StudentsT::new(0.0, 1.0, df)
            .map_err(|e| ModelError::numerical(e, "t distribution"))?;
        let p_two_sided = (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0);

        let (kind, p_value) = match hypothesis.comparison {
            Comparison::Equal => (FrequentistKind::TwoSided, p_two_sided),
            Comparison::Greater => (
                FrequentistKind::OneSided,
                one_sided(p_two_sided, estimate > 0.0),
            ),
            Comparison::Less => (
                FrequentistKind::OneSided,
                one_sided(p_two_sided, estimate < 0.0),
            ),
        };

        Ok(FrequentistTest {
            hypothesis: hypothesis.to_string(),
            kind,
            estimate,
            std_error: Some(se),
            statistic: t,
            df,
            p_value,
        })
    }

    /// LR test for the random term `term` of the subject level
    pub fn test_random_effect(&self, fit: &FrequentistFit, term: &str) -> Result<FrequentistTest> {
        Self::require_converged(fit)?;
        let test = fit.lr_test(term)?;
        let (statistic, p_value) = match (test.statistic, test.p_value) {
            (Some(s), Some(p)) => (s, p),
            _ => {
                return Err(ModelError::numerical(
                    test.error.clone().unwrap_or_else(|| "reduced model failed".to_string()),
                    "likelihood-ratio test",
                ));
            }
        };
        // The nested level carries a single intercept
        let sd_term = if test.term == RandomTerm::Nested.to_string() {
            INTERCEPT
        } else {
            test.term.as_str()
        };
        let sd = fit
            .random_effects()
            .iter()
            .find(|vc| {
                vc.kind == ComponentKind::StdDev && vc.term == sd_term && vc.group == test.group
            })
            .map_or(f64::NAN, |vc| vc.estimate);

        Ok(FrequentistTest {
            hypothesis: format!("sd({}:{}) > 0", test.group, sd_term),
            kind: FrequentistKind::LikelihoodRatio,
            estimate: sd,
            std_error: None,
            statistic,
            df: test.df as f64,
            p_value,
        })
    }

    /// Evaluate a hypothesis expression on a Bayesian fit
    pub fn test_hypothesis(&self, fit: &BayesianFit, expression: &str) -> Result<BayesianTest> {
        let hypothesis: Hypothesis = expression.parse()?;
        self.test_bayesian(fit, &hypothesis)
    }

    /// Evaluate a parsed hypothesis on a Bayesian fit
    ///
    /// Inequalities get a one-sided 95% credible bound, equalities a
    /// two-sided 95% interval.
    pub fn test_bayesian(
        &self,
        fit: &BayesianFit,
        hypothesis: &Hypothesis,
    ) -> Result<BayesianTest> {
        let draws = fit.posterior();
        let shifted: Vec<f64> = draws
            .pooled(&hypothesis.coefficient)?
            .iter()
            .map(|v| v - hypothesis.value)
            .collect();
        let (estimate, est_error) = mean_sd(&shifted);
        let mut sorted = shifted.clone();
        sorted.sort_by(f64::total_cmp);
        let n = shifted.len() as f64;

        let (ci_lower, ci_upper, posterior_prob, evidence_ratio) = match hypothesis.comparison {
            Comparison::Less => {
                let p = shifted.iter().filter(|&&d| d < 0.0).count() as f64 / n;
                (None, Some(quantile_sorted(&sorted, 0.95)), p, odds(p))
            }
            Comparison::Greater => {
                let p = shifted.iter().filter(|&&d| d > 0.0).count() as f64 / n;
                (Some(quantile_sorted(&sorted, 0.05)), None, p, odds(p))
            }
            Comparison::Equal => {
                let prior = draws.prior(&hypothesis.coefficient).ok_or_else(|| {
                    ModelError::MissingPriorSamples {
                        hypothesis: hypothesis.to_string(),
                    }
                })?;
                let posterior_density = kde_at(&shifted, 0.0, "posterior density")?;
                let prior_shifted: Vec<f64> = prior.iter().map(|v| v - hypothesis.value).collect();
                let prior_density = kde_at(&prior_shifted, 0.0, "prior density")?;
                let bf01 = posterior_density / prior_density;
                (
                    Some(quantile_sorted(&sorted, 0.025)),
                    Some(quantile_sorted(&sorted, 0.975)),
                    bf01 / (1.0 + bf01),
                    bf01,
                )
            }
        };

        Ok(BayesianTest {
            hypothesis: hypothesis.clone(),
            estimate,
            est_error,
            ci_lower,
            ci_upper,
            posterior_prob,
            evidence_ratio,
        })
    }
}

fn one_sided(p_two_sided: f64, matches_direction: bool) -> f64 {
    if matches_direction {
        p_two_sided / 2.0
    } else {
        1.0 - p_two_sided / 2.0
    }
}

fn odds(p: f64) -> f64 {
    if p >= 1.0 { f64::INFINITY } else { p / (1.0 - p) }
}

/// Silverman's rule-of-thumb bandwidth, `0.9 min(sd, IQR/1.34) n^(-1/5)`
pub fn silverman_bandwidth(values: &[f64]) -> f64 {
    let (_, sd) = mean_sd(values);
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let iqr = quantile_sorted(&sorted, 0.75) - quantile_sorted(&sorted, 0.25);
    let spread = if iqr > 0.0 { sd.min(iqr / 1.34) } else { sd };
    0.9 * spread * (values.len() as f64).powf(-0.2)
}

/// Gaussian kernel density estimate of `values` at `x`
pub fn kde_at(values: &[f64], x: f64, what: &str) -> Result<f64> {
    let h = silverman_bandwidth(values);
    if !(h.is_finite() && h > 0.0) {
        return Err(ModelError::numerical(
            format!("degenerate sample for {}", what),
            "kernel density",
        ));
    }
    let norm = 1.0 / ((values.len() as f64) * h * (2.0 * std::f64::consts::PI).sqrt());
    Ok(norm * values.iter().map(|v| (-0.5 * ((x - v) / h).powi(2)).exp()).sum::<f64>())
}
