//! Posterior draws and the fitted Bayesian model

use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayView1, s};
use serde::Serialize;
use std::fmt;

use crate::base::{
    Coefficient, ComponentKind, FitResult, ModelError, ModelStatistics, ModelType, Result,
    VarianceComponent,
};
use crate::spec::{INTERCEPT, ModelSpec};

/// Sampler diagnostics of one chain, over post-warmup transitions
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChainStats {
    /// Divergent transitions
    pub divergences: usize,
    /// Adapted step size
    pub step_size: f64,
    /// Mean tree depth
    pub mean_tree_depth: f64,
    /// Mean acceptance statistic
    pub mean_accept_stat: f64,
}

/// All draws of one chain, warmup included
#[derive(Debug, Clone)]
pub struct ChainDraws {
    /// Chain index
    pub chain: usize,
    /// `iterations × parameters`, in iteration order
    pub draws: Array2<f64>,
    /// Diagnostics
    pub stats: ChainStats,
}

/// Summary of one parameter over pooled post-warmup draws
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ParameterSummary {
    pub mean: f64,
    pub sd: f64,
    pub q025: f64,
    pub q50: f64,
    pub q975: f64,
}

/// Linear-interpolation quantile of sorted values
pub(crate) fn quantile_sorted(sorted: &[f64], prob: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let h = (sorted.len() - 1) as f64 * prob.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Quantile of unsorted values
pub fn quantile(values: &[f64], prob: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile_sorted(&sorted, prob)
}

pub(crate) fn mean_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
    (mean, var.sqrt())
}

/// Raw sampler output of a Bayesian fit
#[derive(Debug, Clone)]
pub struct PosteriorDraws {
    parameter_names: Vec<String>,
    warmup: usize,
    chains: Vec<ChainDraws>,
    prior: IndexMap<String, Vec<f64>>,
}

impl PosteriorDraws {
    pub(crate) fn new(
        parameter_names: Vec<String>,
        warmup: usize,
        chains: Vec<ChainDraws>,
        prior: IndexMap<String, Vec<f64>>,
    ) -> Self {
        Self {
            parameter_names,
            warmup,
            chains,
            prior,
        }
    }

    /// Stored parameter names
    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    /// Warmup draws at the head of each chain
    pub fn warmup(&self) -> usize {
        self.warmup
    }

    /// Draws per chain, warmup included
    pub fn iterations(&self) -> usize {
        self.chains.first().map_or(0, |c| c.draws.nrows())
    }

    /// Number of chains
    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    /// Per-chain output
    pub fn chains(&self) -> &[ChainDraws] {
        &self.chains
    }

    fn index(&self, name: &str) -> Result<usize> {
        self.parameter_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ModelError::UnknownParameter {
                name: name.to_string(),
            })
    }

    /// All draws of `name` in one chain, warmup included
    pub fn raw(&self, name: &str, chain: usize) -> Result<ArrayView1<'_, f64>> {
        let k = self.index(name)?;
        let chain = self
            .chains
            .get(chain)
            .ok_or_else(|| ModelError::UnknownParameter {
                name: format!("chain {}", chain),
            })?;
        Ok(chain.draws.column(k))
    }

    /// Post-warmup draws of `name`, chains concatenated in order
    pub fn pooled(&self, name: &str) -> Result<Array1<f64>> {
        let k = self.index(name)?;
        let mut values = Vec::with_capacity(self.n_chains() * (self.iterations() - self.warmup));
        for chain in &self.chains {
            values.extend(chain.draws.slice(s![self.warmup.., k]).iter().copied());
        }
        Ok(Array1::from(values))
    }

    /// Prior draws of a fixed-effect coefficient, if they were kept
    pub fn prior(&self, name: &str) -> Option<&[f64]> {
        self.prior.get(name).map(Vec::as_slice)
    }

    /// Whether prior draws were kept
    pub fn has_prior(&self) -> bool {
        !self.prior.is_empty()
    }

    /// Posterior mean, SD and quantiles of `name`
    pub fn summary(&self, name: &str) -> Result<ParameterSummary> {
        let draws = self.pooled(name)?.to_vec();
        let (mean, sd) = mean_sd(&draws);
        let mut sorted = draws;
        sorted.sort_by(f64::total_cmp);
        Ok(ParameterSummary {
            mean,
            sd,
            q025: quantile_sorted(&sorted, 0.025),
            q50: quantile_sorted(&sorted, 0.5),
            q975: quantile_sorted(&sorted, 0.975),
        })
    }

    /// Divergent transitions over all chains
    pub fn divergences(&self) -> usize {
        self.chains.iter().map(|c| c.stats.divergences).sum()
    }
}

/// NUTS fit of one linear mixed model under one prior set
#[derive(Debug, Clone)]
pub struct BayesianFit {
    pub(crate) spec: ModelSpec,
    pub(crate) prior_set: String,
    pub(crate) coefficients: Vec<Coefficient>,
    pub(crate) random_effects: Vec<VarianceComponent>,
    pub(crate) statistics: ModelStatistics,
    pub(crate) draws: PosteriorDraws,
    pub(crate) n_obs: usize,
    pub(crate) n_groups: usize,
}

impl BayesianFit {
    /// Summarize the draws into coefficient and variance tables
    pub(crate) fn from_draws(
        spec: &ModelSpec,
        prior_set: &str,
        coefficient_names: &[String],
        draws: PosteriorDraws,
        n_obs: usize,
        n_groups: usize,
    ) -> Result<Self> {
        let mut coefficients = Vec::with_capacity(coefficient_names.len());
        for name in coefficient_names {
            let summary = draws.summary(name)?;
            let mut coefficient = Coefficient::new(name.clone(), summary.mean)
                .with_std_error(summary.sd)
                .with_ci(summary.q025, summary.q975);
            if name == INTERCEPT {
                coefficient = coefficient.as_intercept();
            }
            coefficients.push(coefficient);
        }

        let mut random_effects = Vec::new();
        for name in draws.parameter_names() {
            let Some((kind, group, term)) = parse_component(name) else {
                continue;
            };
            let summary = draws.summary(name)?;
            random_effects.push(
                VarianceComponent::new(group, term, kind, summary.mean).with_std_error(summary.sd),
            );
        }

        let sigma = draws.summary("sigma")?.mean;
        let statistics = ModelStatistics {
            residual_std_error: Some(sigma),
            iterations: Some(draws.iterations()),
            divergences: Some(draws.divergences()),
            ..Default::default()
        };

        Ok(Self {
            spec: spec.clone(),
            prior_set: prior_set.to_string(),
            coefficients,
            random_effects,
            statistics,
            draws,
            n_obs,
            n_groups,
        })
    }

    /// Name of the prior set the model was fitted under
    pub fn prior_set(&self) -> &str {
        &self.prior_set
    }

    /// Sampler output
    pub fn posterior(&self) -> &PosteriorDraws {
        &self.draws
    }
}

/// Split `sd(group:term)`, `cor(group:a,b)` and `sigma` into table fields
fn parse_component(name: &str) -> Option<(ComponentKind, String, String)> {
    if name == "sigma" {
        return Some((ComponentKind::Residual, "Residual".into(), "Residual".into()));
    }
    let (kind, inner) = if let Some(rest) = name.strip_prefix("sd(") {
        (ComponentKind::StdDev, rest)
    } else if let Some(rest) = name.strip_prefix("cor(") {
        (ComponentKind::Correlation, rest)
    } else {
        return None;
    };
    let inner = inner.strip_suffix(')')?;
    let (group, term) = inner.rsplit_once(':')?;
    Some((kind, group.to_string(), term.to_string()))
}

impl FitResult for BayesianFit {
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
        ModelType::BayesianLinearMixedModel
    }

    fn draws(&self) -> Option<&PosteriorDraws> {
        Some(&self.draws)
    }
}

impl fmt::Display for BayesianFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Prior set: {}", self.prior_set)?;
        writeln!(
            f,
            "Draws: {} chains x {} iterations ({} warmup)",
            self.draws.n_chains(),
            self.draws.iterations(),
            self.draws.warmup()
        )?;
        write!(f, "{}", self.summary())
    }
}
