//! Bayesian linear mixed models fitted by NUTS
//!
//! [`BayesianEstimator::fit`] samples the posterior of the non-centred model
//! in [`model`] under a [`PriorSet`]. Chains run in parallel, each seeded
//! `seed + chain`, and every draw (warmup included) of the fixed effects,
//! random-effect SDs and correlations, nested SD and residual SD is kept.
//! Summaries use post-warmup draws only.

pub mod adaptation;
pub mod fit;
pub(crate) mod model;
pub mod nuts;
pub mod prior;


pub use fit::{BayesianFit, ChainDraws, ChainStats, ParameterSummary, PosteriorDraws, quantile};
pub use prior::{Prior, PriorSet};

use indexmap::IndexMap;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::base::{ModelError, Result};
use crate::design::GroupedDesign;
use crate::prepare::PreparedDataset;
use crate::spec::ModelSpec;
use model::PosteriorModel;
use nuts::{Adaptation, Sampler, Target};

/// Attempts at drawing a starting point with finite density
const INIT_ATTEMPTS: usize = 100;

/// Half-width of the uniform initialization box on the unconstrained scale
const INIT_RADIUS: f64 = 2.0;

/// Sampler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Independent chains
    pub chains: usize,
    /// Adaptation draws at the head of each chain
    pub warmup: usize,
    /// Draws per chain, warmup included
    pub iterations: usize,
    /// Target mean acceptance statistic for step-size adaptation
    pub target_accept: f64,
    /// Maximum trajectory doublings
    pub max_tree_depth: usize,
    /// Base seed; chain `c` uses `seed + c`
    pub seed: u64,
    /// Keep prior draws of every fixed effect
    pub sample_prior: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            chains: 4,
            warmup: 1000,
            iterations: 2000,
            target_accept: 0.8,
            max_tree_depth: 10,
            seed: 20240417,
            sample_prior: true,
        }
    }
}

impl SamplerConfig {
    /// Check bounds on every field
    pub fn validate(&self) -> Result<()> {
        if self.chains == 0 {
            return Err(ModelError::invalid_config("chains must be at least 1"));
        }
        if self.iterations <= self.warmup {
            return Err(ModelError::invalid_config(format!(
                "iterations ({}) must exceed warmup ({})",
                self.iterations, self.warmup
            )));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(ModelError::invalid_config(format!(
                "target_accept must lie in (0, 1), got {}",
                self.target_accept
            )));
        }
        if self.max_tree_depth == 0 {
            return Err(ModelError::invalid_config("max_tree_depth must be at least 1"));
        }
        Ok(())
    }

    /// Post-warmup draws per chain
    pub fn retained(&self) -> usize {
        self.iterations - self.warmup
    }
}

/// NUTS estimator for linear mixed models
#[derive(Debug, Clone, Default)]
pub struct BayesianEstimator {
    config: SamplerConfig,
}

impl BayesianEstimator {
    /// Create an estimator with the given sampler settings
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    /// Sampler settings
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Sample the posterior of `spec` under `priors`
    pub fn fit(
        &self,
        spec: &ModelSpec,
        data: &PreparedDataset,
        priors: &PriorSet,
    ) -> Result<BayesianFit> {
        self.config.validate()?;
        priors.validate()?;

        let design = GroupedDesign::build(spec, data.frame())?;
        let model = PosteriorModel::new(&design, priors);
        let names = model.output_names();

        tracing::info!(
            model = spec.name(),
            priors = priors.name(),
            chains = self.config.chains,
            iterations = self.config.iterations,
            "sampling posterior"
        );

        let chains: Vec<ChainDraws> = (0..self.config.chains)
            .into_par_iter()
            .map(|chain| self.run_chain(spec.name(), &model, chain))
            .collect::<Result<Vec<_>>>()?;

        if chains.iter().all(|c| is_constant(&c.draws, self.config.warmup)) {
            return Err(ModelError::SamplerFailure {
                model: spec.name().to_string(),
                message: "every chain produced constant output".to_string(),
            });
        }

        let divergences: usize = chains.iter().map(|c| c.stats.divergences).sum();
        if divergences > 0 {
            tracing::warn!(
                model = spec.name(),
                priors = priors.name(),
                divergences,
                "divergent transitions after warmup"
            );
        }

        let prior_draws = if self.config.sample_prior {
            self.sample_prior(design.coefficient_names(), priors)?
        } else {
            IndexMap::new()
        };

        let draws = PosteriorDraws::new(names, self.config.warmup, chains, prior_draws);
        BayesianFit::from_draws(
            spec,
            priors.name(),
            design.coefficient_names(),
            draws,
            design.n_obs(),
            design.n_groups(),
        )
    }

    /// Independent prior draws for each coefficient, one per retained posterior draw
    pub fn sample_prior(
        &self,
        coefficients: &[String],
        priors: &PriorSet,
    ) -> Result<IndexMap<String, Vec<f64>>> {
        let n = self.config.chains * self.config.retained();
        let seed = self.config.seed.wrapping_add(self.config.chains as u64);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut draws = IndexMap::new();
        for name in coefficients {
            let prior = priors.get(name);
            let values = (0..n)
                .map(|_| prior.sample(&mut rng))
                .collect::<Result<Vec<f64>>>()?;
            draws.insert(name.clone(), values);
        }
        Ok(draws)
    }

    fn run_chain(
        &self,
        model_name: &str,
        model: &PosteriorModel<'_>,
        chain: usize,
    ) -> Result<ChainDraws> {
        let config = &self.config;
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(chain as u64));
        let dim = model.dim();

        let mut sampler = None;
        for _ in 0..INIT_ATTEMPTS {
            let position: Array1<f64> = (0..dim)
                .map(|_| rng.random_range(-INIT_RADIUS..INIT_RADIUS))
                .collect();
            if let Some(s) = Sampler::new(model, position, config.max_tree_depth) {
                sampler = Some(s);
                break;
            }
        }
        let mut sampler = sampler.ok_or_else(|| ModelError::SamplerFailure {
            model: model_name.to_string(),
            message: format!(
                "no finite log density after {} initializations (chain {})",
                INIT_ATTEMPTS, chain
            ),
        })?;

        sampler.find_reasonable_step(&mut rng);
        let mut adaptation =
            Adaptation::new(dim, config.warmup, config.target_accept, sampler.step_size());

        let names_len = model.output_names().len();
        let mut draws = Array2::zeros((config.iterations, names_len));
        let mut stats = ChainStats::default();
        let mut depth_sum = 0.0;
        let mut accept_sum = 0.0;

        for iteration in 0..config.iterations {
            let transition = sampler.transition(&mut rng);
            if iteration < config.warmup {
                adaptation.adapt(&mut sampler, &transition, &mut rng);
                if iteration + 1 == config.warmup {
                    sampler.set_step_size(adaptation.step.final_step());
                }
            } else {
                stats.divergences += usize::from(transition.divergent);
                depth_sum += transition.tree_depth as f64;
                accept_sum += transition.accept_stat;
            }
            let generated = model.generated(sampler.position());
            draws.row_mut(iteration).assign(&Array1::from(generated));
        }

        let retained = config.retained() as f64;
        stats.step_size = sampler.step_size();
        stats.mean_tree_depth = depth_sum / retained;
        stats.mean_accept_stat = accept_sum / retained;

        tracing::debug!(
            model = model_name,
            chain,
            step_size = stats.step_size,
            divergences = stats.divergences,
            mean_tree_depth = stats.mean_tree_depth,
            "chain finished"
        );

        Ok(ChainDraws {
            chain,
            draws,
            stats,
        })
    }
}

/// Whether every retained draw equals the first; needs two retained draws
fn is_constant(draws: &Array2<f64>, warmup: usize) -> bool {
    let rows = draws.nrows();
    if rows < warmup + 2 {
        return false;
    }
    let first = draws.row(warmup);
    (warmup + 1..rows).all(|r| draws.row(r) == first)
}
