//! Parallel fitting and testing of the analysis plan
//!
//! Each model is prepared once; every (model, variant) pair then becomes an
//! independent rayon task reading the shared prepared dataset. Errors stay
//! inside their unit and surface as failed rows.

use rayon::prelude::*;

use esm_core::DataFrame;
use esm_models::{
    BayesianEstimator, BayesianFit, DataPreparer, FrequentistEstimator, FrequentistFit,
    HypothesisEngine, ModelError, PreparedDataset,
};

use crate::config::RunConfig;
use crate::plan::{AnalysisPlan, HypothesisTest, PlannedHypothesis, PlannedModel, Variant};
use crate::results::{HypothesisResult, ResultsAggregator, ResultsTable, TestOutcome};

/// A fitted model under one estimator variant
#[derive(Debug, Clone)]
pub enum Fit {
    Frequentist(FrequentistFit),
    Bayesian(BayesianFit),
}

/// Outcome of one (model, variant) unit
#[derive(Debug, Clone)]
pub struct FitUnit {
    pub model: usize,
    pub variant: Variant,
    pub fit: std::result::Result<Fit, String>,
}

/// Runs an [`AnalysisPlan`] under a [`RunConfig`]
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: RunConfig,
    plan: AnalysisPlan,
}

impl Pipeline {
    pub fn new(config: RunConfig, plan: AnalysisPlan) -> Self {
        Self { config, plan }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn plan(&self) -> &AnalysisPlan {
        &self.plan
    }

    /// Fit, test and tabulate
    pub fn run(&self, raw: &DataFrame) -> ResultsTable {
        let fits = self.fit_all(raw);
        let results = self.test_all(&fits);
        ResultsAggregator::new(&self.plan).assemble(results)
    }

    fn units(&self) -> Vec<(&PlannedModel, Variant)> {
        self.plan
            .models()
            .iter()
            .flat_map(|model| model.variants().map(move |variant| (model, variant)))
            .filter(|(_, variant)| !(self.config.frequentist_only && variant.is_bayesian()))
            .collect()
    }

    /// Fit every (model, variant) pair of the plan
    pub fn fit_all(&self, raw: &DataFrame) -> Vec<FitUnit> {
        let preparer = DataPreparer::new(self.config.columns.clone());
        let prepared: Vec<(usize, Result<PreparedDataset, String>)> = self
            .plan
            .models()
            .par_iter()
            .map(|model| {
                let data = preparer.prepare(raw, &model.spec).map_err(|e| {
                    tracing::warn!(
                        model = model.spec.name(),
                        error = %e,
                        "data preparation failed"
                    );
                    e.to_string()
                });
                (model.index, data)
            })
            .collect();

        let units = self.units();
        tracing::info!(models = prepared.len(), units = units.len(), "fitting models");

        units
            .into_par_iter()
            .map(|(model, variant)| {
                let data = prepared
                    .iter()
                    .find(|(index, _)| *index == model.index)
                    .map(|(_, data)| data);
                let fit = match data {
                    Some(Ok(data)) => self.fit_one(model, variant, data).map_err(|e| {
                        tracing::warn!(
                            model = model.spec.name(),
                            variant = %variant,
                            error = %e,
                            "fit failed"
                        );
                        e.to_string()
                    }),
                    Some(Err(message)) => Err(message.clone()),
                    None => Err(format!("model {} was not prepared", model.index)),
                };
                FitUnit {
                    model: model.index,
                    variant,
                    fit,
                }
            })
            .collect()
    }

    fn fit_one(
        &self,
        model: &PlannedModel,
        variant: Variant,
        data: &PreparedDataset,
    ) -> Result<Fit, ModelError> {
        match model.prior_set(variant) {
            None => FrequentistEstimator::new(self.config.optimizer.clone())
                .fit(&model.spec, data)
                .map(Fit::Frequentist),
            Some(priors) => BayesianEstimator::new(self.config.sampler.clone())
                .fit(&model.spec, data, priors)
                .map(Fit::Bayesian),
        }
    }

    /// Evaluate every applicable (hypothesis, variant) pair on the fits
    pub fn test_all(&self, fits: &[FitUnit]) -> Vec<HypothesisResult> {
        let engine = HypothesisEngine::new();
        let mut results = Vec::new();
        for hypothesis in self.plan.hypotheses() {
            let Some(model) = self.plan.model(hypothesis.model) else {
                continue;
            };
            for variant in Variant::ALL {
                if !hypothesis.applies_to(variant, model) {
                    continue;
                }
                let Some(unit) = fits
                    .iter()
                    .find(|u| u.model == hypothesis.model && u.variant == variant)
                else {
                    continue;
                };
                let result = match &unit.fit {
                    Ok(fit) => match test_one(&engine, hypothesis, fit) {
                        Ok(outcome) => HypothesisResult::ok(hypothesis.id, variant, outcome),
                        Err(e) => {
                            tracing::warn!(
                                hypothesis = hypothesis.id,
                                variant = %variant,
                                error = %e,
                                "test failed"
                            );
                            HypothesisResult::failed(hypothesis.id, variant, e)
                        }
                    },
                    Err(message) => HypothesisResult::failed(hypothesis.id, variant, message),
                };
                results.push(result);
            }
        }
        results
    }
}

fn test_one(
    engine: &HypothesisEngine,
    hypothesis: &PlannedHypothesis,
    fit: &Fit,
) -> Result<TestOutcome, ModelError> {
    match (&hypothesis.test, fit) {
        (HypothesisTest::FixedEffect(h), Fit::Frequentist(fit)) => {
            engine.test_fixed_effect(fit, h).map(TestOutcome::Frequentist)
        }
        (HypothesisTest::RandomSlope { covariate }, Fit::Frequentist(fit)) => {
            engine.test_random_effect(fit, covariate).map(TestOutcome::Frequentist)
        }
        (HypothesisTest::FixedEffect(h), Fit::Bayesian(fit)) => {
            engine.test_bayesian(fit, h).map(TestOutcome::Bayesian)
        }
        (HypothesisTest::RandomSlope { covariate }, Fit::Bayesian(_)) => {
            Err(ModelError::InvalidConfig {
                message: format!("random slope '{}' is tested by LR test only", covariate),
            })
        }
    }
}
