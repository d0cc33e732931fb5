//! Linear mixed models fitted by restricted maximum likelihood
//!
//! [`FrequentistEstimator::fit`] minimizes the profiled REML criterion over
//! the relative covariance parameters with a bounded derivative-free
//! optimizer, then reports:
//! - fixed effects with Satterthwaite degrees of freedom and two-sided p-values
//! - random-effect SDs and correlations, nested SD and residual SD
//! - one likelihood-ratio test per removable random term

pub mod optimizer;
pub mod reml;
pub mod result;
pub mod satterthwaite;

#[cfg(test)]
mod tests;

pub use optimizer::{OptimizerConfig, OptimizerMethod};
pub use result::{FrequentistFit, LrTest};

use ndarray::Array1;
use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};

use crate::base::{
    Coefficient, ComponentKind, ModelError, ModelStatistics, Result, VarianceComponent,
};
use crate::design::{GroupedDesign, RandomTerm};
use crate::prepare::PreparedDataset;
use crate::spec::{INTERCEPT, ModelSpec};
use optimizer::{OptimResult, minimize};
use reml::RemlProblem;

/// Tolerance on the scaled gradient used by the optional convergence check
const GRADIENT_TOL: f64 = 2e-3;

/// REML estimator for linear mixed models
#[derive(Debug, Clone, Default)]
pub struct FrequentistEstimator {
    config: OptimizerConfig,
}

/// Optimum of one REML problem
struct RemlOptimum {
    theta: Vec<f64>,
    deviance: f64,
    iterations: usize,
}

impl FrequentistEstimator {
    /// Create an estimator with the given optimizer settings
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Optimizer settings
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Fit `spec` to a prepared dataset
    pub fn fit(&self, spec: &ModelSpec, data: &PreparedDataset) -> Result<FrequentistFit> {
        let design = GroupedDesign::build(spec, data.frame())?;
        let problem = RemlProblem::new(&design);

        let optimum = self.optimize(spec.name(), &problem)?;
        let terms = problem.terms(&optimum.theta)?;
        let sigma = problem.sigma(&terms);
        let df_residual = problem.df_residual();

        let mut converged = true;
        if self.config.check_convergence {
            let gradient = scaled_gradient(&problem, &optimum.theta);
            if gradient > GRADIENT_TOL {
                tracing::warn!(
                    model = spec.name(),
                    gradient,
                    tolerance = GRADIENT_TOL,
                    "REML optimum failed the gradient check"
                );
                converged = false;
            }
        }

        let df = satterthwaite::satterthwaite_df(
            &problem,
            &optimum.theta,
            sigma,
            df_residual as f64,
        )?;

        let mut coefficients = Vec::with_capacity(design.n_fixed());
        for (j, name) in design.coefficient_names().iter().enumerate() {
            let estimate = terms.beta[j];
            let se = (sigma * sigma * terms.xtwx_inv[[j, j]]).sqrt();
            let t_stat = estimate / se;
            let dist = StudentsT::new(0.0, 1.0, df[j])
                .map_err(|e| ModelError::numerical(e, "t distribution"))?;
            let p_value = 2.0 * (1.0 - dist.cdf(t_stat.abs()));
            let t_crit = dist.inverse_cdf(0.975);

            let mut coefficient = Coefficient::new(name.clone(), estimate)
                .with_std_error(se)
                .with_t_stat(t_stat)
                .with_df(df[j])
                .with_p_value(p_value)
                .with_ci(estimate - t_crit * se, estimate + t_crit * se);
            if name == INTERCEPT {
                coefficient = coefficient.as_intercept();
            }
            coefficients.push(coefficient);
        }

        let random_effects = variance_components(&problem, &optimum.theta, sigma);
        let lr_tests = self.lr_tests(spec, &design, optimum.deviance, problem.n_theta());

        let n = design.n_obs() as f64;
        let k = (design.n_fixed() + problem.n_theta() + 1) as f64;
        let statistics = ModelStatistics {
            residual_std_error: Some(sigma),
            log_likelihood: Some(-optimum.deviance / 2.0),
            reml_criterion: Some(optimum.deviance),
            aic: Some(optimum.deviance + 2.0 * k),
            bic: Some(optimum.deviance + n.ln() * k),
            df_residual: Some(df_residual),
            n_variance_params: Some(problem.n_theta() + 1),
            iterations: Some(optimum.iterations),
            converged: Some(converged),
            divergences: None,
        };

        tracing::info!(
            model = spec.name(),
            reml = optimum.deviance,
            iterations = optimum.iterations,
            "REML fit complete"
        );

        Ok(FrequentistFit {
            spec: spec.clone(),
            coefficients,
            random_effects,
            lr_tests,
            statistics,
            theta: optimum.theta,
            sigma,
            n_obs: design.n_obs(),
            n_groups: design.n_groups(),
        })
    }

    fn optimize(&self, model: &str, problem: &RemlProblem<'_>) -> Result<RemlOptimum> {
        let OptimResult {
            x,
            fval,
            iterations,
            converged,
        } = minimize(
            |theta| problem.profiled_deviance(theta),
            &problem.initial(),
            &problem.lower_bounds(),
            &self.config,
        );

        if !converged {
            return Err(ModelError::NotConverged {
                model: model.to_string(),
                max_iter: self.config.max_iter,
            });
        }
        if !fval.is_finite() {
            return Err(ModelError::numerical(
                "REML criterion is not finite at the optimum",
                "reml",
            ));
        }

        tracing::debug!(model, iterations, deviance = fval, "optimizer finished");
        Ok(RemlOptimum {
            theta: x,
            deviance: fval,
            iterations,
        })
    }

    fn lr_tests(
        &self,
        spec: &ModelSpec,
        design: &GroupedDesign,
        full_deviance: f64,
        full_params: usize,
    ) -> Vec<LrTest> {
        design
            .removable_terms()
            .into_iter()
            .map(|term| {
                let group = match &term {
                    RandomTerm::Subject(_) => design.subject().to_string(),
                    RandomTerm::Nested => design.nested_label().unwrap_or_default().to_string(),
                };
                let outcome = design.without(&term).and_then(|reduced| {
                    let problem = RemlProblem::new(&reduced);
                    let n_params = problem.n_theta();
                    self.optimize(spec.name(), &problem)
                        .map(|optimum| (n_params, optimum.deviance))
                });

                match outcome {
                    Ok((n_params, deviance)) => {
                        let statistic = (deviance - full_deviance).max(0.0);
                        let df = full_params - n_params;
                        let p_value = ChiSquared::new(df as f64)
                            .map(|chi| 1.0 - chi.cdf(statistic))
                            .ok();
                        LrTest {
                            group,
                            term: term.to_string(),
                            n_params,
                            deviance: Some(deviance),
                            statistic: Some(statistic),
                            df,
                            p_value,
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            model = spec.name(),
                            term = %term,
                            error = %e,
                            "reduced model for LR test failed"
                        );
                        LrTest {
                            group,
                            term: term.to_string(),
                            n_params: 0,
                            deviance: None,
                            statistic: None,
                            df: 0,
                            p_value: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
            .collect()
    }
}

/// Largest absolute central-difference gradient of the profiled criterion
fn scaled_gradient(problem: &RemlProblem<'_>, theta: &[f64]) -> f64 {
    let h = 1e-5;
    let lower = problem.lower_bounds();
    let mut largest: f64 = 0.0;
    for k in 0..theta.len() {
        let mut plus = theta.to_vec();
        let mut minus = theta.to_vec();
        plus[k] += h;
        minus[k] -= h;
        // One-sided at an active bound
        let g = if minus[k] < lower[k] {
            (problem.profiled_deviance(&plus) - problem.profiled_deviance(theta)) / h
        } else {
            (problem.profiled_deviance(&plus) - problem.profiled_deviance(&minus)) / (2.0 * h)
        };
        let g = if theta[k] <= lower[k] { g.min(0.0) } else { g };
        largest = largest.max(g.abs());
    }
    largest
}

/// SDs and correlations from `Σ = σ² Λ Λᵀ`, then nested and residual SDs
fn variance_components(
    problem: &RemlProblem<'_>,
    theta: &[f64],
    sigma: f64,
) -> Vec<VarianceComponent> {
    let design = problem.design();
    let lambda = problem.lambda(theta);
    let covariance = lambda.dot(&lambda.t()) * (sigma * sigma);
    let sds: Array1<f64> = covariance.diag().mapv(f64::sqrt);
    let terms = design.random_terms();

    let mut components = Vec::new();
    for (k, term) in terms.iter().enumerate() {
        components.push(VarianceComponent::new(
            design.subject(),
            term.clone(),
            ComponentKind::StdDev,
            sds[k],
        ));
    }
    for a in 0..terms.len() {
        for b in (a + 1)..terms.len() {
            let denom = sds[a] * sds[b];
            let rho = if denom > 0.0 {
                covariance[[a, b]] / denom
            } else {
                f64::NAN
            };
            components.push(VarianceComponent::new(
                design.subject(),
                format!("{},{}", terms[a], terms[b]),
                ComponentKind::Correlation,
                rho,
            ));
        }
    }
    if let (Some(label), Some(t)) = (design.nested_label(), problem.nested_ratio(theta)) {
        components.push(VarianceComponent::new(
            label,
            INTERCEPT,
            ComponentKind::StdDev,
            sigma * t,
        ));
    }
    components.push(VarianceComponent::new(
        "Residual",
        "Residual",
        ComponentKind::Residual,
        sigma,
    ));
    components
}
