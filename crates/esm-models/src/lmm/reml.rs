//! REML criterion for grouped designs
//!
//! The marginal covariance of subject `i` is `σ² V_i` with
//!
//! ```text
//! V_i = I + Z_i Λ Λᵀ Z_iᵀ + t² N_i N_iᵀ
//! ```
//!
//! where `Λ` is the lower-triangular relative covariance factor of the
//! subject-level random effects, `N_i` the indicator matrix of the nested
//! level and `t` the nested SD relative to `σ`. The parameter vector `θ` holds
//! the lower triangle of `Λ` column by column, followed by `t` when the design
//! is nested. Diagonal entries and `t` are bounded below by zero.

use ndarray::{Array1, Array2};
use ndarray_linalg::{Cholesky, Inverse, Solve, UPLO};

use crate::base::{ModelError, Result};
use crate::design::GroupedDesign;

/// Pieces of the REML criterion at one `θ`
#[derive(Debug, Clone)]
pub struct RemlTerms {
    /// `Σ log|V_i|`
    pub logdet_v: f64,
    /// `XᵀV⁻¹X`
    pub xtwx: Array2<f64>,
    /// `(XᵀV⁻¹X)⁻¹`
    pub xtwx_inv: Array2<f64>,
    /// GLS estimate of the fixed effects
    pub beta: Array1<f64>,
    /// Weighted residual sum of squares
    pub rss: f64,
}

impl RemlTerms {
    /// `log|XᵀV⁻¹X|`
    fn logdet_xtwx(&self) -> Result<f64> {
        logdet_pd(&self.xtwx, "logdet XtWX")
    }
}

/// REML objective of one design
#[derive(Debug, Clone, Copy)]
pub struct RemlProblem<'a> {
    design: &'a GroupedDesign,
}

impl<'a> RemlProblem<'a> {
    pub fn new(design: &'a GroupedDesign) -> Self {
        Self { design }
    }

    pub fn design(&self) -> &GroupedDesign {
        self.design
    }

    /// Entries of `Λ` in `θ`
    pub fn n_lambda(&self) -> usize {
        let q = self.design.n_random();
        q * (q + 1) / 2
    }

    /// Length of `θ`
    pub fn n_theta(&self) -> usize {
        self.n_lambda() + usize::from(self.design.has_nested())
    }

    /// Residual degrees of freedom `n - p`
    pub fn df_residual(&self) -> usize {
        self.design.n_obs() - self.design.n_fixed()
    }

    /// Lower bounds of `θ`
    pub fn lower_bounds(&self) -> Vec<f64> {
        let q = self.design.n_random();
        let mut lower = Vec::with_capacity(self.n_theta());
        for col in 0..q {
            for row in col..q {
                lower.push(if row == col { 0.0 } else { f64::NEG_INFINITY });
            }
        }
        if self.design.has_nested() {
            lower.push(0.0);
        }
        lower
    }

    /// Starting point: `Λ = I`, `t = 1`
    pub fn initial(&self) -> Vec<f64> {
        let q = self.design.n_random();
        let mut theta = Vec::with_capacity(self.n_theta());
        for col in 0..q {
            for row in col..q {
                theta.push(if row == col { 1.0 } else { 0.0 });
            }
        }
        if self.design.has_nested() {
            theta.push(1.0);
        }
        theta
    }

    /// `Λ` from `θ`
    pub fn lambda(&self, theta: &[f64]) -> Array2<f64> {
        let q = self.design.n_random();
        let mut lambda = Array2::zeros((q, q));
        let mut idx = 0;
        for col in 0..q {
            for row in col..q {
                lambda[[row, col]] = theta[idx];
                idx += 1;
            }
        }
        lambda
    }

    /// Nested SD relative to the residual SD
    pub fn nested_ratio(&self, theta: &[f64]) -> Option<f64> {
        self.design
            .has_nested()
            .then(|| theta[self.n_lambda()])
    }

    /// Accumulate the criterion terms at `θ`
    pub fn terms(&self, theta: &[f64]) -> Result<RemlTerms> {
        let p = self.design.n_fixed();
        let lambda = self.lambda(theta);
        let relative_cov = lambda.dot(&lambda.t());
        let t2 = self.nested_ratio(theta).map_or(0.0, |t| t * t);

        let mut logdet_v = 0.0;
        let mut xtwx = Array2::<f64>::zeros((p, p));
        let mut xtwy = Array1::<f64>::zeros(p);
        let mut ytwy = 0.0;

        for group in self.design.groups() {
            let n_i = group.len();
            let mut v = group.z.dot(&relative_cov).dot(&group.z.t());
            for j in 0..n_i {
                v[[j, j]] += 1.0;
                if group.n_nested > 0 {
                    for k in 0..n_i {
                        if group.nested[j] == group.nested[k] {
                            v[[j, k]] += t2;
                        }
                    }
                }
            }

            logdet_v += logdet_pd(&v, "logdet V")?;
            let w = v
                .inv()
                .map_err(|e| ModelError::numerical(e, "invert V"))?;
            let wx = w.dot(&group.x);
            let wy = w.dot(&group.y);
            xtwx = xtwx + group.x.t().dot(&wx);
            xtwy = xtwy + group.x.t().dot(&wy);
            ytwy += group.y.dot(&wy);
        }

        let beta = xtwx
            .solve(&xtwy)
            .map_err(|e| ModelError::numerical(e, "solve XtWX"))?;
        let xtwx_inv = xtwx
            .inv()
            .map_err(|e| ModelError::numerical(e, "invert XtWX"))?;
        let rss = ytwy - beta.dot(&xtwy);

        if !rss.is_finite() || rss <= 0.0 {
            return Err(ModelError::numerical(
                format!("weighted residual sum of squares is {}", rss),
                "reml",
            ));
        }

        Ok(RemlTerms {
            logdet_v,
            xtwx,
            xtwx_inv,
            beta,
            rss,
        })
    }

    /// REML criterion with `σ` profiled out; `+inf` where undefined
    pub fn profiled_deviance(&self, theta: &[f64]) -> f64 {
        match self.terms(theta).and_then(|t| self.profiled_from(&t)) {
            Ok(d) => d,
            Err(_) => f64::INFINITY,
        }
    }

    /// Profiled criterion from precomputed terms
    pub fn profiled_from(&self, terms: &RemlTerms) -> Result<f64> {
        let dof = self.df_residual() as f64;
        let sigma2 = terms.rss / dof;
        Ok(terms.logdet_v
            + terms.logdet_xtwx()?
            + dof * (1.0 + (2.0 * std::f64::consts::PI * sigma2).ln()))
    }

    /// REML criterion at `θ` and an explicit `σ`
    pub fn deviance(&self, theta: &[f64], sigma: f64) -> Result<f64> {
        let terms = self.terms(theta)?;
        let dof = self.df_residual() as f64;
        let sigma2 = sigma * sigma;
        Ok(terms.logdet_v
            + terms.logdet_xtwx()?
            + dof * (2.0 * std::f64::consts::PI * sigma2).ln()
            + terms.rss / sigma2)
    }

    /// REML estimate of `σ` at `θ`
    pub fn sigma(&self, terms: &RemlTerms) -> f64 {
        (terms.rss / self.df_residual() as f64).sqrt()
    }
}

/// `log|A|` of a positive-definite matrix via its Cholesky factor
pub(crate) fn logdet_pd(a: &Array2<f64>, operation: &str) -> Result<f64> {
    let l = a
        .cholesky(UPLO::Lower)
        .map_err(|e| ModelError::numerical(e, operation))?;
    Ok(2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>())
}
