//! Satterthwaite degrees of freedom for fixed effects
//!
//! For coefficient `j` the sampling variance is `C_j(φ) = σ² [(XᵀV⁻¹X)⁻¹]_jj`
//! with `φ = (θ, σ)`. The approximation is
//!
//! ```text
//! df_j = 2 C_j² / (∇C_jᵀ A ∇C_j),   A = 2 H⁻¹
//! ```
//!
//! where `H` is the Hessian of the REML deviance in `φ`. Derivatives in `θ`
//! are central differences; the derivative in `σ` is exact.

use ndarray::{Array1, Array2};
use ndarray_linalg::Inverse;

use super::reml::RemlProblem;
use crate::base::{ModelError, Result};

const HESSIAN_STEP: f64 = 1e-3;
const GRADIENT_STEP: f64 = 1e-5;

fn step(value: f64, relative: f64) -> f64 {
    relative * value.abs().max(0.1)
}

/// `C_j` for every coefficient at `(θ, σ)`
fn coefficient_variances(
    problem: &RemlProblem<'_>,
    theta: &[f64],
    sigma: f64,
) -> Result<Array1<f64>> {
    let terms = problem.terms(theta)?;
    Ok(terms.xtwx_inv.diag().mapv(|v| v * sigma * sigma))
}

/// Numeric Hessian of the REML deviance at `φ = (θ, σ)`
pub fn deviance_hessian(
    problem: &RemlProblem<'_>,
    theta: &[f64],
    sigma: f64,
) -> Result<Array2<f64>> {
    let mut phi: Vec<f64> = theta.to_vec();
    phi.push(sigma);
    let m = phi.len();
    let f = |point: &[f64]| -> Result<f64> {
        let (theta, sigma) = point.split_at(m - 1);
        problem.deviance(theta, sigma[0])
    };

    let h: Vec<f64> = phi.iter().map(|&v| step(v, HESSIAN_STEP)).collect();
    let f0 = f(&phi[..])?;
    let mut hessian = Array2::zeros((m, m));

    for i in 0..m {
        let mut plus = phi.clone();
        let mut minus = phi.clone();
        plus[i] += h[i];
        minus[i] -= h[i];
        hessian[[i, i]] = (f(&plus[..])? - 2.0 * f0 + f(&minus[..])?) / (h[i] * h[i]);

        for j in (i + 1)..m {
            let mut pp = phi.clone();
            let mut pm = phi.clone();
            let mut mp = phi.clone();
            let mut mm = phi.clone();
            pp[i] += h[i];
            pp[j] += h[j];
            pm[i] += h[i];
            pm[j] -= h[j];
            mp[i] -= h[i];
            mp[j] += h[j];
            mm[i] -= h[i];
            mm[j] -= h[j];
            let value =
                (f(&pp[..])? - f(&pm[..])? - f(&mp[..])? + f(&mm[..])?) / (4.0 * h[i] * h[j]);
            hessian[[i, j]] = value;
            hessian[[j, i]] = value;
        }
    }

    Ok(hessian)
}

/// Satterthwaite df per coefficient, `fallback` where the approximation fails
pub fn satterthwaite_df(
    problem: &RemlProblem<'_>,
    theta: &[f64],
    sigma: f64,
    fallback: f64,
) -> Result<Array1<f64>> {
    let p = problem.design().n_fixed();
    let n_theta = theta.len();

    let hessian = deviance_hessian(problem, theta, sigma)?;
    let covariance = match hessian.inv() {
        Ok(inv) => inv * 2.0,
        Err(e) => {
            tracing::warn!(error = %e, "deviance Hessian is singular; using residual df");
            return Ok(Array1::from_elem(p, fallback));
        }
    };

    let base = coefficient_variances(problem, theta, sigma)?;

    // Jacobian of C with respect to φ, one row per coefficient
    let mut jacobian = Array2::zeros((p, n_theta + 1));
    for k in 0..n_theta {
        let h = step(theta[k], GRADIENT_STEP);
        let mut plus = theta.to_vec();
        let mut minus = theta.to_vec();
        plus[k] += h;
        minus[k] -= h;
        let diff = (coefficient_variances(problem, &plus, sigma)?
            - coefficient_variances(problem, &minus, sigma)?)
            / (2.0 * h);
        jacobian.column_mut(k).assign(&diff);
    }
    let d_sigma = base.mapv(|c| 2.0 * c / sigma);
    jacobian.column_mut(n_theta).assign(&d_sigma);

    let df = Array1::from_iter((0..p).map(|j| {
        let g = jacobian.row(j);
        let denom = g.dot(&covariance.dot(&g));
        let df = 2.0 * base[j] * base[j] / denom;
        if df.is_finite() && df > 0.0 {
            df
        } else {
            fallback
        }
    }));

    if df.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::numerical("non-finite degrees of freedom", "satterthwaite"));
    }

    Ok(df)
}
