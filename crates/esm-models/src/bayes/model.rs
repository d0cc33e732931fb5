//! Log posterior of the non-centred linear mixed model
//!
//! Unconstrained parameter layout:
//!
//! | block            | size            | constrained value            |
//! |------------------|-----------------|------------------------------|
//! | `beta`           | p               | fixed effects                |
//! | `log_tau`        | q               | subject-level SDs            |
//! | `w`              | q(q-1)/2        | `tanh(w)`: canonical partial correlations |
//! | `log_sigma`      | 1               | residual SD                  |
//! | `log_tau_nested` | 0 or 1          | nested-level SD              |
//! | `z`              | G·q             | standardized subject effects |
//! | `z_nested`       | Σ levels        | standardized nested effects  |
//!
//! Subject effects are `b_i = diag(τ) L z_i`, with `L` the Cholesky factor
//! of the correlation matrix built from the partial correlations.

use ndarray::{Array1, Array2, s};

use super::nuts::Target;
use super::prior::{HalfPrior, Prior, PriorSet};
use crate::design::GroupedDesign;
use crate::spec::INTERCEPT;

/// LKJ shape on the random-effect correlation matrix
const LKJ_ETA: f64 = 1.0;

/// Offsets of each parameter block
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    pub p: usize,
    pub q: usize,
    pub n_cor: usize,
    pub n_groups: usize,
    pub has_nested: bool,
    /// Start of each subject's nested effects within `z_nested`
    pub nested_offsets: Vec<usize>,
    pub n_nested: usize,
}

impl Layout {
    fn new(design: &GroupedDesign) -> Self {
        let q = design.n_random();
        let mut nested_offsets = Vec::with_capacity(design.n_groups());
        let mut n_nested = 0;
        for group in design.groups() {
            nested_offsets.push(n_nested);
            n_nested += group.n_nested;
        }
        Self {
            p: design.n_fixed(),
            q,
            n_cor: q * q.saturating_sub(1) / 2,
            n_groups: design.n_groups(),
            has_nested: design.has_nested(),
            nested_offsets,
            n_nested,
        }
    }

    pub fn beta(&self) -> usize {
        0
    }
    pub fn log_tau(&self) -> usize {
        self.p
    }
    pub fn w(&self) -> usize {
        self.log_tau() + self.q
    }
    pub fn log_sigma(&self) -> usize {
        self.w() + self.n_cor
    }
    pub fn log_tau_nested(&self) -> usize {
        self.log_sigma() + 1
    }
    pub fn z(&self) -> usize {
        self.log_tau_nested() + usize::from(self.has_nested)
    }
    pub fn z_nested(&self) -> usize {
        self.z() + self.n_groups * self.q
    }
    pub fn dim(&self) -> usize {
        self.z_nested() + self.n_nested
    }
}

/// Cholesky factor of a correlation matrix from canonical partial correlations
///
/// Returns the factor and, per row, the running sums of squares `s_j` needed
/// by the log Jacobian and the backward pass.
pub(crate) fn cholesky_corr(cpc: &[f64], q: usize) -> (Array2<f64>, Vec<Vec<f64>>) {
    let mut l = Array2::zeros((q, q));
    let mut sums = Vec::with_capacity(q);
    if q == 0 {
        return (l, sums);
    }
    l[[0, 0]] = 1.0;
    sums.push(vec![0.0]);
    let mut k = 0;
    for i in 1..q {
        let mut row_sums = Vec::with_capacity(i + 1);
        let mut sum_sq: f64 = 0.0;
        for j in 0..i {
            row_sums.push(sum_sq);
            let value = cpc[k] * (1.0 - sum_sq).sqrt();
            l[[i, j]] = value;
            sum_sq += value * value;
            k += 1;
        }
        row_sums.push(sum_sq);
        l[[i, i]] = (1.0 - sum_sq).sqrt();
        sums.push(row_sums);
    }
    (l, sums)
}

/// Log posterior and gradient for one design and prior set
#[derive(Debug, Clone)]
pub(crate) struct PosteriorModel<'a> {
    design: &'a GroupedDesign,
    layout: Layout,
    coefficient_priors: Vec<Prior>,
    scale_prior: HalfPrior,
}

impl<'a> PosteriorModel<'a> {
    pub fn new(design: &'a GroupedDesign, priors: &PriorSet) -> Self {
        let coefficient_priors = design
            .coefficient_names()
            .iter()
            .map(|name| *priors.get(name))
            .collect();
        Self {
            design,
            layout: Layout::new(design),
            coefficient_priors,
            scale_prior: HalfPrior(Prior::weakly_informative()),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Names of the generated quantities stored per draw
    pub fn output_names(&self) -> Vec<String> {
        let design = self.design;
        let subject = design.subject();
        let terms = design.random_terms();
        let mut names: Vec<String> = design.coefficient_names().to_vec();
        for term in terms {
            names.push(format!("sd({}:{})", subject, term));
        }
        for a in 0..terms.len() {
            for b in (a + 1)..terms.len() {
                names.push(format!("cor({}:{},{})", subject, terms[a], terms[b]));
            }
        }
        if let Some(label) = design.nested_label() {
            names.push(format!("sd({}:{})", label, INTERCEPT));
        }
        names.push("sigma".to_string());
        names
    }

    /// Generated quantities at one unconstrained position
    pub fn generated(&self, position: &Array1<f64>) -> Vec<f64> {
        let lay = &self.layout;
        let mut out: Vec<f64> = position.slice(s![..lay.p]).to_vec();
        for k in 0..lay.q {
            out.push(position[lay.log_tau() + k].exp());
        }
        let cpc: Vec<f64> = position
            .slice(s![lay.w()..lay.w() + lay.n_cor])
            .iter()
            .map(|w| w.tanh())
            .collect();
        let (l, _) = cholesky_corr(&cpc, lay.q);
        let omega = l.dot(&l.t());
        for a in 0..lay.q {
            for b in (a + 1)..lay.q {
                out.push(omega[[a, b]]);
            }
        }
        if lay.has_nested {
            out.push(position[lay.log_tau_nested()].exp());
        }
        out.push(position[lay.log_sigma()].exp());
        out
    }
}

impl Target for PosteriorModel<'_> {
    fn dim(&self) -> usize {
        self.layout.dim()
    }

    fn log_density_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let lay = &self.layout;
        let (p, q) = (lay.p, lay.q);
        grad.fill(0.0);
        let mut lp = 0.0;

        let beta = position.slice(s![..p]);
        let tau: Array1<f64> = position.slice(s![lay.log_tau()..lay.log_tau() + q]).mapv(f64::exp);
        let cpc: Vec<f64> = position
            .slice(s![lay.w()..lay.w() + lay.n_cor])
            .iter()
            .map(|w| w.tanh())
            .collect();
        let (l, sums) = cholesky_corr(&cpc, q);
        let log_sigma = position[lay.log_sigma()];
        let sigma = log_sigma.exp();
        let inv_var = (-2.0 * log_sigma).exp();
        let tau_nested = lay
            .has_nested
            .then(|| position[lay.log_tau_nested()].exp());

        // Likelihood, accumulating adjoints of the linear predictor
        let mut grad_l = Array2::<f64>::zeros((q, q));
        let mut grad_tau = Array1::<f64>::zeros(q);
        let mut sum_sq = 0.0;
        let mut grad_tau_nested = 0.0;

        for (i, group) in self.design.groups().iter().enumerate() {
            let z_start = lay.z() + i * q;
            let z_i = position.slice(s![z_start..z_start + q]);
            let lz = l.dot(&z_i);
            let b_i = &tau * &lz;

            let mut mu = group.x.dot(&beta) + group.z.dot(&b_i);
            if let Some(tau_d) = tau_nested {
                let offset = lay.z_nested() + lay.nested_offsets[i];
                for (j, &level) in group.nested.iter().enumerate() {
                    mu[j] += tau_d * position[offset + level];
                }
            }

            let resid = &group.y - &mu;
            sum_sq += resid.dot(&resid);
            let d_mu = &resid * inv_var;

            // beta
            let g_beta = group.x.t().dot(&d_mu);
            grad.slice_mut(s![..p]).scaled_add(1.0, &g_beta);

            // subject effects
            let g_b = group.z.t().dot(&d_mu);
            let tau_g_b = &tau * &g_b;
            let g_z = l.t().dot(&tau_g_b);
            grad.slice_mut(s![z_start..z_start + q]).scaled_add(1.0, &g_z);
            grad_tau = grad_tau + &g_b * &lz;
            for a in 0..q {
                for b in 0..=a {
                    grad_l[[a, b]] += tau_g_b[a] * z_i[b];
                }
            }

            // nested effects
            if let Some(tau_d) = tau_nested {
                let offset = lay.z_nested() + lay.nested_offsets[i];
                for (j, &level) in group.nested.iter().enumerate() {
                    grad[offset + level] += tau_d * d_mu[j];
                    grad_tau_nested += position[offset + level] * d_mu[j];
                }
            }
        }
        let n = self.design.n_obs() as f64;
        lp += -n * log_sigma - 0.5 * sum_sq * inv_var;
        grad[lay.log_sigma()] += -n + sum_sq * inv_var;

        // Coefficient priors
        for (j, prior) in self.coefficient_priors.iter().enumerate() {
            lp += prior.ln_pdf(beta[j]);
            grad[lay.beta() + j] += prior.grad_ln_pdf(beta[j]);
        }

        // Scale priors on the log scale
        for k in 0..q {
            let u = position[lay.log_tau() + k];
            let (value, d_u) = self.scale_prior.ln_pdf_log_scale(u);
            lp += value;
            grad[lay.log_tau() + k] += d_u + tau[k] * grad_tau[k];
        }
        let (value, d_u) = self.scale_prior.ln_pdf_log_scale(log_sigma);
        lp += value;
        grad[lay.log_sigma()] += d_u;
        if let Some(tau_d) = tau_nested {
            let u = position[lay.log_tau_nested()];
            let (value, d_u) = self.scale_prior.ln_pdf_log_scale(u);
            lp += value;
            grad[lay.log_tau_nested()] += d_u + tau_d * grad_tau_nested;
        }

        // Standard normal on the standardized effects
        let z_all = position.slice(s![lay.z()..]);
        lp += -0.5 * z_all.dot(&z_all);
        grad.slice_mut(s![lay.z()..]).scaled_add(-1.0, &z_all);

        // Correlation factor: LKJ density, Jacobians, backward pass into w
        let mut k = 0;
        for i in 1..q {
            let row_sums = &sums[i];
            let lkj = (q - i - 1) as f64 + 2.0 * LKJ_ETA - 2.0;
            let c_i = l[[i, i]];
            lp += lkj * c_i.ln();
            for j in 1..i {
                lp += 0.5 * (1.0 - row_sums[j]).ln();
            }

            let mut adj_s = (grad_l[[i, i]] + lkj / c_i) * (-0.5 / c_i);
            let mut grad_cpc = vec![0.0; i];
            for j in (0..i).rev() {
                let c_j = (1.0 - row_sums[j]).sqrt();
                let z_j = cpc[k + j];
                grad_cpc[j] = grad_l[[i, j]] * c_j + adj_s * 2.0 * z_j * (1.0 - row_sums[j]);
                let mut adj_c = grad_l[[i, j]] * z_j;
                if j >= 1 {
                    adj_c += 1.0 / c_j;
                }
                adj_s = adj_s * (1.0 - z_j * z_j) + adj_c * (-0.5 / c_j);
            }

            for j in 0..i {
                let z_j = cpc[k + j];
                lp += (1.0 - z_j * z_j).ln();
                grad[lay.w() + k + j] += grad_cpc[j] * (1.0 - z_j * z_j) - 2.0 * z_j;
            }
            k += i;
        }

        if !lp.is_finite() || !sigma.is_finite() {
            return f64::NEG_INFINITY;
        }
        lp
    }
}
