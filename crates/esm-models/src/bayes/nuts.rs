//! No-U-Turn sampler with multinomial trajectory sampling
//!
//! Trajectories double in a random direction until the generalized U-turn
//! criterion fires between the ends of the whole tree or of any pair of
//! merged subtrees, the tree depth limit is reached, or the energy error of
//! a leapfrog step exceeds [`MAX_ENERGY_ERROR`] (a divergence).

use ndarray::Array1;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use super::adaptation::{MetricAdapter, StepSizeAdapter};

/// Energy error that marks a transition as divergent
pub const MAX_ENERGY_ERROR: f64 = 1000.0;

/// Unnormalized log density with gradient
pub trait Target {
    /// Number of unconstrained parameters
    fn dim(&self) -> usize;

    /// Log density at `position`; writes the gradient into `grad`
    fn log_density_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64;
}

/// One point in phase space
#[derive(Debug, Clone)]
struct PhasePoint {
    q: Array1<f64>,
    p: Array1<f64>,
    grad: Array1<f64>,
    log_density: f64,
}

/// Per-transition diagnostics
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub accept_stat: f64,
    pub tree_depth: usize,
    pub n_leapfrog: usize,
    pub divergent: bool,
    pub energy: f64,
}

/// A built subtree, ends in build order
struct Subtree {
    start: PhasePoint,
    end: PhasePoint,
    proposal: PhasePoint,
    rho: Array1<f64>,
    log_sum_weight: f64,
    n_leapfrog: usize,
    sum_accept: f64,
    valid: bool,
    divergent: bool,
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let m = a.max(b);
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// NUTS state for one chain
pub(crate) struct Sampler<'a, T: Target> {
    target: &'a T,
    inv_metric: Array1<f64>,
    step_size: f64,
    max_depth: usize,
    current: PhasePoint,
}

impl<'a, T: Target> Sampler<'a, T> {
    /// Start at `position`, which must have a finite density
    pub fn new(target: &'a T, position: Array1<f64>, max_depth: usize) -> Option<Self> {
        let dim = target.dim();
        let mut grad = Array1::zeros(dim);
        let log_density = target.log_density_and_grad(&position, &mut grad);
        if !log_density.is_finite() || grad.iter().any(|g| !g.is_finite()) {
            return None;
        }
        Some(Self {
            target,
            inv_metric: Array1::ones(dim),
            step_size: 1.0,
            max_depth,
            current: PhasePoint {
                q: position,
                p: Array1::zeros(dim),
                grad,
                log_density,
            },
        })
    }

    pub fn position(&self) -> &Array1<f64> {
        &self.current.q
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn set_step_size(&mut self, step: f64) {
        self.step_size = step;
    }

    pub fn set_inv_metric(&mut self, inv_metric: Array1<f64>) {
        self.inv_metric = inv_metric;
    }

    fn sample_momentum<R: Rng>(&self, rng: &mut R) -> Array1<f64> {
        self.inv_metric.mapv(|m| {
            let z: f64 = StandardNormal.sample(rng);
            z / m.sqrt()
        })
    }

    fn kinetic(&self, p: &Array1<f64>) -> f64 {
        0.5 * p.iter().zip(&self.inv_metric).map(|(p, m)| p * p * m).sum::<f64>()
    }

    fn hamiltonian(&self, point: &PhasePoint) -> f64 {
        let h = -point.log_density + self.kinetic(&point.p);
        if h.is_nan() { f64::INFINITY } else { h }
    }

    fn p_sharp(&self, point: &PhasePoint) -> Array1<f64> {
        &point.p * &self.inv_metric
    }

    fn leapfrog(&self, point: &PhasePoint, step: f64) -> PhasePoint {
        let p_half = &point.p + &(&point.grad * (0.5 * step));
        let q = &point.q + &(&(&p_half * &self.inv_metric) * step);
        let mut grad = Array1::zeros(q.len());
        let log_density = self.target.log_density_and_grad(&q, &mut grad);
        let p = &p_half + &(&grad * (0.5 * step));
        PhasePoint {
            q,
            p,
            grad,
            log_density: if log_density.is_nan() {
                f64::NEG_INFINITY
            } else {
                log_density
            },
        }
    }

    /// Continue the trajectory while both end momenta point along `rho`
    fn no_u_turn(&self, rho: &Array1<f64>, a: &PhasePoint, b: &PhasePoint) -> bool {
        self.p_sharp(a).dot(rho) > 0.0 && self.p_sharp(b).dot(rho) > 0.0
    }

    fn build_tree<R: Rng>(
        &self,
        from: &PhasePoint,
        depth: usize,
        step: f64,
        h0: f64,
        rng: &mut R,
    ) -> Subtree {
        if depth == 0 {
            let point = self.leapfrog(from, step);
            let h = self.hamiltonian(&point);
            let divergent = !h.is_finite() || h - h0 > MAX_ENERGY_ERROR;
            let accept = if h0 - h > 0.0 { 1.0 } else { (h0 - h).exp() };
            return Subtree {
                rho: point.p.clone(),
                start: point.clone(),
                end: point.clone(),
                proposal: point,
                log_sum_weight: h0 - h,
                n_leapfrog: 1,
                sum_accept: if accept.is_finite() { accept } else { 0.0 },
                valid: !divergent,
                divergent,
            };
        }

        let left = self.build_tree(from, depth - 1, step, h0, rng);
        if !left.valid {
            return left;
        }
        let right = self.build_tree(&left.end, depth - 1, step, h0, rng);
        let n_leapfrog = left.n_leapfrog + right.n_leapfrog;
        let sum_accept = left.sum_accept + right.sum_accept;
        if !right.valid {
            return Subtree {
                n_leapfrog,
                sum_accept,
                ..right
            };
        }

        let log_sum_weight = log_sum_exp(left.log_sum_weight, right.log_sum_weight);
        let take_right = rng.random::<f64>().ln() < right.log_sum_weight - log_sum_weight;

        let rho = &left.rho + &right.rho;
        let mut valid = self.no_u_turn(&rho, &left.start, &right.end);
        let rho_left = &left.rho + &right.start.p;
        valid &= self.no_u_turn(&rho_left, &left.start, &right.start);
        let rho_right = &right.rho + &left.end.p;
        valid &= self.no_u_turn(&rho_right, &left.end, &right.end);

        Subtree {
            start: left.start,
            end: right.end,
            proposal: if take_right { right.proposal } else { left.proposal },
            rho,
            log_sum_weight,
            n_leapfrog,
            sum_accept,
            valid,
            divergent: false,
        }
    }

    /// One NUTS transition from the current state
    pub fn transition<R: Rng>(&mut self, rng: &mut R) -> Transition {
        let mut init = self.current.clone();
        init.p = self.sample_momentum(rng);
        let h0 = self.hamiltonian(&init);

        let mut backward = init.clone();
        let mut forward = init.clone();
        let mut sample = init.clone();
        let mut rho = init.p.clone();
        let mut log_sum_weight = 0.0;

        let mut depth = 0;
        let mut n_leapfrog = 0;
        let mut sum_accept = 0.0;
        let mut divergent = false;

        while depth < self.max_depth {
            let go_forward = rng.random::<bool>();
            let (from, far) = if go_forward {
                (&forward, &backward)
            } else {
                (&backward, &forward)
            };
            let step = if go_forward {
                self.step_size
            } else {
                -self.step_size
            };
            let sub = self.build_tree(from, depth, step, h0, rng);
            depth += 1;
            n_leapfrog += sub.n_leapfrog;
            sum_accept += sub.sum_accept;

            if sub.divergent {
                divergent = true;
                break;
            }
            if !sub.valid {
                break;
            }

            // Biased progressive sampling towards the new subtree
            if rng.random::<f64>().ln() < sub.log_sum_weight - log_sum_weight {
                sample = sub.proposal.clone();
            }
            log_sum_weight = log_sum_exp(log_sum_weight, sub.log_sum_weight);

            let merged_rho = &rho + &sub.rho;
            let mut persist = self.no_u_turn(&merged_rho, far, &sub.end);
            let rho_far = &rho + &sub.start.p;
            persist &= self.no_u_turn(&rho_far, far, &sub.start);
            let rho_new = &sub.rho + &from.p;
            persist &= self.no_u_turn(&rho_new, from, &sub.end);

            rho = merged_rho;
            if go_forward {
                forward = sub.end;
            } else {
                backward = sub.end;
            }
            if !persist {
                break;
            }
        }

        let energy = self.hamiltonian(&sample);
        self.current = sample;
        Transition {
            accept_stat: if n_leapfrog > 0 {
                sum_accept / n_leapfrog as f64
            } else {
                0.0
            },
            tree_depth: depth,
            n_leapfrog,
            divergent,
            energy,
        }
    }

    /// Heuristic initial step size: double or halve until a single leapfrog
    /// step crosses an acceptance probability of 0.8
    pub fn find_reasonable_step<R: Rng>(&mut self, rng: &mut R) {
        let log_target = 0.8f64.ln();
        let mut direction = 0.0;
        for _ in 0..100 {
            let mut point = self.current.clone();
            point.p = self.sample_momentum(rng);
            let h0 = self.hamiltonian(&point);
            let next = self.leapfrog(&point, self.step_size);
            let delta = h0 - self.hamiltonian(&next);

            if direction == 0.0 {
                direction = if delta > log_target { 1.0 } else { -1.0 };
            } else if (direction > 0.0 && delta <= log_target)
                || (direction < 0.0 && delta >= log_target)
            {
                break;
            }
            self.step_size = if direction > 0.0 {
                2.0 * self.step_size
            } else {
                0.5 * self.step_size
            };
            if !(1e-10..=1e7).contains(&self.step_size) {
                self.step_size = self.step_size.clamp(1e-10, 1e7);
                break;
            }
        }
    }
}

/// Warmup adaptation state of one chain
pub(crate) struct Adaptation {
    pub step: StepSizeAdapter,
    pub metric: MetricAdapter,
}

impl Adaptation {
    pub fn new(dim: usize, warmup: usize, target_accept: f64, initial_step: f64) -> Self {
        Self {
            step: StepSizeAdapter::new(target_accept, initial_step),
            metric: MetricAdapter::new(dim, warmup),
        }
    }

    /// Update step size and metric after one warmup transition
    pub fn adapt<T: Target, R: Rng>(
        &mut self,
        sampler: &mut Sampler<'_, T>,
        transition: &Transition,
        rng: &mut R,
    ) {
        let step = self.step.learn(transition.accept_stat);
        sampler.set_step_size(step);
        let position = sampler.position().to_vec();
        if let Some(inv_metric) = self.metric.learn(&position) {
            sampler.set_inv_metric(Array1::from(inv_metric));
            sampler.find_reasonable_step(rng);
            self.step.restart(sampler.step_size());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Independent normals with the given means and SDs
    struct Gaussian {
        mean: Vec<f64>,
        sd: Vec<f64>,
    }

    impl Target for Gaussian {
        fn dim(&self) -> usize {
            self.mean.len()
        }

        fn log_density_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
            let mut lp = 0.0;
            for i in 0..self.dim() {
                let z = (position[i] - self.mean[i]) / self.sd[i];
                lp -= 0.5 * z * z;
                grad[i] = -z / self.sd[i];
            }
            lp
        }
    }

    #[test]
    fn test_samples_scaled_gaussian() {
        let target = Gaussian {
            mean: vec![1.0, -2.0],
            sd: vec![0.5, 3.0],
        };
        let mut rng = StdRng::seed_from_u64(11);
        let mut sampler = Sampler::new(&target, Array1::zeros(2), 10).unwrap();
        sampler.find_reasonable_step(&mut rng);
        let mut adaptation = Adaptation::new(2, 500, 0.8, sampler.step_size());

        for _ in 0..500 {
            let t = sampler.transition(&mut rng);
            adaptation.adapt(&mut sampler, &t, &mut rng);
        }
        sampler.set_step_size(adaptation.step.final_step());

        let n = 2000;
        let mut draws = vec![Vec::with_capacity(n); 2];
        let mut divergences = 0;
        for _ in 0..n {
            let t = sampler.transition(&mut rng);
            divergences += usize::from(t.divergent);
            for (k, d) in draws.iter_mut().enumerate() {
                d.push(sampler.position()[k]);
            }
        }
        assert_eq!(divergences, 0);

        for k in 0..2 {
            let mean = draws[k].iter().sum::<f64>() / n as f64;
            let var = draws[k].iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            assert_abs_diff_eq!(mean, target.mean[k], epsilon = 0.2 * target.sd[k]);
            assert_abs_diff_eq!(var.sqrt(), target.sd[k], epsilon = 0.2 * target.sd[k]);
        }
    }

    #[test]
    fn test_non_finite_start_rejected() {
        struct Broken;
        impl Target for Broken {
            fn dim(&self) -> usize {
                1
            }
            fn log_density_and_grad(&self, _: &Array1<f64>, _: &mut Array1<f64>) -> f64 {
                f64::NAN
            }
        }
        assert!(Sampler::new(&Broken, Array1::zeros(1), 10).is_none());
    }

    #[test]
    fn test_log_sum_exp() {
        assert_abs_diff_eq!(log_sum_exp(0.0, 0.0), 2f64.ln(), epsilon = 1e-12);
        assert_eq!(log_sum_exp(f64::NEG_INFINITY, 1.5), 1.5);
    }
}
