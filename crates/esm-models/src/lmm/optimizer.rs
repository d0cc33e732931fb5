//! Bounded derivative-free minimizers for the REML criterion
//!
//! Both methods minimize over a box `x >= lower`; points outside the box are
//! projected back onto it before evaluation.

use serde::{Deserialize, Serialize};

/// Minimization method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerMethod {
    /// Nelder–Mead simplex with box projection
    NelderMead,
    /// Coordinate compass search with step halving
    CompassSearch,
}

/// Optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Minimization method
    pub method: OptimizerMethod,
    /// Iteration budget
    pub max_iter: usize,
    /// Tolerance on the spread of function values
    pub f_tol: f64,
    /// Tolerance on the simplex or step size
    pub x_tol: f64,
    /// Initial simplex edge or compass step
    pub initial_step: f64,
    /// Check the gradient at the optimum and flag fits that fail the check
    pub check_convergence: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            method: OptimizerMethod::NelderMead,
            max_iter: 5000,
            f_tol: 1e-8,
            x_tol: 1e-6,
            initial_step: 0.25,
            check_convergence: false,
        }
    }
}

/// Outcome of one minimization
#[derive(Debug, Clone)]
pub struct OptimResult {
    /// Location of the minimum
    pub x: Vec<f64>,
    /// Function value at `x`
    pub fval: f64,
    /// Iterations used
    pub iterations: usize,
    /// Whether the tolerances were met within the budget
    pub converged: bool,
}

/// Minimize `f` over `x >= lower` starting at `x0`
pub fn minimize<F>(f: F, x0: &[f64], lower: &[f64], config: &OptimizerConfig) -> OptimResult
where
    F: Fn(&[f64]) -> f64,
{
    if x0.is_empty() {
        return OptimResult {
            x: Vec::new(),
            fval: f(&[]),
            iterations: 0,
            converged: true,
        };
    }

    match config.method {
        OptimizerMethod::NelderMead => {
            let first = nelder_mead(&f, x0, lower, config, config.max_iter);
            if !first.converged {
                return first;
            }
            // Restart from the optimum to escape a collapsed simplex. The first
            // pass already met the tolerances, so the restart only refines it.
            let budget = config.max_iter.saturating_sub(first.iterations);
            let second = nelder_mead(&f, &first.x, lower, config, budget);
            let iterations = first.iterations + second.iterations;
            let best = if second.fval < first.fval { second } else { first };
            OptimResult {
                iterations,
                converged: true,
                ..best
            }
        }
        OptimizerMethod::CompassSearch => compass_search(&f, x0, lower, config),
    }
}

fn project(x: &mut [f64], lower: &[f64]) {
    for (xi, &lo) in x.iter_mut().zip(lower) {
        if *xi < lo {
            *xi = lo;
        }
    }
}

/// Non-finite values compare as +inf so the simplex moves away from them
fn eval<F: Fn(&[f64]) -> f64>(f: &F, x: &[f64]) -> f64 {
    let v = f(x);
    if v.is_finite() { v } else { f64::INFINITY }
}

fn nelder_mead<F>(
    f: &F,
    x0: &[f64],
    lower: &[f64],
    config: &OptimizerConfig,
    max_iter: usize,
) -> OptimResult
where
    F: Fn(&[f64]) -> f64,
{
    const ALPHA: f64 = 1.0;
    const GAMMA: f64 = 2.0;
    const RHO: f64 = 0.5;
    const SIGMA: f64 = 0.5;

    let n = x0.len();
    let mut start = x0.to_vec();
    project(&mut start, lower);

    let mut simplex: Vec<Vec<f64>> = vec![start.clone()];
    for i in 0..n {
        let mut vertex = start.clone();
        vertex[i] += config.initial_step;
        simplex.push(vertex);
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| eval(f, v)).collect();

    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iter {
        // Order vertices best to worst
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let f_spread = (values[n] - values[0]).abs();
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        if f_spread < config.f_tol && x_spread < config.x_tol {
            converged = true;
            break;
        }
        iterations += 1;

        let mut centroid = vec![0.0; n];
        for vertex in &simplex[..n] {
            for (c, &v) in centroid.iter_mut().zip(vertex) {
                *c += v / n as f64;
            }
        }

        let along = |t: f64| -> Vec<f64> {
            let mut point: Vec<f64> = centroid
                .iter()
                .zip(&simplex[n])
                .map(|(&c, &w)| c + t * (c - w))
                .collect();
            project(&mut point, lower);
            point
        };

        let reflected = along(ALPHA);
        let f_reflected = eval(f, &reflected);

        if f_reflected < values[0] {
            let expanded = along(GAMMA);
            let f_expanded = eval(f, &expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
            continue;
        }

        if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
            continue;
        }

        let (contracted, f_contracted) = if f_reflected < values[n] {
            let point = along(RHO * ALPHA);
            let fv = eval(f, &point);
            (point, fv)
        } else {
            let point = along(-RHO);
            let fv = eval(f, &point);
            (point, fv)
        };

        if f_contracted < values[n].min(f_reflected) {
            simplex[n] = contracted;
            values[n] = f_contracted;
            continue;
        }

        // Shrink towards the best vertex
        let best = simplex[0].clone();
        for i in 1..=n {
            for (x, &b) in simplex[i].iter_mut().zip(&best) {
                *x = b + SIGMA * (*x - b);
            }
            project(&mut simplex[i], lower);
            values[i] = eval(f, &simplex[i]);
        }
    }

    let best = (0..=n)
        .min_by(|&a, &b| values[a].total_cmp(&values[b]))
        .unwrap_or(0);
    OptimResult {
        x: simplex[best].clone(),
        fval: values[best],
        iterations,
        converged,
    }
}

fn compass_search<F>(f: &F, x0: &[f64], lower: &[f64], config: &OptimizerConfig) -> OptimResult
where
    F: Fn(&[f64]) -> f64,
{
    let mut x = x0.to_vec();
    project(&mut x, lower);
    let mut fx = eval(f, &x);
    let mut step = config.initial_step;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iter {
        if step < config.x_tol {
            converged = true;
            break;
        }
        iterations += 1;

        let mut improved = false;
        for i in 0..x.len() {
            for direction in [1.0, -1.0] {
                let mut trial = x.clone();
                trial[i] += direction * step;
                project(&mut trial, lower);
                let ft = eval(f, &trial);
                if ft < fx - config.f_tol * 1e-3 {
                    x = trial;
                    fx = ft;
                    improved = true;
                    break;
                }
            }
        }
        if !improved {
            step *= 0.5;
        }
    }

    OptimResult {
        x,
        fval: fx,
        iterations,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn rosenbrock(x: &[f64]) -> f64 {
        (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2)
    }

    #[test]
    fn test_nelder_mead_rosenbrock() {
        let config = OptimizerConfig {
            f_tol: 1e-12,
            x_tol: 1e-8,
            ..Default::default()
        };
        let result = minimize(rosenbrock, &[-1.2, 1.0], &[f64::NEG_INFINITY; 2], &config);
        assert!(result.converged);
        assert_abs_diff_eq!(result.x[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(result.x[1], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_bound_is_respected() {
        // Unconstrained minimum at -1, bound at 0
        let f = |x: &[f64]| (x[0] + 1.0).powi(2) + (x[1] - 2.0).powi(2);
        for method in [OptimizerMethod::NelderMead, OptimizerMethod::CompassSearch] {
            let config = OptimizerConfig {
                method,
                ..Default::default()
            };
            let result = minimize(f, &[1.0, 1.0], &[0.0, f64::NEG_INFINITY], &config);
            assert!(result.converged);
            assert!(result.x[0] >= 0.0);
            assert_abs_diff_eq!(result.x[0], 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(result.x[1], 2.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_budget_exhaustion_reported() {
        let config = OptimizerConfig {
            max_iter: 3,
            ..Default::default()
        };
        let result = minimize(rosenbrock, &[-1.2, 1.0], &[f64::NEG_INFINITY; 2], &config);
        assert!(!result.converged);
        assert_eq!(result.iterations, 3);
    }

    #[test]
    fn test_restart_does_not_void_convergence() {
        let lower = [f64::NEG_INFINITY; 2];
        let config = OptimizerConfig::default();
        let first = nelder_mead(&rosenbrock, &[-1.2, 1.0], &lower, &config, 5000);
        assert!(first.converged);

        // Too few iterations left for the restart to meet the tolerances
        for slack in [1, 5, 20] {
            let config = OptimizerConfig {
                max_iter: first.iterations + slack,
                ..Default::default()
            };
            let result = minimize(rosenbrock, &[-1.2, 1.0], &lower, &config);
            assert!(result.converged, "slack {}", slack);
            assert!(result.fval <= first.fval);
            assert!(result.iterations <= config.max_iter);
        }
    }

    #[test]
    fn test_zero_dimensional_problem() {
        let result = minimize(|_| 4.0, &[], &[], &OptimizerConfig::default());
        assert!(result.converged);
        assert_eq!(result.fval, 4.0);
    }
}
