//! Simulated ESM data shared by the unit tests

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use esm_core::data::{DataFrame, Series};

use crate::spec::ModelSpec;

/// Generating model for one simulated dataset
///
/// `y = intercept + within·x + between·psychopathology + b0_i + b1_i·x + e`
/// with `x` and `psychopathology` already z-scored over the full frame.
#[derive(Debug, Clone)]
pub(crate) struct Simulation {
    pub n_subjects: usize,
    pub n_days: usize,
    pub intercept: f64,
    pub within: f64,
    pub between: f64,
    pub intercept_sd: f64,
    pub slope_sd: f64,
    pub residual_sd: f64,
    pub seed: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            n_subjects: 20,
            n_days: 14,
            intercept: 1.0,
            within: 0.5,
            between: 0.3,
            intercept_sd: 0.6,
            slope_sd: 0.1,
            residual_sd: 0.5,
            seed: 42,
        }
    }
}

fn zscore(values: &mut [f64]) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sd = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    for v in values.iter_mut() {
        *v = (*v - mean) / sd;
    }
}

impl Simulation {
    pub fn frame(&self) -> DataFrame {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let standard = Normal::new(0.0, 1.0).unwrap();
        let n = self.n_subjects * self.n_days;

        let mut subject = Vec::with_capacity(n);
        let mut day = Vec::with_capacity(n);
        let mut x = Vec::with_capacity(n);
        let mut psychopathology = Vec::with_capacity(n);
        let mut b0 = Vec::with_capacity(n);
        let mut b1 = Vec::with_capacity(n);

        for s in 0..self.n_subjects {
            let score = standard.sample(&mut rng);
            let u0 = self.intercept_sd * standard.sample(&mut rng);
            let u1 = self.slope_sd * standard.sample(&mut rng);
            for d in 0..self.n_days {
                subject.push(format!("s{:02}", s));
                day.push((d + 1) as f64);
                x.push(standard.sample(&mut rng));
                psychopathology.push(score);
                b0.push(u0);
                b1.push(u1);
            }
        }
        zscore(&mut x);
        zscore(&mut psychopathology);

        let y: Vec<f64> = (0..n)
            .map(|i| {
                self.intercept
                    + self.within * x[i]
                    + self.between * psychopathology[i]
                    + b0[i]
                    + b1[i] * x[i]
                    + self.residual_sd * standard.sample(&mut rng)
            })
            .collect();

        DataFrame::from_columns(vec![
            ("subject", Series::string(subject)),
            ("day", Series::float(day)),
            ("psychopathology", Series::float(psychopathology)),
            ("x", Series::float(x)),
            ("y", Series::float(y)),
        ])
        .unwrap()
    }
}

/// `y ~ x + psychopathology + (1 + x | subject)`
pub(crate) fn slope_spec() -> ModelSpec {
    ModelSpec::builder("sim", "y")
        .fixed(["x", "psychopathology"])
        .group_by("subject")
        .random_slope("x")
        .build()
        .unwrap()
}
