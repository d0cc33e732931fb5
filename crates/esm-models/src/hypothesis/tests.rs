use approx::assert_abs_diff_eq;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

use super::*;
use crate::bayes::{BayesianEstimator, PriorSet, SamplerConfig, quantile};
use crate::fixtures::{Simulation, slope_spec};
use crate::lmm::FrequentistEstimator;
use crate::prepare::{DataPreparer, PreparedDataset};

fn prepared() -> PreparedDataset {
    DataPreparer::default()
        .prepare(&Simulation::default().frame(), &slope_spec())
        .unwrap()
}

#[test]
fn test_parse_hypotheses() {
    let h: Hypothesis = "psychopathology < 0".parse().unwrap();
    assert_eq!(h, Hypothesis::new("psychopathology", Comparison::Less, 0.0));

    let h: Hypothesis = "x>0.25".parse().unwrap();
    assert_eq!(h.comparison, Comparison::Greater);
    assert_abs_diff_eq!(h.value, 0.25);

    let h: Hypothesis = "gendermale == -1".parse().unwrap();
    assert_eq!(h.comparison, Comparison::Equal);
    assert_abs_diff_eq!(h.value, -1.0);
    assert_eq!(h.to_string(), "gendermale = -1");
    assert_eq!(h.negation(), "gendermale != -1");
}

#[test]
fn test_parse_rejects_malformed() {
    for expression in ["x", "< 0", "x < zero", "x < 0 < 1", "", "x != 0", "x !< 0"] {
        assert!(
            matches!(
                expression.parse::<Hypothesis>(),
                Err(ModelError::InvalidHypothesis { .. })
            ),
            "accepted '{}'",
            expression
        );
    }
}

#[test]
fn test_one_sided_p_values() {
    let fit = FrequentistEstimator::default()
        .fit(&slope_spec(), &prepared())
        .unwrap();
    let engine = HypothesisEngine::new();
    let coefficient = fit.coefficient("x").unwrap();

    let greater = engine
        .test_fixed_effect(&fit, &Hypothesis::new("x", Comparison::Greater, 0.0))
        .unwrap();
    let less = engine
        .test_fixed_effect(&fit, &Hypothesis::new("x", Comparison::Less, 0.0))
        .unwrap();
    let equal = engine
        .test_fixed_effect(&fit, &Hypothesis::new("x", Comparison::Equal, 0.0))
        .unwrap();

    assert_eq!(greater.kind, FrequentistKind::OneSided);
    assert_eq!(equal.kind, FrequentistKind::TwoSided);
    assert!(greater.p_value < 0.01);
    assert_abs_diff_eq!(greater.p_value + less.p_value, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(greater.p_value, coefficient.p_value.unwrap() / 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(equal.p_value, coefficient.p_value.unwrap(), epsilon = 1e-12);
    assert_abs_diff_eq!(equal.df, coefficient.df.unwrap());
}

#[test]
fn test_random_effect_uses_lr_test() {
    let fit = FrequentistEstimator::default()
        .fit(&slope_spec(), &prepared())
        .unwrap();
    let test = HypothesisEngine::new().test_random_effect(&fit, "x").unwrap();

    assert_eq!(test.kind, FrequentistKind::LikelihoodRatio);
    assert_eq!(test.hypothesis, "sd(subject:x) > 0");
    assert_abs_diff_eq!(test.p_value, fit.lr_test("x").unwrap().p_value.unwrap());
    assert!(test.std_error.is_none());
    assert!(test.estimate >= 0.0);

    assert!(matches!(
        HypothesisEngine::new().test_random_effect(&fit, "nope"),
        Err(ModelError::UnknownParameter { .. })
    ));
}

#[test]
fn test_unknown_coefficient() {
    let fit = FrequentistEstimator::default()
        .fit(&slope_spec(), &prepared())
        .unwrap();
    let result = HypothesisEngine::new()
        .test_fixed_effect(&fit, &Hypothesis::new("missing", Comparison::Less, 0.0));
    assert!(matches!(result, Err(ModelError::UnknownParameter { .. })));
}

fn bayesian_config(sample_prior: bool) -> SamplerConfig {
    SamplerConfig {
        chains: 2,
        warmup: 200,
        iterations: 600,
        seed: 11,
        sample_prior,
        ..Default::default()
    }
}

#[test]
fn test_bayesian_directional_and_point() {
    let priors = PriorSet::non_informative(["Intercept", "x", "psychopathology"]);
    let fit = BayesianEstimator::new(bayesian_config(true))
        .fit(&slope_spec(), &prepared(), &priors)
        .unwrap();
    let engine = HypothesisEngine::new();

    let greater = engine.test_hypothesis(&fit, "x > 0").unwrap();
    assert!(greater.posterior_prob > 0.99);
    assert!(greater.ci_upper.is_none());
    assert!(greater.ci_lower.unwrap() > 0.0);
    assert!(greater.evidence_ratio > 99.0);

    let less = engine.test_hypothesis(&fit, "x < 0").unwrap();
    assert_abs_diff_eq!(less.posterior_prob, 1.0 - greater.posterior_prob, epsilon = 1e-12);
    assert_abs_diff_eq!(less.estimate, greater.estimate, epsilon = 1e-12);
    assert!(less.ci_lower.is_none());

    // One-sided 95% bounds: 5% of the draws lie beyond each
    let pooled = fit.posterior().pooled("x").unwrap().to_vec();
    assert_abs_diff_eq!(greater.ci_lower.unwrap(), quantile(&pooled, 0.05), epsilon = 1e-12);
    assert_abs_diff_eq!(less.ci_upper.unwrap(), quantile(&pooled, 0.95), epsilon = 1e-12);

    // The true value is far more plausible after seeing the data
    let point = engine.test_hypothesis(&fit, "x = 0.5").unwrap();
    assert!(point.evidence_ratio > 1.0);
    assert!(point.posterior_prob > 0.5 && point.posterior_prob < 1.0);
    let (lower, upper) = (point.ci_lower.unwrap(), point.ci_upper.unwrap());
    assert!(lower < point.estimate && point.estimate < upper);
}

#[test]
fn test_point_hypothesis_needs_prior_draws() {
    let fit = BayesianEstimator::new(bayesian_config(false))
        .fit(&slope_spec(), &prepared(), &PriorSet::new("default"))
        .unwrap();
    let result = HypothesisEngine::new().test_hypothesis(&fit, "x = 0");
    assert!(matches!(result, Err(ModelError::MissingPriorSamples { .. })));

    // Inequalities only need the posterior
    assert!(HypothesisEngine::new().test_hypothesis(&fit, "x > 0").is_ok());
}

#[test]
fn test_kde_matches_normal_density() {
    let mut rng = StdRng::seed_from_u64(5);
    let values: Vec<f64> = (0..20_000).map(|_| StandardNormal.sample(&mut rng)).collect();
    let density = kde_at(&values, 0.0, "sample").unwrap();
    assert_abs_diff_eq!(density, 1.0 / (2.0 * std::f64::consts::PI).sqrt(), epsilon = 0.01);

    assert!(kde_at(&[1.0, 1.0, 1.0], 1.0, "constant").is_err());
}
