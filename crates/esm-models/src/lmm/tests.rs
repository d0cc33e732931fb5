//! Tests for the REML estimator

use approx::assert_abs_diff_eq;

use crate::base::{ComponentKind, FitResult, ModelError};
use crate::fixtures::{Simulation, slope_spec};
use crate::lmm::{FrequentistEstimator, OptimizerConfig, OptimizerMethod};
use crate::prepare::DataPreparer;
use crate::spec::ModelSpec;
use esm_core::data::Series;

fn fit_default(sim: &Simulation, spec: &ModelSpec) -> crate::lmm::FrequentistFit {
    let data = DataPreparer::default().prepare(&sim.frame(), spec).unwrap();
    FrequentistEstimator::default().fit(spec, &data).unwrap()
}

#[test]
fn test_recovers_within_subject_effect() {
    let sim = Simulation::default();
    let fit = fit_default(&sim, &slope_spec());

    let x = fit.coefficient("x").unwrap();
    assert_abs_diff_eq!(x.estimate, 0.5, epsilon = 0.15);
    assert!(x.p_value.unwrap() < 0.05);
    assert!(x.std_error.unwrap() > 0.0);
    assert!(fit.converged());

    let intercept = fit.coefficient("Intercept").unwrap();
    assert!(intercept.is_intercept);
    assert_abs_diff_eq!(intercept.estimate, 1.0, epsilon = 0.4);
}

#[test]
fn test_fixed_effect_table_is_complete() {
    let fit = fit_default(&Simulation::default(), &slope_spec());
    let names: Vec<&str> = fit.fixed_effects().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Intercept", "x", "psychopathology"]);
    for c in fit.fixed_effects() {
        let p = c.p_value.unwrap();
        assert!((0.0..=1.0).contains(&p));
        assert!(c.ci_lower.unwrap() < c.estimate && c.estimate < c.ci_upper.unwrap());
        assert_abs_diff_eq!(c.t_stat.unwrap(), c.estimate / c.std_error.unwrap(), epsilon = 1e-10);
    }
}

#[test]
fn test_satterthwaite_df_for_between_subject_covariate() {
    let sim = Simulation {
        intercept_sd: 1.0,
        ..Default::default()
    };
    let fit = fit_default(&sim, &slope_spec());
    let n = fit.n_obs() as f64;

    // A subject-level covariate has roughly n_subjects - 2 df, far below n - p
    let between = fit.coefficient("psychopathology").unwrap().df.unwrap();
    assert!(between > 5.0 && between < 40.0, "df = {}", between);

    let within = fit.coefficient("x").unwrap().df.unwrap();
    assert!(within > between);
    assert!(within <= n);
}

#[test]
fn test_variance_components() {
    let sim = Simulation {
        intercept_sd: 1.0,
        ..Default::default()
    };
    let fit = fit_default(&sim, &slope_spec());
    let random = fit.random_effects();

    let intercept_sd = random
        .iter()
        .find(|vc| vc.kind == ComponentKind::StdDev && vc.term == "Intercept")
        .unwrap();
    assert!(intercept_sd.estimate > 0.4 && intercept_sd.estimate < 2.0);

    let residual = random
        .iter()
        .find(|vc| vc.kind == ComponentKind::Residual)
        .unwrap();
    assert_abs_diff_eq!(residual.estimate, 0.5, epsilon = 0.1);
    assert_abs_diff_eq!(residual.estimate, fit.sigma(), epsilon = 1e-12);

    assert!(
        random
            .iter()
            .any(|vc| vc.kind == ComponentKind::Correlation && vc.term == "Intercept,x")
    );
}

#[test]
fn test_lr_test_detects_slope_variance() {
    let sim = Simulation {
        slope_sd: 0.6,
        ..Default::default()
    };
    let fit = fit_default(&sim, &slope_spec());

    let slope = fit.lr_test("x").unwrap();
    assert_eq!(slope.df, 2);
    assert!(slope.statistic.unwrap() > 10.0);
    assert!(slope.p_value.unwrap() < 0.01);

    let intercept = fit.lr_test("Intercept").unwrap();
    assert_eq!(intercept.df, 2);
    assert!(intercept.statistic.unwrap() >= 0.0);
    assert_eq!(fit.lr_tests().len(), 2);
}

#[test]
fn test_nested_level_reported() {
    let spec = ModelSpec::builder("nested", "y")
        .fixed(["x"])
        .group_by("subject")
        .nested("day")
        .build()
        .unwrap();
    // Two beeps per day so the nested level is identifiable
    let frame = Simulation::default()
        .frame()
        .mutate("day", |s| Ok(Series::float(s.to_floats()?.mapv(|d| (d / 2.0).ceil()))))
        .unwrap();
    let data = DataPreparer::default().prepare(&frame, &spec).unwrap();
    let fit = FrequentistEstimator::default().fit(&spec, &data).unwrap();

    let nested = fit
        .random_effects()
        .iter()
        .find(|vc| vc.group == "subject:day")
        .unwrap();
    assert!(nested.estimate >= 0.0);
    assert_eq!(fit.theta().len(), 2);

    let test = fit.lr_test("nested intercept").unwrap();
    assert_eq!(test.df, 1);
    assert!(test.p_value.is_some());
}

#[test]
fn test_compass_search_agrees_with_nelder_mead() {
    let spec = slope_spec();
    let data = DataPreparer::default()
        .prepare(&Simulation::default().frame(), &spec)
        .unwrap();

    let nm = FrequentistEstimator::default().fit(&spec, &data).unwrap();
    let compass = FrequentistEstimator::new(OptimizerConfig {
        method: OptimizerMethod::CompassSearch,
        ..Default::default()
    })
    .fit(&spec, &data)
    .unwrap();

    let d_nm = nm.statistics().reml_criterion.unwrap();
    let d_compass = compass.statistics().reml_criterion.unwrap();
    assert_abs_diff_eq!(d_nm, d_compass, epsilon = 1e-3);
    assert_abs_diff_eq!(
        nm.coefficient("x").unwrap().estimate,
        compass.coefficient("x").unwrap().estimate,
        epsilon = 1e-3
    );
}

#[test]
fn test_exhausted_budget_is_not_converged() {
    let spec = slope_spec();
    let data = DataPreparer::default()
        .prepare(&Simulation::default().frame(), &spec)
        .unwrap();
    let estimator = FrequentistEstimator::new(OptimizerConfig {
        max_iter: 2,
        ..Default::default()
    });
    let err = estimator.fit(&spec, &data).unwrap_err();
    assert!(matches!(err, ModelError::NotConverged { max_iter: 2, .. }));
}

#[test]
fn test_reml_beats_starting_point() {
    let spec = slope_spec();
    let data = DataPreparer::default()
        .prepare(&Simulation::default().frame(), &spec)
        .unwrap();
    let design = crate::design::GroupedDesign::build(&spec, data.frame()).unwrap();
    let problem = crate::lmm::reml::RemlProblem::new(&design);

    let fit = FrequentistEstimator::default().fit(&spec, &data).unwrap();
    let start = problem.profiled_deviance(&problem.initial());
    assert!(fit.statistics().reml_criterion.unwrap() <= start);

    // Profiled and explicit-σ criteria agree at the REML σ
    let explicit = problem.deviance(fit.theta(), fit.sigma()).unwrap();
    assert_abs_diff_eq!(explicit, fit.statistics().reml_criterion.unwrap(), epsilon = 1e-6);
}
