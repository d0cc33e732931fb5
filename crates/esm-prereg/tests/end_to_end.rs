//! Whole-pipeline runs on simulated ESM data

use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::fmt::Write;

use esm_core::DataFrame;
use esm_core::data::CsvOptions;
use esm_models::{OptimizerConfig, SamplerConfig};
use esm_prereg::{
    AnalysisPlan, HypothesisResult, Pipeline, ResultsAggregator, RowStatus, RunConfig, TestOutcome,
    Variant,
};

const SUBJECTS: usize = 20;
const DAYS: usize = 14;

/// CSV text for 20 subjects × 14 days
///
/// `share_negative` rises by 0.5 per SD of `intensity_negative`; a few
/// `rumination` cells are missing.
fn simulated_csv(drop_savouring: bool) -> String {
    let mut rng = StdRng::seed_from_u64(2024);
    let normal = Normal::new(0.0, 1.0).unwrap();

    let mut header = "subject,day,gender,age,psychopathology,intensity_negative,intensity_positive,\
                      rumination,share_negative,share_positive"
        .to_string();
    if !drop_savouring {
        header.push_str(",savouring");
    }
    let mut csv = header + "\n";

    for s in 0..SUBJECTS {
        let gender = if s % 2 == 0 { "female" } else { "male" };
        let age = 20.0 + rng.random_range(0.0..30.0);
        let psychopathology: f64 = normal.sample(&mut rng);
        let u_share = 0.5 * normal.sample(&mut rng);
        let u_slope = 0.1 * normal.sample(&mut rng);
        let u_rum = 0.5 * normal.sample(&mut rng);
        let u_sav = 0.5 * normal.sample(&mut rng);

        for d in 0..DAYS {
            let neg: f64 = normal.sample(&mut rng);
            let pos: f64 = normal.sample(&mut rng);
            let e = |rng: &mut StdRng| 0.5 * normal.sample(rng);
            let share_neg =
                1.0 + 0.3 * psychopathology + (0.5 + u_slope) * neg + u_share + e(&mut rng);
            let share_pos = 1.0 - 0.2 * psychopathology + 0.4 * pos + u_share + e(&mut rng);
            let rumination =
                2.0 + 0.3 * psychopathology + 0.4 * neg - 0.2 * share_neg + u_rum + e(&mut rng);
            let savouring =
                2.0 - 0.2 * psychopathology + 0.4 * pos + 0.2 * share_pos + u_sav + e(&mut rng);

            let rumination = if (s + d) % 23 == 0 {
                "NA".to_string()
            } else {
                format!("{:.6}", rumination)
            };
            write!(
                csv,
                "s{:02},{},{},{:.1},{:.6},{:.6},{:.6},{},{:.6},{:.6}",
                s,
                d + 1,
                gender,
                age,
                psychopathology,
                neg,
                pos,
                rumination,
                share_neg,
                share_pos
            )
            .unwrap();
            if !drop_savouring {
                write!(csv, ",{:.6}", savouring).unwrap();
            }
            csv.push('\n');
        }
    }
    csv
}

fn load(drop_savouring: bool) -> DataFrame {
    DataFrame::from_csv_reader(
        simulated_csv(drop_savouring).as_bytes(),
        &CsvOptions::default(),
    )
    .unwrap()
}

fn frequentist_config() -> RunConfig {
    RunConfig {
        frequentist_only: true,
        optimizer: OptimizerConfig::default(),
        ..Default::default()
    }
}

#[test]
fn test_frequentist_run_recovers_within_effect() {
    let pipeline = Pipeline::new(frequentist_config(), AnalysisPlan::preregistered().unwrap());
    let table = pipeline.run(&load(false));

    assert_eq!(table.len(), 30);
    assert_eq!(table.failures().count(), 0);

    let h3 = table.row(3, Variant::Frequentist).unwrap();
    assert_eq!(h3.status, RowStatus::Ok);
    assert_abs_diff_eq!(h3.estimate.unwrap(), 0.5, epsilon = 0.15);
    assert!(h3.p_y_h0.unwrap() < 0.05);

    let h6 = table.row(6, Variant::Frequentist).unwrap();
    assert_eq!(h6.status, RowStatus::Ok);
    assert_eq!(h6.analysis_type, "Frequentist (LR test, two-sided)");

    // Bayesian rows stay empty in a frequentist-only run
    for row in table.rows().iter().filter(|r| r.variant.is_bayesian()) {
        assert_eq!(row.status, RowStatus::NotApplicable);
    }
}

#[test]
fn test_failed_model_does_not_block_others() {
    let pipeline = Pipeline::new(frequentist_config(), AnalysisPlan::preregistered().unwrap());
    let table = pipeline.run(&load(true));

    // Models 4 and 6 need savouring
    let failed: Vec<usize> = table.failures().map(|(row, _)| row.hypothesis).collect();
    assert_eq!(failed, vec![7, 9, 10]);
    for id in [1, 2, 3, 4, 5, 6, 8] {
        assert_eq!(table.row(id, Variant::Frequentist).unwrap().status, RowStatus::Ok);
    }
}

#[test]
fn test_bayesian_run_fills_applicable_rows() {
    let config = RunConfig {
        sampler: SamplerConfig {
            chains: 2,
            warmup: 100,
            iterations: 300,
            seed: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let pipeline = Pipeline::new(config, AnalysisPlan::preregistered().unwrap());
    let raw = load(false);

    let fits = pipeline.fit_all(&raw);
    assert_eq!(fits.len(), 16);
    assert!(fits.iter().all(|unit| unit.fit.is_ok()));

    let results = pipeline.test_all(&fits);
    // 10 frequentist, 9 non-informative, 6 informed
    assert_eq!(results.len(), 25);
    let table = ResultsAggregator::new(pipeline.plan()).assemble(results);

    for row in table.rows() {
        let applicable = !(row.hypothesis == 6 && row.variant.is_bayesian())
            && !(row.variant == Variant::Informed && [8, 9, 10].contains(&row.hypothesis));
        if applicable {
            assert_eq!(row.status, RowStatus::Ok, "H{} {}", row.hypothesis, row.variant);
        } else {
            assert_eq!(row.status, RowStatus::NotApplicable, "H{} {}", row.hypothesis, row.variant);
        }
        if let Some(p) = row.p_h1_y {
            assert!((0.0..=1.0).contains(&p));
        }
    }

    let h3 = table.row(3, Variant::NonInformative).unwrap();
    assert!(h3.p_h1_y.unwrap() > 0.95);
}

#[test]
fn test_partial_results_keep_shape() {
    let plan = AnalysisPlan::preregistered().unwrap();
    let frequentist = |id: usize| {
        HypothesisResult::ok(
            id,
            Variant::Frequentist,
            TestOutcome::Frequentist(esm_models::FrequentistTest {
                hypothesis: String::new(),
                kind: esm_models::FrequentistKind::OneSided,
                estimate: 0.4,
                std_error: Some(0.1),
                statistic: 4.0,
                df: 18.0,
                p_value: 0.001,
            }),
        )
    };
    let table = ResultsAggregator::new(&plan).assemble(vec![frequentist(1), frequentist(5)]);

    assert_eq!(table.len(), 30);
    assert_eq!(table.not_applicable().len(), 8);
    assert!(!table.not_applicable().contains(&1));
    assert!(!table.not_applicable().contains(&5));
}
