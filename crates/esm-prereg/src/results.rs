//! Results table assembly and export
//!
//! [`ResultsAggregator::assemble`] always yields `N_HYPOTHESES × 3` rows,
//! ordered by hypothesis id and then by [`Variant::ALL`]. Combinations without
//! a result are explicit not-applicable rows; failures are explicit error rows.


use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;

use esm_models::{BayesianTest, Comparison, FrequentistKind, FrequentistTest};

use crate::error::Result;
use crate::plan::{AnalysisPlan, N_HYPOTHESES, Variant};

/// Test output behind one row
#[derive(Debug, Clone, Serialize)]
pub enum TestOutcome {
    Frequentist(FrequentistTest),
    Bayesian(BayesianTest),
}

/// Outcome of testing one hypothesis under one estimator variant
#[derive(Debug, Clone)]
pub struct HypothesisResult {
    pub hypothesis: usize,
    pub variant: Variant,
    pub outcome: std::result::Result<TestOutcome, String>,
}

impl HypothesisResult {
    pub fn ok(hypothesis: usize, variant: Variant, outcome: TestOutcome) -> Self {
        Self {
            hypothesis,
            variant,
            outcome: Ok(outcome),
        }
    }

    pub fn failed(hypothesis: usize, variant: Variant, error: impl fmt::Display) -> Self {
        Self {
            hypothesis,
            variant,
            outcome: Err(error.to_string()),
        }
    }
}

/// Row state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RowStatus {
    Ok,
    NotApplicable,
    Failed(String),
}

/// One row of the results table
///
/// Serializes to exactly the eight reporting columns.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    #[serde(skip)]
    pub hypothesis: usize,
    #[serde(skip)]
    pub variant: Variant,
    #[serde(skip)]
    pub status: RowStatus,
    #[serde(rename = "Model")]
    pub model: Option<usize>,
    #[serde(rename = "H0")]
    pub h0: String,
    #[serde(rename = "H1")]
    pub h1: String,
    #[serde(rename = "Analysis type")]
    pub analysis_type: String,
    #[serde(rename = "Estimate")]
    pub estimate: Option<f64>,
    #[serde(rename = "Est.Error")]
    pub est_error: Option<f64>,
    #[serde(rename = "p(y|H0)")]
    pub p_y_h0: Option<f64>,
    #[serde(rename = "p(H1|y)")]
    pub p_h1_y: Option<f64>,
}

impl ResultRow {
    fn empty(
        hypothesis: usize,
        variant: Variant,
        model: Option<usize>,
        h0: String,
        h1: String,
    ) -> Self {
        Self {
            hypothesis,
            variant,
            status: RowStatus::NotApplicable,
            model,
            h0,
            h1,
            analysis_type: variant.label().to_string(),
            estimate: None,
            est_error: None,
            p_y_h0: None,
            p_h1_y: None,
        }
    }

    fn fill(&mut self, outcome: &TestOutcome) {
        self.status = RowStatus::Ok;
        match outcome {
            TestOutcome::Frequentist(test) => {
                if test.kind == FrequentistKind::LikelihoodRatio {
                    self.analysis_type = "Frequentist (LR test, two-sided)".to_string();
                }
                self.estimate = Some(test.estimate);
                self.est_error = test.std_error;
                self.p_y_h0 = Some(test.p_value);
            }
            TestOutcome::Bayesian(test) => {
                self.estimate = Some(test.estimate);
                self.est_error = Some(test.est_error);
                // A point hypothesis is the null; its complement is H1
                self.p_h1_y = Some(if test.hypothesis.comparison == Comparison::Equal {
                    1.0 - test.posterior_prob
                } else {
                    test.posterior_prob
                });
            }
        }
    }
}

/// The final results table
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct ResultsTable {
    rows: Vec<ResultRow>,
}

impl ResultsTable {
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row for one (hypothesis, variant) pair
    pub fn row(&self, hypothesis: usize, variant: Variant) -> Option<&ResultRow> {
        self.rows
            .iter()
            .find(|r| r.hypothesis == hypothesis && r.variant == variant)
    }

    /// Hypothesis ids whose every row is not applicable
    pub fn not_applicable(&self) -> Vec<usize> {
        (1..=N_HYPOTHESES)
            .filter(|&id| {
                self.rows
                    .iter()
                    .filter(|r| r.hypothesis == id)
                    .all(|r| r.status == RowStatus::NotApplicable)
            })
            .collect()
    }

    /// Rows that failed, with their errors
    pub fn failures(&self) -> impl Iterator<Item = (&ResultRow, &str)> {
        self.rows.iter().filter_map(|r| match &r.status {
            RowStatus::Failed(message) => Some((r, message.as_str())),
            _ => None,
        })
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn cell(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v))
}

impl fmt::Display for ResultsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<3} {:<5} {:<38} {:<38} {:<34} {:>9} {:>9} {:>9} {:>9}",
            "H", "Model", "H0", "H1", "Analysis type", "Estimate", "Est.Error", "p(y|H0)", "p(H1|y)"
        )?;
        writeln!(f, "{}", "-".repeat(156))?;
        for row in &self.rows {
            let model = row.model.map_or_else(|| "-".to_string(), |m| m.to_string());
            write!(
                f,
                "{:<3} {:<5} {:<38} {:<38} {:<34} {:>9} {:>9} {:>9} {:>9}",
                row.hypothesis,
                model,
                row.h0,
                row.h1,
                row.analysis_type,
                cell(row.estimate),
                cell(row.est_error),
                cell(row.p_y_h0),
                cell(row.p_h1_y)
            )?;
            match &row.status {
                RowStatus::Ok => writeln!(f)?,
                RowStatus::NotApplicable => writeln!(f, "  n/a")?,
                RowStatus::Failed(message) => writeln!(f, "  error: {}", message)?,
            }
        }
        Ok(())
    }
}

/// Builds the fixed-shape table from hypothesis results
#[derive(Debug, Clone)]
pub struct ResultsAggregator<'a> {
    plan: &'a AnalysisPlan,
}

impl<'a> ResultsAggregator<'a> {
    pub fn new(plan: &'a AnalysisPlan) -> Self {
        Self { plan }
    }

    /// One row per (hypothesis, variant); later duplicates replace earlier ones
    pub fn assemble<I>(&self, results: I) -> ResultsTable
    where
        I: IntoIterator<Item = HypothesisResult>,
    {
        let mut by_key: HashMap<(usize, Variant), HypothesisResult> = HashMap::new();
        for result in results {
            if !(1..=N_HYPOTHESES).contains(&result.hypothesis) {
                tracing::warn!(
                    hypothesis = result.hypothesis,
                    "ignoring result for unknown hypothesis"
                );
                continue;
            }
            by_key.insert((result.hypothesis, result.variant), result);
        }

        let mut rows = Vec::with_capacity(N_HYPOTHESES * Variant::ALL.len());
        for id in 1..=N_HYPOTHESES {
            let planned = self.plan.hypothesis(id);
            let (model, h0, h1) = match planned {
                Some(h) => (Some(h.model), h.h0(), h.h1()),
                None => (None, String::new(), String::new()),
            };
            for variant in Variant::ALL {
                let mut row = ResultRow::empty(id, variant, model, h0.clone(), h1.clone());
                match by_key.get(&(id, variant)).map(|r| &r.outcome) {
                    Some(Ok(outcome)) => row.fill(outcome),
                    Some(Err(message)) => row.status = RowStatus::Failed(message.clone()),
                    None => {}
                }
                rows.push(row);
            }
        }

        ResultsTable { rows }
    }
}
