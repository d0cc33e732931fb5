//! Per-model data preparation
//!
//! [`DataPreparer::prepare`] turns the raw record frame into the modeling frame
//! for one [`ModelSpec`]: grouping and categorical columns are cast to
//! unordered factors, numeric covariates are z-scored with moments taken from
//! the full raw frame, and rows missing the outcome are dropped.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use esm_core::data::{DataError, DataFrame, Series};

use crate::base::Result;
use crate::spec::ModelSpec;

/// Which raw columns play structural roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnRoles {
    /// Subject identifier
    pub subject: String,
    /// Day identifier, nested within subject
    pub day: Option<String>,
    /// Further columns cast to categorical (e.g. gender)
    pub categorical: Vec<String>,
}

impl Default for ColumnRoles {
    fn default() -> Self {
        Self {
            subject: "subject".to_string(),
            day: Some("day".to_string()),
            categorical: vec!["gender".to_string()],
        }
    }
}

/// Standardization applied to one covariate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingInfo {
    /// Column name
    pub column: String,
    /// Mean over the full raw frame
    pub mean: f64,
    /// Sample standard deviation over the full raw frame
    pub std_dev: f64,
    /// False when the column had zero variance and was left as is
    pub scaled: bool,
}

/// Modeling frame for one specification
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    model: String,
    frame: DataFrame,
    n_raw: usize,
    n_dropped: usize,
    scaling: Vec<ScalingInfo>,
}

impl PreparedDataset {
    /// Name of the model this frame was prepared for
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The prepared rows
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Rows in the raw frame
    pub fn n_raw(&self) -> usize {
        self.n_raw
    }

    /// Rows dropped for a missing outcome
    pub fn n_dropped(&self) -> usize {
        self.n_dropped
    }

    /// Standardization report, one entry per numeric covariate
    pub fn scaling(&self) -> &[ScalingInfo] {
        &self.scaling
    }
}

/// Builds per-model frames from raw ESM records
#[derive(Debug, Clone, Default)]
pub struct DataPreparer {
    roles: ColumnRoles,
}

impl DataPreparer {
    /// Create a preparer with explicit column roles
    pub fn new(roles: ColumnRoles) -> Self {
        Self { roles }
    }

    /// Column roles in use
    pub fn roles(&self) -> &ColumnRoles {
        &self.roles
    }

    /// Prepare `raw` for `spec`; `raw` is left untouched
    pub fn prepare(&self, raw: &DataFrame, spec: &ModelSpec) -> Result<PreparedDataset> {
        for column in spec.referenced_columns() {
            raw.column(column)?;
        }

        let outcome = raw.column(spec.outcome())?;
        if !outcome.is_numeric() {
            return Err(DataError::TypeMismatch {
                column: spec.outcome().to_string(),
                expected: "numeric",
                actual: outcome.dtype(),
            }
            .into());
        }

        let categorical = self.categorical_columns(raw, spec);

        // Column order: referenced columns, then the day id when present
        let mut keep: Vec<&str> = Vec::new();
        for column in spec.referenced_columns() {
            if !keep.contains(&column) {
                keep.push(column);
            }
        }
        if let Some(day) = self.roles.day.as_deref() {
            if raw.has_column(day) && !keep.contains(&day) {
                keep.push(day);
            }
        }

        let mut frame = raw.select(&keep)?;
        for column in &categorical {
            frame = frame.mutate(column, |s| Ok(s.to_categorical()))?;
        }

        let mut scaling = Vec::new();
        for covariate in spec.fixed_effects() {
            if categorical.contains(covariate.as_str()) {
                continue;
            }
            let info = standardize_info(covariate, raw.column(covariate)?)?;
            if info.scaled {
                let (mean, sd) = (info.mean, info.std_dev);
                frame = frame.mutate(covariate, |s| {
                    Ok(Series::float(s.to_floats()?.mapv(|v| (v - mean) / sd)))
                })?;
            } else {
                tracing::warn!(
                    model = spec.name(),
                    column = covariate.as_str(),
                    "covariate has zero variance; left unscaled"
                );
                frame = frame.mutate(covariate, |s| Ok(Series::float(s.to_floats()?)))?;
            }
            scaling.push(info);
        }

        let n_raw = frame.nrows();
        let frame = frame.drop_missing(&[spec.outcome()])?;
        let n_dropped = n_raw - frame.nrows();

        if spec.grouping().nested.is_none() {
            if let Some(day) = self.roles.day.as_deref().filter(|d| frame.has_column(d)) {
                check_unique_occasions(&frame, &spec.grouping().subject, day)?;
            }
        }

        tracing::debug!(
            model = spec.name(),
            rows = frame.nrows(),
            dropped = n_dropped,
            "prepared modeling frame"
        );

        Ok(PreparedDataset {
            model: spec.name().to_string(),
            frame,
            n_raw,
            n_dropped,
            scaling,
        })
    }

    fn categorical_columns<'a>(&'a self, raw: &DataFrame, spec: &'a ModelSpec) -> HashSet<&'a str> {
        let mut columns: HashSet<&str> = HashSet::new();
        columns.insert(spec.grouping().subject.as_str());
        if let Some(nested) = spec.grouping().nested.as_deref() {
            columns.insert(nested);
        }
        if let Some(day) = self.roles.day.as_deref() {
            if raw.has_column(day) {
                columns.insert(day);
            }
        }
        for column in &self.roles.categorical {
            if spec.fixed_effects().contains(column) {
                columns.insert(column.as_str());
            }
        }
        // Text covariates are factors whether or not they were declared
        for covariate in spec.fixed_effects() {
            if raw.get_column(covariate).is_some_and(|s| !s.is_numeric()) {
                columns.insert(covariate.as_str());
            }
        }
        columns
    }
}

fn standardize_info(column: &str, series: &Series) -> Result<ScalingInfo> {
    let mean = series.mean()?;
    let std_dev = series.std(1)?;
    let scaled = std_dev.is_finite() && std_dev > f64::EPSILON;
    Ok(ScalingInfo {
        column: column.to_string(),
        mean,
        std_dev,
        scaled,
    })
}

fn check_unique_occasions(frame: &DataFrame, subject: &str, day: &str) -> Result<()> {
    let subjects = frame.column(subject)?;
    let days = frame.column(day)?;
    let mut seen = HashSet::new();
    for i in 0..frame.nrows() {
        let (Some(s), Some(d)) = (subjects.get(i), days.get(i)) else {
            continue;
        };
        let key = (s.to_string(), d.to_string());
        if !seen.insert(key.clone()) {
            return Err(DataError::DuplicateObservation {
                subject: key.0,
                day: key.1,
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn raw() -> DataFrame {
        DataFrame::from_columns(vec![
            ("subject", Series::string(strings(&["a", "a", "b", "b", "c", "c"]))),
            ("day", Series::float(vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0])),
            ("gender", Series::string(strings(&["f", "f", "m", "m", "f", "f"]))),
            ("x", Series::float(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])),
            ("constant", Series::float(vec![2.0; 6])),
            ("y", Series::float(vec![0.5, f64::NAN, 1.5, 2.0, f64::NAN, 3.0])),
        ])
        .unwrap()
    }

    fn spec(fixed: &[&str]) -> ModelSpec {
        ModelSpec::builder("test", "y")
            .fixed(fixed.iter().copied())
            .group_by("subject")
            .build()
            .unwrap()
    }

    #[test]
    fn test_drops_rows_missing_outcome() {
        let prepared = DataPreparer::default().prepare(&raw(), &spec(&["x"])).unwrap();
        assert_eq!(prepared.frame().nrows(), 4);
        assert_eq!(prepared.n_dropped(), 2);
        assert_eq!(prepared.frame().column("y").unwrap().missing_count(), 0);
    }

    #[test]
    fn test_standardizes_over_full_frame() {
        let prepared = DataPreparer::default().prepare(&raw(), &spec(&["x"])).unwrap();
        let info = &prepared.scaling()[0];
        assert_abs_diff_eq!(info.mean, 3.5, epsilon = 1e-12);
        assert!(info.scaled);

        // Moments use all six rows, not the four that survive filtering
        let x = prepared.frame().column("x").unwrap().to_floats().unwrap();
        let expected = (1.0 - 3.5) / info.std_dev;
        assert_abs_diff_eq!(x[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_variance_left_unscaled() {
        let prepared = DataPreparer::default()
            .prepare(&raw(), &spec(&["constant"]))
            .unwrap();
        assert!(!prepared.scaling()[0].scaled);
        let values = prepared.frame().column("constant").unwrap().to_floats().unwrap();
        assert!(values.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_casts_grouping_and_gender() {
        let prepared = DataPreparer::default()
            .prepare(&raw(), &spec(&["x", "gender"]))
            .unwrap();
        let frame = prepared.frame();
        assert_eq!(frame.column("subject").unwrap().dtype(), "categorical");
        assert_eq!(frame.column("day").unwrap().dtype(), "categorical");
        assert_eq!(frame.column("gender").unwrap().dtype(), "categorical");
        assert_eq!(prepared.scaling().len(), 1);
    }

    #[test]
    fn test_missing_column_is_data_error() {
        let err = DataPreparer::default()
            .prepare(&raw(), &spec(&["nope"]))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::ModelError::Data(DataError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_input_not_mutated() {
        let input = raw();
        let before = input.column("x").unwrap().clone();
        DataPreparer::default().prepare(&input, &spec(&["x"])).unwrap();
        assert_eq!(input.column("x").unwrap(), &before);
        assert_eq!(input.nrows(), 6);
    }

    #[test]
    fn test_duplicate_occasion_rejected() {
        let df = raw()
            .mutate("day", |_| Ok(Series::float(vec![1.0, 1.0, 1.0, 2.0, 1.0, 2.0])))
            .unwrap()
            .mutate("y", |_| Ok(Series::float(vec![1.0; 6])))
            .unwrap();
        let err = DataPreparer::default().prepare(&df, &spec(&["x"])).unwrap_err();
        assert!(matches!(
            err,
            crate::ModelError::Data(DataError::DuplicateObservation { .. })
        ));
    }
}
