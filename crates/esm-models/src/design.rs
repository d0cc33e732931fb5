//! Grouped design matrices for mixed models
//!
//! A [`GroupedDesign`] splits a prepared frame into one [`GroupBlock`] per
//! subject. Each block carries its rows of the response, the fixed-effect
//! matrix `X`, the random-effect matrix `Z` (intercept plus slopes) and the
//! index of the nested level each row belongs to. Both estimators consume
//! this structure; neither touches the frame directly.

use ndarray::{Array1, Array2};
use std::collections::BTreeMap;

use esm_core::data::{DataFrame, MISSING_CODE, Series};

use crate::base::{ModelError, Result};
use crate::spec::{INTERCEPT, ModelSpec};

/// Rows of one subject
#[derive(Debug, Clone)]
pub struct GroupBlock {
    /// Subject label
    pub label: String,
    /// Response values
    pub y: Array1<f64>,
    /// Fixed-effect rows, `Intercept` column first
    pub x: Array2<f64>,
    /// Random-effect rows, one column per random term
    pub z: Array2<f64>,
    /// Nested-level index of every row, `0..n_nested`
    pub nested: Vec<usize>,
    /// Number of nested levels this subject has (0 without nesting)
    pub n_nested: usize,
}

impl GroupBlock {
    /// Number of observations for this subject
    pub fn len(&self) -> usize {
        self.y.len()
    }

    /// Whether the block has no rows
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

/// A random term that can be removed for a likelihood-ratio test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RandomTerm {
    /// A subject-level term (`Intercept` or a slope covariate)
    Subject(String),
    /// The intercept of the nested level
    Nested,
}

/// Full design of one model, split by subject
#[derive(Debug, Clone)]
pub struct GroupedDesign {
    coefficient_names: Vec<String>,
    random_terms: Vec<String>,
    subject: String,
    nested_label: Option<String>,
    groups: Vec<GroupBlock>,
    n_obs: usize,
}

impl GroupedDesign {
    /// Build the design of `spec` from a prepared frame
    ///
    /// Rows missing any covariate are dropped here, after the per-model
    /// outcome filter the preparer applied.
    pub fn build(spec: &ModelSpec, frame: &DataFrame) -> Result<Self> {
        let frame = frame.drop_missing(&spec.referenced_columns())?;
        let n_obs = frame.nrows();

        let y = frame.column(spec.outcome())?.to_floats()?;

        // Fixed effects, treatment-coded for factors
        let mut coefficient_names = vec![INTERCEPT.to_string()];
        let mut columns: Vec<Array1<f64>> = vec![Array1::ones(n_obs)];
        let mut slope_columns: BTreeMap<&str, usize> = BTreeMap::new();
        for covariate in spec.fixed_effects() {
            let series = frame.column(covariate)?;
            match series {
                Series::Categorical(codes, levels) => {
                    if spec.random_slopes().contains(covariate) {
                        return Err(ModelError::invalid_spec(format!(
                            "random slope '{}' must be numeric",
                            covariate
                        )));
                    }
                    let present = present_levels(codes, levels.len());
                    if present.len() < 2 {
                        return Err(ModelError::invalid_spec(format!(
                            "factor '{}' has fewer than two levels in the modeling frame",
                            covariate
                        )));
                    }
                    for &level in &present[1..] {
                        coefficient_names.push(format!("{}{}", covariate, levels[level]));
                        columns.push(codes.mapv(|c| if c as usize == level { 1.0 } else { 0.0 }));
                    }
                }
                _ => {
                    slope_columns.insert(covariate.as_str(), columns.len());
                    coefficient_names.push(covariate.clone());
                    columns.push(series.to_floats()?);
                }
            }
        }
        let p = columns.len();

        if n_obs <= p {
            return Err(ModelError::InsufficientData {
                n_samples: n_obs,
                n_predictors: p,
            });
        }

        let mut x = Array2::zeros((n_obs, p));
        for (j, column) in columns.iter().enumerate() {
            x.column_mut(j).assign(column);
        }

        let random_terms = spec.random_terms();
        let mut z = Array2::zeros((n_obs, random_terms.len()));
        for (k, term) in random_terms.iter().enumerate() {
            let source = if term == INTERCEPT {
                0
            } else {
                slope_columns.get(term.as_str()).copied().ok_or_else(|| {
                    ModelError::invalid_spec(format!("random slope '{}' has no column", term))
                })?
            };
            z.column_mut(k).assign(&x.column(source));
        }

        let subject_series = frame.column(&spec.grouping().subject)?.to_categorical();
        let (subject_codes, subject_levels) = codes_of(&subject_series)?;
        let nested_codes = match spec.grouping().nested.as_deref() {
            Some(nested) => Some(codes_of(&frame.column(nested)?.to_categorical())?.0),
            None => None,
        };

        let mut rows_by_subject: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (row, &code) in subject_codes.iter().enumerate() {
            rows_by_subject.entry(code).or_default().push(row);
        }

        let mut groups = Vec::with_capacity(rows_by_subject.len());
        for (code, rows) in rows_by_subject {
            let (nested, n_nested) = match &nested_codes {
                Some(codes) => local_index(rows.iter().map(|&r| codes[r])),
                None => (vec![0; rows.len()], 0),
            };
            groups.push(GroupBlock {
                label: subject_levels[code as usize].clone(),
                y: rows.iter().map(|&r| y[r]).collect(),
                x: x.select(ndarray::Axis(0), &rows),
                z: z.select(ndarray::Axis(0), &rows),
                nested,
                n_nested,
            });
        }

        if groups.len() < 2 {
            return Err(ModelError::InsufficientData {
                n_samples: groups.len(),
                n_predictors: random_terms.len(),
            });
        }

        tracing::debug!(
            model = spec.name(),
            n_obs,
            n_groups = groups.len(),
            n_fixed = p,
            "built grouped design"
        );

        Ok(Self {
            coefficient_names,
            random_terms,
            subject: spec.grouping().subject.clone(),
            nested_label: spec.grouping().nested_label(),
            groups,
            n_obs,
        })
    }

    /// Fixed-effect coefficient names, `Intercept` first
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Subject-level random terms, one per `Z` column
    pub fn random_terms(&self) -> &[String] {
        &self.random_terms
    }

    /// Subject grouping column
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// `subject:level` label of the nested level, if any
    pub fn nested_label(&self) -> Option<&str> {
        self.nested_label.as_deref()
    }

    /// Whether the design carries a nested random intercept
    pub fn has_nested(&self) -> bool {
        self.nested_label.is_some()
    }

    /// Per-subject blocks
    pub fn groups(&self) -> &[GroupBlock] {
        &self.groups
    }

    /// Number of observations
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    /// Number of fixed-effect columns
    pub fn n_fixed(&self) -> usize {
        self.coefficient_names.len()
    }

    /// Number of subject-level random terms
    pub fn n_random(&self) -> usize {
        self.random_terms.len()
    }

    /// Number of subjects
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    /// Random terms a likelihood-ratio test can remove, in report order
    pub fn removable_terms(&self) -> Vec<RandomTerm> {
        let mut terms: Vec<RandomTerm> = self
            .random_terms
            .iter()
            .rev()
            .cloned()
            .map(RandomTerm::Subject)
            .collect();
        if self.has_nested() {
            terms.push(RandomTerm::Nested);
        }
        terms
    }

    /// The same design with one random term removed
    pub fn without(&self, term: &RandomTerm) -> Result<Self> {
        let mut reduced = self.clone();
        match term {
            RandomTerm::Nested => {
                if !self.has_nested() {
                    return Err(ModelError::UnknownParameter {
                        name: "nested intercept".to_string(),
                    });
                }
                reduced.nested_label = None;
                for group in &mut reduced.groups {
                    group.nested = vec![0; group.len()];
                    group.n_nested = 0;
                }
            }
            RandomTerm::Subject(name) => {
                let k = self
                    .random_terms
                    .iter()
                    .position(|t| t == name)
                    .ok_or_else(|| ModelError::UnknownParameter { name: name.clone() })?;
                let keep: Vec<usize> = (0..self.n_random()).filter(|&i| i != k).collect();
                reduced.random_terms.remove(k);
                for group in &mut reduced.groups {
                    group.z = group.z.select(ndarray::Axis(1), &keep);
                }
            }
        }
        Ok(reduced)
    }
}

impl std::fmt::Display for RandomTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RandomTerm::Subject(name) => write!(f, "{}", name),
            RandomTerm::Nested => write!(f, "nested intercept"),
        }
    }
}

fn present_levels(codes: &Array1<u32>, n_levels: usize) -> Vec<usize> {
    let mut seen = vec![false; n_levels];
    for &code in codes {
        if code != MISSING_CODE {
            seen[code as usize] = true;
        }
    }
    (0..n_levels).filter(|&l| seen[l]).collect()
}

fn codes_of(series: &Series) -> Result<(Array1<u32>, Vec<String>)> {
    match series {
        Series::Categorical(codes, levels) => Ok((codes.clone(), levels.clone())),
        other => Err(ModelError::numerical(
            format!("expected categorical grouping, found {}", other.dtype()),
            "design",
        )),
    }
}

/// Map global level codes to a dense `0..k` index in first-seen order
fn local_index(codes: impl Iterator<Item = u32>) -> (Vec<usize>, usize) {
    let mut map: BTreeMap<u32, usize> = BTreeMap::new();
    let mut index = Vec::new();
    for code in codes {
        let next = map.len();
        index.push(*map.entry(code).or_insert(next));
    }
    let n = map.len();
    (index, n)
}
