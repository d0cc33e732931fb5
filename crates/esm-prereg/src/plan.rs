//! The preregistered analysis plan
//!
//! Six subject-level random-slope models and ten hypotheses. Models 1–4 are
//! confirmatory and carry both prior variants; models 5–6 are exploratory and
//! are fitted under the non-informative set only.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use esm_models::{Comparison, Hypothesis, INTERCEPT, ModelError, ModelSpec, Prior, PriorSet};

/// Number of preregistered hypotheses
pub const N_HYPOTHESES: usize = 10;

pub const SUBJECT: &str = "subject";
pub const PSYCHOPATHOLOGY: &str = "psychopathology";
pub const AGE: &str = "age";
pub const GENDER: &str = "gender";
pub const INTENSITY_NEGATIVE: &str = "intensity_negative";
pub const INTENSITY_POSITIVE: &str = "intensity_positive";
pub const RUMINATION: &str = "rumination";
pub const SAVOURING: &str = "savouring";
pub const SHARE_NEGATIVE: &str = "share_negative";
pub const SHARE_POSITIVE: &str = "share_positive";

/// Estimator variant of a results row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Variant {
    Frequentist,
    NonInformative,
    Informed,
}

impl Variant {
    /// Row order within one hypothesis
    pub const ALL: [Variant; 3] = [
        Variant::Frequentist,
        Variant::NonInformative,
        Variant::Informed,
    ];

    /// Value of the `Analysis type` column
    pub fn label(self) -> &'static str {
        match self {
            Variant::Frequentist => "Frequentist",
            Variant::NonInformative => "Bayesian (non-informative priors)",
            Variant::Informed => "Bayesian (informed priors)",
        }
    }

    pub fn is_bayesian(self) -> bool {
        self != Variant::Frequentist
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One model of the plan with its prior sets
#[derive(Debug, Clone)]
pub struct PlannedModel {
    /// 1-based model number
    pub index: usize,
    pub spec: ModelSpec,
    pub non_informative: PriorSet,
    /// Present for confirmatory models only
    pub informed: Option<PriorSet>,
}

impl PlannedModel {
    /// Prior set for a Bayesian variant; `None` for frequentist or unmapped
    pub fn prior_set(&self, variant: Variant) -> Option<&PriorSet> {
        match variant {
            Variant::Frequentist => None,
            Variant::NonInformative => Some(&self.non_informative),
            Variant::Informed => self.informed.as_ref(),
        }
    }

    pub fn is_confirmatory(&self) -> bool {
        self.informed.is_some()
    }

    /// Estimator variants this model is fitted under
    pub fn variants(&self) -> impl Iterator<Item = Variant> + '_ {
        Variant::ALL
            .into_iter()
            .filter(|v| !v.is_bayesian() || self.prior_set(*v).is_some())
    }
}

/// What a hypothesis tests
#[derive(Debug, Clone, PartialEq)]
pub enum HypothesisTest {
    /// Inequality or point hypothesis on a fixed effect
    FixedEffect(Hypothesis),
    /// Nonzero variance of a subject-level random slope, by LR test only
    RandomSlope { covariate: String },
}

/// One preregistered hypothesis
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedHypothesis {
    /// 1-based hypothesis number
    pub id: usize,
    /// Model it is tested on
    pub model: usize,
    pub test: HypothesisTest,
}

impl PlannedHypothesis {
    pub fn fixed(id: usize, model: usize, coefficient: &str, comparison: Comparison) -> Self {
        Self {
            id,
            model,
            test: HypothesisTest::FixedEffect(Hypothesis::new(coefficient, comparison, 0.0)),
        }
    }

    pub fn random_slope(id: usize, model: usize, covariate: &str) -> Self {
        Self {
            id,
            model,
            test: HypothesisTest::RandomSlope {
                covariate: covariate.to_string(),
            },
        }
    }

    /// Null hypothesis label
    pub fn h0(&self) -> String {
        match &self.test {
            HypothesisTest::FixedEffect(h) if h.comparison == Comparison::Equal => h.to_string(),
            HypothesisTest::FixedEffect(h) => h.negation(),
            HypothesisTest::RandomSlope { covariate } => {
                format!("sd({}:{}) = 0", SUBJECT, covariate)
            }
        }
    }

    /// Alternative hypothesis label
    pub fn h1(&self) -> String {
        match &self.test {
            HypothesisTest::FixedEffect(h) if h.comparison == Comparison::Equal => h.negation(),
            HypothesisTest::FixedEffect(h) => h.to_string(),
            HypothesisTest::RandomSlope { covariate } => {
                format!("sd({}:{}) > 0", SUBJECT, covariate)
            }
        }
    }

    /// Whether the hypothesis has a row value under `variant` for `model`
    pub fn applies_to(&self, variant: Variant, model: &PlannedModel) -> bool {
        match (&self.test, variant) {
            (_, Variant::Frequentist) => true,
            (HypothesisTest::RandomSlope { .. }, _) => false,
            (HypothesisTest::FixedEffect(_), v) => model.prior_set(v).is_some(),
        }
    }
}

/// Models and hypotheses of one analysis
#[derive(Debug, Clone)]
pub struct AnalysisPlan {
    models: Vec<PlannedModel>,
    hypotheses: Vec<PlannedHypothesis>,
}

impl AnalysisPlan {
    /// Cross-check hypotheses against their models
    pub fn new(
        models: Vec<PlannedModel>,
        hypotheses: Vec<PlannedHypothesis>,
    ) -> Result<Self, ModelError> {
        let invalid = |message: String| ModelError::InvalidConfig { message };

        let mut model_ids = HashSet::new();
        for model in &models {
            if !model_ids.insert(model.index) {
                return Err(invalid(format!("model {} defined twice", model.index)));
            }
        }

        let mut hypothesis_ids = HashSet::new();
        for h in &hypotheses {
            if !(1..=N_HYPOTHESES).contains(&h.id) || !hypothesis_ids.insert(h.id) {
                return Err(invalid(format!("hypothesis id {} is out of range or repeated", h.id)));
            }
            let model = models
                .iter()
                .find(|m| m.index == h.model)
                .ok_or_else(|| {
                    invalid(format!(
                        "hypothesis {} refers to unknown model {}",
                        h.id, h.model
                    ))
                })?;
            let known = match &h.test {
                HypothesisTest::FixedEffect(hypothesis) => {
                    hypothesis.coefficient == INTERCEPT
                        || model.spec.fixed_effects().contains(&hypothesis.coefficient)
                }
                HypothesisTest::RandomSlope { covariate } => {
                    model.spec.random_slopes().contains(covariate)
                }
            };
            if !known {
                return Err(invalid(format!(
                    "hypothesis {} names a term model {} does not have",
                    h.id, h.model
                )));
            }
        }

        Ok(Self { models, hypotheses })
    }

    /// The six preregistered models and ten hypotheses
    pub fn preregistered() -> Result<Self, ModelError> {
        let models = vec![
            confirmatory(1, SHARE_NEGATIVE, INTENSITY_NEGATIVE, 0.2)?,
            confirmatory(2, SHARE_POSITIVE, INTENSITY_POSITIVE, -0.2)?,
            confirmatory(3, RUMINATION, INTENSITY_NEGATIVE, 0.3)?,
            confirmatory(4, SAVOURING, INTENSITY_POSITIVE, -0.2)?,
            exploratory(5, RUMINATION, SHARE_NEGATIVE, INTENSITY_NEGATIVE)?,
            exploratory(6, SAVOURING, SHARE_POSITIVE, INTENSITY_POSITIVE)?,
        ];

        let hypotheses = vec![
            PlannedHypothesis::fixed(1, 1, PSYCHOPATHOLOGY, Comparison::Greater),
            PlannedHypothesis::fixed(2, 2, PSYCHOPATHOLOGY, Comparison::Less),
            PlannedHypothesis::fixed(3, 1, INTENSITY_NEGATIVE, Comparison::Greater),
            PlannedHypothesis::fixed(4, 2, INTENSITY_POSITIVE, Comparison::Greater),
            PlannedHypothesis::fixed(5, 3, PSYCHOPATHOLOGY, Comparison::Greater),
            PlannedHypothesis::random_slope(6, 3, INTENSITY_NEGATIVE),
            PlannedHypothesis::fixed(7, 4, PSYCHOPATHOLOGY, Comparison::Less),
            PlannedHypothesis::fixed(8, 5, SHARE_NEGATIVE, Comparison::Less),
            PlannedHypothesis::fixed(9, 6, SHARE_POSITIVE, Comparison::Greater),
            PlannedHypothesis::fixed(10, 6, PSYCHOPATHOLOGY, Comparison::Equal),
        ];

        Self::new(models, hypotheses)
    }

    pub fn models(&self) -> &[PlannedModel] {
        &self.models
    }

    pub fn hypotheses(&self) -> &[PlannedHypothesis] {
        &self.hypotheses
    }

    pub fn model(&self, index: usize) -> Option<&PlannedModel> {
        self.models.iter().find(|m| m.index == index)
    }

    pub fn hypothesis(&self, id: usize) -> Option<&PlannedHypothesis> {
        self.hypotheses.iter().find(|h| h.id == id)
    }
}

fn model_name(index: usize) -> String {
    format!("model_{}", index)
}

/// Unit-scale zero-centred normal on every coefficient, treatment-coded levels included
fn non_informative(fixed: &[&str]) -> Result<PriorSet, ModelError> {
    PriorSet::non_informative(std::iter::once(INTERCEPT).chain(fixed.iter().copied()))
        .with_default(Prior::normal(0.0, 1.0))
}

fn confirmatory(
    index: usize,
    outcome: &str,
    intensity: &str,
    psychopathology_location: f64,
) -> Result<PlannedModel, ModelError> {
    let fixed = [PSYCHOPATHOLOGY, intensity, AGE, GENDER];
    let spec = ModelSpec::builder(model_name(index), outcome)
        .fixed(fixed)
        .group_by(SUBJECT)
        .random_slope(intensity)
        .build()?;

    // Standardized effects from the prior ESM literature
    let informed = PriorSet::new("informed")
        .with_prior(INTERCEPT, Prior::student_t(3.0, 0.0, 2.5))?
        .with_prior(PSYCHOPATHOLOGY, Prior::normal(psychopathology_location, 0.1))?
        .with_prior(intensity, Prior::normal(0.3, 0.1))?
        .with_prior(AGE, Prior::normal(0.0, 0.1))?
        .with_default(Prior::normal(0.0, 1.0))?;

    Ok(PlannedModel {
        index,
        spec,
        non_informative: non_informative(&fixed)?,
        informed: Some(informed),
    })
}

fn exploratory(
    index: usize,
    outcome: &str,
    sharing: &str,
    intensity: &str,
) -> Result<PlannedModel, ModelError> {
    let fixed = [sharing, PSYCHOPATHOLOGY, intensity];
    let spec = ModelSpec::builder(model_name(index), outcome)
        .fixed(fixed)
        .group_by(SUBJECT)
        .random_slope(sharing)
        .build()?;

    Ok(PlannedModel {
        index,
        spec,
        non_informative: non_informative(&fixed)?,
        informed: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preregistered_shape() {
        let plan = AnalysisPlan::preregistered().unwrap();
        assert_eq!(plan.models().len(), 6);
        assert_eq!(plan.hypotheses().len(), N_HYPOTHESES);
        assert_eq!(plan.models().iter().filter(|m| m.is_confirmatory()).count(), 4);

        let model_3 = plan.model(3).unwrap();
        assert_eq!(model_3.spec.outcome(), RUMINATION);
        assert_eq!(model_3.spec.random_slopes(), [INTENSITY_NEGATIVE.to_string()]);
        assert_eq!(model_3.variants().count(), 3);
        assert_eq!(plan.model(5).unwrap().variants().count(), 2);
    }

    #[test]
    fn test_labels() {
        let plan = AnalysisPlan::preregistered().unwrap();
        let h1 = plan.hypothesis(1).unwrap();
        assert_eq!(h1.h1(), "psychopathology > 0");
        assert_eq!(h1.h0(), "psychopathology <= 0");

        let h6 = plan.hypothesis(6).unwrap();
        assert_eq!(h6.h1(), "sd(subject:intensity_negative) > 0");

        let h10 = plan.hypothesis(10).unwrap();
        assert_eq!(h10.h0(), "psychopathology = 0");
        assert_eq!(h10.h1(), "psychopathology != 0");
    }

    #[test]
    fn test_applicability() {
        let plan = AnalysisPlan::preregistered().unwrap();
        let h6 = plan.hypothesis(6).unwrap();
        let model_3 = plan.model(3).unwrap();
        assert!(h6.applies_to(Variant::Frequentist, model_3));
        assert!(!h6.applies_to(Variant::NonInformative, model_3));

        let h9 = plan.hypothesis(9).unwrap();
        let model_6 = plan.model(6).unwrap();
        assert!(h9.applies_to(Variant::NonInformative, model_6));
        assert!(!h9.applies_to(Variant::Informed, model_6));
    }

    #[test]
    fn test_rejects_unknown_terms() {
        let plan = AnalysisPlan::preregistered().unwrap();
        let models = plan.models().to_vec();
        let bad = vec![PlannedHypothesis::fixed(1, 5, AGE, Comparison::Greater)];
        assert!(AnalysisPlan::new(models.clone(), bad).is_err());

        let repeated = vec![
            PlannedHypothesis::fixed(1, 1, AGE, Comparison::Greater),
            PlannedHypothesis::fixed(1, 1, AGE, Comparison::Less),
        ];
        assert!(AnalysisPlan::new(models, repeated).is_err());
    }
}
