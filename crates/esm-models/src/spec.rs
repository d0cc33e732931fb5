//! Structured model specifications
//!
//! A [`ModelSpec`] names the outcome, the ordered fixed-effect covariates, the
//! grouping structure and the covariates that get subject-level random slopes.
//! Every subject also gets a random intercept. Specifications are validated
//! when built, so an estimator never sees an inconsistent one.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::base::{ModelError, Result};

/// Reserved coefficient name for the intercept
pub const INTERCEPT: &str = "Intercept";

/// Grouping structure: subjects, optionally with a second level nested in them
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grouping {
    /// Subject identifier column
    pub subject: String,
    /// Column whose levels nest within subject (gets its own random intercept)
    pub nested: Option<String>,
}

impl Grouping {
    /// Label for the nested level, `subject:day` style
    pub fn nested_label(&self) -> Option<String> {
        self.nested
            .as_ref()
            .map(|nested| format!("{}:{}", self.subject, nested))
    }
}

/// Declarative description of one hierarchical linear model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSpec {
    name: String,
    outcome: String,
    fixed_effects: Vec<String>,
    grouping: Grouping,
    random_slopes: Vec<String>,
}

impl ModelSpec {
    /// Start building a specification for `outcome`
    pub fn builder(name: impl Into<String>, outcome: impl Into<String>) -> ModelSpecBuilder {
        ModelSpecBuilder {
            name: name.into(),
            outcome: outcome.into(),
            fixed_effects: Vec::new(),
            subject: None,
            nested: None,
            random_slopes: Vec::new(),
        }
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Outcome column
    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    /// Fixed-effect covariates in model order (intercept excluded)
    pub fn fixed_effects(&self) -> &[String] {
        &self.fixed_effects
    }

    /// Grouping structure
    pub fn grouping(&self) -> &Grouping {
        &self.grouping
    }

    /// Covariates with subject-level random slopes
    pub fn random_slopes(&self) -> &[String] {
        &self.random_slopes
    }

    /// Random terms at the subject level, intercept first
    pub fn random_terms(&self) -> Vec<String> {
        std::iter::once(INTERCEPT.to_string())
            .chain(self.random_slopes.iter().cloned())
            .collect()
    }

    /// Every data column the model reads
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut columns = vec![self.outcome.as_str(), self.grouping.subject.as_str()];
        if let Some(nested) = &self.grouping.nested {
            columns.push(nested.as_str());
        }
        columns.extend(self.fixed_effects.iter().map(String::as_str));
        columns
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ ", self.outcome)?;
        if self.fixed_effects.is_empty() {
            write!(f, "1")?;
        } else {
            write!(f, "{}", self.fixed_effects.join(" + "))?;
        }
        let mut random = vec!["1".to_string()];
        random.extend(self.random_slopes.iter().cloned());
        write!(f, " + ({} | {})", random.join(" + "), self.grouping.subject)?;
        if let Some(label) = self.grouping.nested_label() {
            write!(f, " + (1 | {})", label)?;
        }
        Ok(())
    }
}

/// Builder for [`ModelSpec`]
#[derive(Debug, Clone)]
pub struct ModelSpecBuilder {
    name: String,
    outcome: String,
    fixed_effects: Vec<String>,
    subject: Option<String>,
    nested: Option<String>,
    random_slopes: Vec<String>,
}

impl ModelSpecBuilder {
    /// Append fixed-effect covariates
    pub fn fixed<I, S>(mut self, covariates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fixed_effects
            .extend(covariates.into_iter().map(Into::into));
        self
    }

    /// Set the subject grouping column
    pub fn group_by(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Add a second grouping level nested within subject
    pub fn nested(mut self, level: impl Into<String>) -> Self {
        self.nested = Some(level.into());
        self
    }

    /// Give a covariate a subject-level random slope
    pub fn random_slope(mut self, covariate: impl Into<String>) -> Self {
        self.random_slopes.push(covariate.into());
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<ModelSpec> {
        if self.outcome.trim().is_empty() {
            return Err(ModelError::invalid_spec("outcome name is empty"));
        }

        let subject = self
            .subject
            .ok_or_else(|| ModelError::invalid_spec("a subject grouping column is required"))?;

        let mut seen = HashSet::new();
        for covariate in &self.fixed_effects {
            if covariate == INTERCEPT {
                return Err(ModelError::invalid_spec(format!(
                    "'{}' is reserved for the intercept",
                    INTERCEPT
                )));
            }
            if !seen.insert(covariate.as_str()) {
                return Err(ModelError::invalid_spec(format!(
                    "fixed effect '{}' listed twice",
                    covariate
                )));
            }
            if *covariate == self.outcome {
                return Err(ModelError::invalid_spec(format!(
                    "outcome '{}' cannot also be a covariate",
                    covariate
                )));
            }
            if *covariate == subject || self.nested.as_ref() == Some(covariate) {
                return Err(ModelError::invalid_spec(format!(
                    "grouping column '{}' cannot be a fixed effect",
                    covariate
                )));
            }
        }

        let mut seen_slopes = HashSet::new();
        for slope in &self.random_slopes {
            if !self.fixed_effects.contains(slope) {
                return Err(ModelError::invalid_spec(format!(
                    "random slope '{}' is not among the fixed effects",
                    slope
                )));
            }
            if !seen_slopes.insert(slope.as_str()) {
                return Err(ModelError::invalid_spec(format!(
                    "random slope '{}' listed twice",
                    slope
                )));
            }
        }

        if self.nested.as_ref() == Some(&subject) {
            return Err(ModelError::invalid_spec(
                "nested level must differ from the subject column",
            ));
        }

        Ok(ModelSpec {
            name: self.name,
            outcome: self.outcome,
            fixed_effects: self.fixed_effects,
            grouping: Grouping {
                subject,
                nested: self.nested,
            },
            random_slopes: self.random_slopes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ModelSpecBuilder {
        ModelSpec::builder("m1", "share_negative")
            .fixed(["psychopathology", "intensity_negative"])
            .group_by("subject")
    }

    #[test]
    fn test_valid_spec_renders_formula() {
        let spec = base().random_slope("intensity_negative").build().unwrap();
        assert_eq!(
            spec.to_string(),
            "share_negative ~ psychopathology + intensity_negative \
             + (1 + intensity_negative | subject)"
        );
        assert_eq!(spec.random_terms(), vec!["Intercept", "intensity_negative"]);
    }

    #[test]
    fn test_random_slope_must_be_fixed_effect() {
        let err = base().random_slope("age").build().unwrap_err();
        assert!(matches!(err, ModelError::InvalidSpec { .. }));
    }

    #[test]
    fn test_grouping_required() {
        let err = ModelSpec::builder("m", "y").fixed(["x"]).build().unwrap_err();
        assert!(matches!(err, ModelError::InvalidSpec { .. }));
    }

    #[test]
    fn test_duplicates_and_reserved_names_rejected() {
        assert!(base().fixed(["psychopathology"]).build().is_err());
        assert!(base().fixed(["Intercept"]).build().is_err());
        assert!(base().fixed(["share_negative"]).build().is_err());
        assert!(base().nested("subject").build().is_err());
    }

    #[test]
    fn test_nested_level_in_formula() {
        let spec = base().nested("day").build().unwrap();
        assert!(spec.to_string().ends_with("(1 | subject) + (1 | subject:day)"));
        assert_eq!(
            spec.referenced_columns(),
            vec!["share_negative", "subject", "day", "psychopathology", "intensity_negative"]
        );
    }
}
