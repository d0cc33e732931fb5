//! Run configuration
//!
//! Every field has a default, so an empty TOML file is a valid configuration:
//!
//! ```toml
//! frequentist_only = false
//!
//! [columns]
//! subject = "subject"
//! day = "day"
//! categorical = ["gender"]
//!
//! [optimizer]
//! method = "nelder_mead"
//! max_iter = 5000
//!
//! [sampler]
//! chains = 4
//! warmup = 1000
//! iterations = 2000
//! seed = 20240417
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use esm_models::{ColumnRoles, ModelError, OptimizerConfig, SamplerConfig};

use crate::error::{PipelineError, Result};

/// Immutable settings for one pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Structural column roles
    pub columns: ColumnRoles,
    /// REML optimizer settings
    pub optimizer: OptimizerConfig,
    /// NUTS settings
    pub sampler: SamplerConfig,
    /// Skip every Bayesian fit
    pub frequentist_only: bool,
}

impl RunConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| PipelineError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "loaded run configuration");
        Ok(config)
    }

    /// Check the optimizer and sampler settings
    pub fn validate(&self) -> std::result::Result<(), ModelError> {
        let optimizer = &self.optimizer;
        if optimizer.max_iter == 0 {
            return Err(invalid("optimizer.max_iter must be at least 1"));
        }
        if !(optimizer.f_tol > 0.0 && optimizer.x_tol > 0.0 && optimizer.initial_step > 0.0) {
            return Err(invalid(
                "optimizer tolerances and initial_step must be positive",
            ));
        }
        if self.columns.subject.trim().is_empty() {
            return Err(invalid("columns.subject must name a column"));
        }
        if !self.frequentist_only {
            self.sampler.validate()?;
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ModelError {
    ModelError::InvalidConfig {
        message: message.to_string(),
    }
}
