//! Preregistered ESM analysis
//!
//! [`AnalysisPlan::preregistered`] describes six linear mixed models and ten
//! hypotheses. [`Pipeline`] fits every model by REML and by NUTS under each
//! applicable prior set, tests the hypotheses and assembles the fixed-shape
//! [`ResultsTable`].

pub mod config;
pub mod error;
pub mod pipeline;
pub mod plan;
pub mod results;

pub use config::RunConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{Fit, FitUnit, Pipeline};
pub use plan::{
    AnalysisPlan, HypothesisTest, N_HYPOTHESES, PlannedHypothesis, PlannedModel, Variant,
};
pub use results::{
    HypothesisResult, ResultRow, ResultsAggregator, ResultsTable, RowStatus, TestOutcome,
};
