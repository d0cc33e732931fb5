//! Core data structures for experience-sampling analyses
//!
//! This crate provides the tabular layer the model crates build on: typed
//! columns with explicit missing values, a column-ordered data frame, and CSV
//! ingestion.

pub mod data;

pub use data::{DataError, DataFrame, DataFrameBuilder, Series, SeriesValue};
