//! Series data structure for holding homogeneous data
//!
//! A Series is a one-dimensional array that can hold data of a specific type.
//! It's the building block of DataFrames. Numeric statistics skip missing
//! values.

use super::*;

use ndarray::Array1;
use std::collections::{BTreeSet, HashMap};

/// Categorical code reserved for a missing level
pub const MISSING_CODE: u32 = u32::MAX;

/// A Series is a typed, one-dimensional array of data
#[derive(Clone, Debug, PartialEq)]
pub enum Series {
    /// Floating point numbers (f64), `NaN` marks a missing value
    Float(FloatArray),
    /// Integer numbers (i64)
    Int(IntArray),
    /// String values, empty string marks a missing value
    String(StringArray),
    /// Categorical data (encoded as u32)
    Categorical(Array1<u32>, Vec<String>), // values, categories
}

impl Series {
    /// Create a new Float series
    pub fn float(data: impl Into<FloatArray>) -> Self {
        Series::Float(data.into())
    }

    /// Create a new Int series
    pub fn int(data: impl Into<IntArray>) -> Self {
        Series::Int(data.into())
    }

    /// Create a new String series
    pub fn string(data: impl Into<StringArray>) -> Self {
        Series::String(data.into())
    }

    /// Create a new Categorical series
    ///
    /// Levels are sorted; empty strings are encoded as missing.
    pub fn categorical<T: AsRef<str>>(data: &[T]) -> Self {
        let categories: Vec<String> = data
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| !s.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();

        let category_map: HashMap<&str, u32> = categories
            .iter()
            .enumerate()
            .map(|(i, cat)| (cat.as_str(), i as u32))
            .collect();

        let encoded: Array1<u32> = data
            .iter()
            .map(|s| {
                category_map
                    .get(s.as_ref())
                    .copied()
                    .unwrap_or(MISSING_CODE)
            })
            .collect();

        Series::Categorical(encoded, categories)
    }

    /// Get the length of the series
    pub fn len(&self) -> usize {
        match self {
            Series::Float(arr) => arr.len(),
            Series::Int(arr) => arr.len(),
            Series::String(arr) => arr.len(),
            Series::Categorical(arr, _) => arr.len(),
        }
    }

    /// Check if the series is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the type name of the series
    pub fn dtype(&self) -> &'static str {
        match self {
            Series::Float(_) => "float64",
            Series::Int(_) => "int64",
            Series::String(_) => "string",
            Series::Categorical(_, _) => "categorical",
        }
    }

    /// Whether the series holds numbers a model matrix can use directly
    pub fn is_numeric(&self) -> bool {
        matches!(self, Series::Float(_) | Series::Int(_))
    }

    /// Get a value at index, `None` when out of bounds or missing
    pub fn get(&self, idx: usize) -> Option<SeriesValue> {
        if idx >= self.len() || self.is_missing(idx) {
            return None;
        }

        match self {
            Series::Float(arr) => arr.get(idx).map(|&v| SeriesValue::Float(v)),
            Series::Int(arr) => arr.get(idx).map(|&v| SeriesValue::Int(v)),
            Series::String(arr) => arr.get(idx).map(|v| SeriesValue::String(v.clone())),
            Series::Categorical(arr, cats) => arr
                .get(idx)
                .and_then(|&code| cats.get(code as usize))
                .map(|cat| SeriesValue::String(cat.clone())),
        }
    }

    /// Whether the value at `idx` is missing
    pub fn is_missing(&self, idx: usize) -> bool {
        match self {
            Series::Float(arr) => arr.get(idx).is_some_and(|v| v.is_nan()),
            Series::Int(_) => false,
            Series::String(arr) => arr.get(idx).is_some_and(|v| v.is_empty()),
            Series::Categorical(arr, _) => arr.get(idx).is_some_and(|&c| c == MISSING_CODE),
        }
    }

    /// Mask with `true` for every present value
    pub fn present_mask(&self) -> Vec<bool> {
        (0..self.len()).map(|i| !self.is_missing(i)).collect()
    }

    /// Number of missing values
    pub fn missing_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_missing(i)).count()
    }

    /// Filter the series with a boolean mask
    pub fn filter(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.len() {
            return Err(DataError::DimensionMismatch {
                expected: format!("mask length {}", self.len()),
                actual: format!("mask length {}", mask.len()),
            });
        }

        fn keep<'a, T: 'a + Clone>(
            values: impl Iterator<Item = &'a T> + 'a,
            mask: &'a [bool],
        ) -> impl Iterator<Item = T> + 'a {
            values
                .zip(mask.iter())
                .filter(|(_, keep)| **keep)
                .map(|(val, _)| val.clone())
        }

        Ok(match self {
            Series::Float(arr) => Series::Float(keep(arr.iter(), mask).collect()),
            Series::Int(arr) => Series::Int(keep(arr.iter(), mask).collect()),
            Series::String(arr) => Series::String(keep(arr.iter(), mask).collect()),
            Series::Categorical(arr, cats) => {
                Series::Categorical(keep(arr.iter(), mask).collect(), cats.clone())
            }
        })
    }

    /// Numeric values as floats, missing values as `NaN`
    pub fn to_floats(&self) -> Result<FloatArray> {
        match self {
            Series::Float(arr) => Ok(arr.clone()),
            Series::Int(arr) => Ok(arr.mapv(|v| v as f64)),
            Series::String(_) => Err(DataError::NonNumericData("string")),
            Series::Categorical(_, _) => Err(DataError::NonNumericData("categorical")),
        }
    }

    /// Convert to an unordered categorical series
    ///
    /// Numbers are rendered as text labels so that no numeric encoding is
    /// carried into the levels.
    pub fn to_categorical(&self) -> Series {
        match self {
            Series::Categorical(_, _) => self.clone(),
            Series::String(arr) => Series::categorical(arr.as_slice()),
            Series::Int(arr) => {
                let labels: Vec<String> = arr.iter().map(|v| v.to_string()).collect();
                Series::categorical(labels.as_slice())
            }
            Series::Float(arr) => {
                let labels: Vec<String> = arr
                    .iter()
                    .map(|v| if v.is_nan() { String::new() } else { v.to_string() })
                    .collect();
                Series::categorical(labels.as_slice())
            }
        }
    }

    /// Category labels of a categorical series
    pub fn categories(&self) -> Option<&[String]> {
        match self {
            Series::Categorical(_, cats) => Some(cats),
            _ => None,
        }
    }

    /// Category codes of a categorical series
    pub fn codes(&self) -> Option<&Array1<u32>> {
        match self {
            Series::Categorical(codes, _) => Some(codes),
            _ => None,
        }
    }

    /// Compute mean of present values
    pub fn mean(&self) -> Result<f64> {
        let values = self.present_floats()?;
        if values.is_empty() {
            return Ok(f64::NAN);
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Compute standard deviation of present values
    pub fn std(&self, ddof: usize) -> Result<f64> {
        let values = self.present_floats()?;
        if values.len() <= ddof {
            return Ok(f64::NAN);
        }
        Ok(FloatArray::from(values).std(ddof as f64))
    }

    fn present_floats(&self) -> Result<Vec<f64>> {
        Ok(self
            .to_floats()?
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .collect())
    }
}

/// Enum for type-safe value access
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Float(f64),
    Int(i64),
    String(String),
}

impl std::fmt::Display for SeriesValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeriesValue::Float(v) => write!(f, "{}", v),
            SeriesValue::Int(v) => write!(f, "{}", v),
            SeriesValue::String(v) => write!(f, "{}", v),
        }
    }
}
