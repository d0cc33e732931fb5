//! CSV ingestion
//!
//! Every column whose present cells all parse as numbers becomes a float
//! column; anything else is kept as strings. Cells matching one of
//! [`MISSING_MARKERS`] are missing.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::*;

/// Cell contents treated as missing
pub const MISSING_MARKERS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "."];

/// Options for [`DataFrame::read_csv_with`]
#[derive(Debug, Clone)]
pub struct CsvOptions {
    /// Field delimiter
    pub delimiter: u8,
    /// Columns always read as strings, even when they look numeric
    pub string_columns: Vec<String>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            string_columns: Vec::new(),
        }
    }
}

fn is_missing_cell(cell: &str) -> bool {
    MISSING_MARKERS.contains(&cell.trim())
}

impl DataFrame {
    /// Read a CSV file with a header row
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        Self::read_csv_with(path, &CsvOptions::default())
    }

    /// Read a CSV file with explicit options
    pub fn read_csv_with(path: impl AsRef<Path>, options: &CsvOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let df = Self::from_csv_reader(file, options)?;
        tracing::debug!(
            path = %path.display(),
            rows = df.nrows(),
            cols = df.ncols(),
            "loaded CSV"
        );
        Ok(df)
    }

    /// Parse CSV from any reader
    pub fn from_csv_reader<R: Read>(reader: R, options: &CsvOptions) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];

        for record in rdr.records() {
            let record = record?;
            if record.len() != headers.len() {
                return Err(DataError::DimensionMismatch {
                    expected: format!("{} fields", headers.len()),
                    actual: format!("{} fields", record.len()),
                });
            }
            for (column, cell) in cells.iter_mut().zip(record.iter()) {
                column.push(cell.to_string());
            }
        }

        let mut builder = DataFrameBuilder::new();
        for (name, column) in headers.into_iter().zip(cells) {
            let series = if options.string_columns.contains(&name) {
                string_series(column)
            } else {
                parse_numeric(&column).unwrap_or_else(|| string_series(column))
            };
            builder = builder.with_column(name, series)?;
        }
        builder.build()
    }
}

fn parse_numeric(column: &[String]) -> Option<Series> {
    let values: Option<Vec<f64>> = column
        .iter()
        .map(|cell| {
            if is_missing_cell(cell) {
                Some(f64::NAN)
            } else {
                cell.trim().parse::<f64>().ok()
            }
        })
        .collect();
    values.map(Series::float)
}

fn string_series(column: Vec<String>) -> Series {
    Series::string(
        column
            .into_iter()
            .map(|cell| if is_missing_cell(&cell) { String::new() } else { cell })
            .collect::<Vec<_>>(),
    )
}
