//! # Block Table Loading and Validation
//!
//! This module is the exclusive entry point for the preprocessed dose-response table.
//! It reads a tab-separated file, validates it against a strict schema and splits it
//! into per-experiment `Block`s backed by `ndarray` storage.
//!
//! - Strict Schema: `block_id`, `conc1`..`concN` (N >= 2) and `response` are required.
//!   `response_origin` holds the raw, non-adjusted response and is required only when
//!   the raw column is selected.
//! - User-Centric Errors: every failure here is an input-shape problem and is fatal.
//!   The `DataError` enum is designed to provide clear, actionable feedback.

use crate::types::{DoseResponseCurve, DoseResponsePoint};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

pub const BLOCK_ID_COLUMN: &str = "block_id";
pub const RESPONSE_COLUMN: &str = "response";
pub const RAW_RESPONSE_COLUMN: &str = "response_origin";
pub const CONC_PREFIX: &str = "conc";

/// A comprehensive error type for all table loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. Impute incomplete dose matrices before scoring."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("A dose-response block needs at least 2 drug concentration columns, found {0}.")]
    TooFewDrugs(usize),
    #[error("Negative concentration {value} found in column '{column}' at row {row}.")]
    NegativeDose {
        column: String,
        value: f64,
        row: usize,
    },
    #[error("The input table contains no data rows.")]
    EmptyTable,
    #[error(
        "Block '{block_id}' has {rows} concentration rows but {responses} responses."
    )]
    ShapeMismatch {
        block_id: String,
        rows: usize,
        responses: usize,
    },
}

/// One drug-combination experiment: the full dose matrix and its responses.
///
/// Rows of `concs` are tested dose combinations, columns are drugs. A block is
/// replicated when at least one dose combination occurs in more than one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub block_id: String,
    concs: Array2<f64>,
    responses: Array1<f64>,
    replicate: bool,
}

impl Block {
    pub fn new(
        block_id: impl Into<String>,
        concs: Array2<f64>,
        responses: Array1<f64>,
    ) -> Result<Self, DataError> {
        let block_id = block_id.into();
        if concs.ncols() < 2 {
            return Err(DataError::TooFewDrugs(concs.ncols()));
        }
        if concs.nrows() != responses.len() {
            return Err(DataError::ShapeMismatch {
                block_id,
                rows: concs.nrows(),
                responses: responses.len(),
            });
        }
        if concs.nrows() == 0 {
            return Err(DataError::EmptyTable);
        }
        for ((row, drug), &value) in concs.indexed_iter() {
            if !value.is_finite() {
                return Err(DataError::NonFiniteValuesFound(format!("{CONC_PREFIX}{}", drug + 1)));
            }
            if value < 0.0 {
                return Err(DataError::NegativeDose {
                    column: format!("{CONC_PREFIX}{}", drug + 1),
                    value,
                    row: row + 1,
                });
            }
        }
        if responses.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(RESPONSE_COLUMN.to_string()));
        }

        // -0.0 and 0.0 must group as the same dose
        let concs = concs.mapv(|v| v + 0.0);
        let mut seen = HashSet::with_capacity(concs.nrows());
        let replicate = concs
            .axis_iter(Axis(0))
            .any(|row| !seen.insert(combination_key(row)));

        Ok(Self {
            block_id,
            concs,
            responses,
            replicate,
        })
    }

    pub fn num_drugs(&self) -> usize {
        self.concs.ncols()
    }

    pub fn num_rows(&self) -> usize {
        self.concs.nrows()
    }

    pub fn concs(&self) -> ArrayView2<'_, f64> {
        self.concs.view()
    }

    pub fn responses(&self) -> ArrayView1<'_, f64> {
        self.responses.view()
    }

    pub fn is_replicated(&self) -> bool {
        self.replicate
    }

    /// The same dose matrix with a different response column. The replicate flag is kept.
    pub fn with_responses(&self, responses: Array1<f64>) -> Self {
        debug_assert_eq!(responses.len(), self.responses.len());
        Self {
            block_id: self.block_id.clone(),
            concs: self.concs.clone(),
            responses,
            replicate: self.replicate,
        }
    }

    /// The single-drug curve of `drug`: rows where every other drug is at dose 0,
    /// duplicate doses averaged, ascending by dose.
    pub fn single_drug_curve(&self, drug: usize) -> DoseResponseCurve {
        DoseResponseCurve::from_points(
            self.concs
                .axis_iter(Axis(0))
                .zip(self.responses.iter())
                .filter(|(row, _)| {
                    row.iter()
                        .enumerate()
                        .all(|(j, &dose)| j == drug || dose == 0.0)
                })
                .map(|(row, &response)| DoseResponsePoint {
                    dose: row[drug],
                    response,
                }),
        )
    }

    pub fn single_drug_curves(&self) -> Vec<DoseResponseCurve> {
        (0..self.num_drugs()).map(|i| self.single_drug_curve(i)).collect()
    }

    /// Row indices grouped by dose combination, groups in first-appearance order.
    pub fn replicate_groups(&self) -> Vec<Vec<usize>> {
        let mut index: HashMap<Vec<u64>, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (row_idx, row) in self.concs.axis_iter(Axis(0)).enumerate() {
            let key = combination_key(row);
            match index.get(&key) {
                Some(&g) => groups[g].push(row_idx),
                None => {
                    index.insert(key, groups.len());
                    groups.push(vec![row_idx]);
                }
            }
        }
        groups
    }
}

/// Bit-exact key of a dose combination.
fn combination_key(row: ArrayView1<'_, f64>) -> Vec<u64> {
    row.iter().map(|&v| v.to_bits()).collect()
}

/// Loads the block table and splits it into blocks, in first-appearance order of `block_id`.
///
/// `adjusted` selects the `response` column; otherwise `response_origin` is used.
pub fn load_blocks(path: &str, adjusted: bool) -> Result<Vec<Block>, DataError> {
    internal::load_blocks(path, adjusted)
}

/// Internal module for the table parsing logic.
mod internal {
    use super::*;

    pub(super) fn load_blocks(path: &str, adjusted: bool) -> Result<Vec<Block>, DataError> {
        fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
            let series = df.column(column_name)?;
            if series.null_count() > 0 {
                return Err(DataError::MissingValuesFound(column_name.to_string()));
            }

            let casted = series.cast(&DataType::Float64).map_err(|_| DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            })?;
            if casted.null_count() > 0 {
                return Err(DataError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "f64 (numeric)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }

            let chunked = casted.f64()?.rechunk();
            let values: Vec<f64> = chunked.into_no_null_iter().collect();
            if values.iter().any(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
            }
            Ok(values)
        }

        fn extract_block_ids(df: &DataFrame) -> Result<Vec<String>, DataError> {
            let series = df.column(BLOCK_ID_COLUMN)?;
            if series.null_count() > 0 {
                return Err(DataError::MissingValuesFound(BLOCK_ID_COLUMN.to_string()));
            }
            let casted = series.cast(&DataType::String)?;
            let ids = casted
                .str()?
                .into_iter()
                .map(|v| v.unwrap_or_default().to_string())
                .collect();
            Ok(ids)
        }

        log::info!("Loading dose-response table from '{path}'");

        let df = CsvReader::new(File::open(Path::new(path))?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
            )
            .finish()?;

        if df.height() == 0 {
            return Err(DataError::EmptyTable);
        }

        let columns_set: HashSet<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        let response_column = if adjusted {
            RESPONSE_COLUMN
        } else {
            RAW_RESPONSE_COLUMN
        };
        for required in [BLOCK_ID_COLUMN, response_column] {
            if !columns_set.contains(required) {
                return Err(DataError::ColumnNotFound(required.to_string()));
            }
        }

        let num_drugs = columns_set
            .iter()
            .filter_map(|name| name.strip_prefix(CONC_PREFIX)?.parse::<usize>().ok())
            .max()
            .unwrap_or(0);
        if num_drugs < 2 {
            return Err(DataError::TooFewDrugs(num_drugs));
        }
        let conc_names: Vec<String> = (1..=num_drugs).map(|i| format!("{CONC_PREFIX}{i}")).collect();
        for name in &conc_names {
            if !columns_set.contains(name) {
                return Err(DataError::ColumnNotFound(name.clone()));
            }
        }

        let block_ids = extract_block_ids(&df)?;
        let responses = extract_numeric_column(&df, response_column)?;
        let conc_columns = conc_names
            .iter()
            .map(|name| extract_numeric_column(&df, name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut order: Vec<String> = Vec::new();
        let mut rows_by_block: HashMap<String, Vec<usize>> = HashMap::new();
        for (row, id) in block_ids.into_iter().enumerate() {
            rows_by_block
                .entry(id.clone())
                .or_insert_with(|| {
                    order.push(id);
                    Vec::new()
                })
                .push(row);
        }

        let blocks = order
            .into_iter()
            .map(|id| {
                let rows = &rows_by_block[&id];
                let concs = Array2::from_shape_fn((rows.len(), num_drugs), |(r, j)| {
                    conc_columns[j][rows[r]]
                });
                let block_responses = rows.iter().map(|&r| responses[r]).collect::<Array1<f64>>();
                Block::new(id, concs, block_responses)
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "Loaded {} blocks with {} drugs ({} rows, response column '{}').",
            blocks.len(),
            num_drugs,
            df.height(),
            response_column
        );
        Ok(blocks)
    }
}
