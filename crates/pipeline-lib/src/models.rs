//! Core data models for the water-quality pipeline

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recognized sensor columns, in derivation order
pub const SENSOR_COLUMNS: [&str; 6] = ["DO", "turbidity", "pH", "TDS", "ORP", "ammonia"];

/// Ground-truth class column, passed through but never a predictor
pub const LABEL_COLUMN: &str = "label";

/// Time column, passed through but never a predictor
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Dissolved oxygen, the forecast channel
pub const DO_COLUMN: &str = "DO";

/// Columns excluded from the feature matrix
pub const NON_FEATURE_COLUMNS: [&str; 2] = [LABEL_COLUMN, TIMESTAMP_COLUMN];

pub fn is_sensor_column(name: &str) -> bool {
    SENSOR_COLUMNS.contains(&name)
}

/// A single value in a batch
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Missing,
}

impl Cell {
    /// Numeric value, NaN for anything that is not a number
    pub fn as_f64(&self) -> f64 {
        match self {
            Cell::Number(v) => *v,
            _ => f64::NAN,
        }
    }

    /// False for missing cells and non-finite numbers
    pub fn is_defined(&self) -> bool {
        match self {
            Cell::Number(v) => v.is_finite(),
            Cell::Text(_) => true,
            Cell::Missing => false,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Cell::Number(_))
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        if value.is_nan() {
            Cell::Missing
        } else {
            Cell::Number(value)
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s),
            Cell::Missing => Ok(()),
        }
    }
}

/// A named column of cells
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub cells: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    pub fn numeric(name: impl Into<String>, values: &[f64]) -> Self {
        Self::new(name, values.iter().map(|v| Cell::from(*v)).collect())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Values as f64, NaN where a cell is not a number
    pub fn values(&self) -> Vec<f64> {
        self.cells.iter().map(Cell::as_f64).collect()
    }

    /// True when every cell holds a number
    pub fn is_numeric(&self) -> bool {
        self.cells.iter().all(Cell::is_number)
    }
}

/// An ordered set of rows, stored column-wise. Row order is the time axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    columns: Vec<Column>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch, rejecting ragged or duplicated columns
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let mut batch = Self::new();
        for column in columns {
            batch.push_column(column)?;
        }
        Ok(batch)
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Append a column; its length must match the batch
    pub fn push_column(&mut self, column: Column) -> Result<()> {
        if self.has_column(&column.name) {
            return Err(PipelineError::input_shape(format!(
                "duplicate column '{}'",
                column.name
            )));
        }
        if !self.columns.is_empty() && column.len() != self.num_rows() {
            return Err(PipelineError::input_shape(format!(
                "column '{}' has {} rows, expected {}",
                column.name,
                column.len(),
                self.num_rows()
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Replace a column of the same name in place, or append it
    pub fn set_column(&mut self, column: Column) -> Result<()> {
        if !self.columns.is_empty() && column.len() != self.num_rows() {
            return Err(PipelineError::input_shape(format!(
                "column '{}' has {} rows, expected {}",
                column.name,
                column.len(),
                self.num_rows()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    /// Numeric variant of [`Batch::set_column`] for values derived from this
    /// batch, whose length always matches.
    pub(crate) fn set_numeric(&mut self, name: &str, values: Vec<f64>) {
        debug_assert!(self.columns.is_empty() || values.len() == self.num_rows());
        let column = Column::new(name, values.into_iter().map(Cell::from).collect());
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
    }

    /// New batch holding only the rows where `keep` is true, order preserved
    pub fn select_rows(&self, keep: &[bool]) -> Batch {
        let columns = self
            .columns
            .iter()
            .map(|column| Column {
                name: column.name.clone(),
                cells: column
                    .cells
                    .iter()
                    .zip(keep)
                    .filter(|(_, keep)| **keep)
                    .map(|(cell, _)| cell.clone())
                    .collect(),
            })
            .collect();
        Batch { columns }
    }

    pub fn ensure_not_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(PipelineError::input_shape("batch has zero rows"));
        }
        Ok(())
    }
}

/// A class or anomaly label as produced by a model
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Int(i64),
    Text(String),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Int(v) => write!(f, "{}", v),
            Label::Text(s) => f.write_str(s),
        }
    }
}

impl From<Label> for Cell {
    fn from(label: Label) -> Self {
        match label {
            Label::Int(v) => Cell::Number(v as f64),
            Label::Text(s) => Cell::Text(s),
        }
    }
}

/// Anomaly detector convention for an outlier row
pub const OUTLIER: Label = Label::Int(-1);

/// Anomaly detector convention for an inlier row
pub const INLIER: Label = Label::Int(1);

/// Predictor matrix handed to the anomaly detector and classifier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    /// Column names in engineered-batch order
    pub columns: Vec<String>,
    /// Row-major values, all finite
    pub rows: Vec<Vec<f64>>,
    /// Index of each row in the engineered batch
    pub source_rows: Vec<usize>,
}

impl FeatureMatrix {
    /// Restrict an engineered batch to predictor columns and drop rows with
    /// any undefined cell (rolling-window warm-up rows).
    pub fn from_batch(batch: &Batch) -> Result<Self> {
        let predictors: Vec<&Column> = batch
            .columns()
            .iter()
            .filter(|c| !NON_FEATURE_COLUMNS.contains(&c.name.as_str()))
            .collect();

        if let Some(column) = predictors
            .iter()
            .find(|c| c.cells.iter().any(|cell| matches!(cell, Cell::Text(_))))
        {
            return Err(PipelineError::input_shape(format!(
                "column '{}' holds non-numeric values and cannot be used as a feature",
                column.name
            )));
        }

        let mut rows = Vec::new();
        let mut source_rows = Vec::new();
        for row in 0..batch.num_rows() {
            let values: Vec<f64> = predictors.iter().map(|c| c.cells[row].as_f64()).collect();
            if values.iter().all(|v| v.is_finite()) {
                rows.push(values);
                source_rows.push(row);
            }
        }

        Ok(Self {
            columns: predictors.iter().map(|c| c.name.clone()).collect(),
            rows,
            source_rows,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_features(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row-major f32 buffer for tensor construction
    pub fn to_f32(&self) -> Vec<f32> {
        self.rows
            .iter()
            .flat_map(|row| row.iter().map(|v| *v as f32))
            .collect()
    }
}

/// Merged output of one pipeline invocation.
///
/// Each key is present only when its model is loaded and its prerequisite
/// column was in the input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<Vec<Label>>,
    #[serde(rename = "class", default, skip_serializing_if = "Option::is_none")]
    pub class: Option<Vec<Label>>,
    #[serde(rename = "DO_pred", default, skip_serializing_if = "Option::is_none")]
    pub do_pred: Option<Vec<f64>>,
}

impl InferenceResult {
    pub fn is_empty(&self) -> bool {
        self.anomaly.is_none() && self.class.is_none() && self.do_pred.is_none()
    }

    /// Number of rows flagged as outliers, if the detector ran
    pub fn outlier_count(&self) -> Option<usize> {
        self.anomaly
            .as_ref()
            .map(|labels| labels.iter().filter(|l| **l == OUTLIER).count())
    }
}
