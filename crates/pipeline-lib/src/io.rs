//! Batch codecs shared by the offline runner and the HTTP handler
//!
//! - CSV with a header row naming columns
//! - JSON array of row objects (column name to value)
//!
//! Recognized sensor columns must parse as numbers; empty cells and NaN
//! markers become missing values for the cleaner to drop.

use crate::error::{PipelineError, Result};
use crate::models::{is_sensor_column, Batch, Cell, Column};
use crate::orchestrator::PipelineRun;
use crate::windowing::TrainingSequences;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

/// Output column names added by the offline runner
pub const ANOMALY_OUTPUT: &str = "anomaly";
pub const CLASS_OUTPUT: &str = "class";
pub const DO_PRED_OUTPUT: &str = "DO_pred";

const MISSING_MARKERS: [&str; 6] = ["", "nan", "NaN", "NA", "null", "None"];

/// Parse one raw text value for `column`
pub fn parse_cell(column: &str, raw: &str) -> Result<Cell> {
    let trimmed = raw.trim();
    if MISSING_MARKERS.contains(&trimmed) {
        return Ok(Cell::Missing);
    }
    match trimmed.parse::<f64>() {
        Ok(value) => Ok(Cell::Number(value)),
        Err(_) if is_sensor_column(column) => Err(PipelineError::input_shape(format!(
            "column '{}' holds non-numeric value '{}'",
            column, trimmed
        ))),
        Err(_) => Ok(Cell::Text(trimmed.to_string())),
    }
}

/// Read a CSV batch with a header row
pub fn read_csv<R: Read>(reader: R) -> Result<Batch> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); headers.len()];

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(PipelineError::input_shape(format!(
                "row {} has {} fields, header has {}",
                line + 1,
                record.len(),
                headers.len()
            )));
        }
        for (idx, raw) in record.iter().enumerate() {
            cells[idx].push(parse_cell(&headers[idx], raw)?);
        }
    }

    Batch::from_columns(
        headers
            .into_iter()
            .zip(cells)
            .map(|(name, cells)| Column::new(name, cells))
            .collect(),
    )
}

pub fn read_csv_path(path: &Path) -> Result<Batch> {
    read_csv(BufReader::new(File::open(path)?))
}

/// Write a batch as CSV; missing cells are empty fields
pub fn write_csv<W: Write>(batch: &Batch, writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(batch.column_names())?;
    for row in 0..batch.num_rows() {
        writer.write_record(batch.columns().iter().map(|c| c.cells[row].to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_csv_path(batch: &Batch, path: &Path) -> Result<()> {
    write_csv(batch, BufWriter::new(File::create(path)?))
}

/// Build a batch from a JSON array of row objects.
///
/// Columns appear in first-seen order; a key absent from a row is missing.
pub fn batch_from_json(value: &Value) -> Result<Batch> {
    let rows = value
        .as_array()
        .ok_or_else(|| PipelineError::input_shape("body must be a JSON array of row objects"))?;

    let mut objects: Vec<&Map<String, Value>> = Vec::with_capacity(rows.len());
    let mut names: Vec<String> = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        let object = row.as_object().ok_or_else(|| {
            PipelineError::input_shape(format!("row {} is not a JSON object", idx))
        })?;
        for key in object.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
        objects.push(object);
    }

    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        let cells = objects
            .iter()
            .map(|object| json_cell(&name, object.get(&name)))
            .collect::<Result<Vec<Cell>>>()?;
        columns.push(Column::new(name, cells));
    }
    Batch::from_columns(columns)
}

fn json_cell(column: &str, value: Option<&Value>) -> Result<Cell> {
    match value {
        None | Some(Value::Null) => Ok(Cell::Missing),
        Some(Value::Number(n)) => Ok(n.as_f64().map(Cell::Number).unwrap_or(Cell::Missing)),
        Some(Value::String(s)) => parse_cell(column, s),
        Some(Value::Bool(b)) if !is_sensor_column(column) => Ok(Cell::Text(b.to_string())),
        Some(other) => Err(PipelineError::input_shape(format!(
            "column '{}' holds unsupported value {}",
            column, other
        ))),
    }
}

/// Serialize a batch as a JSON array of row objects
pub fn batch_to_json(batch: &Batch) -> Value {
    let rows = (0..batch.num_rows())
        .map(|row| {
            let object: Map<String, Value> = batch
                .columns()
                .iter()
                .map(|column| {
                    let value = match &column.cells[row] {
                        Cell::Number(v) => serde_json::Number::from_f64(*v)
                            .map(Value::Number)
                            .unwrap_or(Value::Null),
                        Cell::Text(s) => Value::String(s.clone()),
                        Cell::Missing => Value::Null,
                    };
                    (column.name.clone(), value)
                })
                .collect();
            Value::Object(object)
        })
        .collect();
    Value::Array(rows)
}

/// Which rows carry `DO_pred[i]` in annotated output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastAlignment {
    /// Prediction `i` on row `i`; the last `sequence_length` rows stay empty
    #[default]
    Leading,
    /// Prediction `i` on row `i + sequence_length`, the row window `i` forecasts
    Target,
}

impl ForecastAlignment {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastAlignment::Leading => "leading",
            ForecastAlignment::Target => "target",
        }
    }

    /// Row that receives prediction `index`
    pub fn row_for(&self, index: usize, sequence_length: usize) -> usize {
        match self {
            ForecastAlignment::Leading => index,
            ForecastAlignment::Target => index + sequence_length,
        }
    }
}

impl fmt::Display for ForecastAlignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForecastAlignment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "leading" => Ok(ForecastAlignment::Leading),
            "target" => Ok(ForecastAlignment::Target),
            other => Err(format!(
                "unknown forecast alignment '{}' (expected leading or target)",
                other
            )),
        }
    }
}

/// Cleaned rows annotated with whichever outputs were produced.
///
/// `anomaly` and `class` land on rows that survived into the feature matrix.
/// `DO_pred` rows follow `alignment`. Every other output cell is empty.
pub fn annotate(
    run: &PipelineRun,
    include_features: bool,
    alignment: ForecastAlignment,
) -> Result<Batch> {
    let mut out = if include_features {
        run.engineered.clone()
    } else {
        run.cleaned.clone()
    };
    let rows = out.num_rows();

    if let Some(labels) = &run.result.anomaly {
        out.set_column(Column::new(
            ANOMALY_OUTPUT,
            scatter(rows, &run.feature_rows, labels),
        ))?;
    }
    if let Some(labels) = &run.result.class {
        out.set_column(Column::new(
            CLASS_OUTPUT,
            scatter(rows, &run.feature_rows, labels),
        ))?;
    }
    if let Some(predictions) = &run.result.do_pred {
        let targets: Vec<usize> = (0..predictions.len())
            .map(|i| alignment.row_for(i, run.sequence_length))
            .collect();
        let values: Vec<Cell> = predictions.iter().map(|v| Cell::Number(*v)).collect();
        out.set_column(Column::new(DO_PRED_OUTPUT, scatter(rows, &targets, &values)))?;
    }

    Ok(out)
}

fn scatter<T: Clone + Into<Cell>>(rows: usize, positions: &[usize], values: &[T]) -> Vec<Cell> {
    let mut cells = vec![Cell::Missing; rows];
    for (pos, value) in positions.iter().zip(values) {
        if let Some(cell) = cells.get_mut(*pos) {
            *cell = value.clone().into();
        }
    }
    cells
}

/// Write training sequences as `t0..t{n-1},target` rows
pub fn write_sequences_csv<W: Write>(sequences: &TrainingSequences, writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    let length = sequences.windows.first().map(|w| w.len()).unwrap_or(0);

    let mut header: Vec<String> = (0..length).map(|i| format!("t{}", i)).collect();
    header.push("target".to_string());
    writer.write_record(&header)?;

    for (window, target) in sequences.windows.iter().zip(&sequences.targets) {
        let mut record: Vec<String> = window.values().iter().map(|v| v.to_string()).collect();
        record.push(target.to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
