//! Numeric side-channel results.
//!
//! A [`MatrixBundle`] carries the feedback and control templates, the bias
//! and the processing time span reported by the service. Bundles arrive
//! either inline in the job acceptance or as `matrix_data` envelopes, both
//! using the wire keys `tempA`, `tempB`, `Ib`, `start` and `end`.

use serde::Deserialize;
use serde_json::Value;

use crate::protocol::DecodeError;

/// Wire keys that make up a bundle.
pub const BUNDLE_KEYS: [&str; 5] = ["tempA", "tempB", "Ib", "start", "end"];

/// Rectangular 2D float array.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: Vec<Vec<f64>>,
}

impl Matrix {
    /// Build a matrix, rejecting ragged rows.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::MalformedMatrixPayload` if rows differ in length.
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self, DecodeError> {
        if let Some(first) = rows.first() {
            let width = first.len();
            if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
                return Err(DecodeError::MalformedMatrixPayload(format!(
                    "ragged matrix: row {index} has {} columns, expected {width}",
                    row.len()
                )));
            }
        }
        Ok(Self { rows })
    }

    /// Row slices in order.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns (0 for an empty matrix).
    pub fn column_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Value at (`row`, `col`), if in range.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.rows.get(row).and_then(|r| r.get(col)).copied()
    }

    /// Returns `true` if the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Feedback/control matrices, bias and time span.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixBundle {
    /// Feedback template (`tempA`).
    pub feedback: Option<Matrix>,
    /// Control template (`tempB`).
    pub control: Option<Matrix>,
    /// Bias current (`Ib`).
    pub bias: f64,
    /// Start of the simulated time span (`start`).
    pub time_start: f64,
    /// End of the simulated time span (`end`).
    pub time_end: f64,
}

/// A row on the wire is either a list of numbers or a bare number.
///
/// Bare numbers become single-column rows.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRow {
    Values(Vec<f64>),
    Scalar(f64),
}

#[derive(Deserialize)]
struct RawBundle {
    #[serde(rename = "tempA", default)]
    temp_a: Option<Vec<RawRow>>,
    #[serde(rename = "tempB", default)]
    temp_b: Option<Vec<RawRow>>,
    #[serde(rename = "Ib")]
    bias: Option<f64>,
    start: Option<f64>,
    end: Option<f64>,
}

fn into_matrix(raw: Option<Vec<RawRow>>) -> Result<Option<Matrix>, DecodeError> {
    raw.map(|rows| {
        Matrix::new(
            rows.into_iter()
                .map(|row| match row {
                    RawRow::Values(values) => values,
                    RawRow::Scalar(value) => vec![value],
                })
                .collect(),
        )
    })
    .transpose()
}

impl MatrixBundle {
    /// Convert a JSON object into a validated bundle.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::MalformedMatrixPayload` if `value` is not an
    /// object, a field has the wrong type, `Ib`/`start`/`end` is missing, a
    /// matrix is ragged, or `end < start`.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        if !value.is_object() {
            return Err(DecodeError::MalformedMatrixPayload(
                "matrix data is not an object".to_string(),
            ));
        }
        let raw = RawBundle::deserialize(value)
            .map_err(|e| DecodeError::MalformedMatrixPayload(e.to_string()))?;

        let missing = |name: &str| DecodeError::MalformedMatrixPayload(format!("missing {name}"));
        let bias = raw.bias.ok_or_else(|| missing("Ib"))?;
        let time_start = raw.start.ok_or_else(|| missing("start"))?;
        let time_end = raw.end.ok_or_else(|| missing("end"))?;
        if time_end < time_start {
            return Err(DecodeError::MalformedMatrixPayload(format!(
                "end {time_end} precedes start {time_start}"
            )));
        }

        Ok(Self {
            feedback: into_matrix(raw.temp_a)?,
            control: into_matrix(raw.temp_b)?,
            bias,
            time_start,
            time_end,
        })
    }

    /// Extract an inline bundle from a larger object (the job acceptance).
    ///
    /// Returns `Ok(None)` when none of the bundle keys are present.
    ///
    /// # Errors
    ///
    /// Same as [`MatrixBundle::from_value`] once any bundle key is present.
    pub fn from_fields(object: &serde_json::Map<String, Value>) -> Result<Option<Self>, DecodeError> {
        let fields: serde_json::Map<String, Value> = BUNDLE_KEYS
            .iter()
            .filter_map(|key| object.get(*key).map(|v| ((*key).to_string(), v.clone())))
            .filter(|(_, v)| !v.is_null())
            .collect();
        if fields.is_empty() {
            return Ok(None);
        }
        Self::from_value(&Value::Object(fields)).map(Some)
    }

    /// Length of the reported time span (`end - start`).
    pub fn span(&self) -> f64 {
        self.time_end - self.time_start
    }
}
