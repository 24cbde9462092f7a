//! Line parsing: sensor output line to a batch of metric points.

use std::collections::HashMap;

use sensor_runner_common::MetricPoint;
use tracing::debug;

use crate::caster::cast_metric;
use crate::fields::{ENV_TAG, FieldSpec, VALIDITY_TAG};

/// Result of parsing a single line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// One point per configured field, in field-table order.
    Batch(Vec<MetricPoint>),
    /// The line repeats the previous one: the sensor is emitting stale output.
    Stalled,
}

/// Turns sensor output lines into batches of metric points.
///
/// Keeps the raw bytes of the last line seen so that a repeated line can be
/// detected. Call [`reset`](Self::reset) whenever the sensor is relaunched.
#[derive(Debug, Clone)]
pub struct LineParser {
    fields: Vec<FieldSpec>,
    environment: String,
    error_namespace: String,
    previous: Option<Vec<u8>>,
}

impl LineParser {
    pub fn new(
        fields: Vec<FieldSpec>,
        environment: impl Into<String>,
        error_namespace: impl Into<String>,
    ) -> Self {
        Self {
            fields,
            environment: environment.into(),
            error_namespace: error_namespace.into(),
            previous: None,
        }
    }

    /// Forget the previous line.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Parse one line of sensor output.
    ///
    /// Stall detection compares raw bytes, trailing ASCII whitespace excluded.
    /// Invalid UTF-8 is decoded lossily for casting only.
    pub fn parse_line(&mut self, line: impl AsRef<[u8]>) -> LineOutcome {
        let bytes = line.as_ref().trim_ascii_end();

        if self.previous.as_deref() == Some(bytes) {
            debug!(line = %String::from_utf8_lossy(bytes), "Repeated sensor line");
            return LineOutcome::Stalled;
        }

        let raw = split_fields(&String::from_utf8_lossy(bytes));
        debug!(fields = ?raw, "Sensor line");

        let tags = common_tags(&self.environment, &raw);
        let batch = self
            .fields
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let value = raw.get(index).map(String::as_str).unwrap_or("");
                cast_metric(value, spec, &tags, &self.error_namespace)
            })
            .collect();

        self.previous = Some(bytes.to_vec());
        LineOutcome::Batch(batch)
    }
}

/// Strip trailing whitespace and split on single spaces.
///
/// Consecutive spaces produce empty fields, which then fail to cast.
pub fn split_fields(line: &str) -> Vec<String> {
    line.trim_end().split(' ').map(str::to_string).collect()
}

/// Validity of a line: `Some(true)` when at least one field is a nonzero number.
///
/// Returns `None` when any field is not a number.
pub fn is_valid_preprocess(fields: &[String]) -> Option<bool> {
    let values = fields
        .iter()
        .map(|f| f.parse::<f64>().ok())
        .collect::<Option<Vec<f64>>>()?;

    Some(values.iter().any(|v| *v != 0.0))
}

/// Tags shared by every point of a line.
pub fn common_tags(environment: &str, fields: &[String]) -> HashMap<String, String> {
    let mut tags = HashMap::new();

    if !environment.is_empty() {
        tags.insert(ENV_TAG.to_string(), environment.to_string());
    }

    match is_valid_preprocess(fields) {
        Some(valid) => {
            let value = if valid { "True" } else { "False" };
            tags.insert(VALIDITY_TAG.to_string(), value.to_string());
        }
        None => debug!(fields = ?fields, "Cannot preprocess sensor output"),
    }

    tags
}
