//! Metric naming and the table of fields expected on each sensor line.
//!
//! Metric names are consumed by downstream dashboards and must not change.

use sensor_runner_common::MetricValue;
use serde::{Deserialize, Serialize};

/// First field: a floating-point signal.
pub const CPU_LOAD: &str = "sensor.cpu_load";
/// Second field: an integer random value.
pub const BOUNDED_RANDOM_GENERATOR: &str = "sensor.bounded_random_generator";
/// Third field: an integer counter.
pub const GENERATED_METRICS_NUMBER: &str = "sensor.generated_metrics_number";

/// Namespace under which the pipeline reports its own failures.
pub const ERROR_NAMESPACE: &str = "sensor.error";
/// Suffix of the point buffered when the database is unreachable.
pub const CONNECTIVITY_ERROR: &str = "connectivity_error";
/// Suffix of the point written when the database rejects a batch.
pub const BATCH_SENDING_ERROR: &str = "batch_sending_error";

/// Default database name.
pub const DATABASE_NAME: &str = "sensor";

/// Tag carrying the environment label.
pub const ENV_TAG: &str = "env";
/// Tag telling whether at least one field of the line is nonzero.
pub const VALIDITY_TAG: &str = "is_valid_preprocess";

/// Build `<namespace>.<context>`.
pub fn error_metric_name(namespace: &str, context: &str) -> String {
    format!("{}.{}", namespace, context)
}

/// Error raised when a raw field cannot be converted to its numeric type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot cast {raw:?} to {kind}")]
pub struct CastError {
    pub raw: String,
    pub kind: FieldKind,
}

/// Numeric type a raw field is converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Float,
    Integer,
}

impl FieldKind {
    /// Convert a raw field.
    pub fn convert(&self, raw: &str) -> Result<MetricValue, CastError> {
        let value = match self {
            FieldKind::Float => raw.parse::<f64>().map(MetricValue::Float).ok(),
            FieldKind::Integer => raw.parse::<i64>().map(MetricValue::Integer).ok(),
        };

        value.ok_or_else(|| CastError {
            raw: raw.to_string(),
            kind: *self,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Float => "float",
            FieldKind::Integer => "integer",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of the field table: the metric a position maps to, and its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Metric name.
    pub name: String,

    /// Conversion applied to the raw field.
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The reference sensor output: `[signal, random, counter]`.
pub fn default_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new(CPU_LOAD, FieldKind::Float),
        FieldSpec::new(BOUNDED_RANDOM_GENERATOR, FieldKind::Integer),
        FieldSpec::new(GENERATED_METRICS_NUMBER, FieldKind::Integer),
    ]
}
