//! Conversion of raw sensor fields into metric points.

use std::collections::HashMap;

use sensor_runner_common::MetricPoint;
use tracing::info;

use crate::fields::{FieldSpec, error_metric_name};

/// Cast a raw field into a metric point.
///
/// Always yields a point: when `raw` cannot be converted, the result is a
/// sentinel `<error_namespace>.<metric name>` point with no tags and value `1`,
/// and the failure is logged.
pub fn cast_metric(
    raw: &str,
    spec: &FieldSpec,
    tags: &HashMap<String, String>,
    error_namespace: &str,
) -> MetricPoint {
    match spec.kind.convert(raw) {
        Ok(value) => MetricPoint::new(spec.name.as_str(), tags.clone(), value),
        Err(e) => {
            info!(metric = %spec.name, raw = %raw, error = %e, "Cannot cast metric");
            MetricPoint::flag(error_metric_name(error_namespace, &spec.name))
        }
    }
}
