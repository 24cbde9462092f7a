//! InfluxDB line protocol encoding.
//!
//! ```text
//! measurement,tag1=val1,tag2=val2 value=1.5 timestamp_ns
//! ```
//!
//! Every [`MetricPoint`] carries a single field named `value`. Tags are written
//! sorted by key so that the encoding of a point is canonical.

use crate::telemetry::{MetricPoint, MetricValue};

/// Name of the single field written for every point.
pub const VALUE_FIELD: &str = "value";

/// Encode one point as a line (without the trailing newline).
///
/// Tags with an empty key or value are skipped: line protocol cannot carry them.
pub fn encode_point(point: &MetricPoint) -> String {
    let mut line = escape_measurement(point.measurement());

    let mut tags: Vec<(&String, &String)> = point
        .tags()
        .iter()
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect();
    tags.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in tags {
        line.push(',');
        line.push_str(&escape_tag(key));
        line.push('=');
        line.push_str(&escape_tag(value));
    }

    line.push(' ');
    line.push_str(VALUE_FIELD);
    line.push('=');
    line.push_str(&format_value(point.value()));

    line.push(' ');
    line.push_str(&point.timestamp_nanos().to_string());

    line
}

/// Encode a batch of points, one line each, newline-separated.
pub fn encode_batch<'a, I>(points: I) -> String
where
    I: IntoIterator<Item = &'a MetricPoint>,
{
    let mut body = String::new();
    for point in points {
        body.push_str(&encode_point(point));
        body.push('\n');
    }
    body
}

/// Format a field value.
///
/// Integers carry the `i` suffix; floats are written as-is.
pub fn format_value(value: MetricValue) -> String {
    match value {
        MetricValue::Integer(v) => format!("{}i", v),
        MetricValue::Float(v) => format!("{}", v),
    }
}

/// Backslashes, spaces and commas must be escaped in measurement names.
fn escape_measurement(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(' ', "\\ ")
}

/// Backslashes, commas, equals signs and spaces must be escaped in tag keys
/// and values. An unescaped trailing backslash would escape the separator.
fn escape_tag(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
