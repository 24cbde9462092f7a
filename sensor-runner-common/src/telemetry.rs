use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::HashMap;
use std::fmt;

/// A single metric data point: one named, tagged, timestamped numeric observation.
///
/// Points are immutable once built. The timestamp is assigned when the point is
/// formatted, not when the underlying sample was read.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    measurement: String,
    tags: HashMap<String, String>,
    time: DateTime<Utc>,
    value: MetricValue,
}

impl MetricPoint {
    /// Create a new point stamped with the current UTC time.
    pub fn new(
        measurement: impl Into<String>,
        tags: HashMap<String, String>,
        value: impl Into<MetricValue>,
    ) -> Self {
        Self::at(measurement, tags, value, Utc::now())
    }

    /// Create a new point with an explicit timestamp.
    pub fn at(
        measurement: impl Into<String>,
        tags: HashMap<String, String>,
        value: impl Into<MetricValue>,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            tags,
            time,
            value: value.into(),
        }
    }

    /// Create an untagged point with value `1`, used to report the pipeline's own failures.
    pub fn flag(measurement: impl Into<String>) -> Self {
        Self::new(measurement, HashMap::new(), MetricValue::Integer(1))
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn value(&self) -> MetricValue {
        self.value
    }

    /// Timestamp in nanoseconds since the Unix epoch.
    ///
    /// Falls back to microsecond precision for instants outside the range
    /// representable in nanoseconds (years before 1677 or after 2262).
    pub fn timestamp_nanos(&self) -> i64 {
        self.time
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.time.timestamp_micros().saturating_mul(1_000))
    }

    /// RFC 3339 timestamp with microsecond precision and a trailing `Z`.
    pub fn formatted_time(&self) -> String {
        self.time.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

impl Serialize for MetricPoint {
    /// Serializes to the database write-request shape:
    /// `{ measurement, tags, time, fields: { value } }`.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(serde::Serialize)]
        struct Fields {
            value: MetricValue,
        }

        let mut state = serializer.serialize_struct("MetricPoint", 4)?;
        state.serialize_field("measurement", &self.measurement)?;
        state.serialize_field("tags", &self.tags)?;
        state.serialize_field("time", &self.formatted_time())?;
        state.serialize_field("fields", &Fields { value: self.value })?;
        state.end()
    }
}

/// Typed numeric metric value.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// 64-bit signed integer.
    Integer(i64),

    /// 64-bit floating point.
    Float(f64),
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Integer(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Integer(v) => write!(f, "{}", v),
            MetricValue::Float(v) => write!(f, "{}", v),
        }
    }
}
