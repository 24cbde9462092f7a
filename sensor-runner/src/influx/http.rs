//! InfluxDB 1.x HTTP API client.

use async_trait::async_trait;
use sensor_runner_common::{MetricPoint, encode_batch};
use serde::Deserialize;
use tracing::{debug, trace};

use super::{ConnectionDescriptor, DeliveryError, MetricsClient};

/// HTTP client for the `/write` and `/query` endpoints.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    database: String,
}

impl HttpClient {
    /// Build a client for the HTTP API described by `descriptor`.
    pub fn new(descriptor: &ConnectionDescriptor) -> Result<Self, DeliveryError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = descriptor.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| DeliveryError::Setup(e.to_string()))?;

        Ok(Self {
            http,
            base_url: format!("http://{}:{}", descriptor.host, descriptor.http_port()),
            database: descriptor.database.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Currently selected database.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Run an InfluxQL statement through `/query`.
    pub async fn query(&self, statement: &str) -> Result<(), DeliveryError> {
        debug!(statement = %statement, "Running InfluxQL statement");

        let response = self
            .http
            .post(format!("{}/query", self.base_url))
            .form(&[("q", statement)])
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        if !status.is_success() {
            return Err(DeliveryError::Rejected(format!(
                "{}: {}",
                status,
                error_message(&body)
            )));
        }

        if let Some(message) = query_error(&body) {
            return Err(DeliveryError::Rejected(message));
        }

        Ok(())
    }
}

#[async_trait]
impl MetricsClient for HttpClient {
    async fn write_points(&mut self, points: &[MetricPoint]) -> Result<(), DeliveryError> {
        if points.is_empty() {
            return Ok(());
        }

        let body = encode_batch(points);
        trace!(points = points.len(), database = %self.database, "Writing points");

        let response = self
            .http
            .post(format!("{}/write", self.base_url))
            .query(&[("db", self.database.as_str()), ("precision", "ns")])
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.map_err(classify)?;
        Err(DeliveryError::Rejected(format!(
            "{}: {}",
            status,
            error_message(&body)
        )))
    }

    async fn drop_database(&mut self, name: &str) -> Result<(), DeliveryError> {
        self.query(&format!("DROP DATABASE {}", quote_identifier(name)))
            .await
    }

    async fn create_database(&mut self, name: &str) -> Result<(), DeliveryError> {
        self.query(&format!("CREATE DATABASE {}", quote_identifier(name)))
            .await
    }

    async fn switch_database(&mut self, name: &str) -> Result<(), DeliveryError> {
        self.database = name.to_string();
        Ok(())
    }
}

/// Anything that prevented a response from arriving means the endpoint is
/// unreachable; only a request that could not be built is a rejection.
fn classify(err: reqwest::Error) -> DeliveryError {
    if err.is_builder() {
        DeliveryError::Rejected(err.to_string())
    } else {
        DeliveryError::Unreachable(err.to_string())
    }
}

/// Quote an InfluxQL identifier.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    error: Option<String>,
}

/// The `error` member of a JSON error body, or the trimmed body itself.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| body.trim().to_string())
}

/// First error reported by a `/query` response, if any.
fn query_error(body: &str) -> Option<String> {
    let response: QueryResponse = serde_json::from_str(body).ok()?;
    response
        .error
        .or_else(|| response.results.into_iter().find_map(|r| r.error))
}
