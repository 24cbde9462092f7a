//! InfluxDB clients.
//!
//! The delivery channel talks to the database through the [`MetricsClient`]
//! trait and builds clients through a [`Connector`]. [`InfluxConnector`] builds
//! the real clients: [`HttpClient`] for the reliable transport and
//! [`UdpClient`] for the datagram transport.

mod http;
mod udp;

use std::time::Duration;

use async_trait::async_trait;
use sensor_runner_common::MetricPoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpClient;
pub use udp::UdpClient;

/// Port of the InfluxDB HTTP API.
pub const DEFAULT_HTTP_PORT: u16 = 8086;

/// Failure of a database operation.
///
/// The delivery channel recovers differently from each class, so clients must
/// report an unreachable endpoint as [`Unreachable`](Self::Unreachable) and
/// anything the database refused as [`Rejected`](Self::Rejected).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The endpoint could not be reached (refused, reset, timed out, unresolvable).
    #[error("metrics database unreachable: {0}")]
    Unreachable(String),

    /// The database answered but refused the request.
    #[error("metrics database rejected the request: {0}")]
    Rejected(String),

    /// The client could not be built locally.
    #[error("cannot set up metrics client: {0}")]
    Setup(String),
}

impl DeliveryError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DeliveryError::Unreachable(_))
    }
}

/// Transport used for writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// HTTP: writes are acknowledged, failures are detected.
    #[default]
    Http,
    /// UDP: writes are fire-and-forget, failures go unnoticed.
    Udp,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::Udp => "udp",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where and how to reach the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Database host name or address.
    pub host: String,
    /// Write port: the HTTP API port, or the UDP listener port.
    pub port: u16,
    /// Write transport.
    pub transport: Transport,
    /// Database name.
    pub database: String,
    /// HTTP API port used for administrative statements with the UDP
    /// transport (default: 8086).
    pub admin_port: Option<u16>,
    /// Per-request HTTP timeout (default: none).
    pub timeout: Option<Duration>,
}

impl ConnectionDescriptor {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        transport: Transport,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
            database: database.into(),
            admin_port: None,
            timeout: None,
        }
    }

    /// Port of the HTTP API.
    pub fn http_port(&self) -> u16 {
        match self.transport {
            Transport::Http => self.port,
            Transport::Udp => self.admin_port.unwrap_or(DEFAULT_HTTP_PORT),
        }
    }
}

/// Operations the delivery channel needs from a database client.
#[async_trait]
pub trait MetricsClient: Send {
    /// Write a batch of points in a single request.
    async fn write_points(&mut self, points: &[MetricPoint]) -> Result<(), DeliveryError>;

    /// Drop a database and all its data.
    async fn drop_database(&mut self, name: &str) -> Result<(), DeliveryError>;

    /// Create a database (no-op when it already exists).
    async fn create_database(&mut self, name: &str) -> Result<(), DeliveryError>;

    /// Select the database subsequent writes go to.
    async fn switch_database(&mut self, name: &str) -> Result<(), DeliveryError>;
}

/// Builds database clients from a connection descriptor.
pub trait Connector: Send {
    type Client: MetricsClient;

    /// Build a client. No request is sent yet.
    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Self::Client, DeliveryError>;
}

/// Client for either transport.
#[derive(Debug)]
pub enum InfluxClient {
    Http(HttpClient),
    Udp(UdpClient),
}

#[async_trait]
impl MetricsClient for InfluxClient {
    async fn write_points(&mut self, points: &[MetricPoint]) -> Result<(), DeliveryError> {
        match self {
            InfluxClient::Http(client) => client.write_points(points).await,
            InfluxClient::Udp(client) => client.write_points(points).await,
        }
    }

    async fn drop_database(&mut self, name: &str) -> Result<(), DeliveryError> {
        match self {
            InfluxClient::Http(client) => client.drop_database(name).await,
            InfluxClient::Udp(client) => client.drop_database(name).await,
        }
    }

    async fn create_database(&mut self, name: &str) -> Result<(), DeliveryError> {
        match self {
            InfluxClient::Http(client) => client.create_database(name).await,
            InfluxClient::Udp(client) => client.create_database(name).await,
        }
    }

    async fn switch_database(&mut self, name: &str) -> Result<(), DeliveryError> {
        match self {
            InfluxClient::Http(client) => client.switch_database(name).await,
            InfluxClient::Udp(client) => client.switch_database(name).await,
        }
    }
}

/// Connector for real InfluxDB 1.x servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct InfluxConnector;

impl Connector for InfluxConnector {
    type Client = InfluxClient;

    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<InfluxClient, DeliveryError> {
        match descriptor.transport {
            Transport::Http => Ok(InfluxClient::Http(HttpClient::new(descriptor)?)),
            Transport::Udp => Ok(InfluxClient::Udp(UdpClient::new(descriptor)?)),
        }
    }
}
