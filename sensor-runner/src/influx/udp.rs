//! InfluxDB UDP listener client.
//!
//! Writes are line protocol datagrams; the database they land in is chosen by
//! the server's UDP listener configuration. Administrative statements still go
//! through the HTTP API.

use std::net::SocketAddr;

use async_trait::async_trait;
use sensor_runner_common::{MetricPoint, encode_point};
use tokio::net::{UdpSocket, lookup_host};
use tracing::{debug, trace};

use super::{ConnectionDescriptor, DeliveryError, HttpClient, MetricsClient};

/// Largest datagram payload sent, below a typical Ethernet MTU.
pub const MAX_DATAGRAM_BYTES: usize = 1400;

/// Fire-and-forget client for the UDP transport.
#[derive(Debug)]
pub struct UdpClient {
    host: String,
    port: u16,
    socket: Option<UdpSocket>,
    admin: HttpClient,
}

impl UdpClient {
    pub fn new(descriptor: &ConnectionDescriptor) -> Result<Self, DeliveryError> {
        Ok(Self {
            host: descriptor.host.clone(),
            port: descriptor.port,
            socket: None,
            admin: HttpClient::new(descriptor)?,
        })
    }

    /// Socket connected to the listener, bound on first use.
    async fn socket(&mut self) -> Result<&UdpSocket, DeliveryError> {
        if self.socket.is_none() {
            let target = lookup_host((self.host.as_str(), self.port))
                .await
                .map_err(|e| DeliveryError::Unreachable(e.to_string()))?
                .next()
                .ok_or_else(|| {
                    DeliveryError::Unreachable(format!("no address for {}", self.host))
                })?;

            let local = match target {
                SocketAddr::V4(_) => "0.0.0.0:0",
                SocketAddr::V6(_) => "[::]:0",
            };
            let socket = UdpSocket::bind(local)
                .await
                .map_err(|e| DeliveryError::Setup(e.to_string()))?;
            socket
                .connect(target)
                .await
                .map_err(|e| DeliveryError::Unreachable(e.to_string()))?;
            debug!(host = %self.host, target = %target, "UDP socket ready");
            self.socket = Some(socket);
        }

        self.socket
            .as_ref()
            .ok_or_else(|| DeliveryError::Setup("UDP socket unavailable".to_string()))
    }
}

/// Pack encoded points into newline-terminated payloads of at most
/// [`MAX_DATAGRAM_BYTES`], never splitting a line.
///
/// A single line longer than the limit is refused: the listener could never
/// accept it.
fn datagrams(points: &[MetricPoint]) -> Result<Vec<String>, DeliveryError> {
    let mut datagrams = Vec::new();
    let mut current = String::new();

    for point in points {
        let mut line = encode_point(point);
        line.push('\n');

        if line.len() > MAX_DATAGRAM_BYTES {
            return Err(DeliveryError::Rejected(format!(
                "point {} encodes to {} bytes, over the {} byte datagram limit",
                point.measurement(),
                line.len(),
                MAX_DATAGRAM_BYTES
            )));
        }
        if current.len() + line.len() > MAX_DATAGRAM_BYTES {
            datagrams.push(std::mem::take(&mut current));
        }
        current.push_str(&line);
    }

    if !current.is_empty() {
        datagrams.push(current);
    }
    Ok(datagrams)
}

#[async_trait]
impl MetricsClient for UdpClient {
    async fn write_points(&mut self, points: &[MetricPoint]) -> Result<(), DeliveryError> {
        let payloads = datagrams(points)?;
        if payloads.is_empty() {
            return Ok(());
        }

        let socket = self.socket().await?;
        for payload in &payloads {
            if let Err(e) = socket.send(payload.as_bytes()).await {
                // Rebind on the next write.
                self.socket = None;
                return Err(DeliveryError::Unreachable(e.to_string()));
            }
        }

        trace!(
            points = points.len(),
            datagrams = payloads.len(),
            "Sent UDP datagrams"
        );
        Ok(())
    }

    async fn drop_database(&mut self, name: &str) -> Result<(), DeliveryError> {
        self.admin.drop_database(name).await
    }

    async fn create_database(&mut self, name: &str) -> Result<(), DeliveryError> {
        self.admin.create_database(name).await
    }

    async fn switch_database(&mut self, name: &str) -> Result<(), DeliveryError> {
        self.admin.switch_database(name).await
    }
}
