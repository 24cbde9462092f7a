//! Resilient delivery of metric batches to the database.
//!
//! The [`DeliveryChannel`] owns the database client and absorbs every write
//! failure:
//!
//! - a **rejected** batch is replaced by a single `batch_sending_error` point
//!   after re-selecting the database;
//! - an **unreachable** database adds a `connectivity_error` point to the
//!   connectivity buffer and triggers one inline reconnection attempt.
//!
//! Buffered points ride along with the next batch and are dropped from the
//! buffer once a write succeeds.

use sensor_runner_common::MetricPoint;
use tracing::{debug, error, info, warn};

use crate::fields::{BATCH_SENDING_ERROR, CONNECTIVITY_ERROR, error_metric_name};
use crate::influx::{ConnectionDescriptor, Connector, DeliveryError, MetricsClient};

/// Counters describing what the channel did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Batches written successfully.
    pub batches_sent: u64,
    /// Points written successfully, buffered error points included.
    pub points_sent: u64,
    /// Batches the database refused.
    pub rejected_batches: u64,
    /// Writes that failed because the database was unreachable.
    pub connectivity_failures: u64,
    /// Successful reconnections after an outage.
    pub reconnections: u64,
    /// Reconnection attempts that failed.
    pub failed_reconnections: u64,
}

/// Owns the database connection and the connectivity buffer.
pub struct DeliveryChannel<C: Connector> {
    connector: C,
    client: Option<C::Client>,
    database: String,
    error_namespace: String,
    buffer: Vec<MetricPoint>,
    descriptor: Option<ConnectionDescriptor>,
    stats: DeliveryStats,
}

impl<C: Connector> DeliveryChannel<C> {
    /// Create a channel with no connection yet.
    pub fn new(
        connector: C,
        database: impl Into<String>,
        error_namespace: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            client: None,
            database: database.into(),
            error_namespace: error_namespace.into(),
            buffer: Vec::new(),
            descriptor: None,
            stats: DeliveryStats::default(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Whether a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Points waiting for the database to come back.
    pub fn buffered(&self) -> &[MetricPoint] {
        &self.buffer
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats
    }

    /// Last descriptor passed to [`init_connection`](Self::init_connection).
    pub fn descriptor(&self) -> Option<&ConnectionDescriptor> {
        self.descriptor.as_ref()
    }

    /// Establish the connection and prepare the database.
    ///
    /// Drops the database first when `clear_on_init` is set, then creates and
    /// selects it. Safe to call repeatedly. The previous client is kept when
    /// setup fails.
    pub async fn init_connection(
        &mut self,
        descriptor: ConnectionDescriptor,
        clear_on_init: bool,
    ) -> Result<(), DeliveryError> {
        info!(
            host = %descriptor.host,
            port = descriptor.port,
            transport = %descriptor.transport,
            clear_data = clear_on_init,
            "Initializing connection to InfluxDB"
        );

        self.database = descriptor.database.clone();
        self.descriptor = Some(descriptor.clone());
        let mut client = self.connector.connect(&descriptor)?;

        if clear_on_init {
            warn!(database = %self.database, "Dropping database before start");
            client.drop_database(&self.database).await?;
        }
        client.create_database(&self.database).await?;
        client.switch_database(&self.database).await?;

        self.client = Some(client);
        Ok(())
    }

    /// Write a batch, absorbing every failure.
    ///
    /// The batch is written together with the connectivity buffer, in that
    /// order, as one request.
    pub async fn send_batch(&mut self, points: Vec<MetricPoint>) {
        let mut payload = points;
        payload.extend(self.buffer.iter().cloned());

        let result = match self.client.as_mut() {
            Some(client) => client.write_points(&payload).await,
            None => Err(DeliveryError::Unreachable("not connected".to_string())),
        };

        match result {
            Ok(()) => {
                if !self.buffer.is_empty() {
                    info!(
                        buffered = self.buffer.len(),
                        "Delivered points buffered during outage"
                    );
                    self.buffer.clear();
                }
                self.stats.batches_sent += 1;
                self.stats.points_sent += payload.len() as u64;
            }
            Err(DeliveryError::Unreachable(reason)) => {
                self.stats.connectivity_failures += 1;
                self.buffer.push(MetricPoint::flag(error_metric_name(
                    &self.error_namespace,
                    CONNECTIVITY_ERROR,
                )));
                warn!(
                    error = %reason,
                    buffered = self.buffer.len(),
                    "Metrics database unreachable, reconnecting"
                );
                self.reconnect().await;
            }
            Err(e) => {
                self.stats.rejected_batches += 1;
                warn!(
                    error = %e,
                    points = payload.len(),
                    "Impossible to send one of the data points, sending failure metric"
                );
                self.report_rejection().await;
            }
        }
    }

    /// Re-select the database and write a single `batch_sending_error` point.
    async fn report_rejection(&mut self) {
        let Some(client) = self.client.as_mut() else {
            return;
        };

        if let Err(e) = client.switch_database(&self.database).await {
            warn!(error = %e, database = %self.database, "Failed to re-select database");
        }

        let point =
            MetricPoint::flag(error_metric_name(&self.error_namespace, BATCH_SENDING_ERROR));
        if let Err(e) = client.write_points(std::slice::from_ref(&point)).await {
            error!(error = %e, "Failed to send batch failure metric");
        }
    }

    /// One reconnection attempt with the last descriptor, never clearing data.
    async fn reconnect(&mut self) {
        let Some(descriptor) = self.descriptor.clone() else {
            error!("Cannot reconnect: no connection was ever initialized");
            self.stats.failed_reconnections += 1;
            return;
        };

        match self.init_connection(descriptor, false).await {
            Ok(()) => {
                self.stats.reconnections += 1;
                debug!("Reconnected to metrics database");
            }
            Err(e) => {
                self.stats.failed_reconnections += 1;
                error!(error = %e, "Reconnection to metrics database failed");
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockConnector;
    use super::*;
    use crate::fields::{DATABASE_NAME, ERROR_NAMESPACE};
    use crate::influx::Transport;
    use std::collections::HashMap;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new("localhost", 8086, Transport::Http, DATABASE_NAME)
    }

    fn batch(n: usize) -> Vec<MetricPoint> {
        (0..n)
            .map(|i| MetricPoint::new("sensor.generated_metrics_number", HashMap::new(), i as i64))
            .collect()
    }

    fn unreachable() -> Result<(), DeliveryError> {
        Err(DeliveryError::Unreachable("connection refused".to_string()))
    }

    fn rejected() -> Result<(), DeliveryError> {
        Err(DeliveryError::Rejected("field type conflict".to_string()))
    }

    async fn connected_channel() -> (DeliveryChannel<MockConnector>, MockConnector) {
        let connector = MockConnector::default();
        let mut channel = DeliveryChannel::new(connector.clone(), DATABASE_NAME, ERROR_NAMESPACE);
        channel.init_connection(descriptor(), false).await.unwrap();
        (channel, connector)
    }

    #[tokio::test]
    async fn test_init_connection_creates_and_selects() {
        let (channel, connector) = connected_channel().await;

        assert!(channel.is_connected());
        assert_eq!(connector.admin(), vec!["create:sensor", "switch:sensor"]);
    }

    #[tokio::test]
    async fn test_init_connection_clear_drops_first() {
        let connector = MockConnector::default();
        let mut channel = DeliveryChannel::new(connector.clone(), DATABASE_NAME, ERROR_NAMESPACE);

        channel.init_connection(descriptor(), true).await.unwrap();

        assert_eq!(
            connector.admin(),
            vec!["drop:sensor", "create:sensor", "switch:sensor"]
        );
    }

    #[tokio::test]
    async fn test_init_connection_failure_keeps_descriptor() {
        let connector = MockConnector::default();
        connector.script_creates(vec![unreachable()]);
        let mut channel = DeliveryChannel::new(connector.clone(), DATABASE_NAME, ERROR_NAMESPACE);

        let err = channel.init_connection(descriptor(), false).await.unwrap_err();

        assert!(err.is_unreachable());
        assert!(!channel.is_connected());
        assert_eq!(channel.descriptor(), Some(&descriptor()));
    }

    #[tokio::test]
    async fn test_successful_send() {
        let (mut channel, connector) = connected_channel().await;

        channel.send_batch(batch(3)).await;

        assert_eq!(connector.writes().len(), 1);
        assert_eq!(connector.writes()[0].len(), 3);
        assert!(channel.buffered().is_empty());
        assert_eq!(channel.stats().batches_sent, 1);
        assert_eq!(channel.stats().points_sent, 3);
    }

    #[tokio::test]
    async fn test_unreachable_then_success_delivers_buffer() {
        let (mut channel, connector) = connected_channel().await;
        connector.script_writes(vec![unreachable()]);

        channel.send_batch(batch(3)).await;
        assert_eq!(channel.buffered().len(), 1);
        assert_eq!(
            channel.buffered()[0].measurement(),
            "sensor.error.connectivity_error"
        );
        // One inline reconnection attempt
        assert_eq!(connector.connects(), 2);

        channel.send_batch(batch(3)).await;
        assert!(channel.buffered().is_empty());

        let writes = connector.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].len(), 3 + 1);
        // New batch first, then the buffered point
        assert_eq!(
            writes[1][3].measurement(),
            "sensor.error.connectivity_error"
        );
        assert_eq!(
            writes[1]
                .iter()
                .filter(|p| p.measurement() == "sensor.error.connectivity_error")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_consecutive_outages_accumulate() {
        let (mut channel, connector) = connected_channel().await;
        connector.script_writes(vec![unreachable(), unreachable(), unreachable(), unreachable()]);

        for expected in 1..=4 {
            channel.send_batch(batch(3)).await;
            assert_eq!(channel.buffered().len(), expected);
        }

        // Each attempt carried the buffer accumulated so far
        let writes = connector.writes();
        assert_eq!(writes[3].len(), 3 + 3);

        channel.send_batch(batch(3)).await;
        let writes = connector.writes();
        let last = writes.last().unwrap();
        assert_eq!(last.len(), 3 + 4);
        assert!(
            last[3..]
                .iter()
                .all(|p| p.measurement() == "sensor.error.connectivity_error")
        );
        assert!(channel.buffered().is_empty());
        assert_eq!(channel.stats().connectivity_failures, 4);
    }

    #[tokio::test]
    async fn test_rejection_sends_single_error_point() {
        let (mut channel, connector) = connected_channel().await;
        connector.script_writes(vec![rejected()]);

        channel.send_batch(batch(3)).await;

        let writes = connector.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].len(), 1);
        assert_eq!(writes[1][0].measurement(), "sensor.error.batch_sending_error");
        assert!(writes[1][0].tags().is_empty());

        // Database re-selected, no reconnection
        assert_eq!(
            connector.admin(),
            vec!["create:sensor", "switch:sensor", "switch:sensor"]
        );
        assert_eq!(connector.connects(), 1);
        assert_eq!(channel.stats().rejected_batches, 1);
    }

    #[tokio::test]
    async fn test_rejection_leaves_buffer_untouched() {
        let (mut channel, connector) = connected_channel().await;
        connector.script_writes(vec![unreachable(), rejected()]);

        channel.send_batch(batch(3)).await;
        assert_eq!(channel.buffered().len(), 1);

        channel.send_batch(batch(3)).await;
        assert_eq!(channel.buffered().len(), 1);

        // The buffer is flushed by the next successful write
        channel.send_batch(batch(3)).await;
        assert!(channel.buffered().is_empty());
    }

    #[tokio::test]
    async fn test_failed_fallback_write_is_swallowed() {
        let (mut channel, connector) = connected_channel().await;
        connector.script_writes(vec![rejected(), unreachable()]);

        channel.send_batch(batch(3)).await;

        // Fallback failure neither buffers nor reconnects
        assert!(channel.buffered().is_empty());
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_failed_reconnection_is_swallowed() {
        let (mut channel, connector) = connected_channel().await;
        connector.script_writes(vec![unreachable(), unreachable()]);
        connector.script_creates(vec![unreachable(), unreachable()]);

        channel.send_batch(batch(3)).await;
        channel.send_batch(batch(3)).await;

        assert_eq!(channel.buffered().len(), 2);
        assert_eq!(channel.stats().failed_reconnections, 2);
        // Old client kept
        assert!(channel.is_connected());

        channel.send_batch(batch(3)).await;
        assert!(channel.buffered().is_empty());
    }

    #[tokio::test]
    async fn test_send_without_connection_buffers() {
        let connector = MockConnector::default();
        let mut channel = DeliveryChannel::new(connector.clone(), DATABASE_NAME, ERROR_NAMESPACE);

        channel.send_batch(batch(3)).await;

        assert_eq!(channel.buffered().len(), 1);
        assert!(connector.writes().is_empty());
        assert_eq!(channel.stats().failed_reconnections, 1);
    }

    #[tokio::test]
    async fn test_send_batch_never_fails_under_any_script() {
        let (mut channel, connector) = connected_channel().await;
        connector.script_writes(vec![
            rejected(),
            rejected(),
            unreachable(),
            Ok(()),
            unreachable(),
            rejected(),
            Ok(()),
        ]);
        connector.script_creates(vec![unreachable()]);

        for _ in 0..6 {
            channel.send_batch(batch(3)).await;
        }

        assert!(channel.buffered().len() <= 2);
    }
}
