//! Sensor Runner
//!
//! Runs a sensor executable, turns every line it prints into a batch of
//! metrics and writes the batches to InfluxDB.
//!
//! # Overview
//!
//! - [`LineParser`] and [`BatchStream`] parse the sensor output and detect stalls
//! - [`DeliveryChannel`] writes batches and survives database outages
//! - [`connect_with_retries`] prepares the database before the sensor starts
//! - [`Supervisor`] launches the sensor and relaunches it when its output ends
//! - [`RunnerConfig`] and [`RunnerArgs`] form the configuration surface
//!
//! # Example
//!
//! ```ignore
//! use sensor_runner::{
//!     DeliveryChannel, InfluxConnector, LineParser, RunnerArgs, RunnerConfig, SensorCommand,
//!     Supervisor, connect_with_retries,
//! };
//!
//! let config = RunnerConfig::from_args(&RunnerArgs::parse())?;
//!
//! let mut channel = DeliveryChannel::new(
//!     InfluxConnector,
//!     &config.influxdb.database,
//!     &config.influxdb.error_namespace,
//! );
//! connect_with_retries(&mut channel, config.descriptor(), false, &config.retry_policy()).await?;
//!
//! let parser = LineParser::new(
//!     config.sensor.fields.clone(),
//!     &config.sensor.environment,
//!     &config.influxdb.error_namespace,
//! );
//! let mut supervisor = Supervisor::new(
//!     SensorCommand::new(&config.sensor.executable),
//!     parser,
//!     config.restart_delay(),
//! );
//! supervisor.run(&mut channel).await;
//! ```

pub mod args;
pub mod caster;
pub mod config;
pub mod delivery;
pub mod error;
pub mod fields;
pub mod influx;
pub mod parser;
pub mod startup;
pub mod stream;
pub mod supervisor;

pub use args::RunnerArgs;
pub use caster::cast_metric;
pub use config::RunnerConfig;
pub use delivery::{DeliveryChannel, DeliveryStats};
pub use error::{Result, RunnerError};
pub use fields::{CastError, FieldKind, FieldSpec};
pub use influx::{
    ConnectionDescriptor, Connector, DeliveryError, InfluxConnector, MetricsClient, Transport,
};
pub use parser::{LineOutcome, LineParser};
pub use startup::{RetryPolicy, StartupError, connect_with_retries};
pub use stream::{BatchStream, RunEnd, stream_into};
pub use supervisor::{SensorCommand, Supervisor, SupervisorState};

// Re-export commonly used types from sensor-runner-common
pub use sensor_runner_common::{LogFormat, LoggingConfig, MetricPoint, MetricValue};
