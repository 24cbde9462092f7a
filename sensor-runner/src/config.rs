//! Runner configuration.
//!
//! Settings are layered: built-in defaults, then the optional JSON5 file, then
//! command line flags and their environment variables.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sensor_runner_common::{LoggingConfig, load_config};

use crate::args::RunnerArgs;
use crate::error::{Result, RunnerError};
use crate::fields::{DATABASE_NAME, ERROR_NAMESPACE, FieldSpec, default_fields};
use crate::influx::{ConnectionDescriptor, DEFAULT_HTTP_PORT, Transport};
use crate::startup::RetryPolicy;

/// Complete runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Metrics database settings.
    #[serde(default)]
    pub influxdb: InfluxConfig,

    /// Sensor process settings.
    #[serde(default)]
    pub sensor: SensorConfig,

    /// Initial connection retries.
    #[serde(default)]
    pub startup: StartupConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metrics database settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfluxConfig {
    /// Database host (default: "localhost").
    #[serde(default = "default_host")]
    pub host: String,

    /// Write port (default: 8086).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Write transport: "http" (default) or "udp".
    #[serde(default)]
    pub transport: Transport,

    /// Database name (default: "sensor").
    #[serde(default = "default_database")]
    pub database: String,

    /// Prefix of the pipeline's own error metrics (default: "sensor.error").
    #[serde(default = "default_error_namespace")]
    pub error_namespace: String,

    /// HTTP API port for administrative statements with the UDP transport.
    #[serde(default)]
    pub admin_port: Option<u16>,

    /// Per-request HTTP timeout in milliseconds (default: none).
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Drop the database before starting (default: false).
    #[serde(default)]
    pub clear_data: bool,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: Transport::default(),
            database: default_database(),
            error_namespace: default_error_namespace(),
            admin_port: None,
            timeout_ms: None,
            clear_data: false,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_database() -> String {
    DATABASE_NAME.to_string()
}

fn default_error_namespace() -> String {
    ERROR_NAMESPACE.to_string()
}

/// Sensor process settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Executable to run (default: "./sensor").
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment label attached to every metric (default: none).
    #[serde(default)]
    pub environment: String,

    /// Metric produced by each position of an output line.
    #[serde(default = "default_fields")]
    pub fields: Vec<FieldSpec>,

    /// Pause before relaunching the sensor, in milliseconds (default: 1000).
    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: Vec::new(),
            environment: String::new(),
            fields: default_fields(),
            restart_delay_ms: default_restart_delay(),
        }
    }
}

fn default_executable() -> PathBuf {
    PathBuf::from("./sensor")
}

fn default_restart_delay() -> u64 {
    1000
}

/// Initial connection retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Connection attempts before giving up (default: 20).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts in milliseconds (default: 1000).
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_ms: default_retry_interval(),
        }
    }
}

fn default_max_attempts() -> u32 {
    20
}

fn default_retry_interval() -> u64 {
    1000
}

impl RunnerConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// Call [`validate`](Self::validate) once command line overrides are applied.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(RunnerError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        Ok(load_config(path)?)
    }

    /// Build the effective configuration from the command line.
    pub fn from_args(args: &RunnerArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Override file settings with command line flags.
    pub fn apply_args(&mut self, args: &RunnerArgs) {
        if let Some(executable) = &args.path_executable {
            self.sensor.executable = executable.clone();
        }
        if let Some(host) = &args.host {
            self.influxdb.host = host.clone();
        }
        if let Some(port) = args.port {
            self.influxdb.port = port;
        }
        if let Some(env) = &args.env {
            self.sensor.environment = env.clone();
        }
        if args.use_udp {
            self.influxdb.transport = Transport::Udp;
        }
        if args.clear_data {
            self.influxdb.clear_data = true;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.sensor.executable.as_os_str().is_empty() {
            return Err(RunnerError::validation("sensor.executable must not be empty"));
        }
        if self.influxdb.host.trim().is_empty() {
            return Err(RunnerError::validation("influxdb.host must not be empty"));
        }
        if self.influxdb.port == 0 {
            return Err(RunnerError::validation("influxdb.port must be > 0"));
        }
        if self.influxdb.database.is_empty() {
            return Err(RunnerError::validation("influxdb.database must not be empty"));
        }
        if self.influxdb.error_namespace.is_empty() {
            return Err(RunnerError::validation(
                "influxdb.error_namespace must not be empty",
            ));
        }
        if self.startup.max_attempts == 0 {
            return Err(RunnerError::validation("startup.max_attempts must be > 0"));
        }
        if self.sensor.fields.is_empty() {
            return Err(RunnerError::validation("At least one sensor field required"));
        }

        let mut names = HashSet::new();
        for field in &self.sensor.fields {
            if field.name.is_empty() {
                return Err(RunnerError::validation("Sensor field names must not be empty"));
            }
            if !names.insert(field.name.as_str()) {
                return Err(RunnerError::validation(format!(
                    "Duplicate sensor field '{}'",
                    field.name
                )));
            }
        }

        Ok(())
    }

    /// Where and how to reach the database.
    pub fn descriptor(&self) -> ConnectionDescriptor {
        let mut descriptor = ConnectionDescriptor::new(
            self.influxdb.host.clone(),
            self.influxdb.port,
            self.influxdb.transport,
            self.influxdb.database.clone(),
        );
        descriptor.admin_port = self.influxdb.admin_port;
        descriptor.timeout = self.influxdb.timeout_ms.map(Duration::from_millis);
        descriptor
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.startup.max_attempts,
            interval: Duration::from_millis(self.startup.retry_interval_ms),
        }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.sensor.restart_delay_ms)
    }
}
