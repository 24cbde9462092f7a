//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Command line of the sensor runner.
///
/// Every setting is optional: unset values come from the configuration file,
/// then from the built-in defaults.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "sensor-runner",
    version,
    about = "Runs a sensor executable and forwards its output to InfluxDB"
)]
pub struct RunnerArgs {
    /// Path to a JSON5 configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Sensor executable to run.
    #[arg(long, env = "SENSOR_EXECUTABLE")]
    pub path_executable: Option<PathBuf>,

    /// InfluxDB host.
    #[arg(long, env = "HOST_METRICS")]
    pub host: Option<String>,

    /// InfluxDB port (HTTP API, or UDP listener with --use-udp).
    #[arg(long, env = "PORT_METRICS")]
    pub port: Option<u16>,

    /// Environment label attached to every metric.
    #[arg(long, env = "ENV")]
    pub env: Option<String>,

    /// Write metrics over UDP instead of HTTP.
    #[arg(long)]
    pub use_udp: bool,

    /// Drop the database before starting.
    #[arg(long)]
    pub clear_data: bool,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl RunnerArgs {
    /// Parse the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
