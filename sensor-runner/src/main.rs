//! Sensor runner: forwards a sensor's output to InfluxDB.

use anyhow::Context;
use tracing::{error, info};

use sensor_runner::{
    DeliveryChannel, InfluxConnector, LineParser, RunnerArgs, RunnerConfig, RunnerError,
    SensorCommand, Supervisor, connect_with_retries,
};
use sensor_runner_common::init_tracing;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = RunnerArgs::parse();
    let config = RunnerConfig::from_args(&args)?;

    init_tracing(&config.logging).context("Failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        executable = %config.sensor.executable.display(),
        host = %config.influxdb.host,
        port = config.influxdb.port,
        transport = %config.influxdb.transport,
        environment = %config.sensor.environment,
        "Starting sensor runner"
    );

    let mut channel = DeliveryChannel::new(
        InfluxConnector,
        config.influxdb.database.clone(),
        config.influxdb.error_namespace.clone(),
    );

    if let Err(e) = connect_with_retries(
        &mut channel,
        config.descriptor(),
        config.influxdb.clear_data,
        &config.retry_policy(),
    )
    .await
    {
        error!(error = %e, "Giving up on metrics database");
        return Err(RunnerError::from(e).into());
    }

    let parser = LineParser::new(
        config.sensor.fields.clone(),
        config.sensor.environment.clone(),
        config.influxdb.error_namespace.clone(),
    );
    let command =
        SensorCommand::new(config.sensor.executable.clone()).with_args(config.sensor.args.clone());
    let mut supervisor = Supervisor::new(command, parser, config.restart_delay());

    tokio::select! {
        _ = supervisor.run(&mut channel) => {}
        signal = shutdown_signal() => {
            info!(signal, "Received shutdown signal");
        }
    }

    let stats = channel.stats();
    info!(
        launches = supervisor.launches(),
        batches_sent = stats.batches_sent,
        points_sent = stats.points_sent,
        rejected_batches = stats.rejected_batches,
        connectivity_failures = stats.connectivity_failures,
        reconnections = stats.reconnections,
        failed_reconnections = stats.failed_reconnections,
        buffered = channel.buffered().len(),
        "Final statistics"
    );

    info!("Sensor runner stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM and return the signal name.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
