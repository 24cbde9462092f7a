//! Sensor process supervision.
//!
//! The supervisor launches the sensor, streams its output into the delivery
//! channel and relaunches it whenever the output ends or stalls:
//!
//! ```text
//! Launching ──spawned──▶ Streaming ──ended──▶ Restarting ──delay──▶ Launching
//!     └──────────spawn failed─────────────────────▲
//! ```

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::delivery::DeliveryChannel;
use crate::influx::Connector;
use crate::parser::LineParser;
use crate::stream::{BatchStream, RunEnd, stream_into};

/// Default pause before relaunching the sensor.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(1000);

/// Executable and arguments of the sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorCommand {
    pub executable: PathBuf,
    pub args: Vec<String>,
}

impl SensorCommand {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Start the sensor with its stdout piped.
    ///
    /// The process is killed if the returned handle is dropped.
    pub fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.executable)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Supervisor lifecycle state.
#[derive(Debug)]
pub enum SupervisorState {
    /// About to start the sensor.
    Launching,
    /// Reading the running sensor's output.
    Streaming(Child),
    /// Waiting before the next launch.
    Restarting,
}

/// Keeps the sensor running and its output flowing to the database.
#[derive(Debug)]
pub struct Supervisor {
    command: SensorCommand,
    parser: LineParser,
    restart_delay: Duration,
    launches: u64,
}

impl Supervisor {
    pub fn new(command: SensorCommand, parser: LineParser, restart_delay: Duration) -> Self {
        Self {
            command,
            parser,
            restart_delay,
            launches: 0,
        }
    }

    /// Number of launch attempts so far.
    pub fn launches(&self) -> u64 {
        self.launches
    }

    /// Run one launch, stream and restart-delay cycle.
    ///
    /// Returns how the sensor output ended, or `None` when the sensor could not
    /// be started.
    pub async fn run_once<C: Connector>(
        &mut self,
        channel: &mut DeliveryChannel<C>,
    ) -> Option<RunEnd> {
        let mut state = SupervisorState::Launching;
        let mut end = None;

        loop {
            state = match state {
                SupervisorState::Launching => self.launch(),
                SupervisorState::Streaming(child) => {
                    end = Some(self.stream(child, channel).await);
                    SupervisorState::Restarting
                }
                SupervisorState::Restarting => {
                    debug!(
                        delay_ms = self.restart_delay.as_millis() as u64,
                        "Waiting before relaunch"
                    );
                    tokio::time::sleep(self.restart_delay).await;
                    return end;
                }
            };
        }
    }

    /// Supervise the sensor forever.
    pub async fn run<C: Connector>(&mut self, channel: &mut DeliveryChannel<C>) {
        loop {
            if let Some(end) = self.run_once(channel).await {
                info!(reason = %end, "Relaunching sensor");
            }
        }
    }

    fn launch(&mut self) -> SupervisorState {
        self.launches += 1;
        self.parser.reset();

        info!(
            executable = %self.command.executable.display(),
            launch = self.launches,
            "Launching sensor"
        );

        match self.command.spawn() {
            Ok(child) => SupervisorState::Streaming(child),
            Err(e) => {
                error!(
                    executable = %self.command.executable.display(),
                    error = %e,
                    "Failed to launch sensor"
                );
                SupervisorState::Restarting
            }
        }
    }

    async fn stream<C: Connector>(
        &mut self,
        mut child: Child,
        channel: &mut DeliveryChannel<C>,
    ) -> RunEnd {
        let end = match child.stdout.take() {
            Some(stdout) => {
                let mut batches = BatchStream::new(BufReader::new(stdout), &mut self.parser);
                stream_into(&mut batches, channel).await
            }
            None => RunEnd::ReadError("sensor stdout not captured".to_string()),
        };

        stop(&mut child).await;
        end
    }
}

/// Kill the sensor if it is still running and reap it.
async fn stop(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            info!(status = %status, "Sensor exited");
            return;
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Cannot query sensor status"),
    }

    match child.kill().await {
        Ok(()) => info!("Sensor stopped"),
        Err(e) => warn!(error = %e, "Failed to stop sensor"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::delivery::mock::MockConnector;
    use crate::fields::{DATABASE_NAME, ERROR_NAMESPACE, default_fields};
    use crate::influx::{ConnectionDescriptor, Transport};

    async fn channel() -> (DeliveryChannel<MockConnector>, MockConnector) {
        let connector = MockConnector::default();
        let mut channel = DeliveryChannel::new(connector.clone(), DATABASE_NAME, ERROR_NAMESPACE);
        channel
            .init_connection(
                ConnectionDescriptor::new("localhost", 8086, Transport::Http, DATABASE_NAME),
                false,
            )
            .await
            .unwrap();
        (channel, connector)
    }

    fn shell(script: &str) -> Supervisor {
        Supervisor::new(
            SensorCommand::new("sh").with_args(["-c", script]),
            LineParser::new(default_fields(), "test", ERROR_NAMESPACE),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_run_once_streams_until_exit() {
        let (mut channel, connector) = channel().await;
        let mut supervisor = shell("printf '1.0 2 3\\n0.5 1 4\\n'");

        let end = supervisor.run_once(&mut channel).await;

        assert_eq!(end, Some(RunEnd::EndOfStream));
        assert_eq!(connector.writes().len(), 2);
        assert_eq!(supervisor.launches(), 1);
    }

    #[tokio::test]
    async fn test_stalled_sensor_is_killed() {
        let (mut channel, connector) = channel().await;
        let mut supervisor = shell("printf '1.0 2 3\\n1.0 2 3\\n'; sleep 30");

        let end = tokio::time::timeout(Duration::from_secs(10), supervisor.run_once(&mut channel))
            .await
            .expect("stalled sensor was not stopped");

        assert_eq!(end, Some(RunEnd::Stalled));
        assert_eq!(connector.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_relaunch_resets_stall_detection() {
        let (mut channel, connector) = channel().await;
        let mut supervisor = shell("printf '1.0 2 3\\n'");

        supervisor.run_once(&mut channel).await;
        supervisor.run_once(&mut channel).await;

        // Same line after a relaunch is not a stall
        assert_eq!(connector.writes().len(), 2);
        assert_eq!(supervisor.launches(), 2);
    }

    #[tokio::test]
    async fn test_missing_executable_goes_to_restart() {
        let (mut channel, connector) = channel().await;
        let mut supervisor = Supervisor::new(
            SensorCommand::new("/nonexistent/sensor"),
            LineParser::new(default_fields(), "", ERROR_NAMESPACE),
            Duration::ZERO,
        );

        assert_eq!(supervisor.run_once(&mut channel).await, None);
        assert!(connector.writes().is_empty());
        assert_eq!(supervisor.launches(), 1);
    }

    #[tokio::test]
    async fn test_sensor_arguments_are_passed() {
        let (mut channel, connector) = channel().await;
        let mut supervisor = Supervisor::new(
            SensorCommand::new("sh").with_args([
                "-c",
                "echo \"$1 $2 $3\"",
                "sensor",
                "0.25",
                "7",
                "9",
            ]),
            LineParser::new(default_fields(), "", ERROR_NAMESPACE),
            Duration::ZERO,
        );

        supervisor.run_once(&mut channel).await;

        let writes = connector.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0][1].value(), sensor_runner_common::MetricValue::Integer(7));
    }
}
