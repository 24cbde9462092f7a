//! Startup sequencing: connect to the database before the sensor is launched.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::delivery::DeliveryChannel;
use crate::influx::{ConnectionDescriptor, Connector, DeliveryError};

/// Default number of connection attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default pause between connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// How often and how fast the initial connection is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// The database could not be prepared at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("metrics database still unreachable after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("cannot prepare metrics database: {0}")]
    Setup(DeliveryError),
}

/// Initialize the channel's connection, retrying while the database is unreachable.
///
/// Any other failure aborts immediately.
pub async fn connect_with_retries<C: Connector>(
    channel: &mut DeliveryChannel<C>,
    descriptor: ConnectionDescriptor,
    clear_on_init: bool,
    policy: &RetryPolicy,
) -> Result<(), StartupError> {
    for attempt in 1..=policy.max_attempts {
        match channel.init_connection(descriptor.clone(), clear_on_init).await {
            Ok(()) => {
                info!(attempt, database = %channel.database(), "Connected to metrics database");
                return Ok(());
            }
            Err(DeliveryError::Unreachable(reason)) => {
                let remaining = policy.max_attempts - attempt;
                warn!(
                    error = %reason,
                    remaining,
                    "Metrics database not reachable yet"
                );
                if remaining > 0 {
                    tokio::time::sleep(policy.interval).await;
                }
            }
            Err(e) => return Err(StartupError::Setup(e)),
        }
    }

    Err(StartupError::RetriesExhausted {
        attempts: policy.max_attempts,
    })
}
