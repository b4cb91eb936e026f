//! Exponential-backoff reconnection for bus clients.
//!
//! Nothing is buffered while a client is disconnected: messages published
//! in the meantime are simply missed.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Next backoff delay, clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Retry `connect` with increasing delays until it succeeds.
///
/// Returns `None` if `cancel` fires first.
pub async fn reconnect_loop<T, E, F, Fut>(
    endpoint: &str,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    mut connect: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tracing::info!(endpoint, attempt, "Connecting");

        tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!(endpoint, "Reconnect cancelled");
                return None;
            }
            result = connect() => match result {
                Ok(connection) => {
                    tracing::info!(endpoint, attempt, "Connected");
                    return Some(connection);
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Connection attempt {attempt} failed",
                    );
                }
            }
        }

        tokio::select! {
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
