//! Keep-alive scheduling.
//!
//! A core drops a connection that stays silent past its idle threshold, so a
//! ticker issues a cheap probe (`NoOp`) every interval. A failed probe is
//! reported but never closes the connection on its own; read and write
//! errors on the socket drive that transition.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{QrcError, Result};

/// Default probe interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Default time a single probe may take.
pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Periodic probe driver for one connection.
#[derive(Debug, Clone, Copy)]
pub struct KeepAliveScheduler {
    interval: Duration,
    timeout: Duration,
}

impl KeepAliveScheduler {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Start ticking until `token` is cancelled.
    ///
    /// `probe` is called with the per-probe timeout once per interval, the
    /// first time one full interval from now. `on_failure` receives each
    /// probe error together with the number of consecutive failures.
    pub fn spawn<P, Fut, F>(
        &self,
        token: CancellationToken,
        probe: P,
        on_failure: F,
    ) -> JoinHandle<()>
    where
        P: Fn(Duration) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
        F: Fn(&QrcError, u32) + Send + 'static,
    {
        let period = self.interval.max(Duration::from_millis(1));
        let timeout = self.timeout;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failures: u32 = 0;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tracing::trace!("keep-alive tick");

                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    outcome = probe(timeout) => outcome,
                };

                match outcome {
                    Ok(()) => {
                        if failures > 0 {
                            tracing::debug!(failures, "keep-alive recovered");
                        }
                        failures = 0;
                    }
                    Err(e) => {
                        if token.is_cancelled() {
                            break;
                        }
                        failures = failures.saturating_add(1);
                        tracing::warn!(error = %e, failures, "keep-alive probe failed");
                        on_failure(&e, failures);
                    }
                }
            }
            tracing::debug!("keep-alive stopped");
        })
    }
}

impl Default for KeepAliveScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_KEEPALIVE_TIMEOUT)
    }
}
