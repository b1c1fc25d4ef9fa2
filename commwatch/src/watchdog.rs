use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::comm::MonitoredComm;
use crate::error::{CommError, Result};
use crate::fault::HealthCheck;
use crate::transport::Transport;

/// Default polling interval for asynchronous transport errors.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_millis(10);

/// Background loop that polls a [`MonitoredComm`] for asynchronous faults.
#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    interval: Duration,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_INTERVAL)
    }
}

impl Watchdog {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the polling loop.
    ///
    /// Each check runs on the blocking pool because the abort it may trigger
    /// can block for an unbounded time. The loop keeps polling after an
    /// abort (those checks are no-ops) and only ends when `token` is
    /// cancelled or a health query itself fails.
    pub fn spawn<T: Transport>(
        &self,
        comm: Arc<MonitoredComm<T>>,
        token: CancellationToken,
    ) -> JoinHandle<Result<()>> {
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!(rank = comm.rank(), "watchdog cancelled");
                        return Ok(());
                    }
                    _ = ticker.tick() => {}
                }

                let c = Arc::clone(&comm);
                let check = tokio::task::spawn_blocking(move || c.check_health())
                    .await
                    .map_err(|e| CommError::task("health check", e))?;

                match check {
                    Ok(HealthCheck::Aborted { code, elapsed }) => {
                        tracing::warn!(
                            rank = comm.rank(),
                            %code,
                            abort_ms = elapsed.as_millis() as u64,
                            "watchdog aborted communicator"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(rank = comm.rank(), error = %e, "health check failed");
                        return Err(e);
                    }
                }
            }
        })
    }
}
