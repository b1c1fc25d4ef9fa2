//! Fault bookkeeping for a monitored communicator.

use std::time::{Duration, Instant};

/// Result of polling a communicator for out-of-band transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AsyncErrorCode {
    #[default]
    Ok,
    /// A non-blocking operation is still in flight.
    InProgress,
    RecoverableTransportError,
    UnrecoverableTransportError,
}

impl AsyncErrorCode {
    /// Anything other than `Ok` triggers an abort.
    pub fn is_ok(self) -> bool {
        self == AsyncErrorCode::Ok
    }
}

impl std::fmt::Display for AsyncErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsyncErrorCode::Ok => f.write_str("ok"),
            AsyncErrorCode::InProgress => f.write_str("in progress"),
            AsyncErrorCode::RecoverableTransportError => f.write_str("recoverable transport error"),
            AsyncErrorCode::UnrecoverableTransportError => {
                f.write_str("unrecoverable transport error")
            }
        }
    }
}

/// Lifecycle of a monitored communicator.
///
/// `Healthy -> Aborting -> Aborted`, and any state `-> Released` once the
/// underlying resource is gone. Nothing leads back to `Healthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommState {
    Healthy,
    /// Abort was issued but did not complete successfully.
    Aborting,
    Aborted,
    Released,
}

impl CommState {
    pub fn is_healthy(self) -> bool {
        self == CommState::Healthy
    }
}

/// What the watchdog has observed so far.
#[derive(Debug, Clone, Default)]
pub struct FaultState {
    /// Last code returned by the transport. Never moves back to `Ok`.
    pub last_code: AsyncErrorCode,
    pub last_checked: Option<Instant>,
    /// Number of checks that actually queried the transport.
    pub checks: u64,
    /// Wall time spent inside the abort call, once it ran.
    pub abort_elapsed: Option<Duration>,
}

impl FaultState {
    /// Record one transport query.
    pub(crate) fn observe(&mut self, code: AsyncErrorCode, at: Instant) {
        self.checks += 1;
        self.last_checked = Some(at);
        if self.last_code.is_ok() {
            self.last_code = code;
        }
    }

    pub fn is_faulted(&self) -> bool {
        !self.last_code.is_ok()
    }
}

/// Outcome of a single `check_health` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    Healthy,
    /// This call found a fault and aborted the communicator.
    Aborted {
        code: AsyncErrorCode,
        elapsed: Duration,
    },
    /// The communicator was not healthy before this call; nothing was queried.
    Inactive(CommState),
}

/// What `acquire` does once the communicator has been aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbortPolicy {
    /// Keep handing out the aborted resource; the next collective fails
    /// against it and reports the error.
    #[default]
    DeferToNextOp,
    /// Refuse to hand out the resource once aborted.
    FailFast,
}

impl std::str::FromStr for AbortPolicy {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "defer" | "defer-to-next-op" => Ok(AbortPolicy::DeferToNextOp),
            "fail-fast" | "failfast" => Ok(AbortPolicy::FailFast),
            _ => Err(()),
        }
    }
}
