use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::error::{CommError, Result};
use crate::fault::{AbortPolicy, CommState, FaultState, HealthCheck};
use crate::transport::Transport;
use crate::types::{DataType, Rank, ReduceOp};

struct Inner<C> {
    comm: C,
    state: CommState,
    fault: FaultState,
}

/// A communicator guarded by a lock and watched for asynchronous faults.
///
/// Every access to the underlying resource (fetching it for an operation,
/// polling it for errors, aborting it, releasing it) goes through one mutex.
/// The lock is held only for the fetch or the check; the collective itself
/// runs outside it, so a fetch may race with an abort that lands right
/// after it. With [`AbortPolicy::DeferToNextOp`] that collective (or the
/// next one) fails against the aborted resource and reports the error.
///
/// The resource is released exactly once: by the abort after a fault, or
/// by [`destroy`](Self::destroy) / `Drop` otherwise.
pub struct MonitoredComm<T: Transport> {
    transport: T,
    inner: Mutex<Inner<T::Comm>>,
    rank: Rank,
    world_size: u32,
    policy: AbortPolicy,
}

impl<T: Transport> MonitoredComm<T> {
    /// Take ownership of an already-created communicator.
    pub fn new(transport: T, comm: T::Comm, rank: Rank, world_size: u32) -> Self {
        Self {
            transport,
            inner: Mutex::new(Inner {
                comm,
                state: CommState::Healthy,
                fault: FaultState::default(),
            }),
            rank,
            world_size,
            policy: AbortPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: AbortPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    pub fn policy(&self) -> AbortPolicy {
        self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> Result<CommState> {
        Ok(self.lock()?.state)
    }

    /// Snapshot of what the health checks have seen so far.
    pub fn fault_state(&self) -> Result<FaultState> {
        Ok(self.lock()?.fault.clone())
    }

    /// Fetch the resource for one operation.
    ///
    /// The lock is released before this returns.
    pub fn acquire(&self) -> Result<T::Comm> {
        let inner = self.lock()?;
        match inner.state {
            CommState::Healthy => Ok(inner.comm.clone()),
            CommState::Aborting | CommState::Aborted => match self.policy {
                AbortPolicy::DeferToNextOp => Ok(inner.comm.clone()),
                AbortPolicy::FailFast => Err(CommError::CommAborted { rank: self.rank }),
            },
            CommState::Released => Err(CommError::CommReleased { rank: self.rank }),
        }
    }

    /// Poll the transport for an asynchronous error and abort on the first one.
    ///
    /// The abort runs inside the critical section, so it blocks concurrent
    /// `acquire` calls for as long as the transport takes to tear down.
    /// Once the communicator has left `Healthy` this is a no-op and the
    /// transport is not touched again.
    pub fn check_health(&self) -> Result<HealthCheck> {
        let mut inner = self.lock()?;
        if !inner.state.is_healthy() {
            return Ok(HealthCheck::Inactive(inner.state));
        }

        let code = self.transport.async_error(&inner.comm)?;
        inner.fault.observe(code, Instant::now());
        if code.is_ok() {
            return Ok(HealthCheck::Healthy);
        }

        let fault = CommError::transport_async(self.rank, code);
        tracing::error!(
            rank = self.rank,
            error = %fault,
            transport = self.transport.name(),
            "aborting communicator"
        );
        inner.state = CommState::Aborting;
        let start = Instant::now();
        self.transport.abort(&inner.comm)?;
        let elapsed = start.elapsed();

        inner.fault.abort_elapsed = Some(elapsed);
        inner.state = CommState::Aborted;
        tracing::warn!(
            rank = self.rank,
            elapsed_ms = elapsed.as_secs_f64() * 1e3,
            "communicator abort finished"
        );
        Ok(HealthCheck::Aborted { code, elapsed })
    }

    /// Release the communicator. Safe to call more than once.
    pub fn destroy(&self) -> Result<()> {
        let mut inner = self.lock()?;
        release(&self.transport, &mut inner, self.rank)
    }

    /// Issue one reduction from `send` into `recv`.
    pub fn all_reduce(
        &self,
        send: &T::Buffer,
        recv: &mut T::Buffer,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<()> {
        let comm = self.acquire()?;
        self.transport.all_reduce(&comm, send, recv, count, dtype, op)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner<T::Comm>>> {
        self.inner
            .lock()
            .map_err(|_| CommError::LockPoisoned("monitored comm"))
    }
}

fn release<T: Transport>(transport: &T, inner: &mut Inner<T::Comm>, rank: Rank) -> Result<()> {
    match inner.state {
        CommState::Released => Ok(()),
        // Abort already tore the resource down; a failed abort is not retried.
        CommState::Aborted | CommState::Aborting => {
            inner.state = CommState::Released;
            Ok(())
        }
        CommState::Healthy => {
            inner.state = CommState::Released;
            transport.destroy(&inner.comm)?;
            tracing::debug!(rank, "communicator destroyed");
            Ok(())
        }
    }
}

impl<T: Transport> Drop for MonitoredComm<T> {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = release(&self.transport, inner, self.rank) {
            tracing::warn!(rank = self.rank, error = %e, "communicator release failed");
        }
    }
}
