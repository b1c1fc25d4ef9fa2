use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::comm::MonitoredComm;
use crate::error::Result;
use crate::transport::Transport;
use crate::types::{DataType, ReduceOp};

/// Pause between two reductions of the foreground loop.
pub const DEFAULT_OP_INTERVAL: Duration = Duration::from_millis(50);

/// Foreground loop that repeatedly reduces `send` into `recv` through a
/// [`MonitoredComm`].
///
/// The loop is blocking: run it on a dedicated thread (or the tokio blocking
/// pool). A failed reduction ends the loop with that error; nothing is retried.
pub struct CollectiveLoop<T: Transport> {
    comm: Arc<MonitoredComm<T>>,
    send: T::Buffer,
    recv: T::Buffer,
    count: usize,
    dtype: DataType,
    op: ReduceOp,
    interval: Duration,
    /// 0 means unbounded.
    max_iterations: u64,
    iterations: u64,
}

impl<T: Transport> CollectiveLoop<T> {
    /// Sum-reduce `count` f32 elements every [`DEFAULT_OP_INTERVAL`].
    pub fn new(comm: Arc<MonitoredComm<T>>, send: T::Buffer, recv: T::Buffer, count: usize) -> Self {
        Self {
            comm,
            send,
            recv,
            count,
            dtype: DataType::F32,
            op: ReduceOp::Sum,
            interval: DEFAULT_OP_INTERVAL,
            max_iterations: 0,
            iterations: 0,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_reduction(mut self, dtype: DataType, op: ReduceOp) -> Self {
        self.dtype = dtype;
        self.op = op;
        self
    }

    /// Completed reductions.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn recv(&self) -> &T::Buffer {
        &self.recv
    }

    /// Hand back `(send, recv)` so the caller can free them.
    pub fn into_buffers(self) -> (T::Buffer, T::Buffer) {
        (self.send, self.recv)
    }

    /// Issue exactly one reduction.
    pub fn step(&mut self) -> Result<()> {
        if let Err(e) = self.comm.all_reduce(
            &self.send,
            &mut self.recv,
            self.count,
            self.dtype,
            self.op,
        ) {
            tracing::error!(
                rank = self.comm.rank(),
                iteration = self.iterations,
                error = %e,
                "reduction failed"
            );
            return Err(e);
        }
        self.iterations += 1;
        Ok(())
    }

    /// Reduce until `token` is cancelled, `max_iterations` is reached, or a
    /// reduction fails.
    pub fn run(mut self, token: CancellationToken) -> Result<Self> {
        tracing::info!(
            rank = self.comm.rank(),
            count = self.count,
            dtype = %self.dtype,
            op = %self.op,
            interval_ms = self.interval.as_millis() as u64,
            "collective loop started"
        );
        while !token.is_cancelled() {
            self.step()?;
            if self.max_iterations > 0 && self.iterations >= self.max_iterations {
                break;
            }
            std::thread::sleep(self.interval);
        }
        tracing::info!(
            rank = self.comm.rank(),
            iterations = self.iterations,
            "collective loop finished"
        );
        Ok(self)
    }
}
