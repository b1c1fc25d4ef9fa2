use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use commwatch::{
    AsyncErrorCode, CommError, DataType, Rank, ReduceOp, RendezvousId, Result, Transport,
};

/// Counters shared by every clone of a [`ScriptedTransport`].
#[derive(Default)]
pub struct Script {
    /// 1-based health check that reports a fault; 0 never faults.
    fault_on_check: u64,
    /// Abort reports a synchronous transport failure.
    abort_fails: bool,
    aborted: AtomicBool,
    pub checks: AtomicU64,
    pub aborts: AtomicU32,
    pub destroys: AtomicU32,
    pub ops: AtomicU64,
}

/// Transport whose health checks follow a script.
///
/// Reductions copy `send` into `recv` until the communicator is aborted,
/// then fail the way a real transport does after an abort.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Script>,
}

#[derive(Debug, Clone, Copy)]
pub struct ScriptedComm;

impl ScriptedTransport {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn fault_on_check(n: u64) -> Self {
        Self {
            script: Arc::new(Script {
                fault_on_check: n,
                ..Script::default()
            }),
        }
    }

    /// Fault on check `n`, then fail the abort that follows.
    pub fn failing_abort_on_check(n: u64) -> Self {
        Self {
            script: Arc::new(Script {
                fault_on_check: n,
                abort_fails: true,
                ..Script::default()
            }),
        }
    }

    pub fn script(&self) -> Arc<Script> {
        Arc::clone(&self.script)
    }
}

impl Transport for ScriptedTransport {
    type Comm = ScriptedComm;
    type Buffer = Vec<f32>;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn generate_rendezvous_id() -> Result<RendezvousId> {
        Ok(RendezvousId::zeroed())
    }

    fn create_communicator(
        &self,
        _world_size: u32,
        _id: &RendezvousId,
        _rank: Rank,
    ) -> Result<ScriptedComm> {
        Ok(ScriptedComm)
    }

    fn allocate(&self, count: usize, _dtype: DataType) -> Result<Vec<f32>> {
        Ok(vec![0.0; count])
    }

    fn all_reduce(
        &self,
        _comm: &ScriptedComm,
        send: &Vec<f32>,
        recv: &mut Vec<f32>,
        count: usize,
        _dtype: DataType,
        _op: ReduceOp,
    ) -> Result<()> {
        self.script.ops.fetch_add(1, Ordering::SeqCst);
        if self.script.aborted.load(Ordering::SeqCst) {
            return Err(CommError::transport_sync(
                "all_reduce",
                0,
                "communicator aborted",
            ));
        }
        recv[..count].copy_from_slice(&send[..count]);
        Ok(())
    }

    fn async_error(&self, _comm: &ScriptedComm) -> Result<AsyncErrorCode> {
        let n = self.script.checks.fetch_add(1, Ordering::SeqCst) + 1;
        let fault_on = self.script.fault_on_check;
        if fault_on != 0 && n >= fault_on {
            Ok(AsyncErrorCode::UnrecoverableTransportError)
        } else {
            Ok(AsyncErrorCode::Ok)
        }
    }

    fn abort(&self, _comm: &ScriptedComm) -> Result<()> {
        self.script.aborts.fetch_add(1, Ordering::SeqCst);
        if self.script.abort_fails {
            return Err(CommError::transport_sync("abort", 0, "internal error"));
        }
        self.script.aborted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self, _comm: &ScriptedComm) -> Result<()> {
        self.script.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A connect future that has already joined the group.
pub fn ready<B>(bootstrap: B) -> std::future::Ready<Result<B>> {
    std::future::ready(Ok(bootstrap))
}

/// Poll `cond` every millisecond until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    cond()
}
