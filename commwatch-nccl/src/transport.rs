use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use commwatch::{
    AsyncErrorCode, CommError, DataType, Rank, ReduceOp, RendezvousId, Result, Transport,
};
use cudarc::driver::{CudaContext, CudaStream};
use cudarc::nccl::{result as nccl, sys};

use crate::device::DeviceBuffer;
use crate::error;
use crate::types::{async_code, id_to_rendezvous, rendezvous_to_id, to_nccl_dtype, to_nccl_op};

/// Raw NCCL communicator handle plus the rank it was created for.
///
/// Clones share one released flag. Abort and destroy free the handle, after
/// which every clone refuses to pass it to NCCL again.
#[derive(Debug, Clone)]
pub struct NcclComm {
    raw: sys::ncclComm_t,
    rank: Rank,
    released: Arc<AtomicBool>,
}

// SAFETY: ncclComm_t is an opaque handle. Lifecycle calls on it (async error
// query, abort, destroy) are serialized by `MonitoredComm`, and the released
// flag keeps a freed handle out of every later call.
unsafe impl Send for NcclComm {}
unsafe impl Sync for NcclComm {}

impl NcclComm {
    fn new(raw: sys::ncclComm_t, rank: Rank) -> Self {
        Self {
            raw,
            rank,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// The raw handle, if it has not been freed yet.
    fn live(&self, operation: &'static str) -> Result<sys::ncclComm_t> {
        if self.is_released() {
            return Err(CommError::transport_sync(
                operation,
                self.rank,
                "communicator already released",
            ));
        }
        Ok(self.raw)
    }

    /// Claim the handle for freeing. Succeeds once across all clones.
    fn take(&self, operation: &'static str) -> Result<sys::ncclComm_t> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Err(CommError::transport_sync(
                operation,
                self.rank,
                "communicator already released",
            ));
        }
        Ok(self.raw)
    }
}

/// NCCL over cudarc on one CUDA device.
///
/// Uses cudarc's `result` layer directly, with one dedicated stream for all
/// collectives.
pub struct NcclTransport {
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    device: usize,
}

impl NcclTransport {
    /// Open device `ordinal`. Ranks usually pass their local rank.
    pub fn new(ordinal: usize) -> Result<Self> {
        let ctx = CudaContext::new(ordinal)
            .map_err(|e| error::driver(format!("cannot open CUDA device {ordinal}"), e))?;
        let stream = ctx
            .new_stream()
            .map_err(|e| error::driver("cannot create CUDA stream", e))?;
        tracing::info!(device = ordinal, "CUDA device selected");
        Ok(Self {
            ctx,
            stream,
            device: ordinal,
        })
    }

    pub fn device(&self) -> usize {
        self.device
    }

    /// Block until every collective issued so far has finished.
    pub fn synchronize(&self) -> Result<()> {
        self.bind()?;
        self.stream
            .synchronize()
            .map_err(|e| error::driver("stream synchronize failed", e))
    }

    fn bind(&self) -> Result<()> {
        self.ctx
            .bind_to_thread()
            .map_err(|e| error::driver("cannot bind CUDA context", e))
    }

    fn cu_stream(&self) -> sys::cudaStream_t {
        self.stream.cu_stream() as sys::cudaStream_t
    }
}

fn check_len(buf: &DeviceBuffer, bytes: usize) -> Result<()> {
    if buf.size_in_bytes() < bytes {
        return Err(CommError::BufferSizeMismatch {
            expected: bytes,
            actual: buf.size_in_bytes(),
        });
    }
    Ok(())
}

impl Transport for NcclTransport {
    type Comm = NcclComm;
    type Buffer = DeviceBuffer;

    fn name(&self) -> &'static str {
        "nccl"
    }

    fn generate_rendezvous_id() -> Result<RendezvousId> {
        let id = nccl::get_uniqueid().map_err(error::nccl_bootstrap)?;
        Ok(id_to_rendezvous(&id))
    }

    fn create_communicator(
        &self,
        world_size: u32,
        id: &RendezvousId,
        rank: Rank,
    ) -> Result<NcclComm> {
        if rank >= world_size {
            return Err(CommError::InvalidRank { rank, world_size });
        }
        self.bind()?;
        let mut raw = MaybeUninit::uninit();
        unsafe {
            nccl::comm_init_rank(
                raw.as_mut_ptr(),
                world_size as i32,
                rendezvous_to_id(id),
                rank as i32,
            )
            .map_err(|e| error::nccl_call("ncclCommInitRank", rank, e))?;
        }
        Ok(NcclComm::new(unsafe { raw.assume_init() }, rank))
    }

    fn allocate(&self, count: usize, dtype: DataType) -> Result<DeviceBuffer> {
        DeviceBuffer::zeroed(Arc::clone(&self.ctx), Arc::clone(&self.stream), count, dtype)
    }

    fn all_reduce(
        &self,
        comm: &NcclComm,
        send: &DeviceBuffer,
        recv: &mut DeviceBuffer,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<()> {
        let bytes = count * dtype.size_in_bytes();
        check_len(send, bytes)?;
        check_len(recv, bytes)?;
        let raw = comm.live("ncclAllReduce")?;
        self.bind()?;
        unsafe {
            nccl::all_reduce(
                send.device_ptr() as *const c_void,
                recv.device_ptr() as *mut c_void,
                count,
                to_nccl_dtype(dtype),
                to_nccl_op(op),
                raw,
                self.cu_stream(),
            )
            .map_err(|e| error::nccl_call("ncclAllReduce", comm.rank, e))?;
        }
        Ok(())
    }

    fn async_error(&self, comm: &NcclComm) -> Result<AsyncErrorCode> {
        let raw = comm.live("ncclCommGetAsyncError")?;
        let mut status = sys::ncclResult_t::ncclSuccess;
        let ret = unsafe { sys::ncclCommGetAsyncError(raw, &mut status) };
        if ret != sys::ncclResult_t::ncclSuccess {
            return Err(CommError::transport_sync(
                "ncclCommGetAsyncError",
                comm.rank,
                error::nccl_error_string(ret),
            ));
        }
        let code = async_code(status);
        if !code.is_ok() {
            tracing::warn!(
                rank = comm.rank,
                nccl = %error::nccl_error_string(status),
                "NCCL reported an asynchronous error"
            );
        }
        Ok(code)
    }

    fn abort(&self, comm: &NcclComm) -> Result<()> {
        let raw = comm.take("ncclCommAbort")?;
        unsafe { nccl::comm_abort(raw) }
            .map_err(|e| error::nccl_call("ncclCommAbort", comm.rank, e))?;
        Ok(())
    }

    fn destroy(&self, comm: &NcclComm) -> Result<()> {
        let raw = comm.take("ncclCommDestroy")?;
        self.bind()?;
        unsafe { nccl::comm_destroy(raw) }
            .map_err(|e| error::nccl_call("ncclCommDestroy", comm.rank, e))?;
        Ok(())
    }
}
