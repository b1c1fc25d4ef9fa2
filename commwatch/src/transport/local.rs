//! In-process CPU transport.
//!
//! Every rank of a group lives in the same process (one thread or task per
//! rank). Groups are found through a process-wide registry keyed by the
//! rendezvous id, the way a real transport finds peers through its unique id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, LazyLock, Mutex, MutexGuard, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{CommError, Result};
use crate::fault::AsyncErrorCode;
use crate::reduce::reduce_into;
use crate::transport::Transport;
use crate::types::{DataType, RENDEZVOUS_ID_BYTES, Rank, RendezvousId, ReduceOp};

static FABRICS: LazyLock<Mutex<HashMap<RendezvousId, Weak<Fabric>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Host memory buffer for [`LocalTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct HostBuffer {
    bytes: Vec<u8>,
    dtype: DataType,
}

impl HostBuffer {
    pub fn zeroed(count: usize, dtype: DataType) -> Self {
        Self {
            bytes: vec![0u8; count * dtype.size_in_bytes()],
            dtype,
        }
    }

    pub fn from_f32(values: &[f32]) -> Self {
        Self {
            bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            dtype: DataType::F32,
        }
    }

    /// Decode as `f32` values. Empty unless the buffer holds `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        if self.dtype != DataType::F32 {
            return Vec::new();
        }
        self.bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.dtype.size_in_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Shared reduction state for one group.
struct Fabric {
    world_size: u32,
    state: Mutex<FabricState>,
    round_done: Condvar,
}

#[derive(Default)]
struct FabricState {
    joined: Vec<Rank>,
    /// Incremented each time a reduction round completes.
    generation: u64,
    arrived: u32,
    round: Option<(usize, DataType, ReduceOp)>,
    acc: Vec<u8>,
    result: Arc<Vec<u8>>,
    aborted: Vec<Rank>,
}

/// Per-rank flags of a local communicator.
#[derive(Default)]
struct CommFlags {
    aborted: AtomicBool,
    destroyed: AtomicBool,
    aborts: AtomicU32,
    destroys: AtomicU32,
    pending: Mutex<AsyncErrorCode>,
}

/// One rank's membership in a local group.
#[derive(Clone)]
pub struct LocalComm {
    fabric: Arc<Fabric>,
    rank: Rank,
    flags: Arc<CommFlags>,
}

impl LocalComm {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn world_size(&self) -> u32 {
        self.fabric.world_size
    }

    /// Make the next `async_error` poll report `code`, as if the fabric
    /// had failed underneath this rank.
    pub fn inject_async_error(&self, code: AsyncErrorCode) {
        if let Ok(mut pending) = self.flags.pending.lock() {
            *pending = code;
        }
    }

    /// Number of times `abort` ran on this communicator.
    pub fn abort_count(&self) -> u32 {
        self.flags.aborts.load(Ordering::SeqCst)
    }

    /// Number of times `destroy` ran on this communicator.
    pub fn destroy_count(&self) -> u32 {
        self.flags.destroys.load(Ordering::SeqCst)
    }

    fn is_released(&self) -> bool {
        self.flags.aborted.load(Ordering::SeqCst) || self.flags.destroyed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("world_size", &self.fabric.world_size)
            .finish()
    }
}

/// CPU transport whose ranks share one process.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

fn lock_fabric(fabric: &Fabric) -> Result<MutexGuard<'_, FabricState>> {
    fabric
        .state
        .lock()
        .map_err(|_| CommError::LockPoisoned("local fabric"))
}

/// FNV-1a over a sequence of byte slices.
fn fnv1a<I, S>(parts: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut h: u64 = 0xcbf29ce484222325;
    for part in parts {
        for &b in part.as_ref() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
    }
    h
}

impl Transport for LocalTransport {
    type Comm = LocalComm;
    type Buffer = HostBuffer;

    fn name(&self) -> &'static str {
        "local"
    }

    fn generate_rendezvous_id() -> Result<RendezvousId> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();

        let mut bytes = [0u8; RENDEZVOUS_ID_BYTES];
        for (i, chunk) in bytes.chunks_exact_mut(8).enumerate() {
            let h = fnv1a([
                &nanos.to_le_bytes()[..],
                &seq.to_le_bytes(),
                &pid.to_le_bytes(),
                &(i as u64).to_le_bytes(),
            ]);
            chunk.copy_from_slice(&h.to_le_bytes());
        }
        Ok(RendezvousId::from_bytes(bytes))
    }

    fn create_communicator(
        &self,
        world_size: u32,
        id: &RendezvousId,
        rank: Rank,
    ) -> Result<LocalComm> {
        if rank >= world_size {
            return Err(CommError::InvalidRank { rank, world_size });
        }

        let fabric = {
            let mut fabrics = FABRICS
                .lock()
                .map_err(|_| CommError::LockPoisoned("local fabric registry"))?;
            fabrics.retain(|_, f| f.strong_count() > 0);
            match fabrics.get(id).and_then(Weak::upgrade) {
                Some(f) => f,
                None => {
                    let f = Arc::new(Fabric {
                        world_size,
                        state: Mutex::new(FabricState::default()),
                        round_done: Condvar::new(),
                    });
                    fabrics.insert(*id, Arc::downgrade(&f));
                    f
                }
            }
        };

        if fabric.world_size != world_size {
            return Err(CommError::bootstrap(format!(
                "group {id:?} has world size {}, rank {rank} asked for {world_size}",
                fabric.world_size
            )));
        }

        {
            let mut state = lock_fabric(&fabric)?;
            if state.joined.contains(&rank) {
                return Err(CommError::bootstrap(format!(
                    "rank {rank} already joined group {id:?}"
                )));
            }
            state.joined.push(rank);
        }

        tracing::debug!(rank, world_size, ?id, "local communicator created");
        Ok(LocalComm {
            fabric,
            rank,
            flags: Arc::new(CommFlags::default()),
        })
    }

    fn allocate(&self, count: usize, dtype: DataType) -> Result<HostBuffer> {
        Ok(HostBuffer::zeroed(count, dtype))
    }

    fn all_reduce(
        &self,
        comm: &LocalComm,
        send: &HostBuffer,
        recv: &mut HostBuffer,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<()> {
        let rank = comm.rank;
        if comm.is_released() {
            return Err(CommError::transport_sync(
                "all_reduce",
                rank,
                "communicator has been aborted or destroyed",
            ));
        }
        let bytes = count * dtype.size_in_bytes();
        if send.as_bytes().len() < bytes || recv.as_bytes().len() < bytes {
            return Err(CommError::BufferSizeMismatch {
                expected: bytes,
                actual: send.as_bytes().len().min(recv.as_bytes().len()),
            });
        }

        let fabric = &comm.fabric;
        let mut state = lock_fabric(fabric)?;
        if let Some(peer) = state.aborted.first() {
            return Err(CommError::transport_sync(
                "all_reduce",
                rank,
                format!("peer rank {peer} aborted its communicator"),
            ));
        }

        let round = state.round;
        match round {
            None => {
                state.round = Some((count, dtype, op));
                state.acc = send.as_bytes()[..bytes].to_vec();
            }
            Some(round) if round == (count, dtype, op) => {
                let FabricState { acc, .. } = &mut *state;
                reduce_into(acc, send.as_bytes(), count, dtype, op)?;
            }
            Some((c, d, o)) => {
                return Err(CommError::transport_sync(
                    "all_reduce",
                    rank,
                    format!("mismatched call: group reduces {c} x {d} ({o}), rank issued {count} x {dtype} ({op})"),
                ));
            }
        }

        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == fabric.world_size {
            state.result = Arc::new(std::mem::take(&mut state.acc));
            state.arrived = 0;
            state.round = None;
            state.generation += 1;
            fabric.round_done.notify_all();
        } else {
            state = fabric
                .round_done
                .wait_while(state, |s| s.generation == generation && s.aborted.is_empty())
                .map_err(|_| CommError::LockPoisoned("local fabric"))?;
            if state.generation == generation {
                let peer = state.aborted.first().copied().unwrap_or(rank);
                return Err(CommError::transport_sync(
                    "all_reduce",
                    rank,
                    format!("peer rank {peer} aborted during the reduction"),
                ));
            }
        }

        let result = Arc::clone(&state.result);
        drop(state);
        recv.as_bytes_mut()[..bytes].copy_from_slice(&result[..bytes]);
        Ok(())
    }

    fn async_error(&self, comm: &LocalComm) -> Result<AsyncErrorCode> {
        if comm.is_released() {
            return Err(CommError::transport_sync(
                "async_error",
                comm.rank,
                "communicator has been aborted or destroyed",
            ));
        }
        comm.flags
            .pending
            .lock()
            .map(|code| *code)
            .map_err(|_| CommError::LockPoisoned("local comm"))
    }

    fn abort(&self, comm: &LocalComm) -> Result<()> {
        comm.flags.aborts.fetch_add(1, Ordering::SeqCst);
        comm.flags.aborted.store(true, Ordering::SeqCst);
        let mut state = lock_fabric(&comm.fabric)?;
        if !state.aborted.contains(&comm.rank) {
            state.aborted.push(comm.rank);
        }
        comm.fabric.round_done.notify_all();
        Ok(())
    }

    fn destroy(&self, comm: &LocalComm) -> Result<()> {
        comm.flags.destroys.fetch_add(1, Ordering::SeqCst);
        if comm.flags.destroyed.swap(true, Ordering::SeqCst) {
            return Err(CommError::transport_sync(
                "destroy",
                comm.rank,
                "communicator destroyed twice",
            ));
        }
        Ok(())
    }
}
