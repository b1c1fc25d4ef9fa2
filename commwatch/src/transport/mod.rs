mod local;

pub use local::{HostBuffer, LocalComm, LocalTransport};

use crate::error::Result;
use crate::fault::AsyncErrorCode;
use crate::types::{DataType, Rank, RendezvousId, ReduceOp};

/// A collective-communication backend.
///
/// The transport owns no communicator state itself: it creates opaque
/// communicator resources and operates on them. Lifetime, locking, and fault
/// handling for a resource are the job of
/// [`MonitoredComm`](crate::MonitoredComm).
///
/// - `LocalTransport` (built-in): in-process CPU fabric, used by tests and
///   the simulator binary.
/// - `NcclTransport` (`commwatch-nccl`): NCCL over CUDA devices.
pub trait Transport: Send + Sync + 'static {
    /// Opaque communicator resource. Cloning yields another reference to
    /// the same resource, never a new communicator.
    type Comm: Clone + Send + Sync + 'static;

    /// Memory the transport can reduce from and into.
    type Buffer: Send + 'static;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Generate a fresh rendezvous id. Called on rank 0 only.
    fn generate_rendezvous_id() -> Result<RendezvousId>;

    /// Join the group identified by `id` as `rank` of `world_size`.
    fn create_communicator(
        &self,
        world_size: u32,
        id: &RendezvousId,
        rank: Rank,
    ) -> Result<Self::Comm>;

    /// Allocate a zeroed buffer of `count` elements.
    fn allocate(&self, count: usize, dtype: DataType) -> Result<Self::Buffer>;

    /// Reduce `count` elements of `send` across the group into `recv`.
    ///
    /// Failures are reported as `CommError::TransportSync`.
    fn all_reduce(
        &self,
        comm: &Self::Comm,
        send: &Self::Buffer,
        recv: &mut Self::Buffer,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> Result<()>;

    /// Poll for an error raised outside of any call.
    fn async_error(&self, comm: &Self::Comm) -> Result<AsyncErrorCode>;

    /// Tear the communicator down without waiting for in-flight work.
    /// Releases the resource.
    fn abort(&self, comm: &Self::Comm) -> Result<()>;

    /// Release a healthy communicator.
    fn destroy(&self, comm: &Self::Comm) -> Result<()>;
}
