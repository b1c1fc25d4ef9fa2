//! Process-group bootstrap: rank discovery and rendezvous-id exchange.

pub mod host;
mod local;
mod tcp;

pub use local::LocalBootstrap;
pub use tcp::TcpBootstrap;

use std::future::Future;

use crate::error::{CommError, Result};
use crate::transport::Transport;
use crate::types::{RENDEZVOUS_ID_BYTES, Rank, RendezvousId};

/// Rank discovery and small collective exchanges needed before a
/// communicator exists.
///
/// All methods except `rank`/`world_size` are collective: every member of
/// the group must call them in the same order.
pub trait Bootstrap: Send + Sync {
    fn rank(&self) -> Rank;

    fn world_size(&self) -> u32;

    /// Gather one value from every rank, returned in rank order.
    fn all_gather_u64(&self, value: u64) -> impl Future<Output = Result<Vec<u64>>> + Send;

    /// Overwrite `buf` on every rank with the contents of `buf` on `root`.
    /// All ranks must pass buffers of the same length.
    fn broadcast(&self, buf: &mut [u8], root: Rank) -> impl Future<Output = Result<()>> + Send;

    /// Leave the group. No further exchanges are possible afterwards.
    fn finalize(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Rank 0 generates a rendezvous id with `T` and broadcasts it; every rank
/// returns the same id.
pub async fn exchange_rendezvous_id<T: Transport, B: Bootstrap>(
    bootstrap: &B,
) -> Result<RendezvousId> {
    let mut buf = [0u8; RENDEZVOUS_ID_BYTES];
    if bootstrap.rank() == 0 {
        buf = *T::generate_rendezvous_id()?.as_bytes();
    }
    bootstrap.broadcast(&mut buf, 0).await?;
    let id = RendezvousId::from_bytes(buf);
    tracing::debug!(rank = bootstrap.rank(), ?id, "rendezvous id exchanged");
    Ok(id)
}

/// Derive this process's index among the processes on the same host.
pub async fn discover_local_rank<B: Bootstrap>(bootstrap: &B) -> Result<usize> {
    discover_local_rank_as(bootstrap, &host::short_hostname()).await
}

/// Like [`discover_local_rank`], with an explicit host name.
pub async fn discover_local_rank_as<B: Bootstrap>(bootstrap: &B, hostname: &str) -> Result<usize> {
    let hashes = bootstrap.all_gather_u64(host::host_hash(hostname)).await?;
    if hashes.len() != bootstrap.world_size() as usize {
        return Err(CommError::bootstrap(format!(
            "host hash exchange returned {} entries for world size {}",
            hashes.len(),
            bootstrap.world_size()
        )));
    }
    let local = host::local_rank(&hashes, bootstrap.rank())?;
    tracing::debug!(rank = bootstrap.rank(), hostname, local_rank = local, "local rank derived");
    Ok(local)
}
