use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::bootstrap::Bootstrap;
use crate::config::BootstrapConfig;
use crate::error::{CommError, Result};
use crate::types::Rank;

/// Largest frame accepted on a bootstrap connection.
const MAX_FRAME_BYTES: u64 = 1 << 20;

const CONNECT_RETRY: Duration = Duration::from_millis(100);

enum Links {
    /// Rank 0: one stream per peer, indexed by `rank - 1`.
    Hub(Vec<TcpStream>),
    /// Every other rank: the stream to rank 0.
    Spoke(TcpStream),
    Finalized,
}

/// Star-topology bootstrap over TCP.
///
/// Rank 0 listens on the master address and relays every exchange; the
/// other ranks connect to it. Frames are `[len: u64 LE][payload]`.
pub struct TcpBootstrap {
    rank: Rank,
    world_size: u32,
    links: Mutex<Links>,
}

impl TcpBootstrap {
    /// Join the group described by `config`: rank 0 binds the master
    /// address, every other rank connects to it.
    pub async fn connect(config: &BootstrapConfig) -> Result<Self> {
        if config.rank >= config.world_size {
            return Err(CommError::InvalidRank {
                rank: config.rank,
                world_size: config.world_size,
            });
        }
        if config.world_size == 1 {
            return Ok(Self {
                rank: 0,
                world_size: 1,
                links: Mutex::new(Links::Hub(Vec::new())),
            });
        }
        if config.rank == 0 {
            let listener = TcpListener::bind(config.master_addr).await?;
            Self::hub(listener, config.world_size, config.connect_timeout).await
        } else {
            Self::spoke(
                config.master_addr,
                config.rank,
                config.world_size,
                config.connect_timeout,
            )
            .await
        }
    }

    /// Rank 0: accept `world_size - 1` peers on an already-bound listener.
    pub async fn hub(listener: TcpListener, world_size: u32, timeout: Duration) -> Result<Self> {
        let expected = world_size.saturating_sub(1) as usize;
        let mut slots: Vec<Option<TcpStream>> = (0..expected).map(|_| None).collect();

        let accept_all = async {
            let mut joined = 0;
            while joined < expected {
                let (mut stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let rank = stream.read_u32_le().await?;
                if rank == 0 || rank >= world_size {
                    return Err(CommError::InvalidRank { rank, world_size });
                }
                let slot = &mut slots[rank as usize - 1];
                if slot.is_some() {
                    return Err(CommError::bootstrap(format!(
                        "rank {rank} joined twice (second from {addr})"
                    )));
                }
                tracing::debug!(rank, %addr, "bootstrap peer joined");
                *slot = Some(stream);
                joined += 1;
            }
            Ok::<_, CommError>(())
        };
        tokio::time::timeout(timeout, accept_all)
            .await
            .map_err(|_| {
                CommError::bootstrap(format!(
                    "timed out after {timeout:?} waiting for {expected} peers"
                ))
            })??;

        let peers = slots.into_iter().flatten().collect();
        tracing::info!(world_size, "bootstrap group formed");
        Ok(Self {
            rank: 0,
            world_size,
            links: Mutex::new(Links::Hub(peers)),
        })
    }

    /// Any rank but 0: connect to the hub, retrying until `timeout`.
    pub async fn spoke(
        addr: SocketAddr,
        rank: Rank,
        world_size: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        let mut stream = loop {
            match TcpStream::connect(addr).await {
                Ok(s) => break s,
                Err(e) if Instant::now() < deadline => {
                    tracing::debug!(rank, %addr, error = %e, "bootstrap hub not reachable yet");
                    tokio::time::sleep(CONNECT_RETRY).await;
                }
                Err(e) => {
                    return Err(CommError::bootstrap(format!(
                        "rank {rank} could not reach {addr} within {timeout:?}: {e}"
                    )));
                }
            }
        };
        stream.set_nodelay(true)?;
        stream.write_u32_le(rank).await?;
        Ok(Self {
            rank,
            world_size,
            links: Mutex::new(Links::Spoke(stream)),
        })
    }
}

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
    stream.write_u64_le(payload.len() as u64).await?;
    stream.write_all(payload).await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let len = stream.read_u64_le().await?;
    if len > MAX_FRAME_BYTES {
        return Err(CommError::bootstrap(format!(
            "frame of {len} bytes exceeds {MAX_FRAME_BYTES}"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

fn copy_exact(dst: &mut [u8], src: &[u8]) -> Result<()> {
    if dst.len() != src.len() {
        return Err(CommError::BufferSizeMismatch {
            expected: dst.len(),
            actual: src.len(),
        });
    }
    dst.copy_from_slice(src);
    Ok(())
}

fn finalized() -> CommError {
    CommError::bootstrap("bootstrap already finalized")
}

impl Bootstrap for TcpBootstrap {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    async fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>> {
        let mut links = self.links.lock().await;
        match &mut *links {
            Links::Hub(peers) => {
                let mut values = Vec::with_capacity(self.world_size as usize);
                values.push(value);
                for peer in peers.iter_mut() {
                    values.push(peer.read_u64_le().await?);
                }
                let encoded: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                for peer in peers.iter_mut() {
                    write_frame(peer, &encoded).await?;
                }
                Ok(values)
            }
            Links::Spoke(hub) => {
                hub.write_u64_le(value).await?;
                let encoded = read_frame(hub).await?;
                Ok(encoded
                    .chunks_exact(8)
                    .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect())
            }
            Links::Finalized => Err(finalized()),
        }
    }

    async fn broadcast(&self, buf: &mut [u8], root: Rank) -> Result<()> {
        if root >= self.world_size {
            return Err(CommError::InvalidRank {
                rank: root,
                world_size: self.world_size,
            });
        }
        let mut links = self.links.lock().await;
        match &mut *links {
            Links::Hub(peers) => {
                if root != 0 {
                    let payload = read_frame(&mut peers[root as usize - 1]).await?;
                    copy_exact(buf, &payload)?;
                }
                for (idx, peer) in peers.iter_mut().enumerate() {
                    if idx + 1 != root as usize {
                        write_frame(peer, buf).await?;
                    }
                }
                Ok(())
            }
            Links::Spoke(hub) => {
                if self.rank == root {
                    write_frame(hub, buf).await
                } else {
                    let payload = read_frame(hub).await?;
                    copy_exact(buf, &payload)
                }
            }
            Links::Finalized => Err(finalized()),
        }
    }

    async fn finalize(&self) -> Result<()> {
        let mut links = self.links.lock().await;
        match std::mem::replace(&mut *links, Links::Finalized) {
            Links::Hub(mut peers) => {
                for peer in peers.iter_mut() {
                    read_frame(peer).await?;
                }
                for peer in peers.iter_mut() {
                    write_frame(peer, &[]).await?;
                }
            }
            Links::Spoke(mut hub) => {
                write_frame(&mut hub, &[]).await?;
                read_frame(&mut hub).await?;
            }
            Links::Finalized => return Err(finalized()),
        }
        tracing::debug!(rank = self.rank, "bootstrap finalized");
        Ok(())
    }
}
