use std::sync::{Arc, Mutex};

use tokio::sync::Barrier;

use crate::bootstrap::Bootstrap;
use crate::error::{CommError, Result};
use crate::types::Rank;

struct Shared {
    world_size: u32,
    barrier: Barrier,
    slots: Mutex<Vec<u64>>,
    payload: Mutex<Vec<u8>>,
}

/// Bootstrap for a group whose ranks are tasks of one process.
pub struct LocalBootstrap {
    rank: Rank,
    shared: Arc<Shared>,
}

impl LocalBootstrap {
    /// One bootstrap per rank, `0..world_size`.
    pub fn group(world_size: u32) -> Vec<LocalBootstrap> {
        let shared = Arc::new(Shared {
            world_size,
            barrier: Barrier::new(world_size as usize),
            slots: Mutex::new(vec![0; world_size as usize]),
            payload: Mutex::new(Vec::new()),
        });
        (0..world_size)
            .map(|rank| LocalBootstrap {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

fn poisoned<T>(_: T) -> CommError {
    CommError::LockPoisoned("local bootstrap")
}

impl Bootstrap for LocalBootstrap {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.shared.world_size
    }

    async fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>> {
        self.shared.slots.lock().map_err(poisoned)?[self.rank as usize] = value;
        self.shared.barrier.wait().await;
        let gathered = self.shared.slots.lock().map_err(poisoned)?.clone();
        // Nobody may overwrite a slot until everyone has read.
        self.shared.barrier.wait().await;
        Ok(gathered)
    }

    async fn broadcast(&self, buf: &mut [u8], root: Rank) -> Result<()> {
        let world_size = self.shared.world_size;
        if root >= world_size {
            return Err(CommError::InvalidRank {
                rank: root,
                world_size,
            });
        }
        if self.rank == root {
            *self.shared.payload.lock().map_err(poisoned)? = buf.to_vec();
        }
        self.shared.barrier.wait().await;
        let result = if self.rank == root {
            Ok(())
        } else {
            let payload = self.shared.payload.lock().map_err(poisoned)?;
            if payload.len() == buf.len() {
                buf.copy_from_slice(&payload);
                Ok(())
            } else {
                Err(CommError::BufferSizeMismatch {
                    expected: buf.len(),
                    actual: payload.len(),
                })
            }
        };
        self.shared.barrier.wait().await;
        result
    }

    async fn finalize(&self) -> Result<()> {
        self.shared.barrier.wait().await;
        Ok(())
    }
}
