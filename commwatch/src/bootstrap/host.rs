//! Host identity used to pick a device per process.

use crate::error::{CommError, Result};
use crate::types::Rank;

/// This machine's host name up to the first `.`.
pub fn short_hostname() -> String {
    let full = gethostname::gethostname().to_string_lossy().into_owned();
    match full.split_once('.') {
        Some((short, _)) => short.to_owned(),
        None => full,
    }
}

/// DJB2a hash of a host name: `h = h * 33 ^ byte`, seeded with 5381.
pub fn host_hash(name: &str) -> u64 {
    name.bytes()
        .fold(5381u64, |h, b| (h << 5).wrapping_add(h) ^ b as u64)
}

/// Number of lower ranks that share `rank`'s host hash.
///
/// `hashes` holds one hash per rank, in rank order.
pub fn local_rank(hashes: &[u64], rank: Rank) -> Result<usize> {
    let idx = rank as usize;
    let Some(&own) = hashes.get(idx) else {
        return Err(CommError::InvalidRank {
            rank,
            world_size: hashes.len() as u32,
        });
    };
    Ok(hashes[..idx].iter().filter(|&&h| h == own).count())
}
