//! Runtime configuration for the watchdog, the foreground loop, and bootstrap.
//!
//! All values have defaults. Override via environment variables (prefixed
//! `COMMWATCH_`) or by constructing the structs directly.

use std::net::SocketAddr;
use std::time::Duration;

use crate::collective::DEFAULT_OP_INTERVAL;
use crate::error::{CommError, Result};
use crate::fault::AbortPolicy;
use crate::types::Rank;
use crate::watchdog::DEFAULT_HEALTH_INTERVAL;

/// Elements reduced per iteration by default (32 Mi f32 values).
pub const DEFAULT_ELEMENT_COUNT: usize = 32 * 1024 * 1024;

/// Tuning for the monitored communicator and the loops around it.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// How often the watchdog polls for asynchronous errors.
    pub health_interval: Duration,

    /// Pause between two foreground reductions.
    pub op_interval: Duration,

    /// Elements per reduction.
    pub element_count: usize,

    /// Stop the foreground loop after this many reductions. 0 runs until a
    /// signal arrives.
    pub max_iterations: u64,

    pub abort_policy: AbortPolicy,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            health_interval: DEFAULT_HEALTH_INTERVAL,
            op_interval: DEFAULT_OP_INTERVAL,
            element_count: DEFAULT_ELEMENT_COUNT,
            max_iterations: 0,
            abort_policy: AbortPolicy::DeferToNextOp,
        }
    }
}

impl WatchdogConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `COMMWATCH_HEALTH_INTERVAL_MS`
    /// - `COMMWATCH_OP_INTERVAL_MS`
    /// - `COMMWATCH_COUNT`
    /// - `COMMWATCH_MAX_ITERATIONS`
    /// - `COMMWATCH_ABORT_POLICY` (`defer` or `fail-fast`)
    ///
    /// Values that do not parse are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(ms) = lookup("COMMWATCH_HEALTH_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            cfg.health_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = lookup("COMMWATCH_OP_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            cfg.op_interval = Duration::from_millis(ms);
        }
        if let Some(n) = lookup("COMMWATCH_COUNT").and_then(|v| v.parse().ok()) {
            cfg.element_count = n;
        }
        if let Some(n) = lookup("COMMWATCH_MAX_ITERATIONS").and_then(|v| v.parse().ok()) {
            cfg.max_iterations = n;
        }
        if let Some(p) = lookup("COMMWATCH_ABORT_POLICY").and_then(|v| v.parse().ok()) {
            cfg.abort_policy = p;
        }

        cfg
    }
}

/// Where this process sits in the group and how to reach rank 0.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub rank: Rank,
    pub world_size: u32,
    /// Address rank 0 listens on.
    pub master_addr: SocketAddr,
    /// How long to wait for the whole group to connect.
    pub connect_timeout: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            master_addr: SocketAddr::from(([127, 0, 0, 1], 29500)),
            connect_timeout: Duration::from_secs(60),
        }
    }
}

const RANK_VARS: [&str; 3] = ["COMMWATCH_RANK", "OMPI_COMM_WORLD_RANK", "PMI_RANK"];
const SIZE_VARS: [&str; 3] = ["COMMWATCH_WORLD_SIZE", "OMPI_COMM_WORLD_SIZE", "PMI_SIZE"];

impl BootstrapConfig {
    /// Load from the environment.
    ///
    /// Rank and world size come from `COMMWATCH_RANK` / `COMMWATCH_WORLD_SIZE`,
    /// falling back to the variables Open MPI and PMI launchers export.
    /// `COMMWATCH_MASTER_ADDR` and `COMMWATCH_CONNECT_TIMEOUT_SECS` are
    /// optional. Unlike the tuning knobs, a malformed value here is an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some((key, v)) = first_set(&lookup, &RANK_VARS) {
            cfg.rank = parse(key, &v)?;
        }
        if let Some((key, v)) = first_set(&lookup, &SIZE_VARS) {
            cfg.world_size = parse(key, &v)?;
        }
        if let Some(v) = lookup("COMMWATCH_MASTER_ADDR") {
            cfg.master_addr = parse("COMMWATCH_MASTER_ADDR", &v)?;
        }
        if let Some(v) = lookup("COMMWATCH_CONNECT_TIMEOUT_SECS") {
            cfg.connect_timeout = Duration::from_secs(parse("COMMWATCH_CONNECT_TIMEOUT_SECS", &v)?);
        }

        if cfg.world_size == 0 || cfg.rank >= cfg.world_size {
            return Err(CommError::InvalidRank {
                rank: cfg.rank,
                world_size: cfg.world_size,
            });
        }
        Ok(cfg)
    }
}

fn first_set(
    lookup: &impl Fn(&str) -> Option<String>,
    keys: &[&'static str],
) -> Option<(&'static str, String)> {
    keys.iter().find_map(|&k| lookup(k).map(|v| (k, v)))
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| CommError::Config {
        key,
        value: value.to_owned(),
    })
}
