use crate::fault::AsyncErrorCode;
use crate::types::{DataType, Rank};

pub type Result<T> = std::result::Result<T, CommError>;

#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("bootstrap failed: {reason}")]
    Bootstrap { reason: String },

    #[error("device error: {message}")]
    Device {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{operation} failed at rank {rank}: {reason}")]
    TransportSync {
        operation: &'static str,
        rank: Rank,
        reason: String,
    },

    #[error("asynchronous transport error at rank {rank}: {code}")]
    TransportAsync { rank: Rank, code: AsyncErrorCode },

    #[error("communicator at rank {rank} was aborted")]
    CommAborted { rank: Rank },

    #[error("communicator at rank {rank} was already released")]
    CommReleased { rank: Rank },

    #[error("unsupported data type: {dtype} for operation {op}")]
    UnsupportedDType { dtype: DataType, op: &'static str },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("invalid value {value:?} for {key}")]
    Config { key: &'static str, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{task} task did not complete: {source}")]
    Task {
        task: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl CommError {
    pub fn bootstrap(reason: impl Into<String>) -> Self {
        Self::Bootstrap {
            reason: reason.into(),
        }
    }

    /// Create a `Device` error with just a message.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Device` error with a message and a source error.
    pub fn device_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Device {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn transport_sync(operation: &'static str, rank: Rank, reason: impl Into<String>) -> Self {
        Self::TransportSync {
            operation,
            rank,
            reason: reason.into(),
        }
    }

    /// The fault a health check found, for logging next to the abort.
    pub fn transport_async(rank: Rank, code: AsyncErrorCode) -> Self {
        Self::TransportAsync { rank, code }
    }

    /// A background task panicked or was cancelled before returning.
    pub fn task(task: &'static str, source: tokio::task::JoinError) -> Self {
        Self::Task { task, source }
    }

    /// Taxonomy bucket used in fatal diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            CommError::Bootstrap { .. } | CommError::InvalidRank { .. } => "bootstrap",
            CommError::Device { .. }
            | CommError::UnsupportedDType { .. }
            | CommError::BufferSizeMismatch { .. } => "device",
            CommError::TransportSync { .. }
            | CommError::CommAborted { .. }
            | CommError::CommReleased { .. } => "transport",
            CommError::TransportAsync { .. } => "transport-async",
            CommError::Config { .. } => "config",
            CommError::Io(_) => "io",
            CommError::LockPoisoned(_) | CommError::Cancelled | CommError::Task { .. } => {
                "internal"
            }
        }
    }
}
