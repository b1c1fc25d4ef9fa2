pub mod bootstrap;
pub mod collective;
pub mod comm;
pub mod config;
pub mod driver;
pub mod error;
pub mod fault;
pub mod logging;
pub(crate) mod reduce;
pub mod signal;
pub mod transport;
pub mod types;
pub mod watchdog;

pub use bootstrap::{Bootstrap, LocalBootstrap, TcpBootstrap};
pub use collective::CollectiveLoop;
pub use comm::MonitoredComm;
pub use config::{BootstrapConfig, WatchdogConfig};
pub use driver::Exit;
pub use error::{CommError, Result};
pub use fault::{AbortPolicy, AsyncErrorCode, CommState, FaultState, HealthCheck};
pub use transport::{HostBuffer, LocalComm, LocalTransport, Transport};
pub use types::{DataType, Rank, RendezvousId, ReduceOp};
pub use watchdog::Watchdog;
