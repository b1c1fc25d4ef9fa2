pub mod device;
pub mod error;
pub mod transport;
pub mod types;

pub use device::DeviceBuffer;
pub use transport::{NcclComm, NcclTransport};
pub use types::{async_code, id_to_rendezvous, rendezvous_to_id, to_nccl_dtype, to_nccl_op};
