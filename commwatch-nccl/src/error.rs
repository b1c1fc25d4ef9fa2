//! Conversions from cudarc failures into [`CommError`].
//!
//! Both error types are foreign to this crate, so these are free functions
//! rather than `From` impls.

use std::ffi::CStr;

use commwatch::{CommError, Rank};
use cudarc::driver::DriverError;
use cudarc::nccl::result::NcclError;
use cudarc::nccl::sys;

/// Human-readable NCCL status, as reported by the library itself.
pub fn nccl_error_string(code: sys::ncclResult_t) -> String {
    let ptr = unsafe { sys::ncclGetErrorString(code) };
    if ptr.is_null() {
        return format!("{code:?}");
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// A failed NCCL call on an existing communicator.
pub fn nccl_call(operation: &'static str, rank: Rank, e: NcclError) -> CommError {
    CommError::transport_sync(operation, rank, nccl_error_string(e.0))
}

/// Failure to obtain a unique id before the group exists.
pub fn nccl_bootstrap(e: NcclError) -> CommError {
    CommError::bootstrap(format!("ncclGetUniqueId: {}", nccl_error_string(e.0)))
}

pub fn driver(message: impl Into<String>, e: DriverError) -> CommError {
    CommError::device_with_source(message, e)
}
