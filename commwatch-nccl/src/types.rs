use commwatch::{AsyncErrorCode, DataType, RendezvousId, ReduceOp};
use cudarc::nccl::sys;

/// Convert a commwatch DataType to the NCCL data type.
pub fn to_nccl_dtype(dt: DataType) -> sys::ncclDataType_t {
    match dt {
        DataType::F32 => sys::ncclDataType_t::ncclFloat32,
        DataType::F64 => sys::ncclDataType_t::ncclFloat64,
        DataType::F16 => sys::ncclDataType_t::ncclFloat16,
        DataType::BF16 => sys::ncclDataType_t::ncclBfloat16,
        DataType::I8 => sys::ncclDataType_t::ncclInt8,
        DataType::I32 => sys::ncclDataType_t::ncclInt32,
        DataType::I64 => sys::ncclDataType_t::ncclInt64,
        DataType::U8 => sys::ncclDataType_t::ncclUint8,
        DataType::U32 => sys::ncclDataType_t::ncclUint32,
        DataType::U64 => sys::ncclDataType_t::ncclUint64,
    }
}

/// Convert a commwatch ReduceOp to the NCCL reduce operation.
pub fn to_nccl_op(op: ReduceOp) -> sys::ncclRedOp_t {
    match op {
        ReduceOp::Sum => sys::ncclRedOp_t::ncclSum,
        ReduceOp::Prod => sys::ncclRedOp_t::ncclProd,
        ReduceOp::Min => sys::ncclRedOp_t::ncclMin,
        ReduceOp::Max => sys::ncclRedOp_t::ncclMax,
    }
}

/// Classify the status returned by `ncclCommGetAsyncError`.
///
/// Network-side failures (`ncclSystemError`, `ncclRemoteError`) are
/// reported as recoverable; everything else that is not success or
/// in-progress is not. Either way the communicator gets aborted.
pub fn async_code(status: sys::ncclResult_t) -> AsyncErrorCode {
    match status {
        sys::ncclResult_t::ncclSuccess => AsyncErrorCode::Ok,
        sys::ncclResult_t::ncclInProgress => AsyncErrorCode::InProgress,
        sys::ncclResult_t::ncclSystemError | sys::ncclResult_t::ncclRemoteError => {
            AsyncErrorCode::RecoverableTransportError
        }
        _ => AsyncErrorCode::UnrecoverableTransportError,
    }
}

/// Copy an NCCL unique id into a transport-neutral rendezvous id.
///
/// `ncclUniqueId` is a single `[c_char; 128]`, the same width as
/// [`RendezvousId`].
pub fn id_to_rendezvous(id: &sys::ncclUniqueId) -> RendezvousId {
    let mut bytes = [0u8; commwatch::types::RENDEZVOUS_ID_BYTES];
    for (dst, &c) in bytes.iter_mut().zip(id.internal.iter()) {
        *dst = c as u8;
    }
    RendezvousId::from_bytes(bytes)
}

/// Rebuild the NCCL unique id received from rank 0.
pub fn rendezvous_to_id(id: &RendezvousId) -> sys::ncclUniqueId {
    let mut internal = [0 as std::ffi::c_char; 128];
    for (dst, &b) in internal.iter_mut().zip(id.as_bytes().iter()) {
        *dst = b as std::ffi::c_char;
    }
    sys::ncclUniqueId { internal }
}
