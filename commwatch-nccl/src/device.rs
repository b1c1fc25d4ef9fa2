use std::sync::Arc;

use commwatch::{DataType, Result};
use cudarc::driver::{CudaContext, CudaStream, result, sys};

use crate::error;

/// Raw device allocation sized in elements of one [`DataType`].
///
/// Freed on drop, after the stream that used it has drained.
pub struct DeviceBuffer {
    ptr: sys::CUdeviceptr,
    len: usize,
    dtype: DataType,
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
}

impl DeviceBuffer {
    /// Allocate `len` zero-filled elements on `ctx`'s device.
    pub fn zeroed(
        ctx: Arc<CudaContext>,
        stream: Arc<CudaStream>,
        len: usize,
        dtype: DataType,
    ) -> Result<Self> {
        let bytes = len * dtype.size_in_bytes();
        ctx.bind_to_thread()
            .map_err(|e| error::driver("cannot bind CUDA context", e))?;
        let ptr = unsafe { result::malloc_sync(bytes) }
            .map_err(|e| error::driver(format!("cudaMalloc of {bytes} bytes failed"), e))?;
        let buf = Self {
            ptr,
            len,
            dtype,
            ctx,
            stream,
        };
        unsafe { result::memset_d8_sync(buf.ptr, 0, bytes) }
            .map_err(|e| error::driver("cannot clear device buffer", e))?;
        Ok(buf)
    }

    pub fn device_ptr(&self) -> sys::CUdeviceptr {
        self.ptr
    }

    /// Length in elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn size_in_bytes(&self) -> usize {
        self.len * self.dtype.size_in_bytes()
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.bind_to_thread() {
            tracing::warn!(error = %e, "cannot bind CUDA context, leaking device buffer");
            return;
        }
        if let Err(e) = self.stream.synchronize() {
            tracing::warn!(error = %e, "stream sync before free failed");
        }
        if let Err(e) = unsafe { result::free_sync(self.ptr) } {
            tracing::warn!(error = %e, "cudaFree failed");
        }
    }
}
