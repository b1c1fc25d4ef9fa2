//! Element-wise reduction over little-endian byte buffers, used by the
//! in-process transport.

use crate::error::{CommError, Result};
use crate::types::{DataType, ReduceOp};

trait Reducible: Copy + 'static {
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_reducible {
    (int: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Prod => a.wrapping_mul(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Prod => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

impl_reducible!(int: i8, i32, i64, u8, u32, u64);
impl_reducible!(float: f32, f64);

trait LeBytes: Sized {
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_le_bytes {
    ($($ty:ty),*) => {
        $(
            impl LeBytes for $ty {
                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    Self::from_le_bytes(
                        bytes.try_into().expect("chunk length matches type size"),
                    )
                }
                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_le_bytes!(i8, i32, i64, u8, u32, u64, f32, f64);

/// `dst[i] = op(dst[i], src[i])` for the first `count` elements.
pub(crate) fn reduce_into(
    dst: &mut [u8],
    src: &[u8],
    count: usize,
    dtype: DataType,
    op: ReduceOp,
) -> Result<()> {
    let bytes = count * dtype.size_in_bytes();
    if dst.len() < bytes || src.len() < bytes {
        return Err(CommError::BufferSizeMismatch {
            expected: bytes,
            actual: dst.len().min(src.len()),
        });
    }
    let (dst, src) = (&mut dst[..bytes], &src[..bytes]);
    match dtype {
        DataType::F32 => reduce_typed::<f32>(dst, src, op),
        DataType::F64 => reduce_typed::<f64>(dst, src, op),
        DataType::I8 => reduce_typed::<i8>(dst, src, op),
        DataType::I32 => reduce_typed::<i32>(dst, src, op),
        DataType::I64 => reduce_typed::<i64>(dst, src, op),
        DataType::U8 => reduce_typed::<u8>(dst, src, op),
        DataType::U32 => reduce_typed::<u32>(dst, src, op),
        DataType::U64 => reduce_typed::<u64>(dst, src, op),
        DataType::F16 | DataType::BF16 => {
            return Err(CommError::UnsupportedDType {
                dtype,
                op: "all_reduce",
            });
        }
    }
    Ok(())
}

fn reduce_typed<T: Reducible + LeBytes>(dst: &mut [u8], src: &[u8], op: ReduceOp) {
    let size = std::mem::size_of::<T>();
    for (d, s) in dst.chunks_exact_mut(size).zip(src.chunks_exact(size)) {
        let r = T::reduce(T::read_le(d), T::read_le(s), op);
        r.write_le(d);
    }
}
