/// Rank of a process within a communicator group (0-indexed).
pub type Rank = u32;

/// Element types a transport may be asked to reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    F32 = 0,
    F64 = 1,
    F16 = 2,
    BF16 = 3,
    I8 = 4,
    I32 = 5,
    I64 = 6,
    U8 = 7,
    U32 = 8,
    U64 = 9,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
            DataType::F16 | DataType::BF16 => 2,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::I8 => "i8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
            DataType::U32 => "u32",
            DataType::U64 => "u64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Element-wise combination applied by a reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReduceOp {
    #[default]
    Sum,
    Prod,
    Min,
    Max,
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceOp::Sum => f.write_str("sum"),
            ReduceOp::Prod => f.write_str("prod"),
            ReduceOp::Min => f.write_str("min"),
            ReduceOp::Max => f.write_str("max"),
        }
    }
}

/// Size of a rendezvous id in bytes (matches `ncclUniqueId`).
pub const RENDEZVOUS_ID_BYTES: usize = 128;

/// Opaque token shared by every member of one communicator group.
///
/// Rank 0 generates it; all other ranks must receive a byte-identical copy
/// before creating their communicator.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RendezvousId([u8; RENDEZVOUS_ID_BYTES]);

impl RendezvousId {
    pub const fn from_bytes(bytes: [u8; RENDEZVOUS_ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Build an id from a slice received off the wire.
    ///
    /// Returns `None` unless `bytes` is exactly [`RENDEZVOUS_ID_BYTES`] long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; RENDEZVOUS_ID_BYTES] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; RENDEZVOUS_ID_BYTES] {
        &self.0
    }

    pub fn zeroed() -> Self {
        Self([0u8; RENDEZVOUS_ID_BYTES])
    }
}

impl std::fmt::Debug for RendezvousId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The first few bytes are enough to tell groups apart in logs.
        write!(f, "RendezvousId(")?;
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}
