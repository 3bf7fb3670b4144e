use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};

/// The element type of a tensor.
#[derive(Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl DataType {
    /// Returns the number of bytes a single value of this type occupies.
    #[must_use]
    pub fn byte_width(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }
}

/// Trait bridging Rust scalar types and their tensor `DataType`.
///
/// Values are stored little-endian regardless of the host.
pub trait NativeType: fmt::Debug + Send + Sync + Copy + PartialEq + 'static {
    /// The tensor data type corresponding to this native type.
    const DATA_TYPE: DataType;

    /// Writes `self` into `out`, which must be exactly `DATA_TYPE.byte_width()` bytes.
    fn encode(self, out: &mut [u8]);

    /// Reads a value from `bytes`, which must be exactly `DATA_TYPE.byte_width()`
    /// bytes.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! native_type {
    ($native:ty, $data_type:expr) => {
        impl NativeType for $native {
            const DATA_TYPE: DataType = $data_type;

            fn encode(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            fn decode(bytes: &[u8]) -> Self {
                let mut raw = [0_u8; std::mem::size_of::<$native>()];
                raw.copy_from_slice(bytes);
                <$native>::from_le_bytes(raw)
            }
        }
    };
}

native_type!(i8, DataType::Int8);
native_type!(i16, DataType::Int16);
native_type!(i32, DataType::Int32);
native_type!(i64, DataType::Int64);
native_type!(u8, DataType::UInt8);
native_type!(u16, DataType::UInt16);
native_type!(u32, DataType::UInt32);
native_type!(u64, DataType::UInt64);
native_type!(f32, DataType::Float32);
native_type!(f64, DataType::Float64);

impl NativeType for bool {
    const DATA_TYPE: DataType = DataType::Bool;

    fn encode(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}
