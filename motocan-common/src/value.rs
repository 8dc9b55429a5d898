//! Typed scalar values and their little-endian wire encoding
use crate::{objects::DataType, sdo::SdoErrorCode};

/// A single scalar value of one of the dictionary data types
///
/// The variant index of a `Value` always equals the ordinal of its [`DataType`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Value {
    #[default]
    Empty,
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Real32(f32),
}

impl Value {
    /// Get the data type of the held value
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Empty => DataType::Empty,
            Value::UInt8(_) => DataType::UInt8,
            Value::UInt16(_) => DataType::UInt16,
            Value::UInt32(_) => DataType::UInt32,
            Value::UInt64(_) => DataType::UInt64,
            Value::Int8(_) => DataType::Int8,
            Value::Int16(_) => DataType::Int16,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::Real32(_) => DataType::Real32,
        }
    }

    /// Encoded width in bytes
    pub fn size(&self) -> usize {
        self.data_type().size()
    }

    /// Decode a value of type `data_type` from the start of `bytes`
    ///
    /// Bytes beyond the width of the type are ignored.
    pub fn from_bytes(data_type: DataType, bytes: &[u8]) -> Result<Value, SdoErrorCode> {
        let size = data_type.size();
        if bytes.len() < size {
            return Err(SdoErrorCode::DataTypeDoesNotMatchLengthTooLow);
        }
        let mut buf = [0u8; 8];
        buf[0..size].copy_from_slice(&bytes[0..size]);

        Ok(match data_type {
            DataType::Empty => Value::Empty,
            DataType::UInt8 => Value::UInt8(buf[0]),
            DataType::UInt16 => Value::UInt16(u16::from_le_bytes([buf[0], buf[1]])),
            DataType::UInt32 => Value::UInt32(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            DataType::UInt64 => Value::UInt64(u64::from_le_bytes(buf)),
            DataType::Int8 => Value::Int8(buf[0] as i8),
            DataType::Int16 => Value::Int16(i16::from_le_bytes([buf[0], buf[1]])),
            DataType::Int32 => Value::Int32(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            DataType::Int64 => Value::Int64(i64::from_le_bytes(buf)),
            DataType::Real32 => Value::Real32(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        })
    }

    /// Write the little-endian encoding into `out`
    ///
    /// Returns the number of bytes written, or 0 without touching `out` if it is too small.
    pub fn to_bytes(&self, out: &mut [u8]) -> usize {
        let size = self.size();
        if out.len() < size {
            return 0;
        }
        match self {
            Value::Empty => {}
            Value::UInt8(v) => out[0] = *v,
            Value::UInt16(v) => out[0..2].copy_from_slice(&v.to_le_bytes()),
            Value::UInt32(v) => out[0..4].copy_from_slice(&v.to_le_bytes()),
            Value::UInt64(v) => out[0..8].copy_from_slice(&v.to_le_bytes()),
            Value::Int8(v) => out[0] = *v as u8,
            Value::Int16(v) => out[0..2].copy_from_slice(&v.to_le_bytes()),
            Value::Int32(v) => out[0..4].copy_from_slice(&v.to_le_bytes()),
            Value::Int64(v) => out[0..8].copy_from_slice(&v.to_le_bytes()),
            Value::Real32(v) => out[0..4].copy_from_slice(&v.to_le_bytes()),
        }
        size
    }

    /// Extract the held value as `T`, if it has that type
    pub fn get<T: Scalar>(&self) -> Option<T> {
        T::from_value(*self)
    }
}

/// Free function form of [`Value::from_bytes`]
pub fn value_from_bytes(data_type: DataType, bytes: &[u8]) -> Result<Value, SdoErrorCode> {
    Value::from_bytes(data_type, bytes)
}

/// Free function form of [`Value::to_bytes`]
pub fn value_to_bytes(value: Value, out: &mut [u8]) -> usize {
    value.to_bytes(out)
}

mod sealed {
    pub trait Sealed {}
}

/// A Rust scalar type which maps to exactly one [`DataType`]
///
/// Implemented for `u8`..`u64`, `i8`..`i64` and `f32`. Used to give handler registration a single
/// generic entry point while keeping the set of types closed.
pub trait Scalar: sealed::Sealed + Copy + Send + 'static {
    /// The dictionary type this Rust type is stored as
    const DATA_TYPE: DataType;

    /// Wrap in a [`Value`]
    fn into_value(self) -> Value;

    /// Unwrap from a [`Value`], returning None on a type mismatch
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_scalar {
    ($ty:ty, $variant:ident) => {
        impl sealed::Sealed for $ty {}

        impl Scalar for $ty {
            const DATA_TYPE: DataType = DataType::$variant;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value)
            }
        }
    };
}

impl_scalar!(u8, UInt8);
impl_scalar!(u16, UInt16);
impl_scalar!(u32, UInt32);
impl_scalar!(u64, UInt64);
impl_scalar!(i8, Int8);
impl_scalar!(i16, Int16);
impl_scalar!(i32, Int32);
impl_scalar!(i64, Int64);
impl_scalar!(f32, Real32);
