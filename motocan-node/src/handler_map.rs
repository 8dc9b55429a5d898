//! Typed dispatch of object reads and writes
//!
//! Every readable object in the dictionary is served by a read handler, and every writable object
//! by a write handler. Handlers are registered on a [`HandlerMapBuilder`], which checks each one
//! against the dictionary entry as it is added; [`HandlerMapBuilder::build`] then checks that no
//! object was left without a handler.
use alloc::{boxed::Box, collections::BTreeMap, sync::Arc};

use motocan_common::{
    objects::{Address, DataType, Entry, ObjectDictionary},
    sdo::SdoErrorCode,
    value::{Scalar, Value},
    AtomicCell,
};
use snafu::Snafu;

/// A boxed read callback producing a `T`
pub type ReadFn<T> = Box<dyn FnMut() -> Result<T, SdoErrorCode> + Send>;
/// A boxed write callback consuming a `T`
pub type WriteFn<T> = Box<dyn FnMut(T) -> SdoErrorCode + Send>;

/// Error raised while registering handlers or building the map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum BuildError {
    /// A handler was registered for an address which is not in the dictionary
    #[snafu(display("Object {address} is not in the object dictionary"))]
    ObjectNotFound {
        /// The requested address
        address: Address,
    },
    /// A handler was registered for a direction the entry's access type does not allow
    #[snafu(display("Object {address} does not allow {direction} access"))]
    AccessDenied {
        /// The requested address
        address: Address,
        /// "read" or "write"
        direction: &'static str,
    },
    /// The handler's value type does not match the entry's data type
    #[snafu(display("Object {address} has type {expected:?}, but the handler uses {found:?}"))]
    TypeMismatch {
        /// The requested address
        address: Address,
        /// The entry's data type
        expected: DataType,
        /// The handler's data type
        found: DataType,
    },
    /// A readable object has no read handler
    #[snafu(display("Missing read handler for object {address}"))]
    MissingReadHandler {
        /// The first address without a handler
        address: Address,
    },
    /// A writable object has no write handler
    #[snafu(display("Missing write handler for object {address}"))]
    MissingWriteHandler {
        /// The first address without a handler
        address: Address,
    },
}

macro_rules! handler_enums {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// A read callback for one of the scalar types
        #[allow(missing_docs)]
        pub enum ReadHandler {
            $($variant(ReadFn<$ty>),)*
        }

        /// A write callback for one of the scalar types
        #[allow(missing_docs)]
        pub enum WriteHandler {
            $($variant(WriteFn<$ty>),)*
        }

        impl ReadHandler {
            /// The type of value produced
            pub fn data_type(&self) -> DataType {
                match self {
                    $(ReadHandler::$variant(_) => DataType::$variant,)*
                }
            }

            /// Invoke the handler
            pub fn call(&mut self) -> Result<Value, SdoErrorCode> {
                match self {
                    $(ReadHandler::$variant(f) => f().map(Value::$variant),)*
                }
            }
        }

        impl WriteHandler {
            /// The type of value consumed
            pub fn data_type(&self) -> DataType {
                match self {
                    $(WriteHandler::$variant(_) => DataType::$variant,)*
                }
            }

            /// Invoke the handler, rejecting a value of the wrong type with `UnsupportedAccess`
            pub fn call(&mut self, value: Value) -> SdoErrorCode {
                match (self, value) {
                    $((WriteHandler::$variant(f), Value::$variant(v)) => f(v),)*
                    _ => SdoErrorCode::UnsupportedAccess,
                }
            }
        }

        $(
            impl HandlerValue for $ty {
                fn read_handler(f: ReadFn<Self>) -> ReadHandler {
                    ReadHandler::$variant(f)
                }

                fn write_handler(f: WriteFn<Self>) -> WriteHandler {
                    WriteHandler::$variant(f)
                }
            }
        )*
    };
}

/// A scalar type which can be served by a handler
pub trait HandlerValue: Scalar {
    /// Wrap a read callback in the matching [`ReadHandler`] variant
    fn read_handler(f: ReadFn<Self>) -> ReadHandler;
    /// Wrap a write callback in the matching [`WriteHandler`] variant
    fn write_handler(f: WriteFn<Self>) -> WriteHandler;
}

handler_enums!(
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Real32(f32),
);

impl core::fmt::Debug for ReadHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ReadHandler({:?})", self.data_type())
    }
}

impl core::fmt::Debug for WriteHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "WriteHandler({:?})", self.data_type())
    }
}

/// Collects handlers for a [`HandlerMap`]
#[derive(Debug)]
pub struct HandlerMapBuilder {
    od: Arc<ObjectDictionary>,
    read: BTreeMap<Address, ReadHandler>,
    write: BTreeMap<Address, WriteHandler>,
}

impl HandlerMapBuilder {
    /// Start a builder for the given dictionary
    pub fn new(od: impl Into<Arc<ObjectDictionary>>) -> Self {
        Self {
            od: od.into(),
            read: BTreeMap::new(),
            write: BTreeMap::new(),
        }
    }

    /// The dictionary handlers are checked against
    pub fn od(&self) -> &Arc<ObjectDictionary> {
        &self.od
    }

    fn check(&self, address: Address, data_type: DataType, write: bool) -> Result<(), BuildError> {
        let entry = self
            .od
            .lookup(address)
            .ok_or(BuildError::ObjectNotFound { address })?;
        let allowed = if write {
            entry.is_writable()
        } else {
            entry.is_readable()
        };
        if !allowed {
            return Err(BuildError::AccessDenied {
                address,
                direction: if write { "write" } else { "read" },
            });
        }
        if entry.data_type != data_type {
            return Err(BuildError::TypeMismatch {
                address,
                expected: entry.data_type,
                found: data_type,
            });
        }
        Ok(())
    }

    /// Register a read handler which may fail
    ///
    /// Replaces any handler previously registered at the address.
    pub fn set_fallible_read_handler<T: HandlerValue>(
        &mut self,
        address: impl Into<Address>,
        f: impl FnMut() -> Result<T, SdoErrorCode> + Send + 'static,
    ) -> Result<&mut Self, BuildError> {
        let address = address.into();
        self.check(address, T::DATA_TYPE, false)?;
        self.read.insert(address, T::read_handler(Box::new(f)));
        Ok(self)
    }

    /// Register a read handler
    ///
    /// Replaces any handler previously registered at the address.
    pub fn set_read_handler<T: HandlerValue>(
        &mut self,
        address: impl Into<Address>,
        mut f: impl FnMut() -> T + Send + 'static,
    ) -> Result<&mut Self, BuildError> {
        self.set_fallible_read_handler(address, move || Ok(f()))
    }

    /// Register a write handler
    ///
    /// Replaces any handler previously registered at the address.
    pub fn set_write_handler<T: HandlerValue>(
        &mut self,
        address: impl Into<Address>,
        f: impl FnMut(T) -> SdoErrorCode + Send + 'static,
    ) -> Result<&mut Self, BuildError> {
        let address = address.into();
        self.check(address, T::DATA_TYPE, true)?;
        self.write.insert(address, T::write_handler(Box::new(f)));
        Ok(self)
    }

    /// Serve an object from a shared cell
    ///
    /// A read handler is registered if the entry is readable, and a write handler storing into the
    /// cell if it is writable.
    pub fn bind<T: HandlerValue>(
        &mut self,
        address: impl Into<Address>,
        cell: Arc<AtomicCell<T>>,
    ) -> Result<&mut Self, BuildError> {
        let address = address.into();
        let entry = *self
            .od
            .lookup(address)
            .ok_or(BuildError::ObjectNotFound { address })?;
        if entry.is_readable() {
            let cell = cell.clone();
            self.set_read_handler(address, move || cell.load())?;
        }
        if entry.is_writable() {
            self.set_write_handler(address, move |v: T| {
                cell.store(v);
                SdoErrorCode::NoError
            })?;
        }
        Ok(self)
    }

    /// Serve a read-only object with a fixed value
    pub fn set_constant<T: HandlerValue>(
        &mut self,
        address: impl Into<Address>,
        value: T,
    ) -> Result<&mut Self, BuildError> {
        self.set_read_handler(address, move || value)
    }

    /// Returns true if a read handler is registered at `address`
    pub fn has_read_handler(&self, address: Address) -> bool {
        self.read.contains_key(&address)
    }

    /// Returns true if a write handler is registered at `address`
    pub fn has_write_handler(&self, address: Address) -> bool {
        self.write.contains_key(&address)
    }

    /// Check that every object has its handlers, and create the map
    ///
    /// The error names the first object, in address order, which is missing a handler.
    pub fn build(self) -> Result<HandlerMap, BuildError> {
        for entry in self.od.iter() {
            let address = entry.address;
            if entry.is_readable() && !self.read.contains_key(&address) {
                return MissingReadHandlerSnafu { address }.fail();
            }
            if entry.is_writable() && !self.write.contains_key(&address) {
                return MissingWriteHandlerSnafu { address }.fail();
            }
        }
        Ok(HandlerMap {
            od: self.od,
            read: self.read,
            write: self.write,
        })
    }
}

/// A complete set of handlers for an object dictionary
#[derive(Debug)]
pub struct HandlerMap {
    od: Arc<ObjectDictionary>,
    read: BTreeMap<Address, ReadHandler>,
    write: BTreeMap<Address, WriteHandler>,
}

impl HandlerMap {
    /// The dictionary this map serves
    pub fn od(&self) -> &Arc<ObjectDictionary> {
        &self.od
    }

    /// Look up the dictionary entry for `address`
    pub fn entry(&self, address: Address) -> Option<&Entry> {
        self.od.lookup(address)
    }

    /// Returns true if a read handler is registered at `address`
    pub fn has_read_handler(&self, address: Address) -> bool {
        self.read.contains_key(&address)
    }

    /// Returns true if a write handler is registered at `address`
    pub fn has_write_handler(&self, address: Address) -> bool {
        self.write.contains_key(&address)
    }

    fn missing_object(&self, address: Address) -> SdoErrorCode {
        if self.od.contains_index(address.index) {
            SdoErrorCode::SubIndexDoesNotExist
        } else {
            SdoErrorCode::ObjectDoesNotExist
        }
    }

    /// Read the value of an object
    pub fn read(&mut self, address: Address) -> Result<Value, SdoErrorCode> {
        if let Some(handler) = self.read.get_mut(&address) {
            return handler.call();
        }
        match self.od.lookup(address) {
            None => Err(self.missing_object(address)),
            Some(entry) if !entry.is_readable() => Err(SdoErrorCode::ReadOfWriteOnlyObject),
            Some(_) => Err(SdoErrorCode::UnsupportedAccess),
        }
    }

    fn check_bytes(entry: &Entry, data: &[u8], size: Option<usize>) -> bool {
        let object_size = entry.data_type.size();
        object_size <= data.len() && size.map_or(true, |s| s == object_size)
    }

    /// Write an object from its little-endian encoding
    ///
    /// `size` is the transfer's declared size, if it had one; it must match the width of the
    /// object's type. `data` may be longer than the type, in which case the excess is ignored.
    pub fn write_bytes(&mut self, address: Address, data: &[u8], size: Option<usize>) -> SdoErrorCode {
        let Some(entry) = self.od.lookup(address).copied() else {
            return SdoErrorCode::ObjectDoesNotExist;
        };
        if !entry.is_writable() {
            return SdoErrorCode::WriteOfReadOnlyObject;
        }
        if !Self::check_bytes(&entry, data, size) {
            return SdoErrorCode::UnsupportedAccess;
        }
        let Some(handler) = self.write.get_mut(&address) else {
            return SdoErrorCode::UnsupportedAccess;
        };
        match Value::from_bytes(entry.data_type, data) {
            Ok(value) => handler.call(value),
            Err(code) => code,
        }
    }

    /// Write an object with a typed value
    pub fn write_value(&mut self, address: Address, value: Value) -> SdoErrorCode {
        let Some(entry) = self.od.lookup(address).copied() else {
            return SdoErrorCode::ObjectDoesNotExist;
        };
        if value.data_type() != entry.data_type {
            return SdoErrorCode::UnsupportedAccess;
        }
        if let Some(handler) = self.write.get_mut(&address) {
            handler.call(value)
        } else if !entry.is_writable() {
            SdoErrorCode::WriteOfReadOnlyObject
        } else {
            SdoErrorCode::UnsupportedAccess
        }
    }

    /// Decode bytes as a write to `address` would, without writing
    pub fn to_value(&self, address: Address, data: &[u8], size: Option<usize>) -> Option<Value> {
        let entry = self.od.lookup(address)?;
        if !entry.is_writable() || !Self::check_bytes(entry, data, size) {
            return None;
        }
        Value::from_bytes(entry.data_type, data).ok()
    }
}
