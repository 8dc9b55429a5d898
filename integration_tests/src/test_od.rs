//! The object dictionary shared by the integration tests
use std::sync::Arc;

use motocan_common::{
    objects::{AccessType, Address, DataType, Entry, ObjectDictionary},
    AtomicCell,
};
use motocan_node::{BuildError, HandlerMapBuilder};

/// A u16 status reported by the node, mappable to a TPDO
pub const STATUS: Address = Address::new(0x2001, 0);
/// A u32 parameter
pub const PARAM: Address = Address::new(0x2002, 0);
/// An i32 setpoint consumed by the node, mappable to an RPDO
pub const SETPOINT: Address = Address::new(0x2003, 0);
/// An f32 gain
pub const GAIN: Address = Address::new(0x2004, 0);
/// A u64 counter, too large for an expedited transfer
pub const COUNTER: Address = Address::new(0x2005, 0);
/// A u8 flag, write only
pub const COMMAND: Address = Address::new(0x2006, 0);
/// A u8 status byte, mappable to a TPDO
pub const FLAGS: Address = Address::new(0x2007, 0);

/// Build the test dictionary
pub fn test_od() -> ObjectDictionary {
    ObjectDictionary::new(&[
        Entry::ro(STATUS.index, STATUS.sub, DataType::UInt16).mappable(),
        Entry::rw(PARAM.index, PARAM.sub, DataType::UInt32),
        Entry::new(
            SETPOINT.index,
            SETPOINT.sub,
            DataType::Int32,
            AccessType::ReadWriteWritePdo,
        )
        .mappable(),
        Entry::rw(GAIN.index, GAIN.sub, DataType::Real32),
        Entry::rw(COUNTER.index, COUNTER.sub, DataType::UInt64),
        Entry::new(COMMAND.index, COMMAND.sub, DataType::UInt8, AccessType::WriteOnly),
        Entry::ro(FLAGS.index, FLAGS.sub, DataType::UInt8).mappable(),
    ])
}

/// Storage for every object in the test dictionary
///
/// The same type serves both a node and the master's mirror of it.
#[derive(Debug, Clone, Default)]
pub struct TestObjects {
    pub status: Arc<AtomicCell<u16>>,
    pub param: Arc<AtomicCell<u32>>,
    pub setpoint: Arc<AtomicCell<i32>>,
    pub gain: Arc<AtomicCell<f32>>,
    pub counter: Arc<AtomicCell<u64>>,
    pub command: Arc<AtomicCell<u8>>,
    pub flags: Arc<AtomicCell<u8>>,
}

impl TestObjects {
    /// Bind every object to its cell
    pub fn register(&self, builder: &mut HandlerMapBuilder) -> Result<(), BuildError> {
        builder
            .bind(STATUS, self.status.clone())?
            .bind(PARAM, self.param.clone())?
            .bind(SETPOINT, self.setpoint.clone())?
            .bind(GAIN, self.gain.clone())?
            .bind(COUNTER, self.counter.clone())?
            .bind(COMMAND, self.command.clone())?
            .bind(FLAGS, self.flags.clone())?;
        Ok(())
    }
}
