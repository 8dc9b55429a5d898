//! Dictionary objects of a CiA402 axis
//!
//! Indices are given for the first axis. Each further axis is offset by [`AXIS_OFFSET`].
use alloc::vec::Vec;

use motocan_common::objects::{AccessType, DataType, Entry};

use crate::scaling::{FIRST_FACTOR_INDEX, NUM_FACTORS};

/// Index offset between consecutive axes of a device
pub const AXIS_OFFSET: u16 = 0x800;

/// Control word
pub const CONTROL_WORD: u16 = 0x6040;
/// Status word
pub const STATUS_WORD: u16 = 0x6041;
/// Quick stop option
pub const QUICK_STOP_OPTION: u16 = 0x605A;
/// Shutdown option
pub const SHUTDOWN_OPTION: u16 = 0x605B;
/// Disable operation option
pub const DISABLE_OPERATION_OPTION: u16 = 0x605C;
/// Halt option
pub const HALT_OPTION: u16 = 0x605D;
/// Fault reaction option
pub const FAULT_REACTION_OPTION: u16 = 0x605E;
/// Modes of operation
pub const MODES_OF_OPERATION: u16 = 0x6060;
/// Modes of operation display
pub const MODES_OF_OPERATION_DISPLAY: u16 = 0x6061;
/// Position demand
pub const POSITION_DEMAND: u16 = 0x6062;
/// Position actual
pub const POSITION_ACTUAL: u16 = 0x6064;
/// Velocity demand
pub const VELOCITY_DEMAND: u16 = 0x606B;
/// Velocity actual
pub const VELOCITY_ACTUAL: u16 = 0x606C;
/// Target position
pub const TARGET_POSITION: u16 = 0x607A;
/// Position limit
pub const POSITION_LIMIT: u16 = 0x607D;
/// Polarity
pub const POLARITY: u16 = 0x607E;
/// Profile velocity
pub const PROFILE_VELOCITY: u16 = 0x6081;
/// Profile acceleration
pub const PROFILE_ACCELERATION: u16 = 0x6083;
/// Quick stop deceleration
pub const QUICK_STOP_DECELERATION: u16 = 0x6085;
/// Target velocity
pub const TARGET_VELOCITY: u16 = 0x60FF;
/// Supported drive modes
pub const SUPPORTED_DRIVE_MODES: u16 = 0x6502;

/// The option code objects, in index order
pub const OPTION_CODE_OBJECTS: [u16; 5] = [
    QUICK_STOP_OPTION,
    SHUTDOWN_OPTION,
    DISABLE_OPERATION_OPTION,
    HALT_OPTION,
    FAULT_REACTION_OPTION,
];

/// The dictionary entries of axis number `axis`
pub fn entries(axis: u8) -> Vec<Entry> {
    let base = u16::from(axis) * AXIS_OFFSET;
    let rww = |index: u16, data_type| {
        Entry::new(base + index, 0, data_type, AccessType::ReadWriteWritePdo).mappable()
    };
    let ro_mapped = |index: u16, data_type| Entry::ro(base + index, 0, data_type).mappable();
    let rw = |index: u16, sub, data_type| Entry::rw(base + index, sub, data_type);

    let mut entries = Vec::new();
    entries.push(rww(CONTROL_WORD, DataType::UInt16));
    entries.push(ro_mapped(STATUS_WORD, DataType::UInt16));
    for index in OPTION_CODE_OBJECTS {
        entries.push(rw(index, 0, DataType::Int16));
    }
    entries.push(rww(MODES_OF_OPERATION, DataType::Int8));
    entries.push(ro_mapped(MODES_OF_OPERATION_DISPLAY, DataType::Int8));
    for index in [POSITION_DEMAND, POSITION_ACTUAL, VELOCITY_DEMAND, VELOCITY_ACTUAL] {
        entries.push(ro_mapped(index, DataType::Int32));
    }
    entries.push(rww(TARGET_POSITION, DataType::Int32));
    entries.push(rww(TARGET_VELOCITY, DataType::Int32));
    entries.push(Entry::ro(base + POSITION_LIMIT, 0, DataType::UInt8));
    entries.push(rw(POSITION_LIMIT, 1, DataType::Int32));
    entries.push(rw(POSITION_LIMIT, 2, DataType::Int32));
    entries.push(rw(POLARITY, 0, DataType::UInt8));
    entries.push(rww(PROFILE_VELOCITY, DataType::UInt32));
    entries.push(rw(PROFILE_ACCELERATION, 0, DataType::UInt32));
    entries.push(rw(QUICK_STOP_DECELERATION, 0, DataType::UInt32));
    for i in 0..NUM_FACTORS as u16 {
        let index = FIRST_FACTOR_INDEX + i;
        entries.push(Entry::ro(base + index, 0, DataType::UInt8));
        entries.push(rw(index, 1, DataType::UInt32));
        entries.push(rw(index, 2, DataType::UInt32));
    }
    entries.push(Entry::ro(base + SUPPORTED_DRIVE_MODES, 0, DataType::UInt32));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use motocan_common::ObjectDictionary;

    #[test]
    fn test_axes_do_not_overlap() {
        let mut od: ObjectDictionary = entries(0).into_iter().collect();
        let count = od.len();
        for entry in entries(1) {
            assert!(od.insert(entry).is_none());
        }
        assert_eq!(od.len(), count * 2);
        let control = od.lookup((0x6840, 0).into()).unwrap();
        assert!(control.is_rpdo_mappable());
        let status = od.lookup((0x6041, 0).into()).unwrap();
        assert!(status.is_tpdo_mappable());
    }
}
