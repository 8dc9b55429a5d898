//! Communication and mapping parameter objects for PDOs
use alloc::sync::Arc;

use motocan_common::{
    constants::object_ids::{
        RPDO_COMM_BASE, RPDO_MAPPING_BASE, TPDO_COMM_BASE, TPDO_MAPPING_BASE,
    },
    objects::{DataType, Entry, ObjectDictionary},
    pdo::{PdoMapping, MAX_MAPPINGS},
    sdo::SdoErrorCode,
};

use super::{PdoObject, ReceivePdo, TransmitPdo};
use crate::handler_map::{BuildError, HandlerMapBuilder};

const RPDO_COMM_ENTRIES: usize = 3;
const TPDO_COMM_ENTRIES: usize = 5;

fn mapping_entries(index: u16) -> impl Iterator<Item = Entry> {
    core::iter::once(Entry::rw(index, 0, DataType::UInt8)).chain(
        (1..=MAX_MAPPINGS as u8).map(move |sub| Entry::rw(index, sub, DataType::UInt32)),
    )
}

/// Dictionary entries for the parameters of RPDO `n`
pub fn rpdo_entries(n: u8) -> impl Iterator<Item = Entry> {
    let comm = RPDO_COMM_BASE + n as u16;
    [
        Entry::ro(comm, 0, DataType::UInt8),
        Entry::rw(comm, 1, DataType::UInt32),
        Entry::rw(comm, 2, DataType::UInt8),
    ]
    .into_iter()
    .chain(mapping_entries(RPDO_MAPPING_BASE + n as u16))
}

/// Dictionary entries for the parameters of TPDO `n`
pub fn tpdo_entries(n: u8) -> impl Iterator<Item = Entry> {
    let comm = TPDO_COMM_BASE + n as u16;
    [
        Entry::ro(comm, 0, DataType::UInt8),
        Entry::rw(comm, 1, DataType::UInt32),
        Entry::rw(comm, 2, DataType::UInt8),
        Entry::rw(comm, 3, DataType::UInt16),
        Entry::rw(comm, 5, DataType::UInt16),
    ]
    .into_iter()
    .chain(mapping_entries(TPDO_MAPPING_BASE + n as u16))
}

/// A PDO whose COB-ID parameter write also resets its trigger state
trait CobIdParameter: core::ops::Deref<Target = PdoObject> {
    fn write_cob_id(&self, od: &ObjectDictionary, word: u32) -> SdoErrorCode;
}

impl CobIdParameter for TransmitPdo {
    fn write_cob_id(&self, od: &ObjectDictionary, word: u32) -> SdoErrorCode {
        self.set_cob_id(od, word)
    }
}

impl CobIdParameter for ReceivePdo {
    fn write_cob_id(&self, od: &ObjectDictionary, word: u32) -> SdoErrorCode {
        self.set_cob_id(od, word)
    }
}

fn register_common<P>(
    builder: &mut HandlerMapBuilder,
    comm: u16,
    mapping: u16,
    pdo: &Arc<P>,
    highest_sub: u8,
) -> Result<(), BuildError>
where
    P: CobIdParameter + Send + Sync + 'static,
{
    let od = builder.od().clone();
    builder.set_constant((comm, 0), highest_sub)?;

    let p = pdo.clone();
    builder.set_read_handler((comm, 1), move || p.cob_id())?;
    let (p, o) = (pdo.clone(), od.clone());
    builder.set_write_handler((comm, 1), move |word: u32| p.write_cob_id(&o, word))?;

    let p = pdo.clone();
    builder.set_read_handler((comm, 2), move || p.transmit_mode())?;
    let p = pdo.clone();
    builder.set_write_handler((comm, 2), move |mode: u8| p.set_transmit_mode(mode))?;

    let p = pdo.clone();
    builder.set_read_handler((mapping, 0), move || p.mapping_count())?;
    let (p, o) = (pdo.clone(), od.clone());
    builder.set_write_handler((mapping, 0), move |count: u8| p.set_mapping_count(&o, count))?;

    for slot in 0..MAX_MAPPINGS {
        let sub = slot as u8 + 1;
        let p = pdo.clone();
        builder.set_read_handler((mapping, sub), move || p.mapping(slot).encode())?;
        let (p, o) = (pdo.clone(), od.clone());
        builder.set_write_handler((mapping, sub), move |word: u32| {
            p.set_mapping(&o, slot, PdoMapping::decode(word))
        })?;
    }
    Ok(())
}

/// Serve the parameter objects of RPDO `n` from `pdo`
pub fn register_rpdo_handlers(
    builder: &mut HandlerMapBuilder,
    n: u8,
    pdo: &Arc<ReceivePdo>,
) -> Result<(), BuildError> {
    register_common(
        builder,
        RPDO_COMM_BASE + n as u16,
        RPDO_MAPPING_BASE + n as u16,
        pdo,
        (RPDO_COMM_ENTRIES - 1) as u8,
    )
}

/// Serve the parameter objects of TPDO `n` from `pdo`
pub fn register_tpdo_handlers(
    builder: &mut HandlerMapBuilder,
    n: u8,
    pdo: &Arc<TransmitPdo>,
) -> Result<(), BuildError> {
    let comm = TPDO_COMM_BASE + n as u16;
    register_common(
        builder,
        comm,
        TPDO_MAPPING_BASE + n as u16,
        pdo,
        TPDO_COMM_ENTRIES as u8,
    )?;
    let p = pdo.clone();
    builder.set_read_handler((comm, 3), move || p.inhibit_time())?;
    let p = pdo.clone();
    builder.set_write_handler((comm, 3), move |t: u16| {
        p.set_inhibit_time(t);
        SdoErrorCode::NoError
    })?;
    let p = pdo.clone();
    builder.set_read_handler((comm, 5), move || p.event_timer())?;
    let p = pdo.clone();
    builder.set_write_handler((comm, 5), move |t: u16| {
        p.set_event_timer(t);
        SdoErrorCode::NoError
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use motocan_common::{objects::Address, value::Value};

    #[test]
    fn test_entry_counts() {
        assert_eq!(rpdo_entries(0).count(), RPDO_COMM_ENTRIES + MAX_MAPPINGS + 1);
        assert_eq!(tpdo_entries(0).count(), TPDO_COMM_ENTRIES + MAX_MAPPINGS + 1);
    }

    #[test]
    fn test_configure_tpdo_over_objects() {
        let mut od: ObjectDictionary = tpdo_entries(1).collect();
        od.insert(Entry::ro(0x2000, 0, DataType::UInt32).mappable());
        let pdo = Arc::new(TransmitPdo::new(0x8000_0281));
        let mut builder = HandlerMapBuilder::new(od);
        builder.set_constant((0x2000, 0), 0u32).unwrap();
        register_tpdo_handlers(&mut builder, 1, &pdo).unwrap();
        let mut map = builder.build().unwrap();

        let write = |map: &mut crate::HandlerMap, index: u16, sub: u8, value: Value| {
            map.write_value(Address::new(index, sub), value)
        };
        assert!(write(&mut map, 0x1A01, 1, Value::UInt32(0x2000_0020)).is_ok());
        assert!(write(&mut map, 0x1A01, 0, Value::UInt8(1)).is_ok());
        assert!(write(&mut map, 0x1801, 3, Value::UInt16(50)).is_ok());
        assert!(write(&mut map, 0x1801, 1, Value::UInt32(0x281)).is_ok());

        assert!(pdo.is_active());
        assert_eq!(pdo.inhibit_time(), 50);
        assert_eq!(map.read(Address::new(0x1801, 0)), Ok(Value::UInt8(5)));
        assert_eq!(map.read(Address::new(0x1A01, 1)), Ok(Value::UInt32(0x2000_0020)));
        assert_eq!(
            write(&mut map, 0x1A01, 0, Value::UInt8(0)),
            SdoErrorCode::UnsupportedAccess
        );
        assert_eq!(
            write(&mut map, 0x1801, 2, Value::UInt8(0xF5)),
            SdoErrorCode::InvalidValue
        );
    }

    #[test]
    fn test_reactivation_over_objects_resets_sync_count() {
        let mut od: ObjectDictionary = tpdo_entries(0).collect();
        od.insert(Entry::ro(0x2000, 0, DataType::UInt32).mappable());
        let pdo = Arc::new(TransmitPdo::new(0x8000_0181));
        let mut builder = HandlerMapBuilder::new(od);
        builder.set_constant((0x2000, 0), 7u32).unwrap();
        register_tpdo_handlers(&mut builder, 0, &pdo).unwrap();
        let mut map = builder.build().unwrap();

        assert!(map.write_value(Address::new(0x1A00, 1), Value::UInt32(0x2000_0020)).is_ok());
        assert!(map.write_value(Address::new(0x1A00, 0), Value::UInt8(1)).is_ok());
        assert!(map.write_value(Address::new(0x1800, 2), Value::UInt8(2)).is_ok());
        assert!(map.write_value(Address::new(0x1800, 1), Value::UInt32(0x181)).is_ok());

        let mut read = |_: Address| -> Result<Value, SdoErrorCode> { Ok(Value::UInt32(7)) };
        pdo.sync();
        pdo.sync();
        assert!(map.write_value(Address::new(0x1800, 1), Value::UInt32(0x8000_0181)).is_ok());
        assert!(map.write_value(Address::new(0x1800, 1), Value::UInt32(0x181)).is_ok());
        assert!(pdo.is_active());
        assert!(pdo.next_message(true, 0, &mut read).is_none());
        pdo.sync();
        pdo.sync();
        assert!(pdo.next_message(true, 0, &mut read).is_some());
    }
}
