//! The communication profile objects every device carries
//!
//! [`standard_entries`] lists the dictionary entries, and [`CommObjects`] holds their values so
//! that they can be shared between the handlers and the device.
use alloc::{sync::Arc, vec::Vec};

use motocan_common::{
    constants::{object_ids::*, ERROR_HISTORY_DEPTH},
    messages::{EMCY_BASE, SDO_REQ_BASE, SDO_RESP_BASE},
    objects::{DataType, Entry},
    sdo::SdoErrorCode,
    settings::{DeviceSettings, HeartbeatConsumer},
    AtomicCell,
};

use crate::{
    handler_map::{BuildError, HandlerMapBuilder, HandlerValue},
    pdo::{rpdo_entries, tpdo_entries},
};

/// Dictionary entries for the communication objects of a device with the given PDO counts
pub fn standard_entries(num_rpdo: u8, num_tpdo: u8) -> Vec<Entry> {
    let mut entries = Vec::from([
        Entry::ro(DEVICE_TYPE, 0, DataType::UInt32),
        Entry::ro(ERROR_REGISTER, 0, DataType::UInt8),
        Entry::rw(ERROR_HISTORY, 0, DataType::UInt8),
        Entry::rw(SYNC_COB_ID, 0, DataType::UInt32),
        Entry::rw(SYNC_PERIOD, 0, DataType::UInt32),
        Entry::rw(SYNC_WINDOW, 0, DataType::UInt32),
        Entry::rw(EMCY_COB_ID, 0, DataType::UInt32),
        Entry::rw(EMCY_INHIBIT_TIME, 0, DataType::UInt16),
        Entry::ro(HEARTBEAT_CONSUMER_TIME, 0, DataType::UInt8),
        Entry::rw(HEARTBEAT_CONSUMER_TIME, 1, DataType::UInt32),
        Entry::rw(HEARTBEAT_PRODUCER_TIME, 0, DataType::UInt16),
        Entry::ro(IDENTITY, 0, DataType::UInt8),
        Entry::rw(SYNC_COUNTER_OVERFLOW, 0, DataType::UInt8),
        Entry::ro(SDO_SERVER, 0, DataType::UInt8),
        Entry::ro(SDO_SERVER, 1, DataType::UInt32),
        Entry::ro(SDO_SERVER, 2, DataType::UInt32),
    ]);
    entries.extend(
        (1..=ERROR_HISTORY_DEPTH as u8).map(|sub| Entry::ro(ERROR_HISTORY, sub, DataType::UInt32)),
    );
    entries.extend((1..=4).map(|sub| Entry::ro(IDENTITY, sub, DataType::UInt32)));
    for n in 0..num_rpdo {
        entries.extend(rpdo_entries(n));
    }
    for n in 0..num_tpdo {
        entries.extend(tpdo_entries(n));
    }
    entries
}

/// Values of the communication objects
#[derive(Debug)]
pub struct CommObjects {
    pub(crate) error_register: AtomicCell<u8>,
    error_history: AtomicCell<[u32; ERROR_HISTORY_DEPTH]>,
    error_count: AtomicCell<u8>,
    pub(crate) sync_cob_id: AtomicCell<u32>,
    pub(crate) sync_period_us: AtomicCell<u32>,
    pub(crate) sync_window_us: AtomicCell<u32>,
    pub(crate) sync_counter_overflow: AtomicCell<u8>,
    pub(crate) emcy_cob_id: AtomicCell<u32>,
    pub(crate) emcy_inhibit_100us: AtomicCell<u16>,
    pub(crate) heartbeat_consumer: AtomicCell<u32>,
    pub(crate) heartbeat_producer_ms: AtomicCell<u16>,
}

impl CommObjects {
    /// Initial values from the device settings
    pub fn new(settings: &DeviceSettings) -> Self {
        Self {
            error_register: AtomicCell::new(0),
            error_history: AtomicCell::new([0; ERROR_HISTORY_DEPTH]),
            error_count: AtomicCell::new(0),
            sync_cob_id: AtomicCell::new(settings.sync.cob_id),
            sync_period_us: AtomicCell::new(settings.sync.period_us),
            sync_window_us: AtomicCell::new(settings.sync.window_us),
            sync_counter_overflow: AtomicCell::new(settings.sync.counter_overflow),
            emcy_cob_id: AtomicCell::new((EMCY_BASE + settings.node_id as u16) as u32),
            emcy_inhibit_100us: AtomicCell::new(settings.emcy_inhibit_100us),
            heartbeat_consumer: AtomicCell::new(settings.heartbeat_consumer.encode()),
            heartbeat_producer_ms: AtomicCell::new(settings.heartbeat_producer_ms),
        }
    }

    /// Record an error code at the head of the error history
    pub fn push_error(&self, code: u32) {
        let _ = self.error_history.fetch_update(|mut history| {
            history.copy_within(0..ERROR_HISTORY_DEPTH - 1, 1);
            history[0] = code;
            Some(history)
        });
        let _ = self
            .error_count
            .fetch_update(|n| Some((n + 1).min(ERROR_HISTORY_DEPTH as u8)));
    }

    /// The recorded errors, newest first
    pub fn error_history(&self) -> heapless::Vec<u32, ERROR_HISTORY_DEPTH> {
        let count = self.error_count.load() as usize;
        self.error_history.load()[..count].iter().copied().collect()
    }

    /// Clear the error history
    pub fn clear_error_history(&self) {
        self.error_count.store(0);
        self.error_history.store([0; ERROR_HISTORY_DEPTH]);
    }

    /// The monitored heartbeat producer
    pub fn heartbeat_consumer(&self) -> HeartbeatConsumer {
        HeartbeatConsumer::decode(self.heartbeat_consumer.load())
    }
}

/// Serve the communication objects
pub fn register_standard_handlers(
    builder: &mut HandlerMapBuilder,
    comm: &Arc<CommObjects>,
    settings: &DeviceSettings,
) -> Result<(), BuildError> {
    let node_id = settings.node_id as u32;
    builder.set_constant((DEVICE_TYPE, 0), settings.device_type)?;
    serve(builder, (SYNC_PERIOD, 0), comm, |c| &c.sync_period_us)?;
    serve(builder, (SYNC_WINDOW, 0), comm, |c| &c.sync_window_us)?;
    serve(builder, (EMCY_INHIBIT_TIME, 0), comm, |c| &c.emcy_inhibit_100us)?;
    serve(builder, (HEARTBEAT_CONSUMER_TIME, 1), comm, |c| &c.heartbeat_consumer)?;
    serve(builder, (HEARTBEAT_PRODUCER_TIME, 0), comm, |c| &c.heartbeat_producer_ms)?;
    builder.set_constant((HEARTBEAT_CONSUMER_TIME, 0), 1u8)?;

    let c = comm.clone();
    builder.set_read_handler((ERROR_REGISTER, 0), move || c.error_register.load())?;

    let c = comm.clone();
    builder.set_read_handler((ERROR_HISTORY, 0), move || c.error_count.load())?;
    let c = comm.clone();
    builder.set_write_handler((ERROR_HISTORY, 0), move |value: u8| {
        if value != 0 {
            return SdoErrorCode::InvalidValue;
        }
        c.clear_error_history();
        SdoErrorCode::NoError
    })?;
    for sub in 1..=ERROR_HISTORY_DEPTH as u8 {
        let c = comm.clone();
        builder.set_fallible_read_handler((ERROR_HISTORY, sub), move || {
            c.error_history()
                .get(sub as usize - 1)
                .copied()
                .ok_or(SdoErrorCode::NoDataAvailable)
        })?;
    }

    let c = comm.clone();
    builder.set_read_handler((SYNC_COB_ID, 0), move || c.sync_cob_id.load())?;
    let c = comm.clone();
    builder.set_write_handler((SYNC_COB_ID, 0), move |value: u32| {
        // This device never produces SYNC
        if value & (1 << 30) != 0 {
            return SdoErrorCode::InvalidValue;
        }
        c.sync_cob_id.store(value);
        SdoErrorCode::NoError
    })?;

    let c = comm.clone();
    builder.set_read_handler((SYNC_COUNTER_OVERFLOW, 0), move || {
        c.sync_counter_overflow.load()
    })?;
    let c = comm.clone();
    builder.set_write_handler((SYNC_COUNTER_OVERFLOW, 0), move |value: u8| {
        if value == 1 || value > 240 {
            return SdoErrorCode::InvalidValue;
        }
        c.sync_counter_overflow.store(value);
        SdoErrorCode::NoError
    })?;

    let c = comm.clone();
    builder.set_read_handler((EMCY_COB_ID, 0), move || c.emcy_cob_id.load())?;
    let c = comm.clone();
    builder.set_write_handler((EMCY_COB_ID, 0), move |value: u32| {
        c.emcy_cob_id.store(value);
        SdoErrorCode::NoError
    })?;

    let identity = settings.identity;
    builder.set_constant((IDENTITY, 0), 4u8)?;
    builder.set_constant((IDENTITY, 1), identity.vendor_id)?;
    builder.set_constant((IDENTITY, 2), identity.product_code)?;
    builder.set_constant((IDENTITY, 3), identity.revision_number)?;
    builder.set_constant((IDENTITY, 4), identity.serial_number)?;

    builder.set_constant((SDO_SERVER, 0), 2u8)?;
    builder.set_constant((SDO_SERVER, 1), SDO_REQ_BASE as u32 + node_id)?;
    builder.set_constant((SDO_SERVER, 2), SDO_RESP_BASE as u32 + node_id)?;
    Ok(())
}

/// Serve one of the shared cells as a plain read/write object
fn serve<T: HandlerValue>(
    builder: &mut HandlerMapBuilder,
    address: (u16, u8),
    comm: &Arc<CommObjects>,
    field: fn(&CommObjects) -> &AtomicCell<T>,
) -> Result<(), BuildError> {
    let c = comm.clone();
    builder.set_read_handler(address, move || field(&c).load())?;
    let c = comm.clone();
    builder.set_write_handler(address, move |value: T| {
        field(&c).store(value);
        SdoErrorCode::NoError
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler_map::HandlerMap;
    use motocan_common::{objects::Address, value::Value};

    fn map() -> (HandlerMap, Arc<CommObjects>) {
        let mut settings = DeviceSettings::new(5);
        settings.identity.vendor_id = 0x1234;
        let comm = Arc::new(CommObjects::new(&settings));
        let mut builder = HandlerMapBuilder::new(
            standard_entries(0, 0)
                .into_iter()
                .collect::<motocan_common::objects::ObjectDictionary>(),
        );
        register_standard_handlers(&mut builder, &comm, &settings).unwrap();
        (builder.build().unwrap(), comm)
    }

    #[test]
    fn test_identity_and_sdo_server() {
        let (mut map, _) = map();
        assert_eq!(map.read(Address::new(0x1018, 0)), Ok(Value::UInt8(4)));
        assert_eq!(map.read(Address::new(0x1018, 1)), Ok(Value::UInt32(0x1234)));
        assert_eq!(map.read(Address::new(0x1200, 1)), Ok(Value::UInt32(0x605)));
        assert_eq!(map.read(Address::new(0x1200, 2)), Ok(Value::UInt32(0x585)));
        assert_eq!(map.read(Address::new(0x1014, 0)), Ok(Value::UInt32(0x85)));
    }

    #[test]
    fn test_writes_reach_shared_objects() {
        let (mut map, comm) = map();
        assert!(map
            .write_value(Address::new(0x1017, 0), Value::UInt16(100))
            .is_ok());
        assert_eq!(comm.heartbeat_producer_ms.load(), 100);
        assert!(map
            .write_value(Address::new(0x1006, 0), Value::UInt32(10_000))
            .is_ok());
        assert_eq!(comm.sync_period_us.load(), 10_000);
        assert_eq!(
            map.write_value(Address::new(0x1019, 0), Value::UInt8(1)),
            SdoErrorCode::InvalidValue
        );
        assert!(map
            .write_value(Address::new(0x1019, 0), Value::UInt8(16))
            .is_ok());
    }

    #[test]
    fn test_error_history() {
        let (mut map, comm) = map();
        comm.push_error(0x8130);
        comm.push_error(0x1000);
        assert_eq!(map.read(Address::new(0x1003, 0)), Ok(Value::UInt8(2)));
        assert_eq!(map.read(Address::new(0x1003, 1)), Ok(Value::UInt32(0x1000)));
        assert_eq!(map.read(Address::new(0x1003, 2)), Ok(Value::UInt32(0x8130)));
        assert_eq!(
            map.read(Address::new(0x1003, 3)),
            Err(SdoErrorCode::NoDataAvailable)
        );
        assert_eq!(
            map.write_value(Address::new(0x1003, 0), Value::UInt8(1)),
            SdoErrorCode::InvalidValue
        );
        assert!(map
            .write_value(Address::new(0x1003, 0), Value::UInt8(0))
            .is_ok());
        assert!(comm.error_history().is_empty());
    }
}
