use core::ops::Deref;

use motocan_common::{
    messages::{CanId, CanMessage},
    objects::{Address, ObjectDictionary},
    pdo::{PdoMapping, TransmitMode},
    sdo::SdoErrorCode,
    value::Value,
    AtomicCell,
};

use super::{Direction, PdoObject};

/// A transmit PDO
///
/// Derefs to its [`PdoObject`] configuration.
#[derive(Debug)]
pub struct TransmitPdo {
    pdo: PdoObject,
    sync_count: AtomicCell<u8>,
    has_received_sync: AtomicCell<bool>,
    rtr: AtomicCell<bool>,
    updated: AtomicCell<bool>,
    /// Event timer in milliseconds, 0 to disable
    event_timer_ms: AtomicCell<u16>,
    /// Inhibit time in units of 100us
    inhibit_time: AtomicCell<u16>,
    last_message_us: AtomicCell<Option<u64>>,
}

impl Deref for TransmitPdo {
    type Target = PdoObject;

    fn deref(&self) -> &Self::Target {
        &self.pdo
    }
}

impl TransmitPdo {
    /// Create an unmapped transmit PDO from a COB-ID parameter word
    pub fn new(cob_id: u32) -> Self {
        Self {
            pdo: PdoObject::new(Direction::Transmit, cob_id),
            sync_count: AtomicCell::new(0),
            has_received_sync: AtomicCell::new(false),
            rtr: AtomicCell::new(false),
            updated: AtomicCell::new(false),
            event_timer_ms: AtomicCell::new(0),
            inhibit_time: AtomicCell::new(0),
            last_message_us: AtomicCell::new(None),
        }
    }

    /// Event timer in milliseconds
    pub fn event_timer(&self) -> u16 {
        self.event_timer_ms.load()
    }

    /// Set the event timer in milliseconds. 0 disables it.
    pub fn set_event_timer(&self, ms: u16) {
        self.event_timer_ms.store(ms);
    }

    /// Inhibit time in units of 100us
    pub fn inhibit_time(&self) -> u16 {
        self.inhibit_time.load()
    }

    /// Set the inhibit time in units of 100us
    pub fn set_inhibit_time(&self, time_100us: u16) {
        self.inhibit_time.store(time_100us);
    }

    /// Returns true if the PDO maps `address`
    pub fn maps(&self, address: Address) -> bool {
        self.mappings().any(|(m, _)| m.address == address)
    }

    /// Note that a mapped value has changed
    pub fn mark_updated(&self) {
        self.updated.store(true);
    }

    /// Note a received SYNC
    pub fn sync(&self) {
        self.has_received_sync.store(true);
        let _ = self.sync_count.fetch_update(|c| Some(c.saturating_add(1)));
    }

    fn reset_triggers(&self) {
        self.sync_count.store(0);
        self.has_received_sync.store(false);
        self.rtr.store(false);
        self.updated.store(false);
        self.last_message_us.store(None);
    }

    /// Activate or deactivate the PDO, resetting all trigger state
    pub fn set_active(&self, od: &ObjectDictionary, active: bool) -> SdoErrorCode {
        self.reset_triggers();
        self.pdo.set_active(od, active)
    }

    /// Write the COB-ID parameter word
    ///
    /// Trigger state is reset whenever the write changes the active state.
    pub fn set_cob_id(&self, od: &ObjectDictionary, word: u32) -> SdoErrorCode {
        let was_active = self.is_active();
        let result = self.pdo.set_cob_id(od, word);
        if self.is_active() != was_active {
            self.reset_triggers();
        }
        result
    }

    /// Replace the whole configuration and activate the PDO, resetting all trigger state
    pub fn configure(
        &self,
        od: &ObjectDictionary,
        can_id: CanId,
        transmit_mode: u8,
        mappings: &[PdoMapping],
    ) -> SdoErrorCode {
        self.reset_triggers();
        self.pdo.configure(od, can_id, transmit_mode, mappings)
    }

    fn event_ready(&self, now_us: u64) -> bool {
        let last = self.last_message_us.load();
        let elapsed = |period_us: u64| last.map_or(true, |t| now_us.saturating_sub(t) >= period_us);
        let inhibit_over = elapsed(self.inhibit_time.load() as u64 * 100);
        let timer = self.event_timer_ms.load();
        let timer_fired = timer != 0 && elapsed(timer as u64 * 1000);
        inhibit_over && (self.updated.load() || timer_fired)
    }

    /// Produce the next frame, if one is due
    ///
    /// `in_sync_window` is true while the current time is within the SYNC window; `read` fetches
    /// each mapped value. If any read fails, no frame is produced.
    pub fn next_message(
        &self,
        in_sync_window: bool,
        now_us: u64,
        read: &mut dyn FnMut(Address) -> Result<Value, SdoErrorCode>,
    ) -> Option<CanMessage> {
        if !self.is_active() || self.mapping_count() == 0 {
            return None;
        }
        let has_sync = self.has_received_sync.load();
        let sync_count = self.sync_count.load();
        let due = match TransmitMode::from_byte(self.transmit_mode()) {
            TransmitMode::SyncAcyclic => has_sync && self.event_ready(now_us),
            TransmitMode::SyncCyclic(period) => has_sync && in_sync_window && sync_count >= period,
            TransmitMode::RtrSync => self.rtr.load() && in_sync_window && sync_count != 0,
            TransmitMode::RtrAsync | TransmitMode::Event(_) => self.event_ready(now_us),
            TransmitMode::Reserved(_) => false,
        };
        if !due {
            return None;
        }
        self.get_message(now_us, read)
    }

    /// Assemble a frame from the current mapped values, regardless of triggers
    ///
    /// On success the trigger state is reset and the inhibit and event timers restart.
    pub fn get_message(
        &self,
        now_us: u64,
        read: &mut dyn FnMut(Address) -> Result<Value, SdoErrorCode>,
    ) -> Option<CanMessage> {
        let mut data = [0u8; 8];
        let mut offset = 0;
        for (mapping, data_type) in self.mappings() {
            let value = read(mapping.address).ok()?;
            if value.data_type() != data_type {
                return None;
            }
            let len = mapping.byte_length();
            if value.to_bytes(data.get_mut(offset..offset + len)?) != len {
                return None;
            }
            offset += len;
        }
        self.rtr.store(false);
        self.sync_count.store(0);
        self.has_received_sync.store(false);
        self.updated.store(false);
        self.last_message_us.store(Some(now_us));
        Some(CanMessage::new(self.can_id(), &data[..offset]))
    }

    /// Handle a received frame
    ///
    /// A remote request on the PDO's identifier is latched. In RTR-asynchronous mode the frame
    /// is produced immediately and returned.
    pub fn process_message(
        &self,
        msg: &CanMessage,
        now_us: u64,
        read: &mut dyn FnMut(Address) -> Result<Value, SdoErrorCode>,
    ) -> Option<CanMessage> {
        if !self.is_active() || !msg.is_rtr() || msg.id() != self.can_id() || !self.rtr_allowed() {
            return None;
        }
        self.rtr.store(true);
        if TransmitMode::from_byte(self.transmit_mode()) == TransmitMode::RtrAsync {
            self.get_message(now_us, read)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motocan_common::objects::{DataType, Entry};

    fn od() -> ObjectDictionary {
        ObjectDictionary::new(&[
            Entry::ro(0x2000, 0, DataType::UInt16).mappable(),
            Entry::ro(0x2001, 0, DataType::UInt8).mappable(),
        ])
    }

    fn tpdo(mode: u8) -> TransmitPdo {
        let tpdo = TransmitPdo::new(0x8000_0181);
        let result = tpdo.configure(
            &od(),
            CanId::Std(0x181),
            mode,
            &[PdoMapping::new(0x2000, 0, 16), PdoMapping::new(0x2001, 0, 8)],
        );
        assert_eq!(result, SdoErrorCode::NoError);
        tpdo
    }

    fn read(addr: Address) -> Result<Value, SdoErrorCode> {
        match addr.index {
            0x2000 => Ok(Value::UInt16(0x0102)),
            0x2001 => Ok(Value::UInt8(3)),
            _ => Err(SdoErrorCode::ObjectDoesNotExist),
        }
    }

    #[test]
    fn test_frame_layout() {
        let tpdo = tpdo(0xFE);
        tpdo.mark_updated();
        let msg = tpdo.next_message(false, 0, &mut read).unwrap();
        assert_eq!(msg.id(), CanId::Std(0x181));
        assert_eq!(msg.data(), &[0x02, 0x01, 0x03]);
        assert!(tpdo.next_message(false, 10, &mut read).is_none());
    }

    #[test]
    fn test_read_failure_sends_nothing() {
        let tpdo = tpdo(0xFE);
        tpdo.mark_updated();
        let mut failing = |addr: Address| {
            if addr.index == 0x2001 {
                Err(SdoErrorCode::GeneralError)
            } else {
                read(addr)
            }
        };
        assert!(tpdo.next_message(false, 0, &mut failing).is_none());
        // Still pending
        assert!(tpdo.next_message(false, 0, &mut read).is_some());
    }

    #[test]
    fn test_inhibit_time() {
        let tpdo = tpdo(0xFE);
        // 10ms
        tpdo.set_inhibit_time(100);
        tpdo.mark_updated();
        assert!(tpdo.next_message(false, 1_000, &mut read).is_some());
        let mut sent = 0;
        for t in (1_000..11_000).step_by(500) {
            tpdo.mark_updated();
            if tpdo.next_message(false, t, &mut read).is_some() {
                sent += 1;
            }
        }
        assert_eq!(sent, 0);
        assert!(tpdo.next_message(false, 11_000, &mut read).is_some());
    }

    #[test]
    fn test_event_timer() {
        let tpdo = tpdo(0xFF);
        tpdo.set_event_timer(10);
        assert!(tpdo.next_message(false, 0, &mut read).is_some());
        assert!(tpdo.next_message(false, 9_999, &mut read).is_none());
        assert!(tpdo.next_message(false, 10_000, &mut read).is_some());
    }

    #[test]
    fn test_sync_cyclic() {
        let tpdo = tpdo(2);
        tpdo.sync();
        assert!(tpdo.next_message(true, 0, &mut read).is_none());
        tpdo.sync();
        assert!(tpdo.next_message(false, 0, &mut read).is_none());
        assert!(tpdo.next_message(true, 0, &mut read).is_some());
        assert!(tpdo.next_message(true, 0, &mut read).is_none());
    }

    #[test]
    fn test_cob_id_reactivation_resets_sync_count() {
        let od = od();
        let tpdo = tpdo(2);
        tpdo.sync();
        tpdo.sync();
        assert!(tpdo.set_cob_id(&od, 0x8000_0181).is_ok());
        assert!(!tpdo.is_active());
        assert!(tpdo.set_cob_id(&od, 0x181).is_ok());
        assert!(tpdo.is_active());
        assert!(tpdo.next_message(true, 0, &mut read).is_none());
        tpdo.sync();
        tpdo.sync();
        assert!(tpdo.next_message(true, 0, &mut read).is_some());
    }

    #[test]
    fn test_cob_id_reactivation_drops_pending_event() {
        let od = od();
        let tpdo = tpdo(0xFE);
        tpdo.mark_updated();
        assert!(tpdo.set_cob_id(&od, 0x8000_0181).is_ok());
        assert!(tpdo.set_cob_id(&od, 0x181).is_ok());
        assert!(tpdo.next_message(false, 0, &mut read).is_none());
    }

    #[test]
    fn test_sync_acyclic_needs_event() {
        let tpdo = tpdo(0);
        tpdo.sync();
        assert!(tpdo.next_message(true, 0, &mut read).is_none());
        tpdo.mark_updated();
        assert!(tpdo.next_message(true, 0, &mut read).is_some());
    }

    #[test]
    fn test_rtr() {
        let pdo = tpdo(0xFD);
        let rtr = CanMessage::new_rtr(CanId::Std(0x181));
        let msg = pdo.process_message(&rtr, 0, &mut read).unwrap();
        assert_eq!(msg.data(), &[0x02, 0x01, 0x03]);

        let pdo = tpdo(0xFC);
        assert!(pdo.process_message(&rtr, 0, &mut read).is_none());
        assert!(pdo.next_message(true, 0, &mut read).is_none());
        pdo.sync();
        assert!(pdo.next_message(true, 0, &mut read).is_some());
    }
}
