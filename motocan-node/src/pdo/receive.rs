use core::ops::Deref;

use defmt_or_log::debug;
use motocan_common::{
    emcy::EmcyError,
    messages::{CanId, CanMessage},
    objects::{Address, ObjectDictionary},
    pdo::{PdoMapping, TransmitMode},
    sdo::SdoErrorCode,
    value::Value,
    AtomicCell,
};

use super::{Direction, PdoObject};

/// A receive PDO
///
/// Derefs to its [`PdoObject`] configuration.
#[derive(Debug)]
pub struct ReceivePdo {
    pdo: PdoObject,
    received: AtomicCell<bool>,
    sync_count: AtomicCell<u8>,
}

impl Deref for ReceivePdo {
    type Target = PdoObject;

    fn deref(&self) -> &Self::Target {
        &self.pdo
    }
}

impl ReceivePdo {
    /// Create an unmapped receive PDO from a COB-ID parameter word
    pub fn new(cob_id: u32) -> Self {
        Self {
            pdo: PdoObject::new(Direction::Receive, cob_id),
            received: AtomicCell::new(false),
            sync_count: AtomicCell::new(0),
        }
    }

    /// Returns true if `msg` is addressed to this PDO
    pub fn matches(&self, msg: &CanMessage) -> bool {
        self.is_active() && !msg.is_rtr() && msg.id() == self.can_id()
    }

    /// Decode a received frame into writes
    ///
    /// `write` is called once per mapping, in mapping order. Returns true if the frame was
    /// addressed to this PDO, even if it was dropped for being too short.
    pub fn process_message(
        &self,
        msg: &CanMessage,
        write: &mut dyn FnMut(Address, Value) -> SdoErrorCode,
    ) -> bool {
        if !self.matches(msg) || self.mapping_count() == 0 {
            return false;
        }
        let data = msg.data();
        if self.byte_length() > data.len() {
            debug!(
                "Dropping RPDO 0x{:X}: {} bytes received, {} mapped",
                msg.id().raw(),
                data.len(),
                self.byte_length()
            );
            return true;
        }
        let mut offset = 0;
        for (mapping, data_type) in self.mappings() {
            let len = mapping.byte_length();
            if let Ok(value) = Value::from_bytes(data_type, &data[offset..offset + len]) {
                let result = write(mapping.address, value);
                if !result.is_ok() {
                    debug!(
                        "RPDO write to {:X}sub{} failed: 0x{:X}",
                        mapping.address.index,
                        mapping.address.sub,
                        u32::from(result)
                    );
                }
            }
            offset += len;
        }
        self.received.store(true);
        true
    }

    /// Account for the end of a SYNC window
    ///
    /// For synchronous PDOs, returns an RPDO timeout error if the frame expected in the last
    /// cycle did not arrive.
    pub fn update(&self, just_left_sync_window: bool) -> Option<EmcyError> {
        if !just_left_sync_window || !self.is_active() || self.mapping_count() == 0 {
            return None;
        }
        let TransmitMode::SyncCyclic(period) = TransmitMode::from_byte(self.transmit_mode()) else {
            return None;
        };
        let count = self.sync_count.load().saturating_add(1);
        if count < period {
            self.sync_count.store(count);
            return None;
        }
        self.sync_count.store(0);
        if self.received.swap(false) {
            None
        } else {
            Some(EmcyError::RpdoTimeout)
        }
    }

    fn reset_cycle(&self) {
        self.sync_count.store(0);
        self.received.store(false);
    }

    /// Activate or deactivate the PDO, resetting the cycle accounting
    pub fn set_active(&self, od: &ObjectDictionary, active: bool) -> SdoErrorCode {
        self.reset_cycle();
        self.pdo.set_active(od, active)
    }

    /// Write the COB-ID parameter word
    ///
    /// The cycle accounting is reset whenever the write changes the active state.
    pub fn set_cob_id(&self, od: &ObjectDictionary, word: u32) -> SdoErrorCode {
        let was_active = self.is_active();
        let result = self.pdo.set_cob_id(od, word);
        if self.is_active() != was_active {
            self.reset_cycle();
        }
        result
    }

    /// Replace the whole configuration and activate the PDO, resetting the cycle accounting
    pub fn configure(
        &self,
        od: &ObjectDictionary,
        can_id: CanId,
        transmit_mode: u8,
        mappings: &[PdoMapping],
    ) -> SdoErrorCode {
        self.reset_cycle();
        self.pdo.configure(od, can_id, transmit_mode, mappings)
    }
}
