//! Process data objects
//!
//! A PDO maps up to eight dictionary objects into a single CAN frame. [`ReceivePdo`] decodes
//! incoming frames into writes, and [`TransmitPdo`] decides when to assemble and send a frame.
//!
//! All PDO state is held in [`AtomicCell`]s, so that a PDO can be shared via `Arc` between the
//! device, which drives it, and the communication and mapping parameter handlers registered in the
//! [`HandlerMap`](crate::HandlerMap), which configure it.
use motocan_common::{
    messages::CanId,
    objects::{DataType, ObjectDictionary},
    pdo::{PdoCobId, PdoMapping, TransmitMode, MAX_MAPPINGS, MAX_PDO_BITS},
    sdo::SdoErrorCode,
    AtomicCell,
};

mod configurator;
mod receive;
mod transmit;

pub use configurator::{
    register_rpdo_handlers, register_tpdo_handlers, rpdo_entries, tpdo_entries,
};
pub use receive::ReceivePdo;
pub use transmit::TransmitPdo;

/// Which side of the bus a PDO sits on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Frames are received and written into the dictionary
    Receive,
    /// Frames are read from the dictionary and sent
    Transmit,
}

/// The configuration shared by receive and transmit PDOs
#[derive(Debug)]
pub struct PdoObject {
    direction: Direction,
    active: AtomicCell<bool>,
    can_id: AtomicCell<u32>,
    extended: AtomicCell<bool>,
    rtr_allowed: AtomicCell<bool>,
    transmit_mode: AtomicCell<u8>,
    mapping_count: AtomicCell<u8>,
    mappings: [AtomicCell<PdoMapping>; MAX_MAPPINGS],
    mapping_types: [AtomicCell<DataType>; MAX_MAPPINGS],
}

impl PdoObject {
    /// Create an unmapped PDO from a COB-ID parameter word
    ///
    /// The PDO is active if the word's invalid bit is clear. It starts with no mappings and the
    /// default transmission type.
    pub fn new(direction: Direction, cob_id: u32) -> Self {
        let cob = PdoCobId::decode(cob_id);
        Self {
            direction,
            active: AtomicCell::new(cob.valid),
            can_id: AtomicCell::new(cob.can_id),
            extended: AtomicCell::new(cob.extended),
            rtr_allowed: AtomicCell::new(cob.rtr_allowed),
            transmit_mode: AtomicCell::new(TransmitMode::DEFAULT),
            mapping_count: AtomicCell::new(0),
            mappings: core::array::from_fn(|_| AtomicCell::new(PdoMapping::default())),
            mapping_types: core::array::from_fn(|_| AtomicCell::new(DataType::Empty)),
        }
    }

    /// The direction of this PDO
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns true if the PDO is active
    pub fn is_active(&self) -> bool {
        self.active.load()
    }

    /// The frame identifier, regardless of whether the PDO is active
    pub fn can_id(&self) -> CanId {
        self.cob().can_id()
    }

    /// Returns true if the PDO may be requested by RTR
    pub fn rtr_allowed(&self) -> bool {
        self.rtr_allowed.load()
    }

    fn cob(&self) -> PdoCobId {
        PdoCobId {
            can_id: self.can_id.load(),
            valid: self.active.load(),
            rtr_allowed: self.rtr_allowed.load(),
            extended: self.extended.load(),
        }
    }

    /// The COB-ID parameter word, with bit 31 set while inactive
    pub fn cob_id(&self) -> u32 {
        self.cob().encode()
    }

    /// Write the COB-ID parameter word
    ///
    /// The identifier of an active PDO cannot be changed; it must first be made invalid. Setting
    /// the valid bit activates the PDO, re-validating its mappings.
    fn set_cob_id(&self, od: &ObjectDictionary, word: u32) -> SdoErrorCode {
        let new = PdoCobId::decode(word);
        let current = self.cob();
        if current.valid
            && new.valid
            && (new.can_id != current.can_id || new.extended != current.extended)
        {
            return SdoErrorCode::InvalidValue;
        }
        self.can_id.store(new.can_id);
        self.extended.store(new.extended);
        self.rtr_allowed.store(new.rtr_allowed);
        self.set_active(od, new.valid)
    }

    /// Set the identifier and flags, leaving the active state unchanged
    pub fn set_can_id(&self, can_id: CanId) {
        self.can_id.store(can_id.raw());
        self.extended.store(can_id.is_extended());
    }

    /// Activate or deactivate the PDO
    ///
    /// Activation fails, leaving the PDO inactive, if the current mappings are not valid.
    fn set_active(&self, od: &ObjectDictionary, active: bool) -> SdoErrorCode {
        if active {
            if let Err(code) = self.validate_mappings(od, self.mapping_count.load() as usize) {
                self.active.store(false);
                return code;
            }
        }
        self.active.store(active);
        SdoErrorCode::NoError
    }

    /// The transmission type byte
    pub fn transmit_mode(&self) -> u8 {
        self.transmit_mode.load()
    }

    /// Set the transmission type
    ///
    /// Reserved codes are rejected, as are the RTR codes for receive PDOs.
    pub fn set_transmit_mode(&self, mode: u8) -> SdoErrorCode {
        let allowed = match (self.direction, TransmitMode::from_byte(mode)) {
            (_, TransmitMode::Reserved(_)) => false,
            (Direction::Receive, TransmitMode::RtrSync | TransmitMode::RtrAsync) => false,
            _ => true,
        };
        if !allowed {
            return SdoErrorCode::InvalidValue;
        }
        self.transmit_mode.store(mode);
        SdoErrorCode::NoError
    }

    /// The number of mappings in use
    pub fn mapping_count(&self) -> u8 {
        self.mapping_count.load()
    }

    /// Read a mapping slot
    ///
    /// Slots beyond [`MAX_MAPPINGS`] read as an empty mapping.
    pub fn mapping(&self, index: usize) -> PdoMapping {
        self.mappings
            .get(index)
            .map(|m| m.load())
            .unwrap_or_default()
    }

    /// Iterate over the mappings in use, with the type of each mapped object
    pub fn mappings(&self) -> impl Iterator<Item = (PdoMapping, DataType)> + '_ {
        let count = self.mapping_count.load() as usize;
        self.mappings
            .iter()
            .zip(self.mapping_types.iter())
            .take(count)
            .map(|(m, t)| (m.load(), t.load()))
    }

    /// Number of bytes occupied by the mappings in use
    pub fn byte_length(&self) -> usize {
        self.mappings().map(|(m, _)| m.byte_length()).sum()
    }

    fn validate_mapping(
        &self,
        od: &ObjectDictionary,
        mapping: PdoMapping,
    ) -> Result<DataType, SdoErrorCode> {
        let entry = od
            .lookup(mapping.address)
            .ok_or(SdoErrorCode::ObjectDoesNotExist)?;
        let mappable = match self.direction {
            Direction::Receive => entry.is_rpdo_mappable(),
            Direction::Transmit => entry.is_tpdo_mappable(),
        };
        if !mappable || entry.data_type.bit_length() != mapping.bit_length as usize {
            return Err(SdoErrorCode::PdoMappingError);
        }
        Ok(entry.data_type)
    }

    fn validate_mappings(
        &self,
        od: &ObjectDictionary,
        count: usize,
    ) -> Result<[DataType; MAX_MAPPINGS], SdoErrorCode> {
        let mut types = [DataType::Empty; MAX_MAPPINGS];
        let mut total_bits = 0;
        for (i, slot) in self.mappings.iter().take(count).enumerate() {
            let mapping = slot.load();
            types[i] = self.validate_mapping(od, mapping)?;
            total_bits += mapping.bit_length as usize;
        }
        if total_bits > MAX_PDO_BITS {
            return Err(SdoErrorCode::MappingsExceedPdoLength);
        }
        Ok(types)
    }

    /// Write one mapping slot
    ///
    /// Mappings of an active PDO cannot be changed.
    pub fn set_mapping(&self, od: &ObjectDictionary, index: usize, mapping: PdoMapping) -> SdoErrorCode {
        let Some(slot) = self.mappings.get(index) else {
            return SdoErrorCode::SubIndexDoesNotExist;
        };
        if self.is_active() {
            return SdoErrorCode::UnsupportedAccess;
        }
        match self.validate_mapping(od, mapping) {
            Ok(_) => {
                slot.store(mapping);
                SdoErrorCode::NoError
            }
            Err(code) => code,
        }
    }

    /// Set the number of mappings in use
    ///
    /// The PDO must be inactive. Every slot brought into use is validated, and together they must
    /// fit in one frame.
    pub fn set_mapping_count(&self, od: &ObjectDictionary, count: u8) -> SdoErrorCode {
        if self.is_active() || count as usize > MAX_MAPPINGS {
            return SdoErrorCode::UnsupportedAccess;
        }
        match self.validate_mappings(od, count as usize) {
            Ok(types) => {
                for (slot, data_type) in self.mapping_types.iter().zip(types) {
                    slot.store(data_type);
                }
                self.mapping_count.store(count);
                SdoErrorCode::NoError
            }
            Err(code) => code,
        }
    }

    /// Replace the whole configuration and activate the PDO
    ///
    /// Returns the first error encountered, in which case the PDO is left inactive.
    fn configure(
        &self,
        od: &ObjectDictionary,
        can_id: CanId,
        transmit_mode: u8,
        mappings: &[PdoMapping],
    ) -> SdoErrorCode {
        if mappings.len() > MAX_MAPPINGS {
            return SdoErrorCode::UnsupportedAccess;
        }
        self.active.store(false);
        let result = self
            .set_mapping_count(od, 0)
            .into_result()
            .and_then(|_| {
                for (i, mapping) in mappings.iter().enumerate() {
                    self.set_mapping(od, i, *mapping).into_result()?;
                }
                Ok(())
            })
            .and_then(|_| self.set_mapping_count(od, mappings.len() as u8).into_result())
            .and_then(|_| self.set_transmit_mode(transmit_mode).into_result());
        if let Err(code) = result {
            return code;
        }
        self.set_can_id(can_id);
        self.set_active(od, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motocan_common::objects::{AccessType, Entry};

    fn od() -> ObjectDictionary {
        ObjectDictionary::new(&[
            Entry::ro(0x2000, 0, DataType::UInt32).mappable(),
            Entry::ro(0x2001, 0, DataType::UInt64).mappable(),
            Entry::ro(0x2002, 0, DataType::UInt16),
            Entry::new(0x2003, 0, DataType::Int16, AccessType::ReadWriteWritePdo).mappable(),
        ])
    }

    #[test]
    fn test_mapping_direction_and_length() {
        let od = od();
        let tpdo = PdoObject::new(Direction::Transmit, 0x8000_0181);
        assert_eq!(
            tpdo.set_mapping(&od, 0, PdoMapping::new(0x2003, 0, 16)),
            SdoErrorCode::PdoMappingError
        );
        assert_eq!(
            tpdo.set_mapping(&od, 0, PdoMapping::new(0x2002, 0, 16)),
            SdoErrorCode::PdoMappingError
        );
        assert_eq!(
            tpdo.set_mapping(&od, 0, PdoMapping::new(0x2000, 0, 16)),
            SdoErrorCode::PdoMappingError
        );
        assert_eq!(
            tpdo.set_mapping(&od, 0, PdoMapping::new(0x2100, 0, 16)),
            SdoErrorCode::ObjectDoesNotExist
        );
        assert_eq!(
            tpdo.set_mapping(&od, 0, PdoMapping::new(0x2000, 0, 32)),
            SdoErrorCode::NoError
        );

        let rpdo = PdoObject::new(Direction::Receive, 0x8000_0201);
        assert_eq!(
            rpdo.set_mapping(&od, 0, PdoMapping::new(0x2000, 0, 32)),
            SdoErrorCode::PdoMappingError
        );
        assert_eq!(
            rpdo.set_mapping(&od, 0, PdoMapping::new(0x2003, 0, 16)),
            SdoErrorCode::NoError
        );
    }

    #[test]
    fn test_mappings_exceeding_frame() {
        let od = od();
        let tpdo = PdoObject::new(Direction::Transmit, 0x8000_0181);
        assert!(tpdo.set_mapping(&od, 0, PdoMapping::new(0x2001, 0, 64)).is_ok());
        assert!(tpdo.set_mapping(&od, 1, PdoMapping::new(0x2000, 0, 32)).is_ok());
        assert!(tpdo.set_mapping_count(&od, 1).is_ok());
        // 96 bits
        assert_eq!(
            tpdo.set_mapping_count(&od, 2),
            SdoErrorCode::MappingsExceedPdoLength
        );
        assert_eq!(tpdo.mapping_count(), 1);
        assert_eq!(tpdo.set_mapping_count(&od, 9), SdoErrorCode::UnsupportedAccess);
    }

    #[test]
    fn test_active_pdo_is_locked() {
        let od = od();
        let tpdo = PdoObject::new(Direction::Transmit, 0x181);
        assert!(tpdo.is_active());
        assert_eq!(tpdo.set_mapping_count(&od, 0), SdoErrorCode::UnsupportedAccess);
        assert_eq!(
            tpdo.set_mapping(&od, 0, PdoMapping::new(0x2000, 0, 32)),
            SdoErrorCode::UnsupportedAccess
        );
        // Changing the identifier of an active PDO is refused
        assert_eq!(tpdo.set_cob_id(&od, 0x182), SdoErrorCode::InvalidValue);
        assert!(tpdo.set_cob_id(&od, 0x8000_0182).is_ok());
        assert!(!tpdo.is_active());
        assert_eq!(tpdo.cob_id(), 0x8000_0182);
        assert!(tpdo.set_cob_id(&od, 0x182).is_ok());
        assert!(tpdo.is_active());
    }

    #[test]
    fn test_transmit_modes() {
        let tpdo = PdoObject::new(Direction::Transmit, 0x181);
        let rpdo = PdoObject::new(Direction::Receive, 0x201);
        for mode in [0xF1, 0xF8, 0xFB] {
            assert_eq!(tpdo.set_transmit_mode(mode), SdoErrorCode::InvalidValue);
            assert_eq!(rpdo.set_transmit_mode(mode), SdoErrorCode::InvalidValue);
        }
        assert!(tpdo.set_transmit_mode(0xFC).is_ok());
        assert_eq!(rpdo.set_transmit_mode(0xFC), SdoErrorCode::InvalidValue);
        assert!(rpdo.set_transmit_mode(0xF0).is_ok());
        assert!(rpdo.set_transmit_mode(0xFF).is_ok());
    }

    #[test]
    fn test_configure() {
        let od = od();
        let tpdo = PdoObject::new(Direction::Transmit, 0x181);
        let result = tpdo.configure(
            &od,
            CanId::Std(0x190),
            1,
            &[PdoMapping::new(0x2000, 0, 32)],
        );
        assert_eq!(result, SdoErrorCode::NoError);
        assert_eq!(tpdo.cob_id(), 0x190);
        assert_eq!(tpdo.transmit_mode(), 1);
        assert_eq!(tpdo.byte_length(), 4);
        assert_eq!(
            tpdo.mappings().next(),
            Some((PdoMapping::new(0x2000, 0, 32), DataType::UInt32))
        );
    }
}
