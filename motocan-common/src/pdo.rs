//! PDO parameter words
//!
//! Bit layouts of the mapping parameter (`0x16xx` / `0x1Axx`) and COB-ID (`0x14xx sub1` /
//! `0x18xx sub1`) objects, and classification of the transmission type byte.
use crate::{messages::CanId, objects::Address};

/// The maximum number of objects which can be mapped into one PDO
pub const MAX_MAPPINGS: usize = 8;
/// The number of bits available in one PDO frame
pub const MAX_PDO_BITS: usize = 64;

/// One mapping slot of a PDO
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PdoMapping {
    /// The mapped object
    pub address: Address,
    /// Length of the mapped field in bits
    pub bit_length: u8,
}

impl PdoMapping {
    /// Create a mapping
    pub const fn new(index: u16, sub: u8, bit_length: u8) -> Self {
        Self {
            address: Address::new(index, sub),
            bit_length,
        }
    }

    /// Encode as a mapping parameter word: `index << 16 | sub << 8 | bit_length`
    pub fn encode(&self) -> u32 {
        ((self.address.index as u32) << 16) | ((self.address.sub as u32) << 8) | self.bit_length as u32
    }

    /// Decode a mapping parameter word
    pub fn decode(word: u32) -> Self {
        Self::new((word >> 16) as u16, (word >> 8) as u8, word as u8)
    }

    /// Length of the mapped field in whole bytes
    pub fn byte_length(&self) -> usize {
        self.bit_length as usize / 8
    }
}

/// Classification of the PDO transmission type byte
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitMode {
    /// 0: sent on SYNC, only if an event occurred
    SyncAcyclic,
    /// 1..=0xF0: sent on every Nth SYNC
    SyncCyclic(u8),
    /// 0xF1..=0xFB: reserved
    Reserved(u8),
    /// 0xFC: sent on SYNC after an RTR
    RtrSync,
    /// 0xFD: sent immediately on RTR
    RtrAsync,
    /// 0xFE, 0xFF: event driven
    Event(u8),
}

impl TransmitMode {
    /// Transmission type used by newly created PDOs
    pub const DEFAULT: u8 = 0xFE;

    /// Classify a transmission type byte
    pub fn from_byte(value: u8) -> Self {
        match value {
            0 => TransmitMode::SyncAcyclic,
            1..=0xF0 => TransmitMode::SyncCyclic(value),
            0xF1..=0xFB => TransmitMode::Reserved(value),
            0xFC => TransmitMode::RtrSync,
            0xFD => TransmitMode::RtrAsync,
            _ => TransmitMode::Event(value),
        }
    }

    /// Returns false for the reserved range
    pub fn is_valid(&self) -> bool {
        !matches!(self, TransmitMode::Reserved(_))
    }

    /// Returns true if transmission is tied to the SYNC object
    pub fn is_sync(&self) -> bool {
        matches!(
            self,
            TransmitMode::SyncAcyclic | TransmitMode::SyncCyclic(_) | TransmitMode::RtrSync
        )
    }
}

/// A decoded PDO COB-ID parameter word
///
/// Bit 31 marks the PDO invalid (inactive), bit 30 forbids RTR, and bit 29 selects a 29-bit
/// identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PdoCobId {
    /// The identifier bits, 11 or 29 bits wide
    pub can_id: u32,
    /// False when bit 31 is set
    pub valid: bool,
    /// False when bit 30 is set
    pub rtr_allowed: bool,
    /// True when bit 29 is set
    pub extended: bool,
}

impl PdoCobId {
    /// Invalid (PDO disabled) flag
    pub const INVALID_BIT: u32 = 1 << 31;
    /// No RTR allowed flag
    pub const NO_RTR_BIT: u32 = 1 << 30;
    /// Extended frame flag
    pub const EXTENDED_BIT: u32 = 1 << 29;

    /// Decode a parameter word
    pub fn decode(word: u32) -> Self {
        let extended = word & Self::EXTENDED_BIT != 0;
        let can_id = if extended {
            word & 0x1FFF_FFFF
        } else {
            word & 0x7FF
        };
        Self {
            can_id,
            valid: word & Self::INVALID_BIT == 0,
            rtr_allowed: word & Self::NO_RTR_BIT == 0,
            extended,
        }
    }

    /// Encode as a parameter word
    pub fn encode(&self) -> u32 {
        let mut word = self.can_id;
        if !self.valid {
            word |= Self::INVALID_BIT;
        }
        if !self.rtr_allowed {
            word |= Self::NO_RTR_BIT;
        }
        if self.extended {
            word |= Self::EXTENDED_BIT;
        }
        word
    }

    /// Get the frame identifier
    pub fn can_id(&self) -> CanId {
        if self.extended {
            CanId::extended(self.can_id)
        } else {
            CanId::std(self.can_id as u16)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_word_bits() {
        let m = PdoMapping::new(0x6041, 0x02, 16);
        assert_eq!(m.encode(), 0x6041_0210);
        assert_eq!(PdoMapping::decode(0x2002_0020), PdoMapping::new(0x2002, 0, 32));
        assert_eq!(PdoMapping::decode(0x2002_0020).byte_length(), 4);
    }

    #[test]
    fn test_transmit_mode_classes() {
        assert_eq!(TransmitMode::from_byte(0), TransmitMode::SyncAcyclic);
        assert_eq!(TransmitMode::from_byte(0xF0), TransmitMode::SyncCyclic(0xF0));
        assert!(!TransmitMode::from_byte(0xF1).is_valid());
        assert!(!TransmitMode::from_byte(0xFB).is_valid());
        assert_eq!(TransmitMode::from_byte(0xFC), TransmitMode::RtrSync);
        assert_eq!(TransmitMode::from_byte(0xFD), TransmitMode::RtrAsync);
        assert_eq!(TransmitMode::from_byte(0xFF), TransmitMode::Event(0xFF));
        assert!(TransmitMode::from_byte(0xFC).is_sync());
        assert!(!TransmitMode::from_byte(0xFE).is_sync());
    }

    #[test]
    fn test_cob_id_word_bits() {
        let id = PdoCobId::decode(0xC000_0185);
        assert!(!id.valid);
        assert!(!id.rtr_allowed);
        assert!(!id.extended);
        assert_eq!(id.can_id(), CanId::Std(0x185));
        assert_eq!(id.encode(), 0xC000_0185);

        let id = PdoCobId::decode(0x2001_2345);
        assert!(id.valid && id.extended);
        assert_eq!(id.can_id(), CanId::Extended(0x0001_2345));
    }
}
