//! Emergency (EMCY) error codes and message layout
use int_enum::IntEnum;

use crate::messages::{CanId, CanMessage, MessageError};

/// Standard 16-bit EMCY error codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
#[allow(missing_docs)]
pub enum EmcyError {
    NoError = 0,
    GenericError = 0x1000,
    GenericCurrentError = 0x2000,
    GenericCurrentInputError = 0x2100,
    GenericCurrentInternalError = 0x2200,
    GenericCurrentOutputError = 0x2300,
    GenericVoltageError = 0x3000,
    GenericVoltageInputError = 0x3100,
    GenericVoltageInternalError = 0x3200,
    GenericVoltageOutputError = 0x3300,
    GenericTemperatureError = 0x4000,
    GenericAmbientTemperatureError = 0x4100,
    GenericDeviceTemperatureError = 0x4200,
    GenericHardwareError = 0x5000,
    GenericSoftwareError = 0x6000,
    GenericInternalSoftwareError = 0x6100,
    GenericUserSoftwareError = 0x6200,
    GenericDataSetError = 0x6300,
    GenericMonitoringError = 0x8000,
    GenericCommunicationError = 0x8100,
    CanOverrun = 0x8110,
    CanInErrorPassiveMode = 0x8120,
    HeartbeatOrGuardingError = 0x8130,
    RecoveredFromBusOff = 0x8140,
    CanIdCollision = 0x8150,
    GenericProtocolError = 0x8200,
    PdoDroppedDueToLengthError = 0x8210,
    PdoLengthExceeded = 0x8220,
    DamPdoNotProcessed = 0x8230,
    UnexpectedSyncData = 0x8240,
    RpdoTimeout = 0x8250,
    GenericExternalError = 0x9000,
    GenericAdditionalFunctionError = 0xF000,
    GenericDeviceSpecificError = 0xFF00,
}

/// Bits of the error register (object 0x1001)
pub mod error_register {
    /// Set whenever any error is active
    pub const GENERIC: u8 = 1 << 0;
    /// Current
    pub const CURRENT: u8 = 1 << 1;
    /// Voltage
    pub const VOLTAGE: u8 = 1 << 2;
    /// Temperature
    pub const TEMPERATURE: u8 = 1 << 3;
    /// Communication error (overrun, error state)
    pub const COMMUNICATION: u8 = 1 << 4;
    /// Device profile specific
    pub const DEVICE_PROFILE: u8 = 1 << 5;
    /// Manufacturer specific
    pub const MANUFACTURER: u8 = 1 << 7;
}

impl EmcyError {
    /// The error register bits implied by this error's class
    pub fn register_bits(&self) -> u8 {
        let code: u16 = (*self).into();
        let class = match code >> 12 {
            0 => return 0,
            2 => error_register::CURRENT,
            3 => error_register::VOLTAGE,
            4 => error_register::TEMPERATURE,
            8 => error_register::COMMUNICATION,
            0xF => error_register::DEVICE_PROFILE,
            _ => 0,
        };
        class | error_register::GENERIC
    }
}

/// The payload of an EMCY message
///
/// Layout: `[code lo, code hi, error register, manufacturer[0..5]]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EmcyMessage {
    /// Raw error code
    pub code: u16,
    /// Error register value
    pub register: u8,
    /// Manufacturer specific error field
    pub manufacturer: [u8; 5],
}

impl EmcyMessage {
    /// Create a message for a standard error code
    pub fn new(error: EmcyError, register: u8, manufacturer: [u8; 5]) -> Self {
        Self {
            code: error.into(),
            register,
            manufacturer,
        }
    }

    /// Get the standard code, if the raw code is one
    pub fn error(&self) -> Option<EmcyError> {
        EmcyError::try_from(self.code).ok()
    }

    /// Encode the 8 byte payload
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut data = [0u8; 8];
        data[0..2].copy_from_slice(&self.code.to_le_bytes());
        data[2] = self.register;
        data[3..8].copy_from_slice(&self.manufacturer);
        data
    }

    /// Build the EMCY frame on `cob_id`
    pub fn to_can_message(&self, cob_id: CanId) -> CanMessage {
        CanMessage::new(cob_id, &self.to_bytes())
    }
}

impl TryFrom<&[u8]> for EmcyMessage {
    type Error = MessageError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        if data.len() < 8 {
            return Err(MessageError::MessageTooShort);
        }
        let mut manufacturer = [0u8; 5];
        manufacturer.copy_from_slice(&data[3..8]);
        Ok(Self {
            code: u16::from_le_bytes([data[0], data[1]]),
            register: data[2],
            manufacturer,
        })
    }
}
