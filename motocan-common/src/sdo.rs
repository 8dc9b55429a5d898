//! SDO abort codes and the expedited transfer frame codec
//!
//! Only expedited transfers are supported, so every request and response fits in a single 8 byte
//! frame laid out as `[command, index lo, index hi, sub, data0..data3]`.
use int_enum::IntEnum;

use crate::{
    messages::{CanId, CanMessage, MessageError},
    objects::Address,
};

/// CANopen SDO abort codes
///
/// Every dictionary access returns one of these, and they are sent verbatim to the SDO peer on
/// failure. `NoError` signals success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum SdoErrorCode {
    /// Success
    NoError = 0,
    /// Toggle bit not alternated
    ToggleBitNotAlternated = 0x0503_0000,
    /// SDO protocol timed out
    SDOProtocolTimedOut = 0x0504_0000,
    /// Client/server command specifier not valid or unknown
    InvalidCommand = 0x0504_0001,
    /// Invalid block size (block mode only)
    InvalidBlockSize = 0x0504_0002,
    /// Invalid sequence number (block mode only)
    InvalidSequenceNumber = 0x0504_0003,
    /// CRC error (block mode only)
    CRCError = 0x0504_0004,
    /// Out of memory
    OutOfMemory = 0x0504_0005,
    /// Unsupported access to an object
    UnsupportedAccess = 0x0601_0000,
    /// Attempt to read a write only object
    ReadOfWriteOnlyObject = 0x0601_0001,
    /// Attempt to write a read only object
    WriteOfReadOnlyObject = 0x0601_0002,
    /// Object does not exist in the dictionary
    ObjectDoesNotExist = 0x0602_0000,
    /// Object cannot be mapped to the PDO
    PdoMappingError = 0x0604_0041,
    /// The number and length of objects would exceed PDO length
    MappingsExceedPdoLength = 0x0604_0042,
    /// General parameter incompatibility
    GeneralParameterIncompatibility = 0x0604_0043,
    /// General internal incompatibility in the device
    GeneralInternalIncompatibility = 0x0604_0047,
    /// Access failed due to hardware error
    HardwareError = 0x0606_0000,
    /// Data type does not match, length of service parameter does not match
    DataTypeDoesNotMatchLengthDoesNotMatch = 0x0607_0010,
    /// Data type does not match, length of service parameter too high
    DataTypeDoesNotMatchLengthTooHigh = 0x0607_0012,
    /// Data type does not match, length of service parameter too low
    DataTypeDoesNotMatchLengthTooLow = 0x0607_0013,
    /// Sub-index does not exist
    SubIndexDoesNotExist = 0x0609_0011,
    /// Invalid value for parameter (download only)
    InvalidValue = 0x0609_0030,
    /// Value of parameter too high (download only)
    ValueOfParameterTooHigh = 0x0609_0031,
    /// Value of parameter too low (download only)
    ValueOfParameterTooLow = 0x0609_0032,
    /// Maximum value is less than minimum value
    MaximumValueLessThanMinimumValue = 0x0609_0036,
    /// Resource not available: SDO connection
    ResourceUnavailable = 0x060A_0023,
    /// General error
    GeneralError = 0x0800_0000,
    /// Data cannot be transferred or stored to the application
    DataCannotBeTransferred = 0x0800_0020,
    /// No data available
    NoDataAvailable = 0x0800_0024,
}

impl SdoErrorCode {
    /// Returns true for `NoError`
    pub fn is_ok(&self) -> bool {
        *self == SdoErrorCode::NoError
    }

    /// Convert to a `Result`, mapping `NoError` to `Ok(())`
    pub fn into_result(self) -> Result<(), SdoErrorCode> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// An abort code as received from the wire
///
/// Codes outside the standard table are kept as their raw value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortCode {
    /// A standard code
    Standard(SdoErrorCode),
    /// A code not in the standard table
    Unknown(u32),
}

impl AbortCode {
    /// Get the raw 32-bit code
    pub fn raw(&self) -> u32 {
        match self {
            AbortCode::Standard(code) => (*code).into(),
            AbortCode::Unknown(raw) => *raw,
        }
    }

    /// Returns true for `NoError`
    pub fn is_ok(&self) -> bool {
        matches!(self, AbortCode::Standard(SdoErrorCode::NoError))
    }
}

impl From<u32> for AbortCode {
    fn from(value: u32) -> Self {
        match SdoErrorCode::try_from(value) {
            Ok(code) => AbortCode::Standard(code),
            Err(raw) => AbortCode::Unknown(raw),
        }
    }
}

impl From<SdoErrorCode> for AbortCode {
    fn from(value: SdoErrorCode) -> Self {
        AbortCode::Standard(value)
    }
}

impl PartialEq<SdoErrorCode> for AbortCode {
    fn eq(&self, other: &SdoErrorCode) -> bool {
        *self == AbortCode::Standard(*other)
    }
}

const UPLOAD_REQUEST: u8 = 0x40;
const DOWNLOAD_REQUEST: u8 = 0x23;
const UPLOAD_RESPONSE: u8 = 0x43;
const DOWNLOAD_RESPONSE: u8 = 0x60;
const ABORT: u8 = 0x80;

/// Build the `n` bits of a command byte for an expedited payload of `size` bytes
fn size_bits(size: u8) -> u8 {
    ((4u8.wrapping_sub(size)) & 0b11) << 2
}

/// Recover the payload size from the command byte, if the size bit is set
fn decode_size(command: u8) -> Option<u8> {
    if command & 1 != 0 {
        Some(4 - ((command >> 2) & 0b11))
    } else {
        None
    }
}

fn write_address(payload: &mut [u8; 8], address: Address) {
    payload[1..3].copy_from_slice(&address.index.to_le_bytes());
    payload[3] = address.sub;
}

fn read_address(payload: &[u8]) -> Address {
    Address::new(u16::from_le_bytes([payload[1], payload[2]]), payload[3])
}

fn read_data(payload: &[u8]) -> [u8; 4] {
    [payload[4], payload[5], payload[6], payload[7]]
}

fn sdo_payload(msg: &CanMessage) -> Result<&[u8], MessageError> {
    if msg.is_extended() || msg.is_rtr() {
        return Err(MessageError::MalformedMsg { cob_id: msg.id() });
    }
    let data = msg.data();
    if data.len() != 8 {
        return Err(MessageError::MessageTooShort);
    }
    Ok(data)
}

/// An SDO request sent from client to server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdoRequest {
    /// Expedited upload (read) request
    Upload {
        /// Object to read
        address: Address,
    },
    /// Expedited download (write) request
    Download {
        /// Object to write
        address: Address,
        /// Declared payload size in bytes, if the size bit was set
        size: Option<u8>,
        /// Payload, padded to four bytes
        data: [u8; 4],
    },
    /// Any other command: segmented or block transfer commands, or a client abort
    Unsupported {
        /// The raw command byte
        command: u8,
        /// The addressed object
        address: Address,
    },
}

impl SdoRequest {
    /// Create an upload request
    pub fn upload(address: Address) -> Self {
        SdoRequest::Upload { address }
    }

    /// Create an expedited download request carrying `data` (at most 4 bytes are sent)
    pub fn expedited_download(address: Address, data: &[u8]) -> Self {
        let len = data.len().min(4);
        let mut buf = [0; 4];
        buf[0..len].copy_from_slice(&data[0..len]);
        SdoRequest::Download {
            address,
            size: Some(len as u8),
            data: buf,
        }
    }

    /// The addressed object
    pub fn address(&self) -> Address {
        match self {
            SdoRequest::Upload { address }
            | SdoRequest::Download { address, .. }
            | SdoRequest::Unsupported { address, .. } => *address,
        }
    }

    /// Encode as an 8 byte frame on `id`
    pub fn to_can_message(self, id: CanId) -> CanMessage {
        let mut payload = [0u8; 8];
        write_address(&mut payload, self.address());
        match self {
            SdoRequest::Upload { .. } => payload[0] = UPLOAD_REQUEST,
            SdoRequest::Download { size, data, .. } => {
                payload[0] = match size {
                    Some(size) => DOWNLOAD_REQUEST | size_bits(size),
                    None => DOWNLOAD_REQUEST & !1,
                };
                payload[4..8].copy_from_slice(&data);
            }
            SdoRequest::Unsupported { command, .. } => payload[0] = command,
        }
        CanMessage::new(id, &payload)
    }
}

impl TryFrom<&CanMessage> for SdoRequest {
    type Error = MessageError;

    fn try_from(msg: &CanMessage) -> Result<Self, Self::Error> {
        let payload = sdo_payload(msg)?;
        let command = payload[0];
        let address = read_address(payload);
        if command & 0xE0 == UPLOAD_REQUEST {
            Ok(SdoRequest::Upload { address })
        } else if command & 0b1110_0010 == 0b0010_0010 {
            Ok(SdoRequest::Download {
                address,
                size: decode_size(command),
                data: read_data(payload),
            })
        } else {
            Ok(SdoRequest::Unsupported { command, address })
        }
    }
}

/// An SDO response sent from server to client
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdoResponse {
    /// Expedited upload response carrying the object value
    Upload {
        /// The object read
        address: Address,
        /// Payload size in bytes, if the size bit was set
        size: Option<u8>,
        /// Payload, padded to four bytes
        data: [u8; 4],
    },
    /// Download acknowledgement
    Download {
        /// The object written
        address: Address,
    },
    /// Transfer aborted
    Abort {
        /// The addressed object
        address: Address,
        /// Raw abort code
        code: u32,
    },
}

impl SdoResponse {
    /// Create an expedited upload response carrying `data` (at most 4 bytes are sent)
    pub fn expedited_upload(address: Address, data: &[u8]) -> Self {
        let len = data.len().min(4);
        let mut buf = [0; 4];
        buf[0..len].copy_from_slice(&data[0..len]);
        SdoResponse::Upload {
            address,
            size: Some(len as u8),
            data: buf,
        }
    }

    /// Create a download acknowledgement
    pub fn download_acknowledge(address: Address) -> Self {
        SdoResponse::Download { address }
    }

    /// Create an abort response
    pub fn abort(address: Address, code: SdoErrorCode) -> Self {
        SdoResponse::Abort {
            address,
            code: code.into(),
        }
    }

    /// The addressed object
    pub fn address(&self) -> Address {
        match self {
            SdoResponse::Upload { address, .. }
            | SdoResponse::Download { address }
            | SdoResponse::Abort { address, .. } => *address,
        }
    }

    /// Encode as an 8 byte frame on `id`
    pub fn to_can_message(self, id: CanId) -> CanMessage {
        let mut payload = [0u8; 8];
        write_address(&mut payload, self.address());
        match self {
            SdoResponse::Upload { size, data, .. } => {
                payload[0] = match size {
                    Some(size) => UPLOAD_RESPONSE | size_bits(size),
                    None => UPLOAD_RESPONSE & !1,
                };
                payload[4..8].copy_from_slice(&data);
            }
            SdoResponse::Download { .. } => payload[0] = DOWNLOAD_RESPONSE,
            SdoResponse::Abort { code, .. } => {
                payload[0] = ABORT;
                payload[4..8].copy_from_slice(&code.to_le_bytes());
            }
        }
        CanMessage::new(id, &payload)
    }
}

impl TryFrom<&CanMessage> for SdoResponse {
    type Error = MessageError;

    fn try_from(msg: &CanMessage) -> Result<Self, Self::Error> {
        let payload = sdo_payload(msg)?;
        let command = payload[0];
        let address = read_address(payload);
        match command & 0xE0 {
            0x40 if command & 0b10 != 0 => Ok(SdoResponse::Upload {
                address,
                size: decode_size(command),
                data: read_data(payload),
            }),
            DOWNLOAD_RESPONSE => Ok(SdoResponse::Download { address }),
            ABORT => Ok(SdoResponse::Abort {
                address,
                code: u32::from_le_bytes(read_data(payload)),
            }),
            _ => Err(MessageError::MalformedMsg { cob_id: msg.id() }),
        }
    }
}
