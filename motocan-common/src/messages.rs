//! CAN frame type and the fixed-layout CANopen messages
//!
//! The node and client stacks only ever exchange [`CanMessage`] values with the transport; the
//! other types in this module are typed views of particular COB-ID ranges, with conversions in both
//! directions.
use int_enum::IntEnum;
use snafu::Snafu;

use crate::{emcy::EmcyMessage, sdo::SdoErrorCode};

/// A CAN identifier, either an 11-bit standard ID or a 29-bit extended ID
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CanId {
    /// 29-bit identifier
    Extended(u32),
    /// 11-bit identifier
    Std(u16),
}

impl CanId {
    /// Create an extended ID, masking to 29 bits
    pub const fn extended(id: u32) -> CanId {
        CanId::Extended(id & 0x1FFF_FFFF)
    }

    /// Create a standard ID, masking to 11 bits
    pub const fn std(id: u16) -> CanId {
        CanId::Std(id & 0x7FF)
    }

    /// Get the raw integer identifier
    pub fn raw(&self) -> u32 {
        match self {
            CanId::Extended(id) => *id,
            CanId::Std(id) => *id as u32,
        }
    }

    /// Returns true for 29-bit identifiers
    pub fn is_extended(&self) -> bool {
        match self {
            CanId::Extended(_) => true,
            CanId::Std(_) => false,
        }
    }
}

/// The max data length of a classic CAN frame
pub const MAX_DATA_LENGTH: usize = 8;

/// A classic CAN frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanMessage {
    /// Frame payload. Only the first `dlc` bytes are valid.
    pub data: [u8; MAX_DATA_LENGTH],
    /// Number of valid bytes in `data`
    pub dlc: u8,
    /// The frame identifier
    pub id: CanId,
    /// Remote transmission request flag
    pub rtr: bool,
}

impl Default for CanMessage {
    fn default() -> Self {
        Self {
            data: [0; MAX_DATA_LENGTH],
            dlc: 0,
            id: CanId::Std(0),
            rtr: false,
        }
    }
}

impl CanMessage {
    /// Create a data frame
    ///
    /// At most [`MAX_DATA_LENGTH`] bytes are copied from `data`.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        let dlc = data.len().min(MAX_DATA_LENGTH);
        let mut buf = [0u8; MAX_DATA_LENGTH];
        buf[0..dlc].copy_from_slice(&data[0..dlc]);

        Self {
            id,
            dlc: dlc as u8,
            data: buf,
            rtr: false,
        }
    }

    /// Create a remote transmission request frame
    pub fn new_rtr(id: CanId) -> Self {
        Self {
            id,
            rtr: true,
            ..Default::default()
        }
    }

    /// Get the identifier
    pub fn id(&self) -> CanId {
        self.id
    }

    /// Get the valid portion of the payload
    pub fn data(&self) -> &[u8] {
        &self.data[0..(self.dlc as usize).min(MAX_DATA_LENGTH)]
    }

    /// Returns true if this is a remote transmission request
    pub fn is_rtr(&self) -> bool {
        self.rtr
    }

    /// Returns true if the identifier is 29-bit
    pub fn is_extended(&self) -> bool {
        self.id.is_extended()
    }

    /// Returns true for a standard (11-bit) data frame with the given raw identifier
    pub fn is_std_with_id(&self, id: u32) -> bool {
        !self.id.is_extended() && self.id.raw() == id
    }
}

/// NMT command specifier
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntEnum)]
#[repr(u8)]
pub enum NmtCommandCmd {
    /// Enter operational
    Start = 1,
    /// Enter stopped
    Stop = 2,
    /// Enter pre-operational
    EnterPreOp = 128,
    /// Reset the application
    ResetNode = 129,
    /// Reset communication parameters
    ResetComm = 130,
}

/// COB-ID of NMT commands
pub const NMT_CMD_ID: CanId = CanId::Std(0);
/// Default COB-ID of the SYNC object
pub const SYNC_ID: CanId = CanId::Std(0x80);
/// Base COB-ID for EMCY messages (node ID is added)
pub const EMCY_BASE: u16 = 0x80;
/// Base COB-ID for heartbeat and node guarding (node ID is added)
pub const HEARTBEAT_BASE: u16 = 0x700;
/// The default base ID for sending SDO requests (server node ID is added)
pub const SDO_REQ_BASE: u16 = 0x600;
/// The default base ID for sending SDO responses (server node ID is added)
pub const SDO_RESP_BASE: u16 = 0x580;

/// An NMT command addressed to one node, or to all nodes when `node` is 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NmtCommand {
    /// The command
    pub cmd: NmtCommandCmd,
    /// The target node, or 0 for broadcast
    pub node: u8,
}

impl NmtCommand {
    /// Returns true if the command applies to `node_id`
    pub fn addresses(&self, node_id: u8) -> bool {
        self.node == 0 || self.node == node_id
    }
}

impl TryFrom<CanMessage> for NmtCommand {
    type Error = MessageError;

    fn try_from(msg: CanMessage) -> Result<Self, Self::Error> {
        let payload = msg.data();
        if msg.id() != NMT_CMD_ID {
            Err(MessageError::UnexpectedId {
                cob_id: msg.id(),
                expected: NMT_CMD_ID,
            })
        } else if payload.len() >= 2 {
            let cmd = NmtCommandCmd::try_from(payload[0])
                .map_err(|value| MessageError::InvalidNmtCommand { value })?;
            let node = payload[1];
            Ok(NmtCommand { cmd, node })
        } else {
            Err(MessageError::MessageTooShort)
        }
    }
}

impl From<NmtCommand> for CanMessage {
    fn from(cmd: NmtCommand) -> Self {
        CanMessage::new(NMT_CMD_ID, &[cmd.cmd.into(), cmd.node])
    }
}

/// NMT state of a node
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntEnum)]
#[repr(u8)]
pub enum NmtState {
    /// Transient state reported once in the boot-up message
    Bootup = 0,
    /// Only NMT and heartbeat are processed
    Stopped = 4,
    /// PDOs, SDOs and protocol extensions are processed
    Operational = 5,
    /// SDOs are processed, PDOs are not
    PreOperational = 127,
}

/// A heartbeat (or node guarding response) message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// The node sending the heartbeat
    pub node: u8,
    /// Node guarding toggle bit
    pub toggle: bool,
    /// The node's NMT state
    pub state: NmtState,
}

impl From<Heartbeat> for CanMessage {
    fn from(value: Heartbeat) -> Self {
        let mut state: u8 = value.state.into();
        if value.toggle {
            state |= 1 << 7;
        }
        CanMessage::new(CanId::Std(HEARTBEAT_BASE + value.node as u16), &[state])
    }
}

impl TryFrom<CanMessage> for Heartbeat {
    type Error = MessageError;

    fn try_from(msg: CanMessage) -> Result<Self, Self::Error> {
        let cob_id = msg.id();
        if cob_id.is_extended() || cob_id.raw() & !0x7f != HEARTBEAT_BASE as u32 {
            return Err(MessageError::UnrecognizedId { cob_id });
        }
        if msg.data().len() != 1 {
            return Err(MessageError::MalformedMsg { cob_id });
        }
        let node = (cob_id.raw() & 0x7f) as u8;
        let toggle = (msg.data[0] & (1 << 7)) != 0;
        let state = NmtState::try_from(msg.data[0] & 0x7f)
            .map_err(|value| MessageError::InvalidNmtState { value })?;
        Ok(Heartbeat {
            node,
            toggle,
            state,
        })
    }
}

/// Represents a SYNC object/message
///
/// When a counter overflow value is configured, the producer sends a one byte counter which starts
/// at 1 and wraps back to 1 after reaching the overflow value. Otherwise the SYNC carries no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncObject {
    /// Counter value, if present
    pub count: Option<u8>,
}

impl SyncObject {
    /// Create a SYNC object with a counter
    pub fn new(count: u8) -> Self {
        Self { count: Some(count) }
    }

    /// Build the SYNC frame on the given COB-ID
    pub fn to_can_message(self, cob_id: CanId) -> CanMessage {
        match self.count {
            Some(count) => CanMessage::new(cob_id, &[count]),
            None => CanMessage::new(cob_id, &[]),
        }
    }
}

/// Return true if `can_id` is an SDO request for `node_id`
pub fn is_std_sdo_request(can_id: CanId, node_id: u8) -> bool {
    matches!(can_id, CanId::Std(id) if id == SDO_REQ_BASE + node_id as u16)
}

/// A CAN frame classified by the standard COB-ID ranges
///
/// Used for bus logging and by the master to route incoming frames. PDOs have no fixed range and
/// are reported as [`CanOpenMessage::Other`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CanOpenMessage {
    /// NMT node control
    NmtCommand(NmtCommand),
    /// SYNC on the default COB-ID
    Sync(SyncObject),
    /// Emergency message
    Emcy {
        /// Sending node
        node: u8,
        /// Decoded payload
        emcy: EmcyMessage,
    },
    /// Heartbeat or node guarding response
    Heartbeat(Heartbeat),
    /// Node guarding request
    NodeGuardRequest {
        /// Guarded node
        node: u8,
    },
    /// Expedited SDO request frame
    SdoRequest {
        /// Server node
        node: u8,
        /// Raw frame payload
        data: [u8; 8],
    },
    /// Expedited SDO response frame
    SdoResponse {
        /// Server node
        node: u8,
        /// Raw frame payload
        data: [u8; 8],
    },
    /// Anything else, e.g. a PDO
    Other(CanMessage),
}

impl From<CanMessage> for CanOpenMessage {
    fn from(msg: CanMessage) -> Self {
        let cob_id = msg.id();
        if cob_id.is_extended() {
            return CanOpenMessage::Other(msg);
        }
        let raw = cob_id.raw() as u16;
        let function = raw & 0x780;
        let node = (raw & 0x7f) as u8;
        if cob_id == NMT_CMD_ID {
            if let Ok(cmd) = NmtCommand::try_from(msg) {
                return CanOpenMessage::NmtCommand(cmd);
            }
        } else if cob_id == SYNC_ID {
            return CanOpenMessage::Sync(SyncObject {
                count: msg.data().first().copied(),
            });
        } else if function == EMCY_BASE && node != 0 {
            if let Ok(emcy) = EmcyMessage::try_from(msg.data()) {
                return CanOpenMessage::Emcy { node, emcy };
            }
        } else if function == HEARTBEAT_BASE {
            if msg.is_rtr() {
                return CanOpenMessage::NodeGuardRequest { node };
            }
            if let Ok(hb) = Heartbeat::try_from(msg) {
                return CanOpenMessage::Heartbeat(hb);
            }
        } else if (function == SDO_REQ_BASE || function == SDO_RESP_BASE) && msg.dlc == 8 {
            if function == SDO_REQ_BASE {
                return CanOpenMessage::SdoRequest {
                    node,
                    data: msg.data,
                };
            }
            return CanOpenMessage::SdoResponse {
                node,
                data: msg.data,
            };
        }
        CanOpenMessage::Other(msg)
    }
}

/// Errors raised while interpreting a received frame
#[derive(Debug, Clone, Copy, PartialEq, Snafu)]
pub enum MessageError {
    /// The message payload is shorter than the message type requires
    #[snafu(display("Message too short"))]
    MessageTooShort,
    /// The message could not be decoded
    #[snafu(display("Malformed message with ID {cob_id:?}"))]
    MalformedMsg {
        /// The offending ID
        cob_id: CanId,
    },
    /// The message ID was not the expected value
    #[snafu(display("Unexpected message ID found: {cob_id:?}, expected: {expected:?}"))]
    UnexpectedId {
        /// The received ID
        cob_id: CanId,
        /// The expected ID
        expected: CanId,
    },
    /// The ID does not belong to a known service
    #[snafu(display("Unrecognized message ID: {cob_id:?}"))]
    UnrecognizedId {
        /// The received ID
        cob_id: CanId,
    },
    /// The NMT command byte is not a valid command specifier
    #[snafu(display("Invalid NMT command: {value}"))]
    InvalidNmtCommand {
        /// The received byte
        value: u8,
    },
    /// The NMT state integer in the message is not a valid NMT state
    #[snafu(display("Invalid NMT state: {value}"))]
    InvalidNmtState {
        /// The received byte
        value: u8,
    },
    /// An SDO server aborted a transfer
    #[snafu(display("SDO abort: {code:?}"))]
    SdoAbort {
        /// Abort code sent by the server
        code: SdoErrorCode,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nmt_command_layout() {
        let msg: CanMessage = NmtCommand {
            cmd: NmtCommandCmd::EnterPreOp,
            node: 5,
        }
        .into();
        assert_eq!(msg.id(), CanId::Std(0));
        assert_eq!(msg.data(), &[128, 5]);

        let parsed = NmtCommand::try_from(msg).unwrap();
        assert_eq!(parsed.cmd, NmtCommandCmd::EnterPreOp);
        assert!(parsed.addresses(5));
        assert!(!parsed.addresses(6));
    }

    #[test]
    fn test_nmt_command_rejects_unknown_specifier() {
        let msg = CanMessage::new(NMT_CMD_ID, &[3, 0]);
        assert_eq!(
            NmtCommand::try_from(msg),
            Err(MessageError::InvalidNmtCommand { value: 3 })
        );
    }

    #[test]
    fn test_heartbeat_layout() {
        let msg: CanMessage = Heartbeat {
            node: 0x12,
            toggle: true,
            state: NmtState::Operational,
        }
        .into();
        assert_eq!(msg.id(), CanId::Std(0x712));
        assert_eq!(msg.data(), &[0x85]);

        let hb = Heartbeat::try_from(msg).unwrap();
        assert_eq!(hb.state, NmtState::Operational);
        assert!(hb.toggle);
    }

    #[test]
    fn test_classification() {
        let sync = CanMessage::new(SYNC_ID, &[3]);
        assert_eq!(
            CanOpenMessage::from(sync),
            CanOpenMessage::Sync(SyncObject::new(3))
        );

        let guard = CanMessage::new_rtr(CanId::Std(0x705));
        assert_eq!(
            CanOpenMessage::from(guard),
            CanOpenMessage::NodeGuardRequest { node: 5 }
        );

        let pdo = CanMessage::new(CanId::Std(0x185), &[1, 2]);
        assert_eq!(CanOpenMessage::from(pdo), CanOpenMessage::Other(pdo));
    }

    #[test]
    fn test_new_truncates_long_payload() {
        let msg = CanMessage::new(CanId::Std(1), &[0; 12]);
        assert_eq!(msg.dlc, 8);
    }
}
