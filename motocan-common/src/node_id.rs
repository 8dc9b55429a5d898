//! Node ID type

use snafu::Snafu;

/// A configured CANopen node ID, in the range 1..=127
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u8);

/// Error returned when creating a [`NodeId`] out of range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(display("Invalid node ID {value}, must be 1..=127"))]
pub struct InvalidNodeIdError {
    /// The rejected value
    pub value: u8,
}

impl NodeId {
    /// Create a node ID, checking the range
    pub const fn new(value: u8) -> Result<Self, InvalidNodeIdError> {
        if value > 0 && value < 128 {
            Ok(NodeId(value))
        } else {
            Err(InvalidNodeIdError { value })
        }
    }

    /// Get the raw ID
    pub const fn raw(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidNodeIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        NodeId::new(value)
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.raw()
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
