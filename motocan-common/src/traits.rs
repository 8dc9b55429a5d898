//! Transport traits
//!
//! Adapters to a concrete CAN interface implement these; the stacks themselves only ever hand
//! frames to a sink closure or receive them from the caller.

#[cfg(feature = "std")]
use core::time::Duration;

use snafu::Snafu;

use crate::messages::CanMessage;

/// Error type for CAN send operations containing the failed message
#[derive(Debug, Clone, PartialEq, Eq, Copy, Snafu)]
#[snafu(display("Failed to send CAN message: {msg:?}"))]
pub struct CanSendError {
    /// The frame which was not sent
    pub msg: CanMessage,
}

/// A synchronous CAN sender
pub trait CanSender {
    /// Send a message to the bus
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError>;
}

/// A synchronous CAN receiver
pub trait CanReceiver {
    /// The error type returned by recv
    type Error;

    /// Read a message if one is available, returning None immediately otherwise
    fn try_recv(&mut self) -> Option<CanMessage>;

    /// A blocking receive with timeout
    #[cfg(feature = "std")]
    #[cfg_attr(docsrs, doc(cfg(feature = "std")))]
    fn recv(&mut self, timeout: Duration) -> Result<CanMessage, Self::Error>;
}
