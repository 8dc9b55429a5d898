//! Extension point for device profiles
//!
//! A [`Protocol`] contributes its own dictionary objects and handlers to a device, and is driven
//! alongside the device's communication objects. The CiA402 drive profile is implemented as one.
use alloc::vec::Vec;

use motocan_common::{
    emcy::{EmcyError, EmcyMessage},
    messages::{CanMessage, NmtState},
    objects::{Address, Entry},
};

use crate::handler_map::{BuildError, HandlerMapBuilder};

/// A device profile layered on top of a [`CanopenDevice`](crate::CanopenDevice)
pub trait Protocol: Send {
    /// The dictionary objects this protocol adds to the device
    fn object_entries(&self) -> Vec<Entry>;

    /// Register handlers for every object returned by [`Protocol::object_entries`]
    fn register_handlers(&mut self, builder: &mut HandlerMapBuilder) -> Result<(), BuildError>;

    /// Handle a received frame. Only called while the device is operational.
    fn process_message(&mut self, _msg: &CanMessage, _events: &mut DeviceEvents) {}

    /// Periodic processing, called from the device's `update`
    fn update(&mut self, _now_us: u64, _events: &mut DeviceEvents) {}
}

/// Effects requested by a [`Protocol`], applied by the device after the call returns
#[derive(Debug, Clone)]
pub struct DeviceEvents {
    nmt_state: NmtState,
    in_sync_window: bool,
    pub(crate) frames: Vec<CanMessage>,
    pub(crate) changed: Vec<Address>,
    pub(crate) errors: Vec<EmcyMessage>,
}

impl DeviceEvents {
    /// Create an empty event set describing the device's current state
    pub fn new(nmt_state: NmtState, in_sync_window: bool) -> Self {
        Self {
            nmt_state,
            in_sync_window,
            frames: Vec::new(),
            changed: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// The NMT state of the device
    pub fn nmt_state(&self) -> NmtState {
        self.nmt_state
    }

    /// Returns true while the device is inside the SYNC window
    pub fn in_sync_window(&self) -> bool {
        self.in_sync_window
    }

    /// Queue a frame for transmission
    pub fn send(&mut self, msg: CanMessage) {
        self.frames.push(msg);
    }

    /// Report a changed object value, so that TPDOs mapping it are triggered
    pub fn value_changed(&mut self, address: Address) {
        self.changed.push(address);
    }

    /// Latch an EMCY error on the device
    pub fn set_error(&mut self, error: EmcyError, register: u8, manufacturer: [u8; 5]) {
        self.errors
            .push(EmcyMessage::new(error, register, manufacturer));
    }

    /// The frames queued so far
    pub fn frames(&self) -> &[CanMessage] {
        &self.frames
    }

    /// The changed objects reported so far
    pub fn changed(&self) -> &[Address] {
        &self.changed
    }

    /// The errors reported so far
    pub fn errors(&self) -> &[EmcyMessage] {
        &self.errors
    }
}
