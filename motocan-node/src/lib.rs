//! A library to implement a CANopen device in Rust
//!
//! Motocan-node implements the device side of a CANopen link. It is no_std
//! compatible (it needs an allocator), so it can run on a microcontroller, but
//! it runs just as well on linux. It provides the following features:
//!
//! * A typed *handler map*, which serves every object in the object dictionary
//!   from a read or write callback. Each callback is checked against its
//!   dictionary entry when it is registered, and the map refuses to build if
//!   any object is left without one.
//! * An expedited *SDO* server, allowing a remote client to read and write
//!   objects of up to 4 bytes.
//! * Transmit and receive *PDOs*, configurable over SDO through the standard
//!   communication and mapping parameter objects.
//! * *NMT* state handling, heartbeat production and consumption, node
//!   guarding, SYNC monitoring and *EMCY* error reporting.
//! * A [`Protocol`] extension point for device profiles, such as the CiA402
//!   drive profile implemented by `motocan-cia402`.
//!
//! # Getting Started
//!
//! ## Device Configuration
//!
//! A device is described by an [`ObjectDictionary`](common::ObjectDictionary)
//! holding its application objects, and by
//! [`DeviceSettings`](common::DeviceSettings). Both can be built in code, or
//! loaded from a [`DeviceConfig`](common::device_config::DeviceConfig) TOML
//! file when the `std` feature is enabled.
//!
//! The communication objects (0x1000 to 0x1FFF) are added by the device
//! itself, and must not appear in the application dictionary.
//!
//! ## Creating the device
//!
//! Handlers for the application objects are registered in a closure passed to
//! [`CanopenDevice::new`]:
//!
//! ```
//! use std::sync::Arc;
//! use motocan_node::common::{objects::Entry, AtomicCell, DataType, DeviceSettings, ObjectDictionary};
//! use motocan_node::CanopenDevice;
//!
//! let od = ObjectDictionary::new(&[
//!     Entry::ro(0x2000, 0, DataType::UInt16).mappable(),
//!     Entry::rw(0x2001, 0, DataType::UInt32),
//! ]);
//! let setpoint = Arc::new(AtomicCell::new(0u32));
//!
//! let device = CanopenDevice::new(od, DeviceSettings::new(5), |builder| {
//!     builder.set_read_handler((0x2000, 0), || 1234u16)?;
//!     builder.bind((0x2001, 0), setpoint.clone())?;
//!     Ok(())
//! })
//! .unwrap();
//! assert_eq!(device.node_id(), 5);
//! ```
//!
//! Use [`DeviceBuilder`] instead to add protocol extensions.
//!
//! ## Handling CAN messages
//!
//! The application has to handle sending and receiving CAN messages.
//!
//! Received frames are passed to [`CanopenDevice::process_message`], along
//! with the current time in microseconds and a callback for transmitting any
//! response. When frames are received in an interrupt, they can be stored in a
//! [`FrameMailbox`] and drained from the control loop with
//! [`CanopenDevice::process_mailbox`].
//!
//! [`CanopenDevice::update`] must be called periodically. It sends the boot-up
//! message on its first call, and after that heartbeats, TPDOs and EMCY
//! messages as they become due.
//!
//! ```ignore
//! loop {
//!     let now_us = clock.now_us();
//!     device.process_mailbox(&MAILBOX, now_us, &mut |msg| can.transmit(msg));
//!     device.update(now_us, &mut |msg| can.transmit(msg));
//! }
//! ```
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

mod device;
pub mod handler_map;
mod mailbox;
pub mod pdo;
pub mod protocol;
pub mod sdo_server;
pub mod standard_objects;

pub use critical_section;
pub use motocan_common as common;

pub use device::{
    default_rpdo_cob_id, default_tpdo_cob_id, CanopenDevice, DeviceBuilder, DeviceError,
};
pub use handler_map::{BuildError, HandlerMap, HandlerMapBuilder};
pub use mailbox::FrameMailbox;
pub use protocol::{DeviceEvents, Protocol};
pub use sdo_server::{ObjectAccess, SdoServer};
