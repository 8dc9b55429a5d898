//! CiA402 drive profile for motocan devices
//!
//! This crate implements the device control state machine of the CiA402 profile, and a
//! [`Cia402Axis`] which serves the profile objects of one drive axis as a
//! [`Protocol`](motocan_node::Protocol) extension of a motocan-node device.
//!
//! The axis tracks the control word (0x6040), reports the status word (0x6041), and generates
//! position and velocity set-points for the supported modes of operation. The application reads
//! the demand, and reports feedback, through an [`AxisHandle`].
//!
//! ```
//! use motocan_cia402::{Cia402Axis, State};
//! use motocan_node::common::{DeviceSettings, ObjectDictionary, Value};
//! use motocan_node::DeviceBuilder;
//!
//! let axis = Cia402Axis::new(0);
//! let handle = axis.handle();
//! let mut device = DeviceBuilder::new(ObjectDictionary::default(), DeviceSettings::new(2))
//!     .protocol(axis)
//!     .build(|_| Ok(()))
//!     .unwrap();
//!
//! // Shutdown
//! device.write_value((0x6040, 0), Value::UInt16(0x06));
//! assert_eq!(handle.state(), State::ReadyToSwitchOn);
//! ```
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

mod axis;
pub mod bits;
pub mod objects;
pub mod operating_mode;
pub mod option_code;
pub mod scaling;
pub mod state;
pub mod state_machine;
pub mod trajectory;

pub use axis::{AxisHandle, Cia402Axis, DEFAULT_MODES, MAX_AXES};
pub use operating_mode::OperatingMode;
pub use option_code::OptionCode;
pub use scaling::{Polarity, ScalingFactor};
pub use state::{CommandName, State};
pub use state_machine::StateMachine;
pub use trajectory::Trajectory;
