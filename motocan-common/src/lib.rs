//! Common functionality shared among the motocan crates.
//!
//! This crate holds everything that both sides of a CANopen link need to agree on: the frame type,
//! the object dictionary model, the typed [`Value`](value::Value) and its wire codec, the SDO and
//! EMCY error code tables, and the bit-packed message layouts (SDO command bytes, NMT, heartbeat,
//! SYNC, EMCY, PDO mapping words).
//!
//! Most users will have no reason to depend on this crate directly, as it is re-exported by both
//! `motocan-node` and `motocan-client`.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

mod atomic_cell;
pub use atomic_cell::AtomicCell;
pub mod constants;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod device_config;
pub mod emcy;
pub mod messages;
pub mod node_id;
pub mod objects;
pub mod pdo;
pub mod sdo;
pub mod settings;
pub mod traits;
pub mod value;

pub use emcy::EmcyError;
pub use messages::{CanId, CanMessage};
pub use node_id::NodeId;
pub use objects::{AccessType, Address, DataType, Entry, ObjectDictionary};
pub use sdo::SdoErrorCode;
pub use settings::DeviceSettings;
pub use value::Value;
