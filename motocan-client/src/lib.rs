//! A library for managing CANopen nodes from a bus master
//!
//! The [`CanopenMaster`] keeps a [`RemoteNode`] mirror of every node it manages. A mirror serves
//! the node's object dictionary from the master's side of the bus: values the node produces are
//! stored into it, from received PDOs or SDO uploads, and values the node consumes are read from
//! it to fill the master's PDOs.
//!
//! Like `motocan-node`, the master does not touch a CAN interface directly. Received frames are
//! passed to [`CanopenMaster::process_message`], and [`CanopenMaster::update`] is called
//! periodically with a sink for outgoing frames.
//!
//! ```
//! use std::sync::Arc;
//! use motocan_client::{CanopenMaster, MasterConfig};
//! use motocan_common::{objects::Entry, AtomicCell, DataType, ObjectDictionary};
//!
//! let od = ObjectDictionary::new(&[Entry::ro(0x2001, 0, DataType::UInt16).mappable()]);
//! let status = Arc::new(AtomicCell::new(0u16));
//!
//! let master = CanopenMaster::new(MasterConfig::default());
//! let cell = status.clone();
//! master
//!     .add_device(5, &od, move |builder| {
//!         builder.bind((0x2001, 0), cell)?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let mut sent = Vec::new();
//! master.update(0, &mut |msg| sent.push(msg));
//! // A SYNC is sent on the first update
//! assert_eq!(sent.len(), 1);
//! ```
#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod master;
pub mod node_config;
mod remote_node;
pub mod sdo_client;

pub use master::{CanopenMaster, MasterConfig, MasterError, NodeStatus};
pub use node_config::{ConfigError, NodeConfig, PdoConfig};
pub use remote_node::{rpdo_can_id, tpdo_can_id, RemoteNode, MIRROR_PDOS};
pub use sdo_client::{SdoClient, SdoClientConfig};

pub use motocan_common as common;
