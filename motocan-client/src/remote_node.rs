//! Master-side mirror of a remote node
use motocan_common::{
    messages::{CanId, CanMessage},
    objects::{Address, ObjectDictionary},
    pdo::{PdoCobId, PdoMapping},
    sdo::SdoErrorCode,
    value::Value,
};
use motocan_node::{
    handler_map::{BuildError, HandlerMap, HandlerMapBuilder},
    pdo::{ReceivePdo, TransmitPdo},
};

/// Number of PDOs mirrored in each direction
pub const MIRROR_PDOS: usize = 4;

/// The identifier of the master's receive mirror `i` of `node`, matching the node's default TPDO
pub fn rpdo_can_id(node: u8, i: usize) -> CanId {
    CanId::std(0x180 + 0x100 * (i % MIRROR_PDOS) as u16 + node as u16)
}

/// The identifier of the master's transmit mirror `i` of `node`, matching the node's default RPDO
pub fn tpdo_can_id(node: u8, i: usize) -> CanId {
    CanId::std(0x200 + 0x100 * (i % MIRROR_PDOS) as u16 + node as u16)
}

fn invalid_word(id: CanId) -> u32 {
    PdoCobId {
        can_id: id.raw(),
        valid: false,
        rtr_allowed: true,
        extended: id.is_extended(),
    }
    .encode()
}

/// The master's view of one remote node
///
/// A remote node holds handlers for the node's dictionary as seen from the other side of the bus:
/// objects the node produces are written into the mirror, and objects the node consumes are read
/// from it. The dictionary is therefore the node's dictionary with read and write access swapped.
///
/// Receive mirrors decode the node's TPDOs into writes, and transmit mirrors assemble frames for
/// the node's RPDOs. All mirrors start inactive.
#[derive(Debug)]
pub struct RemoteNode {
    node: u8,
    handlers: HandlerMap,
    rpdos: [ReceivePdo; MIRROR_PDOS],
    tpdos: [TransmitPdo; MIRROR_PDOS],
}

impl RemoteNode {
    /// Create the mirror of `node`, whose dictionary is `od`
    ///
    /// `register` installs handlers on a builder for the inverted dictionary. Every object must
    /// be served.
    pub fn new(
        node: u8,
        od: &ObjectDictionary,
        register: impl FnOnce(&mut HandlerMapBuilder) -> Result<(), BuildError>,
    ) -> Result<Self, BuildError> {
        let mut builder = HandlerMapBuilder::new(od.inverted());
        register(&mut builder)?;
        let handlers = builder.build()?;
        Ok(Self {
            node,
            handlers,
            rpdos: core::array::from_fn(|i| ReceivePdo::new(invalid_word(rpdo_can_id(node, i)))),
            tpdos: core::array::from_fn(|i| TransmitPdo::new(invalid_word(tpdo_can_id(node, i)))),
        })
    }

    /// The node id
    pub fn node_id(&self) -> u8 {
        self.node
    }

    /// The inverted dictionary served by the mirror
    pub fn od(&self) -> &ObjectDictionary {
        self.handlers.od()
    }

    /// Read a value the master provides to the node
    pub fn read(&mut self, address: impl Into<Address>) -> Result<Value, SdoErrorCode> {
        self.handlers.read(address.into())
    }

    /// Store a value received from the node
    pub fn write(&mut self, address: impl Into<Address>, value: Value) -> SdoErrorCode {
        self.handlers.write_value(address.into(), value)
    }

    /// Decode bytes for `address` as a write would
    pub fn to_value(&self, address: impl Into<Address>, data: &[u8], size: Option<usize>) -> Option<Value> {
        self.handlers.to_value(address.into(), data, size)
    }

    /// Mark every transmit mirror mapping `address` for sending
    pub fn set_value_changed(&self, address: impl Into<Address>) {
        let address = address.into();
        for pdo in self.tpdos.iter().filter(|p| p.is_active() && p.maps(address)) {
            pdo.mark_updated();
        }
    }

    /// Configure and activate receive mirror `i`
    ///
    /// The mappings must match those of the node's TPDO `i`.
    pub fn set_rpdo(&self, i: usize, transmit_mode: u8, mappings: &[PdoMapping]) -> SdoErrorCode {
        match self.rpdos.get(i) {
            Some(pdo) => pdo.configure(self.od(), rpdo_can_id(self.node, i), transmit_mode, mappings),
            None => SdoErrorCode::ObjectDoesNotExist,
        }
    }

    /// Configure and activate transmit mirror `i`
    ///
    /// The mappings must match those of the node's RPDO `i`.
    pub fn set_tpdo(&self, i: usize, transmit_mode: u8, mappings: &[PdoMapping]) -> SdoErrorCode {
        match self.tpdos.get(i) {
            Some(pdo) => pdo.configure(self.od(), tpdo_can_id(self.node, i), transmit_mode, mappings),
            None => SdoErrorCode::ObjectDoesNotExist,
        }
    }

    /// Activate or deactivate receive mirror `i`
    pub fn set_rpdo_active(&self, i: usize, active: bool) -> SdoErrorCode {
        match self.rpdos.get(i) {
            Some(pdo) => pdo.set_active(self.od(), active),
            None => SdoErrorCode::ObjectDoesNotExist,
        }
    }

    /// Activate or deactivate transmit mirror `i`
    pub fn set_tpdo_active(&self, i: usize, active: bool) -> SdoErrorCode {
        match self.tpdos.get(i) {
            Some(pdo) => pdo.set_active(self.od(), active),
            None => SdoErrorCode::ObjectDoesNotExist,
        }
    }

    /// Addresses mapped by the active receive mirrors
    pub fn active_rpdo_addresses(&self) -> Vec<Address> {
        collect_addresses(self.rpdos.iter().map(|p| &**p))
    }

    /// Addresses mapped by the active transmit mirrors
    pub fn active_tpdo_addresses(&self) -> Vec<Address> {
        collect_addresses(self.tpdos.iter().map(|p| &**p))
    }

    /// Decode a PDO frame from the node into the mirror
    ///
    /// Returns true if the frame matched a receive mirror.
    pub fn process_message(&mut self, msg: &CanMessage) -> bool {
        let handlers = &mut self.handlers;
        let mut matched = false;
        for pdo in &self.rpdos {
            matched |= pdo.process_message(msg, &mut |address, value| {
                handlers.write_value(address, value)
            });
        }
        matched
    }

    /// Note a SYNC sent by the master
    pub fn sync(&self) {
        for pdo in &self.tpdos {
            pdo.sync();
        }
    }

    /// Send the transmit mirrors which are due, in mirror order
    pub fn update(&mut self, in_sync_window: bool, now_us: u64, send: &mut dyn FnMut(CanMessage)) {
        let handlers = &mut self.handlers;
        for pdo in &self.tpdos {
            if let Some(msg) =
                pdo.next_message(in_sync_window, now_us, &mut |address| handlers.read(address))
            {
                send(msg);
            }
        }
    }
}

fn collect_addresses<'a>(
    pdos: impl Iterator<Item = &'a motocan_node::pdo::PdoObject>,
) -> Vec<Address> {
    let mut addresses: Vec<Address> = pdos
        .filter(|p| p.is_active())
        .flat_map(|p| p.mappings().map(|(m, _)| m.address))
        .collect();
    addresses.sort();
    addresses.dedup();
    addresses
}
