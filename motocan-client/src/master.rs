//! A bus master managing a set of remote nodes
use std::{collections::HashMap, path::Path};

use log::{debug, info, warn};
use motocan_common::{
    constants::object_ids::{
        RPDO_COMM_BASE, RPDO_MAPPING_BASE, TPDO_COMM_BASE, TPDO_MAPPING_BASE,
    },
    emcy::EmcyMessage,
    messages::{
        CanId, CanMessage, CanOpenMessage, NmtCommand, NmtCommandCmd, NmtState, SyncObject,
    },
    objects::{Address, ObjectDictionary},
    pdo::{PdoCobId, PdoMapping, MAX_MAPPINGS},
    sdo::SdoErrorCode,
    traits::CanReceiver,
    value::Value,
};
use motocan_node::{
    default_rpdo_cob_id, default_tpdo_cob_id,
    handler_map::{BuildError, HandlerMapBuilder},
};
use parking_lot::Mutex;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::{
    node_config::{read_file, ConfigError, NodeConfig, PdoConfig, TomlDeserializationSnafu},
    remote_node::{rpdo_can_id, tpdo_can_id, RemoteNode, MIRROR_PDOS},
    sdo_client::{CompletionCallback, SdoClient, SdoClientConfig, UploadTarget, ValueCallback},
};

/// Error returned by master operations
#[derive(Debug, Snafu)]
pub enum MasterError {
    /// No node is registered with the id
    #[snafu(display("Node {node} is not registered"))]
    UnknownNode {
        /// The node id
        node: u8,
    },
    /// A node is already registered with the id
    #[snafu(display("Node {node} is already registered"))]
    AlreadyRegistered {
        /// The node id
        node: u8,
    },
    /// Node ids are 1 to 127
    #[snafu(display("Invalid node id {node}"))]
    InvalidNodeId {
        /// The node id
        node: u8,
    },
    /// There is no PDO with this number
    #[snafu(display("Invalid PDO number {n}"))]
    InvalidPdo {
        /// The PDO number
        n: usize,
    },
    /// A PDO configuration has more mappings than fit in a PDO
    #[snafu(display("PDO {n} has {count} mappings"))]
    TooManyMappings {
        /// The PDO number
        n: usize,
        /// The number of mappings given
        count: usize,
    },
    /// The node mirror could not be built
    #[snafu(display("Failed to build mirror of node {node}: {source}"))]
    Build {
        /// The node id
        node: u8,
        /// The underlying error
        source: BuildError,
    },
}

/// Master timing configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MasterConfig {
    /// SYNC period in microseconds. 0 disables the SYNC producer.
    pub sync_period_us: u64,
    /// Length of the synchronous window after each SYNC, in microseconds. 0 leaves it unbounded.
    pub sync_window_us: u64,
    /// Identifier of the SYNC frame
    pub sync_cob_id: u16,
    /// SYNC counter overflow value. With 0 the SYNC carries no counter.
    pub sync_counter_overflow: u8,
    /// SDO client configuration
    pub sdo: SdoClientConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            sync_period_us: 50_000,
            sync_window_us: 25_000,
            sync_cob_id: 0x80,
            sync_counter_overflow: 0,
            sdo: SdoClientConfig::default(),
        }
    }
}

impl MasterConfig {
    /// Read a configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<MasterConfig, ConfigError> {
        Self::load_from_str(&read_file(path.as_ref())?)
    }

    /// Read a configuration from a string
    pub fn load_from_str(s: &str) -> Result<MasterConfig, ConfigError> {
        toml::from_str(s).context(TomlDeserializationSnafu)
    }
}

/// What the master has observed of a node on the bus
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeStatus {
    /// The node id
    pub id: u8,
    /// The NMT state in the last heartbeat
    pub state: NmtState,
    /// Time the last heartbeat was received
    pub last_seen_us: u64,
    /// The last emergency message received, if any
    pub last_emcy: Option<EmcyMessage>,
}

#[derive(Debug)]
struct SyncProducer {
    period_us: u64,
    window_us: u64,
    cob_id: CanId,
    overflow: u8,
    counter: u8,
    last_sync_us: Option<u64>,
    in_window: bool,
}

impl SyncProducer {
    fn new(config: &MasterConfig) -> Self {
        Self {
            period_us: config.sync_period_us,
            window_us: config.sync_window_us,
            cob_id: CanId::std(config.sync_cob_id),
            overflow: config.sync_counter_overflow,
            counter: 0,
            last_sync_us: None,
            in_window: false,
        }
    }

    /// Returns the SYNC frame to send now, if one is due
    fn poll(&mut self, now_us: u64) -> Option<CanMessage> {
        let due = self.period_us != 0
            && self
                .last_sync_us
                .map_or(true, |t| now_us.saturating_sub(t) >= self.period_us);
        let frame = if due {
            self.last_sync_us = Some(now_us);
            let sync = if self.overflow > 1 {
                self.counter = self.counter % self.overflow + 1;
                SyncObject::new(self.counter)
            } else {
                SyncObject { count: None }
            };
            Some(sync.to_can_message(self.cob_id))
        } else {
            None
        };
        self.in_window = self.last_sync_us.is_some_and(|t| {
            self.window_us == 0 || now_us.saturating_sub(t) <= self.window_us
        });
        frame
    }
}

/// Routes SDO uploads into the node mirrors
struct Mirrors<'a>(&'a Mutex<HashMap<u8, RemoteNode>>);

impl UploadTarget for Mirrors<'_> {
    fn to_value(
        &self,
        node: u8,
        address: Address,
        data: &[u8],
        size: Option<usize>,
    ) -> Option<Value> {
        self.0.lock().get(&node)?.to_value(address, data, size)
    }

    fn store(&mut self, node: u8, address: Address, value: Value) {
        if let Some(remote) = self.0.lock().get_mut(&node) {
            let result = remote.write(address, value);
            if !result.is_ok() {
                debug!("Storing {} of node {} failed: {:?}", address, node, result);
            }
        }
    }
}

/// A CANopen bus master
///
/// The master keeps a [`RemoteNode`] mirror for each registered node, produces SYNC, tracks node
/// heartbeats and emergencies, and accesses node objects over SDO.
///
/// All methods take `&self`, so that a master shared through an `Arc` can be driven by a receive
/// thread calling [`CanopenMaster::process_message`] and a control thread calling
/// [`CanopenMaster::update`].
#[derive(Debug)]
pub struct CanopenMaster {
    nodes: Mutex<HashMap<u8, RemoteNode>>,
    status: Mutex<HashMap<u8, NodeStatus>>,
    sync: Mutex<SyncProducer>,
    sdo: SdoClient,
}

impl Default for CanopenMaster {
    fn default() -> Self {
        Self::new(MasterConfig::default())
    }
}

impl CanopenMaster {
    /// Create a master with no registered nodes
    pub fn new(config: MasterConfig) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            status: Mutex::new(HashMap::new()),
            sync: Mutex::new(SyncProducer::new(&config)),
            sdo: SdoClient::new(config.sdo),
        }
    }

    /// Register node `node` with dictionary `od`
    ///
    /// `register` installs the mirror handlers; see [`RemoteNode::new`].
    pub fn add_device(
        &self,
        node: u8,
        od: &ObjectDictionary,
        register: impl FnOnce(&mut HandlerMapBuilder) -> Result<(), BuildError>,
    ) -> Result<(), MasterError> {
        if !(1..=127).contains(&node) {
            return InvalidNodeIdSnafu { node }.fail();
        }
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(&node) {
            return AlreadyRegisteredSnafu { node }.fail();
        }
        let remote = RemoteNode::new(node, od, register).context(BuildSnafu { node })?;
        nodes.insert(node, remote);
        info!("Registered node {}", node);
        Ok(())
    }

    /// Unregister a node, returning its mirror
    pub fn remove_device(&self, node: u8) -> Result<RemoteNode, MasterError> {
        self.nodes
            .lock()
            .remove(&node)
            .ok_or(MasterError::UnknownNode { node })
    }

    /// Run `f` on the mirror of `node`
    pub fn with_device<R>(
        &self,
        node: u8,
        f: impl FnOnce(&mut RemoteNode) -> R,
    ) -> Result<R, MasterError> {
        let mut nodes = self.nodes.lock();
        let remote = nodes.get_mut(&node).ok_or(MasterError::UnknownNode { node })?;
        Ok(f(remote))
    }

    /// The ids of the registered nodes, in ascending order
    pub fn devices(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.nodes.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    fn with_known<R>(&self, node: u8, unknown: R, f: impl FnOnce(&mut RemoteNode) -> R) -> R {
        self.with_device(node, f).unwrap_or(unknown)
    }

    /// Read a value the master provides to `node`
    pub fn read(&self, node: u8, address: impl Into<Address>) -> Result<Value, SdoErrorCode> {
        let address = address.into();
        self.with_known(node, Err(SdoErrorCode::GeneralError), |r| r.read(address))
    }

    /// Store a value in the mirror of `node`
    pub fn write(&self, node: u8, address: impl Into<Address>, value: Value) -> SdoErrorCode {
        let address = address.into();
        self.with_known(node, SdoErrorCode::GeneralError, |r| r.write(address, value))
    }

    /// Decode bytes for an object of `node`
    pub fn to_value(
        &self,
        node: u8,
        address: impl Into<Address>,
        data: &[u8],
        size: Option<usize>,
    ) -> Option<Value> {
        let address = address.into();
        self.with_known(node, None, |r| r.to_value(address, data, size))
    }

    /// Mark the transmit mirrors of `node` mapping `address` for sending
    pub fn set_value_changed(&self, node: u8, address: impl Into<Address>) {
        let address = address.into();
        self.with_known(node, (), |r| r.set_value_changed(address));
    }

    /// Configure receive mirror `i` of `node`
    pub fn set_rpdo(&self, node: u8, i: usize, mode: u8, mappings: &[PdoMapping]) -> SdoErrorCode {
        self.with_known(node, SdoErrorCode::GeneralError, |r| r.set_rpdo(i, mode, mappings))
    }

    /// Configure transmit mirror `i` of `node`
    pub fn set_tpdo(&self, node: u8, i: usize, mode: u8, mappings: &[PdoMapping]) -> SdoErrorCode {
        self.with_known(node, SdoErrorCode::GeneralError, |r| r.set_tpdo(i, mode, mappings))
    }

    /// Activate or deactivate receive mirror `i` of `node`
    pub fn set_rpdo_active(&self, node: u8, i: usize, active: bool) -> SdoErrorCode {
        self.with_known(node, SdoErrorCode::GeneralError, |r| r.set_rpdo_active(i, active))
    }

    /// Activate or deactivate transmit mirror `i` of `node`
    pub fn set_tpdo_active(&self, node: u8, i: usize, active: bool) -> SdoErrorCode {
        self.with_known(node, SdoErrorCode::GeneralError, |r| r.set_tpdo_active(i, active))
    }

    /// Addresses mapped by the active receive mirrors of `node`
    pub fn active_rpdo_addresses(&self, node: u8) -> Vec<Address> {
        self.with_known(node, Vec::new(), |r| r.active_rpdo_addresses())
    }

    /// Addresses mapped by the active transmit mirrors of `node`
    pub fn active_tpdo_addresses(&self, node: u8) -> Vec<Address> {
        self.with_known(node, Vec::new(), |r| r.active_tpdo_addresses())
    }

    /// The SDO client
    pub fn sdo_client(&self) -> &SdoClient {
        &self.sdo
    }

    /// Set the callback receiving SDO write completions, aborts and timeouts
    pub fn set_completion_callback(&self, callback: CompletionCallback) {
        self.sdo.set_completion_callback(callback);
    }

    /// Read an object of `node` over SDO
    ///
    /// The value is passed to `on_value` if given, otherwise it is stored in the mirror. Returns
    /// `GeneralError` if the node is not registered.
    pub fn sdo_read(
        &self,
        node: u8,
        address: impl Into<Address>,
        on_value: Option<ValueCallback>,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> SdoErrorCode {
        if !self.nodes.lock().contains_key(&node) {
            return SdoErrorCode::GeneralError;
        }
        self.sdo.request_read(node, address.into(), on_value, now_us, send);
        SdoErrorCode::NoError
    }

    /// Write an object of `node` over SDO
    pub fn sdo_write(
        &self,
        node: u8,
        address: impl Into<Address>,
        value: Value,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> SdoErrorCode {
        if !self.nodes.lock().contains_key(&node) {
            return SdoErrorCode::GeneralError;
        }
        self.sdo.request_write(node, address.into(), &value, now_us, send)
    }

    fn check_pdo(&self, node: u8, n: usize, config: &PdoConfig) -> Result<(), MasterError> {
        if !self.nodes.lock().contains_key(&node) {
            return UnknownNodeSnafu { node }.fail();
        }
        if n >= 0x200 {
            return InvalidPdoSnafu { n }.fail();
        }
        if config.mappings.len() > MAX_MAPPINGS {
            return TooManyMappingsSnafu {
                n,
                count: config.mappings.len(),
            }
            .fail();
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn configure_remote_pdo(
        &self,
        node: u8,
        comm: u16,
        mapping: u16,
        default_cob: u32,
        config: &PdoConfig,
        inhibit: bool,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) {
        let cob = config
            .cob
            .map_or(PdoCobId::decode(default_cob).can_id, |c| c & 0x1FFF_FFFF);
        let extended = cob > 0x7FF;
        let word = |valid| {
            PdoCobId {
                can_id: cob,
                valid,
                rtr_allowed: true,
                extended,
            }
            .encode()
        };
        let mut write = |address: Address, value: Value| {
            self.sdo.request_write(node, address, &value, now_us, &mut *send);
        };
        write(Address::new(comm, 1), Value::UInt32(word(false)));
        write(Address::new(comm, 2), Value::UInt8(config.transmission_type));
        if inhibit {
            write(Address::new(comm, 3), Value::UInt16(config.inhibit_time));
        }
        write(Address::new(mapping, 0), Value::UInt8(0));
        let mappings = config.pdo_mappings();
        for (i, m) in mappings.iter().enumerate() {
            write(Address::new(mapping, i as u8 + 1), Value::UInt32(m.encode()));
        }
        write(Address::new(mapping, 0), Value::UInt8(mappings.len() as u8));
        if config.enabled {
            write(Address::new(comm, 1), Value::UInt32(word(true)));
        }
    }

    /// Reconfigure mirror `n` of `node` to match a remote PDO configuration
    ///
    /// `receive` selects the receive mirror, which pairs with the node's TPDO `n`. Mirrors listen
    /// and send on fixed identifiers, so a remote PDO moved to another identifier leaves its
    /// mirror inactive.
    fn follow_remote_pdo(&self, node: u8, n: usize, config: &PdoConfig, receive: bool) {
        if n >= MIRROR_PDOS {
            return;
        }
        let mirror_id = if receive {
            rpdo_can_id(node, n)
        } else {
            tpdo_can_id(node, n)
        };
        let on_mirror_id = config
            .cob
            .map_or(true, |c| c & 0x1FFF_FFFF == mirror_id.raw());
        let mappings = config.pdo_mappings();
        self.with_known(node, (), |r| {
            let result = if receive {
                // A receiving PDO has no remote request modes
                let mode = match config.transmission_type {
                    0xFC | 0xFD => 0xFE,
                    mode => mode,
                };
                r.set_rpdo_active(n, false);
                r.set_rpdo(n, mode, &mappings)
            } else {
                r.set_tpdo_active(n, false);
                r.set_tpdo(n, config.transmission_type, &mappings)
            };
            if !result.is_ok() {
                warn!(
                    "Mirror PDO {} of node {} left inactive: 0x{:X}",
                    n,
                    node,
                    u32::from(result)
                );
            } else if !config.enabled || !on_mirror_id {
                if receive {
                    r.set_rpdo_active(n, false);
                } else {
                    r.set_tpdo_active(n, false);
                }
            }
        });
    }

    /// Configure TPDO `n` of `node` over SDO
    ///
    /// The PDO is made invalid, its parameters and mappings written, and it is made valid again if
    /// the configuration enables it. Failures are reported through the completion callback. The
    /// receive mirror `n` is reconfigured with the same mappings straight away.
    pub fn configure_remote_tpdo(
        &self,
        node: u8,
        n: usize,
        config: &PdoConfig,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), MasterError> {
        self.check_pdo(node, n, config)?;
        info!("Configuring TPDO {} of node {}", n, node);
        self.configure_remote_pdo(
            node,
            TPDO_COMM_BASE + n as u16,
            TPDO_MAPPING_BASE + n as u16,
            default_tpdo_cob_id(node, n as u8),
            config,
            true,
            now_us,
            send,
        );
        self.follow_remote_pdo(node, n, config, true);
        Ok(())
    }

    /// Configure RPDO `n` of `node` over SDO
    ///
    /// See [`CanopenMaster::configure_remote_tpdo`].
    pub fn configure_remote_rpdo(
        &self,
        node: u8,
        n: usize,
        config: &PdoConfig,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), MasterError> {
        self.check_pdo(node, n, config)?;
        info!("Configuring RPDO {} of node {}", n, node);
        self.configure_remote_pdo(
            node,
            RPDO_COMM_BASE + n as u16,
            RPDO_MAPPING_BASE + n as u16,
            default_rpdo_cob_id(node, n as u8),
            config,
            false,
            now_us,
            send,
        );
        self.follow_remote_pdo(node, n, config, false);
        Ok(())
    }

    /// Configure every PDO listed in `config` on `node`, in PDO number order
    pub fn configure_node(
        &self,
        node: u8,
        config: &NodeConfig,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), MasterError> {
        let mut tpdos: Vec<_> = config.tpdo.iter().collect();
        tpdos.sort_by_key(|(n, _)| **n);
        for (n, pdo) in tpdos {
            self.configure_remote_tpdo(node, *n, pdo, now_us, send)?;
        }
        let mut rpdos: Vec<_> = config.rpdo.iter().collect();
        rpdos.sort_by_key(|(n, _)| **n);
        for (n, pdo) in rpdos {
            self.configure_remote_rpdo(node, *n, pdo, now_us, send)?;
        }
        Ok(())
    }

    /// Send an NMT command to `node`, or to all nodes if `node` is 0
    pub fn send_nmt(&self, cmd: NmtCommandCmd, node: u8, send: &mut dyn FnMut(CanMessage)) {
        info!("Sending NMT {:?} to node {}", cmd, node);
        send(NmtCommand { cmd, node }.into());
    }

    /// The last heartbeat and emergency seen from `node`
    pub fn node_status(&self, node: u8) -> Option<NodeStatus> {
        self.status.lock().get(&node).copied()
    }

    /// The NMT state of `node` in its last heartbeat
    pub fn node_state(&self, node: u8) -> Option<NmtState> {
        self.node_status(node).map(|s| s.state)
    }

    /// All nodes seen on the bus, in ascending id order
    pub fn nodes_seen(&self) -> Vec<NodeStatus> {
        let mut nodes: Vec<NodeStatus> = self.status.lock().values().copied().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    /// Returns true if the last update fell within the synchronous window
    pub fn is_in_sync_window(&self) -> bool {
        self.sync.lock().in_window
    }

    /// Handle a received frame
    ///
    /// Returns true if the frame was consumed by the master.
    pub fn process_message(&self, msg: &CanMessage, now_us: u64) -> bool {
        match CanOpenMessage::from(*msg) {
            CanOpenMessage::Heartbeat(hb) => {
                let mut status = self.status.lock();
                let entry = status.entry(hb.node).or_insert_with(|| {
                    info!("Found node {}", hb.node);
                    NodeStatus {
                        id: hb.node,
                        state: hb.state,
                        last_seen_us: now_us,
                        last_emcy: None,
                    }
                });
                if entry.state != hb.state {
                    info!("Node {} is now {:?}", hb.node, hb.state);
                }
                entry.state = hb.state;
                entry.last_seen_us = now_us;
                true
            }
            CanOpenMessage::Emcy { node, emcy } => {
                warn!(
                    "EMCY from node {}: code 0x{:04X} register 0x{:02X}",
                    node, emcy.code, emcy.register
                );
                if let Some(status) = self.status.lock().get_mut(&node) {
                    status.last_emcy = Some(emcy);
                }
                true
            }
            CanOpenMessage::SdoResponse { .. } => {
                self.sdo.process_message(msg, &mut Mirrors(&self.nodes))
            }
            _ => self
                .nodes
                .lock()
                .values_mut()
                .fold(false, |matched, r| r.process_message(msg) || matched),
        }
    }

    /// Drain and handle every frame available from `receiver`
    pub fn process_rx<R: CanReceiver>(&self, receiver: &mut R, now_us: u64) {
        while let Some(msg) = receiver.try_recv() {
            self.process_message(&msg, now_us);
        }
    }

    /// Send SYNC and due transmit mirrors, and retry SDO requests
    pub fn update(&self, now_us: u64, send: &mut dyn FnMut(CanMessage)) {
        let (sync, in_window) = {
            let mut producer = self.sync.lock();
            let sync = producer.poll(now_us);
            (sync, producer.in_window)
        };
        {
            let mut nodes = self.nodes.lock();
            let mut ids: Vec<u8> = nodes.keys().copied().collect();
            ids.sort();
            if let Some(frame) = sync {
                send(frame);
                for remote in nodes.values() {
                    remote.sync();
                }
            }
            for id in ids {
                if let Some(remote) = nodes.get_mut(&id) {
                    remote.update(in_window, now_us, send);
                }
            }
        }
        self.sdo.update(now_us, send);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motocan_common::{
        messages::Heartbeat,
        objects::{AccessType, DataType, Entry},
        sdo::{AbortCode, SdoRequest, SdoResponse},
        AtomicCell,
    };
    use std::sync::Arc;

    fn od() -> ObjectDictionary {
        ObjectDictionary::new(&[
            Entry::ro(0x2001, 0, DataType::UInt16).mappable(),
            Entry::rw(0x2002, 0, DataType::UInt32),
            Entry::new(0x2003, 0, DataType::Int32, AccessType::ReadWriteWritePdo).mappable(),
        ])
    }

    struct Cells {
        status: Arc<AtomicCell<u16>>,
        param: Arc<AtomicCell<u32>>,
        setpoint: Arc<AtomicCell<i32>>,
    }

    fn add(master: &CanopenMaster, node: u8) -> Cells {
        let cells = Cells {
            status: Arc::new(AtomicCell::new(0)),
            param: Arc::new(AtomicCell::new(0)),
            setpoint: Arc::new(AtomicCell::new(0)),
        };
        let (a, b, c) = (cells.status.clone(), cells.param.clone(), cells.setpoint.clone());
        master
            .add_device(node, &od(), move |builder| {
                builder.bind((0x2001, 0), a)?;
                builder.bind((0x2002, 0), b)?;
                builder.bind((0x2003, 0), c)?;
                Ok(())
            })
            .unwrap();
        cells
    }

    fn no_sync() -> MasterConfig {
        MasterConfig {
            sync_period_us: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_registry() {
        let master = CanopenMaster::new(no_sync());
        add(&master, 4);
        add(&master, 2);
        assert_eq!(master.devices(), vec![2, 4]);
        assert!(matches!(
            master.add_device(4, &od(), |_| Ok(())),
            Err(MasterError::AlreadyRegistered { node: 4 })
        ));
        assert!(matches!(
            master.add_device(0, &od(), |_| Ok(())),
            Err(MasterError::InvalidNodeId { node: 0 })
        ));
        assert!(matches!(
            master.add_device(5, &od(), |_| Ok(())),
            Err(MasterError::Build { node: 5, .. })
        ));
        assert_eq!(master.with_device(4, |r| r.node_id()).unwrap(), 4);
        assert!(master.remove_device(4).is_ok());
        assert!(matches!(
            master.remove_device(4),
            Err(MasterError::UnknownNode { node: 4 })
        ));
    }

    #[test]
    fn test_unknown_node_access() {
        let master = CanopenMaster::new(no_sync());
        assert_eq!(master.read(3, (0x2002, 0)), Err(SdoErrorCode::GeneralError));
        assert_eq!(
            master.write(3, (0x2002, 0), Value::UInt32(1)),
            SdoErrorCode::GeneralError
        );
        assert_eq!(master.to_value(3, (0x2002, 0), &[0; 4], None), None);
        assert_eq!(
            master.sdo_read(3, (0x2002, 0), None, 0, &mut |_| {}),
            SdoErrorCode::GeneralError
        );
        assert_eq!(
            master.set_tpdo(3, 0, 0xFE, &[]),
            SdoErrorCode::GeneralError
        );
    }

    #[test]
    fn test_local_access() {
        let master = CanopenMaster::new(no_sync());
        let cells = add(&master, 4);
        cells.param.store(77);
        assert_eq!(master.read(4, (0x2002, 0)), Ok(Value::UInt32(77)));
        assert_eq!(master.write(4, (0x2001, 0), Value::UInt16(9)), SdoErrorCode::NoError);
        assert_eq!(cells.status.load(), 9);
        assert_eq!(
            master.to_value(4, (0x2001, 0), &[1, 2], Some(2)),
            Some(Value::UInt16(0x0201))
        );
    }

    #[test]
    fn test_sdo_upload_into_mirror() {
        let master = CanopenMaster::new(no_sync());
        let cells = add(&master, 4);
        let mut sent = Vec::new();
        assert_eq!(
            master.sdo_read(4, (0x2001, 0), None, 0, &mut |m| sent.push(m)),
            SdoErrorCode::NoError
        );
        assert_eq!(
            SdoRequest::try_from(&sent[0]).unwrap(),
            SdoRequest::upload(Address::new(0x2001, 0))
        );
        let response = SdoResponse::expedited_upload(Address::new(0x2001, 0), &[0x22, 0x11])
            .to_can_message(CanId::std(0x584));
        assert!(master.process_message(&response, 100));
        assert_eq!(cells.status.load(), 0x1122);
        assert!(!master.sdo_client().waiting());
    }

    #[test]
    fn test_sdo_write_completion() {
        let master = CanopenMaster::new(no_sync());
        add(&master, 4);
        let done = Arc::new(Mutex::new(Vec::new()));
        let d = done.clone();
        master.set_completion_callback(Box::new(move |n, a, c| d.lock().push((n, a, c))));
        master.sdo_write(4, (0x2002, 0), Value::UInt32(5), 0, &mut |_| {});
        let ack = SdoResponse::download_acknowledge(Address::new(0x2002, 0))
            .to_can_message(CanId::std(0x584));
        assert!(master.process_message(&ack, 10));
        assert_eq!(
            done.lock().as_slice(),
            &[(4, Address::new(0x2002, 0), AbortCode::Standard(SdoErrorCode::NoError))]
        );
    }

    #[test]
    fn test_heartbeat_and_emcy_tracking() {
        let master = CanopenMaster::new(no_sync());
        assert_eq!(master.node_state(6), None);
        let boot: CanMessage = Heartbeat {
            node: 6,
            toggle: false,
            state: NmtState::Bootup,
        }
        .into();
        assert!(master.process_message(&boot, 10));
        assert_eq!(master.node_state(6), Some(NmtState::Bootup));

        let hb: CanMessage = Heartbeat {
            node: 6,
            toggle: false,
            state: NmtState::PreOperational,
        }
        .into();
        master.process_message(&hb, 20);
        let status = master.node_status(6).unwrap();
        assert_eq!(status.state, NmtState::PreOperational);
        assert_eq!(status.last_seen_us, 20);

        let emcy = CanMessage::new(CanId::std(0x86), &[0x30, 0x81, 0x11, 0, 0, 0, 0, 0]);
        assert!(master.process_message(&emcy, 30));
        let status = master.node_status(6).unwrap();
        assert_eq!(status.last_emcy.map(|e| e.code), Some(0x8130));
        assert_eq!(master.nodes_seen().len(), 1);
    }

    #[test]
    fn test_sync_producer() {
        let master = CanopenMaster::new(MasterConfig {
            sync_period_us: 1000,
            sync_window_us: 200,
            sync_counter_overflow: 3,
            ..Default::default()
        });
        let mut sent = Vec::new();
        assert!(!master.is_in_sync_window());
        for t in [0, 100, 300, 1000, 2000, 3000, 4000] {
            master.update(t, &mut |m| sent.push(m));
            if t == 100 {
                assert!(master.is_in_sync_window());
            }
            if t == 300 {
                assert!(!master.is_in_sync_window());
            }
        }
        let counters: Vec<u8> = sent
            .iter()
            .inspect(|m| assert_eq!(m.id(), CanId::std(0x80)))
            .map(|m| m.data()[0])
            .collect();
        assert_eq!(counters, vec![1, 2, 3, 1, 2]);
    }

    #[test]
    fn test_sync_without_counter() {
        let master = CanopenMaster::default();
        let mut sent = Vec::new();
        master.update(0, &mut |m| sent.push(m));
        master.update(25_000, &mut |m| sent.push(m));
        master.update(50_000, &mut |m| sent.push(m));
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.data().is_empty()));
    }

    #[test]
    fn test_synchronous_transmit_mirror() {
        let master = CanopenMaster::new(MasterConfig {
            sync_period_us: 1000,
            sync_window_us: 500,
            ..Default::default()
        });
        let cells = add(&master, 4);
        cells.setpoint.store(-1);
        assert_eq!(
            master.set_tpdo(4, 0, 1, &[PdoMapping::new(0x2003, 0, 32)]),
            SdoErrorCode::NoError
        );
        let mut sent = Vec::new();
        master.update(0, &mut |m| sent.push(m));
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].id(), CanId::std(0x80));
        assert_eq!(sent[1].id(), CanId::std(0x204));
        assert_eq!(sent[1].data(), &[0xFF; 4]);
    }

    #[test]
    fn test_configure_remote_tpdo_sequence() {
        let master = CanopenMaster::new(no_sync());
        add(&master, 4);
        let config = PdoConfig {
            cob: None,
            enabled: true,
            mappings: vec![crate::node_config::MappingConfig {
                index: 0x2001,
                sub: 0,
                size: 16,
            }],
            transmission_type: 1,
            inhibit_time: 5,
        };
        let mut sent = Vec::new();
        master
            .configure_remote_tpdo(4, 0, &config, 0, &mut |m| sent.push(m))
            .unwrap();
        let writes: Vec<(u16, u8, u32)> = sent
            .iter()
            .map(|m| match SdoRequest::try_from(m).unwrap() {
                SdoRequest::Download { address, data, .. } => {
                    (address.index, address.sub, u32::from_le_bytes(data))
                }
                other => panic!("unexpected request {other:?}"),
            })
            .collect();
        assert_eq!(
            writes,
            vec![
                (0x1800, 1, 0x8000_0184),
                (0x1800, 2, 1),
                (0x1800, 3, 5),
                (0x1A00, 0, 0),
                (0x1A00, 1, 0x2001_0010),
                (0x1A00, 0, 1),
                (0x1800, 1, 0x184),
            ]
        );
        assert!(sent.iter().all(|m| m.id() == CanId::std(0x604)));

        assert!(matches!(
            master.configure_remote_rpdo(9, 0, &config, 0, &mut |_| {}),
            Err(MasterError::UnknownNode { node: 9 })
        ));
    }

    #[test]
    fn test_send_nmt() {
        let master = CanopenMaster::default();
        let mut sent = Vec::new();
        master.send_nmt(NmtCommandCmd::Start, 0, &mut |m| sent.push(m));
        assert_eq!(sent[0].id(), CanId::std(0));
        assert_eq!(sent[0].data(), &[1, 0]);
    }

    #[test]
    fn test_config_from_toml() {
        let config = MasterConfig::load_from_str(
            r#"
            sync_period_us = 10000
            sync_counter_overflow = 4
            [sdo]
            timeout_us = 5000
            max_attempts = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.sync_period_us, 10_000);
        assert_eq!(config.sync_window_us, 25_000);
        assert_eq!(config.sync_counter_overflow, 4);
        assert_eq!(config.sdo.max_attempts, Some(2));
    }
}
