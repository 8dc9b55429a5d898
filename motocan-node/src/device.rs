//! The device orchestrator
//!
//! [`CanopenDevice`] owns everything a node needs on the bus: its handler map, the PDOs, the
//! SDO server, and the NMT, SYNC, heartbeat and EMCY state. Frames are fed in through
//! [`CanopenDevice::process_message`], and [`CanopenDevice::update`] is called periodically to
//! produce outgoing frames.
use alloc::{boxed::Box, sync::Arc, vec::Vec};

use defmt_or_log::{debug, info, warn};
use motocan_common::{
    constants::{EMCY_DISABLE_BIT, ERROR_HISTORY_DEPTH},
    emcy::{EmcyError, EmcyMessage},
    messages::{
        CanId, CanMessage, Heartbeat, NmtCommand, NmtCommandCmd, NmtState, HEARTBEAT_BASE,
        NMT_CMD_ID,
    },
    node_id::{InvalidNodeIdError, NodeId},
    objects::{Address, ObjectDictionary},
    pdo::PdoCobId,
    sdo::SdoErrorCode,
    settings::{DeviceSettings, MAX_PDOS},
    value::Value,
};
use snafu::{ResultExt, Snafu};

use crate::{
    handler_map::{BuildError, HandlerMap, HandlerMapBuilder},
    mailbox::FrameMailbox,
    pdo::{register_rpdo_handlers, register_tpdo_handlers, ReceivePdo, TransmitPdo},
    protocol::{DeviceEvents, Protocol},
    sdo_server::{ObjectAccess, SdoServer},
    standard_objects::{register_standard_handlers, standard_entries, CommObjects},
};

/// Number of PDOs of each kind which get a default, valid COB-ID
const DEFAULT_PDO_COUNT: u8 = 4;

/// Allowed deviation of SYNC arrival from the configured period
const SYNC_TOLERANCE_US: u64 = 1000;

/// Number of EMCY frames held back by the inhibit time before the oldest is dropped
const EMCY_QUEUE_DEPTH: usize = 8;

/// Error returned when a device cannot be constructed
#[derive(Debug, Snafu)]
pub enum DeviceError {
    /// The settings' node ID is out of range
    #[snafu(display("Invalid node ID: {source}"))]
    InvalidNodeId {
        /// The underlying error
        source: InvalidNodeIdError,
    },
    /// More PDOs were requested than are supported
    #[snafu(display("{count} PDOs requested, at most 8 are supported"))]
    TooManyPdos {
        /// The requested number
        count: u8,
    },
    /// An object in the user dictionary collides with a communication object
    #[snafu(display("Object {address} conflicts with a standard object"))]
    ConflictingObject {
        /// The conflicting address
        address: Address,
    },
    /// Handler registration failed
    #[snafu(display("Failed to build handler map: {source}"))]
    Build {
        /// The underlying error
        source: BuildError,
    },
}

/// The default COB-ID parameter word of TPDO `n`
pub fn default_tpdo_cob_id(node_id: u8, n: u8) -> u32 {
    default_pdo_cob_id(0x180, node_id, n)
}

/// The default COB-ID parameter word of RPDO `n`
pub fn default_rpdo_cob_id(node_id: u8, n: u8) -> u32 {
    default_pdo_cob_id(0x200, node_id, n)
}

fn default_pdo_cob_id(base: u32, node_id: u8, n: u8) -> u32 {
    let id = base + 0x100 * (n % DEFAULT_PDO_COUNT) as u32 + node_id as u32;
    if n < DEFAULT_PDO_COUNT {
        id
    } else {
        id | PdoCobId::INVALID_BIT
    }
}

/// Assembles a [`CanopenDevice`] with optional protocol extensions
#[allow(missing_debug_implementations)]
pub struct DeviceBuilder {
    od: ObjectDictionary,
    settings: DeviceSettings,
    protocols: Vec<Box<dyn Protocol>>,
}

impl DeviceBuilder {
    /// Start building a device serving `od` in addition to the communication objects
    pub fn new(od: ObjectDictionary, settings: DeviceSettings) -> Self {
        Self {
            od,
            settings,
            protocols: Vec::new(),
        }
    }

    /// Add a protocol extension
    pub fn protocol(mut self, protocol: impl Protocol + 'static) -> Self {
        self.protocols.push(Box::new(protocol));
        self
    }

    /// Build the device
    ///
    /// `register` is called to register handlers for the user dictionary objects. Construction
    /// fails if any readable or writable object is left without a handler.
    pub fn build(
        self,
        register: impl FnOnce(&mut HandlerMapBuilder) -> Result<(), BuildError>,
    ) -> Result<CanopenDevice, DeviceError> {
        let Self {
            od: user_od,
            settings,
            mut protocols,
        } = self;
        let node_id = NodeId::new(settings.node_id).context(InvalidNodeIdSnafu)?;
        for count in [settings.num_rpdo, settings.num_tpdo] {
            if count as usize > MAX_PDOS {
                return TooManyPdosSnafu { count }.fail();
            }
        }

        let mut od: ObjectDictionary = standard_entries(settings.num_rpdo, settings.num_tpdo)
            .into_iter()
            .collect();
        let extra = user_od
            .iter()
            .copied()
            .chain(protocols.iter().flat_map(|p| p.object_entries()));
        for entry in extra {
            if od.insert(entry).is_some() {
                return ConflictingObjectSnafu {
                    address: entry.address,
                }
                .fail();
            }
        }

        let comm = Arc::new(CommObjects::new(&settings));
        let mut builder = HandlerMapBuilder::new(od);
        register_standard_handlers(&mut builder, &comm, &settings).context(BuildSnafu)?;

        let mut rpdos = heapless::Vec::new();
        for n in 0..settings.num_rpdo {
            let pdo = Arc::new(ReceivePdo::new(default_rpdo_cob_id(node_id.raw(), n)));
            register_rpdo_handlers(&mut builder, n, &pdo).context(BuildSnafu)?;
            // Capacity is checked against MAX_PDOS above
            let _ = rpdos.push(pdo);
        }
        let mut tpdos = heapless::Vec::new();
        for n in 0..settings.num_tpdo {
            let pdo = Arc::new(TransmitPdo::new(default_tpdo_cob_id(node_id.raw(), n)));
            register_tpdo_handlers(&mut builder, n, &pdo).context(BuildSnafu)?;
            let _ = tpdos.push(pdo);
        }

        for protocol in protocols.iter_mut() {
            protocol.register_handlers(&mut builder).context(BuildSnafu)?;
        }
        register(&mut builder).context(BuildSnafu)?;
        let handlers = builder.build().context(BuildSnafu)?;

        Ok(CanopenDevice {
            node_id: node_id.raw(),
            nmt_state: NmtState::Bootup,
            boot_up_pending: true,
            handlers,
            comm,
            sdo_server: SdoServer::new(node_id.raw()),
            rpdos,
            tpdos,
            protocols,
            last_heartbeat_us: None,
            guard_toggle: false,
            consumer_last_us: None,
            missed_heartbeat: false,
            last_sync_us: None,
            sync_deadline_us: None,
            last_sync_counter: None,
            was_in_sync_window: false,
            sync_cycle_ended: false,
            current_error: None,
            emcy_queue: heapless::Deque::new(),
            last_emcy_us: None,
        })
    }
}

/// A CANopen device
pub struct CanopenDevice {
    node_id: u8,
    nmt_state: NmtState,
    boot_up_pending: bool,
    handlers: HandlerMap,
    comm: Arc<CommObjects>,
    sdo_server: SdoServer,
    rpdos: heapless::Vec<Arc<ReceivePdo>, MAX_PDOS>,
    tpdos: heapless::Vec<Arc<TransmitPdo>, MAX_PDOS>,
    protocols: Vec<Box<dyn Protocol>>,

    last_heartbeat_us: Option<u64>,
    guard_toggle: bool,
    consumer_last_us: Option<u64>,
    missed_heartbeat: bool,

    last_sync_us: Option<u64>,
    sync_deadline_us: Option<u64>,
    last_sync_counter: Option<u8>,
    was_in_sync_window: bool,
    /// Set when a SYNC arrives with an unlimited window, closing the previous cycle
    sync_cycle_ended: bool,

    current_error: Option<EmcyMessage>,
    /// EMCY frames waiting for the inhibit time, oldest first
    emcy_queue: heapless::Deque<EmcyMessage, EMCY_QUEUE_DEPTH>,
    last_emcy_us: Option<u64>,
}

impl core::fmt::Debug for CanopenDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CanopenDevice")
            .field("node_id", &self.node_id)
            .field("nmt_state", &self.nmt_state)
            .field("current_error", &self.current_error)
            .finish_non_exhaustive()
    }
}

/// Dictionary access for the SDO server which reports successful writes to the TPDOs
struct TrackedAccess<'a> {
    handlers: &'a mut HandlerMap,
    tpdos: &'a [Arc<TransmitPdo>],
}

impl ObjectAccess for TrackedAccess<'_> {
    fn read(&mut self, address: Address) -> Result<Value, SdoErrorCode> {
        self.handlers.read(address)
    }

    fn write_bytes(&mut self, address: Address, data: &[u8], size: Option<usize>) -> SdoErrorCode {
        let result = self.handlers.write_bytes(address, data, size);
        if result.is_ok() {
            mark_changed(self.tpdos, address);
        }
        result
    }
}

fn mark_changed(tpdos: &[Arc<TransmitPdo>], address: Address) {
    for tpdo in tpdos.iter().filter(|t| t.is_active() && t.maps(address)) {
        tpdo.mark_updated();
    }
}

impl CanopenDevice {
    /// Create a device without protocol extensions
    ///
    /// See [`DeviceBuilder::build`].
    pub fn new(
        od: ObjectDictionary,
        settings: DeviceSettings,
        register: impl FnOnce(&mut HandlerMapBuilder) -> Result<(), BuildError>,
    ) -> Result<Self, DeviceError> {
        DeviceBuilder::new(od, settings).build(register)
    }

    /// The node ID
    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// The current NMT state
    pub fn nmt_state(&self) -> NmtState {
        self.nmt_state
    }

    /// The complete dictionary, including communication objects
    pub fn od(&self) -> &Arc<ObjectDictionary> {
        self.handlers.od()
    }

    /// Read an object
    pub fn read(&mut self, address: impl Into<Address>) -> Result<Value, SdoErrorCode> {
        self.handlers.read(address.into())
    }

    /// Write an object with a typed value
    ///
    /// On success, TPDOs mapping the object are triggered.
    pub fn write_value(&mut self, address: impl Into<Address>, value: Value) -> SdoErrorCode {
        let address = address.into();
        let result = self.handlers.write_value(address, value);
        if result.is_ok() {
            mark_changed(&self.tpdos, address);
        }
        result
    }

    /// Write an object from its little-endian encoding
    ///
    /// On success, TPDOs mapping the object are triggered.
    pub fn write_bytes(
        &mut self,
        address: impl Into<Address>,
        data: &[u8],
        size: Option<usize>,
    ) -> SdoErrorCode {
        TrackedAccess {
            handlers: &mut self.handlers,
            tpdos: &self.tpdos,
        }
        .write_bytes(address.into(), data, size)
    }

    /// Decode bytes as a write to `address` would, without writing
    pub fn to_value(&self, address: impl Into<Address>, data: &[u8], size: Option<usize>) -> Option<Value> {
        self.handlers.to_value(address.into(), data, size)
    }

    /// Trigger every active TPDO which maps `address`
    ///
    /// Call this when the application changes a mapped value behind a handler's back.
    pub fn set_value_changed(&self, address: impl Into<Address>) {
        mark_changed(&self.tpdos, address.into());
    }

    /// Get RPDO `n`
    pub fn rpdo(&self, n: usize) -> Option<&Arc<ReceivePdo>> {
        self.rpdos.get(n)
    }

    /// Get TPDO `n`
    pub fn tpdo(&self, n: usize) -> Option<&Arc<TransmitPdo>> {
        self.tpdos.get(n)
    }

    /// The frame identifier of RPDO `n`
    pub fn rpdo_can_id(&self, n: usize) -> Option<CanId> {
        self.rpdo(n).map(|p| p.can_id())
    }

    /// The frame identifier of TPDO `n`
    pub fn tpdo_can_id(&self, n: usize) -> Option<CanId> {
        self.tpdo(n).map(|p| p.can_id())
    }

    /// Activate or deactivate RPDO `n`
    pub fn set_rpdo_active(&self, n: usize, active: bool) -> SdoErrorCode {
        match self.rpdos.get(n) {
            Some(pdo) => pdo.set_active(self.handlers.od(), active),
            None => SdoErrorCode::ObjectDoesNotExist,
        }
    }

    /// Activate or deactivate TPDO `n`
    pub fn set_tpdo_active(&self, n: usize, active: bool) -> SdoErrorCode {
        match self.tpdos.get(n) {
            Some(pdo) => pdo.set_active(self.handlers.od(), active),
            None => SdoErrorCode::ObjectDoesNotExist,
        }
    }

    /// Returns true if the monitored heartbeat producer has timed out
    pub fn has_missed_heartbeat(&self) -> bool {
        self.missed_heartbeat
    }

    /// Clear the missed heartbeat flag, restarting consumer monitoring at the next heartbeat
    pub fn reset_heartbeat_missed(&mut self) {
        self.missed_heartbeat = false;
        self.consumer_last_us = None;
    }

    /// Returns true while inside the SYNC window
    pub fn is_in_sync_window(&self) -> bool {
        self.was_in_sync_window
    }

    /// The latched error, if any
    pub fn current_error(&self) -> Option<EmcyMessage> {
        self.current_error
    }

    /// The error register (0x1001)
    pub fn error_register(&self) -> u8 {
        self.comm.error_register.load()
    }

    /// The pre-defined error field (0x1003), newest first
    pub fn error_history(&self) -> heapless::Vec<u32, ERROR_HISTORY_DEPTH> {
        self.comm.error_history()
    }

    /// Latch an error and schedule its EMCY message
    ///
    /// The class bits of `error` are added to `register`. A communication error demotes an
    /// operational device to pre-operational.
    pub fn set_error(&mut self, error: EmcyError, register: u8, manufacturer: [u8; 5]) {
        self.latch_error(EmcyMessage::new(
            error,
            register | error.register_bits(),
            manufacturer,
        ));
    }

    fn latch_error(&mut self, msg: EmcyMessage) {
        warn!("Node {} latched EMCY 0x{:X}", self.node_id, msg.code);
        self.current_error = Some(msg);
        self.comm.error_register.store(msg.register);
        self.comm.push_error(msg.code as u32);
        self.queue_emcy(msg);
        if msg.error() == Some(EmcyError::GenericCommunicationError)
            && self.nmt_state == NmtState::Operational
        {
            self.set_nmt_state(NmtState::PreOperational);
        }
    }

    /// Clear the latched error
    ///
    /// If an error was latched, an error reset EMCY is sent on the next update.
    pub fn clear_error(&mut self) {
        if self.current_error.take().is_some() {
            self.comm.error_register.store(0);
            self.queue_emcy(EmcyMessage::new(EmcyError::NoError, 0, [0; 5]));
        }
    }

    fn queue_emcy(&mut self, msg: EmcyMessage) {
        if self.emcy_queue.is_full() {
            if let Some(dropped) = self.emcy_queue.pop_front() {
                warn!(
                    "Node {} EMCY queue full, dropping 0x{:X}",
                    self.node_id, dropped.code
                );
            }
        }
        let _ = self.emcy_queue.push_back(msg);
    }

    fn set_nmt_state(&mut self, state: NmtState) {
        if state != self.nmt_state {
            info!(
                "Node {} NMT state {} -> {}",
                self.node_id,
                u8::from(self.nmt_state),
                u8::from(state)
            );
            self.nmt_state = state;
        }
    }

    fn handle_nmt_command(&mut self, cmd: NmtCommandCmd) {
        match cmd {
            NmtCommandCmd::Start => self.set_nmt_state(NmtState::Operational),
            NmtCommandCmd::Stop => self.set_nmt_state(NmtState::Stopped),
            NmtCommandCmd::EnterPreOp => self.set_nmt_state(NmtState::PreOperational),
            NmtCommandCmd::ResetNode | NmtCommandCmd::ResetComm => {
                self.set_nmt_state(NmtState::PreOperational);
                self.boot_up_pending = true;
                self.last_sync_us = None;
                self.sync_deadline_us = None;
                self.last_sync_counter = None;
                self.consumer_last_us = None;
                self.missed_heartbeat = false;
            }
        }
    }

    fn heartbeat_id(&self) -> CanId {
        CanId::std(HEARTBEAT_BASE + self.node_id as u16)
    }

    fn handle_sync(&mut self, msg: &CanMessage, now_us: u64) {
        let overflow = self.comm.sync_counter_overflow.load();
        if overflow != 0 {
            match msg.data() {
                [count] => {
                    let expected = self
                        .last_sync_counter
                        .map(|c| if c >= overflow { 1 } else { c + 1 });
                    if expected.is_some_and(|e| e != *count) {
                        debug!("SYNC counter {} out of sequence", *count);
                        self.set_error(EmcyError::UnexpectedSyncData, 0, [0; 5]);
                    }
                    self.last_sync_counter = Some(*count);
                }
                _ => self.set_error(EmcyError::UnexpectedSyncData, 0, [0; 5]),
            }
        }

        let period = self.comm.sync_period_us.load() as u64;
        let interval = self.last_sync_us.map(|last| now_us.saturating_sub(last));
        if let Some(interval) = interval.filter(|_| period != 0) {
            if interval.abs_diff(period) > SYNC_TOLERANCE_US {
                debug!("SYNC interval {}us, expected {}us", interval, period);
                self.set_error(EmcyError::GenericCommunicationError, 0, [0; 5]);
            }
        }

        if self.last_sync_us.is_some() && self.comm.sync_window_us.load() == 0 {
            self.sync_cycle_ended = true;
        }
        self.last_sync_us = Some(now_us);
        self.sync_deadline_us = (period != 0).then_some(now_us + period + SYNC_TOLERANCE_US);
        if self.nmt_state == NmtState::Operational {
            for tpdo in &self.tpdos {
                tpdo.sync();
            }
        }
    }

    /// Handle a received frame
    ///
    /// Any responses are passed to `send`.
    pub fn process_message(
        &mut self,
        msg: &CanMessage,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) {
        let id = msg.id();
        if id == NMT_CMD_ID {
            match NmtCommand::try_from(*msg) {
                Ok(cmd) if cmd.addresses(self.node_id) => self.handle_nmt_command(cmd.cmd),
                Ok(_) => (),
                Err(_) => debug!("Node {} ignoring malformed NMT frame", self.node_id),
            }
            return;
        }

        if id == self.heartbeat_id() {
            if msg.is_rtr() {
                send(
                    Heartbeat {
                        node: self.node_id,
                        toggle: self.guard_toggle,
                        state: self.nmt_state,
                    }
                    .into(),
                );
                self.guard_toggle = !self.guard_toggle;
            }
            return;
        }

        let consumer = self.comm.heartbeat_consumer();
        if consumer.node != 0 && id == CanId::std(HEARTBEAT_BASE + consumer.node as u16) {
            if !msg.is_rtr() && msg.data().len() == 1 {
                self.consumer_last_us = Some(now_us);
                self.missed_heartbeat = false;
            } else if !msg.is_rtr() {
                debug!("Malformed heartbeat from node {}", consumer.node);
            }
            return;
        }

        if self.nmt_state == NmtState::Stopped {
            return;
        }

        let sync_id = PdoCobId::decode(self.comm.sync_cob_id.load()).can_id();
        if id == sync_id && !msg.is_rtr() {
            self.handle_sync(msg, now_us);
            return;
        }

        if id == self.sdo_server.rx_cob_id() {
            let mut access = TrackedAccess {
                handlers: &mut self.handlers,
                tpdos: &self.tpdos,
            };
            if let Some(resp) = self.sdo_server.handle_message(msg, &mut access) {
                send(resp);
            }
            return;
        }

        if self.nmt_state != NmtState::Operational {
            return;
        }

        let handlers = &mut self.handlers;
        let tpdos = &self.tpdos;
        for rpdo in &self.rpdos {
            let mut write = |address: Address, value: Value| {
                let result = handlers.write_value(address, value);
                if result.is_ok() {
                    mark_changed(tpdos, address);
                }
                result
            };
            if rpdo.process_message(msg, &mut write) {
                return;
            }
        }

        if msg.is_rtr() {
            for tpdo in &self.tpdos {
                if let Some(frame) = tpdo.process_message(msg, now_us, &mut |a| handlers.read(a)) {
                    send(frame);
                }
            }
        }

        let mut events = DeviceEvents::new(self.nmt_state, self.was_in_sync_window);
        for protocol in self.protocols.iter_mut() {
            protocol.process_message(msg, &mut events);
        }
        self.apply_events(events, send);
    }

    /// Drain a mailbox, processing each frame
    pub fn process_mailbox<const N: usize>(
        &mut self,
        mailbox: &FrameMailbox<N>,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) {
        while let Some(msg) = mailbox.take_message() {
            self.process_message(&msg, now_us, send);
        }
    }

    fn apply_events(&mut self, events: DeviceEvents, send: &mut dyn FnMut(CanMessage)) {
        for frame in events.frames {
            send(frame);
        }
        for address in events.changed {
            mark_changed(&self.tpdos, address);
        }
        for mut msg in events.errors {
            if let Some(error) = msg.error() {
                msg.register |= error.register_bits();
            }
            self.latch_error(msg);
        }
    }

    /// Periodic processing
    ///
    /// Sends the boot-up message on the first call, then heartbeats, due TPDOs, and EMCY
    /// messages. `now_us` must be monotonic.
    pub fn update(&mut self, now_us: u64, send: &mut dyn FnMut(CanMessage)) {
        self.update_heartbeat(now_us, send);
        let in_window = self.update_sync(now_us);

        if self.nmt_state == NmtState::Operational {
            let handlers = &mut self.handlers;
            for tpdo in &self.tpdos {
                if let Some(msg) = tpdo.next_message(in_window, now_us, &mut |a| handlers.read(a)) {
                    send(msg);
                }
            }
        }

        self.update_heartbeat_consumer(now_us);
        self.update_emcy(now_us, send);

        if self.nmt_state == NmtState::Operational {
            let mut events = DeviceEvents::new(self.nmt_state, in_window);
            for protocol in self.protocols.iter_mut() {
                protocol.update(now_us, &mut events);
            }
            self.apply_events(events, send);
        }
    }

    fn update_heartbeat(&mut self, now_us: u64, send: &mut dyn FnMut(CanMessage)) {
        if self.boot_up_pending {
            self.boot_up_pending = false;
            send(
                Heartbeat {
                    node: self.node_id,
                    toggle: false,
                    state: NmtState::Bootup,
                }
                .into(),
            );
            self.last_heartbeat_us = Some(now_us);
            self.guard_toggle = false;
            if self.nmt_state == NmtState::Bootup {
                self.set_nmt_state(NmtState::PreOperational);
            }
            return;
        }

        let period_us = self.comm.heartbeat_producer_ms.load() as u64 * 1000;
        if period_us == 0 {
            return;
        }
        if self
            .last_heartbeat_us
            .map_or(true, |t| now_us.saturating_sub(t) >= period_us)
        {
            send(
                Heartbeat {
                    node: self.node_id,
                    toggle: false,
                    state: self.nmt_state,
                }
                .into(),
            );
            self.last_heartbeat_us = Some(now_us);
        }
    }

    /// Track the SYNC window and deadline, returning true while inside the window
    fn update_sync(&mut self, now_us: u64) -> bool {
        let window = self.comm.sync_window_us.load() as u64;
        let in_window = self
            .last_sync_us
            .is_some_and(|t| window == 0 || now_us.saturating_sub(t) < window);
        let just_left = (self.was_in_sync_window && !in_window) || self.sync_cycle_ended;
        self.was_in_sync_window = in_window;
        self.sync_cycle_ended = false;

        if self.nmt_state == NmtState::Operational {
            let timeouts = self.rpdos.iter().filter_map(|r| r.update(just_left)).count();
            for _ in 0..timeouts {
                self.set_error(EmcyError::RpdoTimeout, 0, [0; 5]);
            }
        }

        let period = self.comm.sync_period_us.load() as u64;
        if let Some(deadline) = self.sync_deadline_us.filter(|_| period != 0) {
            if now_us > deadline && self.nmt_state != NmtState::Stopped {
                debug!("Node {} missed SYNC", self.node_id);
                self.sync_deadline_us = Some(deadline + period);
                self.set_error(EmcyError::GenericCommunicationError, 0, [0; 5]);
            }
        }
        in_window
    }

    fn update_heartbeat_consumer(&mut self, now_us: u64) {
        let consumer = self.comm.heartbeat_consumer();
        if consumer.time_ms == 0 || self.missed_heartbeat {
            return;
        }
        if let Some(last) = self.consumer_last_us {
            if now_us.saturating_sub(last) > consumer.time_ms as u64 * 1000 {
                self.missed_heartbeat = true;
                self.set_error(EmcyError::HeartbeatOrGuardingError, 0, [0; 5]);
            }
        }
    }

    /// Send queued EMCY frames, at most one per inhibit time
    fn update_emcy(&mut self, now_us: u64, send: &mut dyn FnMut(CanMessage)) {
        if self.emcy_queue.is_empty() {
            return;
        }
        let cob_id = self.comm.emcy_cob_id.load();
        if cob_id & EMCY_DISABLE_BIT != 0 {
            self.emcy_queue.clear();
            return;
        }
        let can_id = PdoCobId::decode(cob_id).can_id();
        let inhibit_us = self.comm.emcy_inhibit_100us.load() as u64 * 100;
        while self
            .last_emcy_us
            .map_or(true, |t| now_us.saturating_sub(t) >= inhibit_us)
        {
            let Some(msg) = self.emcy_queue.pop_front() else {
                break;
            };
            send(msg.to_can_message(can_id));
            self.last_emcy_us = Some(now_us);
        }
    }
}
