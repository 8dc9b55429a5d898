//! A deterministic network of devices and a master on a [`SimBus`]
//!
//! Time only advances when [`SimNetwork::step`] is called. Each step runs every participant's
//! periodic update, then delivers frames until the bus is quiet, so that request/response
//! exchanges complete within the step that started them.
use motocan_client::{CanopenMaster, MasterConfig};
use motocan_common::{
    messages::CanMessage,
    traits::{CanReceiver, CanSender},
};
use motocan_node::CanopenDevice;

use crate::sim_bus::{SimBus, SimBusReceiver, SimBusSender};

const MAX_DELIVERY_ROUNDS: usize = 16;

struct Port {
    tx: SimBusSender,
    rx: SimBusReceiver,
}

impl Port {
    fn new(bus: &SimBus) -> Self {
        let (tx, rx) = bus.new_pair();
        Self { tx, rx }
    }

    fn sink(&mut self) -> impl FnMut(CanMessage) + '_ {
        |msg| {
            let _ = self.tx.send(msg);
        }
    }
}

/// Devices and a master sharing a bus
pub struct SimNetwork {
    bus: SimBus,
    devices: Vec<(CanopenDevice, Port)>,
    master: CanopenMaster,
    master_port: Port,
    logger: SimBusReceiver,
    now_us: u64,
}

impl SimNetwork {
    /// Create a network with a master and no devices
    pub fn new(config: MasterConfig) -> Self {
        let bus = SimBus::new();
        let master_port = Port::new(&bus);
        let logger = bus.new_receiver();
        Self {
            bus,
            devices: Vec::new(),
            master: CanopenMaster::new(config),
            master_port,
            logger,
            now_us: 0,
        }
    }

    /// Attach a device
    pub fn add_device(&mut self, device: CanopenDevice) {
        let port = Port::new(&self.bus);
        self.devices.push((device, port));
    }

    /// The device with node id `node`
    pub fn device(&mut self, node: u8) -> &mut CanopenDevice {
        self.devices
            .iter_mut()
            .map(|(d, _)| d)
            .find(|d| d.node_id() == node)
            .unwrap_or_else(|| panic!("no device with node id {node}"))
    }

    /// The master
    pub fn master(&self) -> &CanopenMaster {
        &self.master
    }

    /// Run `f` with the master and a sink putting frames on the bus
    pub fn with_master<R>(
        &mut self,
        f: impl FnOnce(&CanopenMaster, u64, &mut dyn FnMut(CanMessage)) -> R,
    ) -> R {
        let now = self.now_us;
        let result = f(&self.master, now, &mut self.master_port.sink());
        self.deliver();
        result
    }

    /// Put a frame on the bus as if sent by an external node
    pub fn inject(&mut self, msg: CanMessage) {
        let mut tx = self.bus.new_sender();
        let _ = tx.send(msg);
        self.deliver();
    }

    /// The current simulated time
    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Every frame sent since the last call
    pub fn bus_log(&mut self) -> Vec<CanMessage> {
        self.logger.drain()
    }

    /// Advance time by `dt_us`, run the periodic updates and deliver the resulting frames
    pub fn step(&mut self, dt_us: u64) {
        self.now_us += dt_us;
        let now = self.now_us;
        for (device, port) in self.devices.iter_mut() {
            device.update(now, &mut port.sink());
        }
        self.master.update(now, &mut self.master_port.sink());
        self.deliver();
    }

    /// Step in increments of `tick_us` until `duration_us` has passed
    pub fn run_for(&mut self, duration_us: u64, tick_us: u64) {
        let end = self.now_us + duration_us;
        while self.now_us < end {
            self.step(tick_us.min(end - self.now_us));
        }
    }

    fn deliver(&mut self) {
        let now = self.now_us;
        for _ in 0..MAX_DELIVERY_ROUNDS {
            let mut delivered = false;
            for (device, port) in self.devices.iter_mut() {
                while let Some(msg) = port.rx.try_recv() {
                    delivered = true;
                    device.process_message(&msg, now, &mut port.sink());
                }
            }
            while let Some(msg) = self.master_port.rx.try_recv() {
                delivered = true;
                self.master.process_message(&msg, now);
            }
            if !delivered {
                return;
            }
        }
        log::warn!("Bus still busy after {} delivery rounds", MAX_DELIVERY_ROUNDS);
    }
}
