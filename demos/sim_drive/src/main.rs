//! Runs a simulated CiA402 velocity drive and a master on an in-process bus
//!
//! The drive runs in its own thread, fed from a [`FrameMailbox`] the way an MCU would be fed from
//! a CAN RX interrupt. The master configures its PDOs over SDO, enables it, and commands a
//! velocity over PDO.
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use motocan_cia402::{
    bits::status,
    objects::{
        entries, CONTROL_WORD, MODES_OF_OPERATION, PROFILE_ACCELERATION, STATUS_WORD,
        TARGET_VELOCITY, VELOCITY_DEMAND,
    },
    AxisHandle, Cia402Axis, CommandName,
};
use motocan_client::{
    node_config::{MappingConfig, PdoConfig},
    CanopenMaster, MasterConfig,
};
use motocan_common::{
    device_config::DeviceConfig,
    messages::{CanMessage, NmtCommandCmd},
    objects::{Address, ObjectDictionary},
    sdo::SdoErrorCode,
    traits::{CanReceiver, CanSendError, CanSender},
    AtomicCell, DeviceSettings, Value,
};
use motocan_node::{CanopenDevice, DeviceBuilder, FrameMailbox};

type BoxError = Box<dyn std::error::Error>;

#[derive(Parser, Debug)]
struct Args {
    /// Device configuration file. Only the communication settings are used.
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// Node id of the drive, when no configuration file is given
    #[clap(long, short, default_value = "3")]
    node_id: u8,
    /// Commanded velocity
    #[clap(long, short, default_value = "1000")]
    velocity: i32,
    /// Profile acceleration
    #[clap(long, default_value = "2000")]
    acceleration: u32,
    /// How long to run the drive, in seconds
    #[clap(long, short, default_value = "2.0")]
    duration: f32,
}

/// Sending half of a point to point link
struct ChannelSender(Sender<CanMessage>);

impl CanSender for ChannelSender {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        self.0.send(msg).map_err(|e| CanSendError { msg: e.into_inner() })
    }
}

/// Receiving half of a point to point link
struct ChannelReceiver(Receiver<CanMessage>);

impl CanReceiver for ChannelReceiver {
    type Error = RecvTimeoutError;

    fn try_recv(&mut self) -> Option<CanMessage> {
        self.0.try_recv().ok()
    }

    fn recv(&mut self, timeout: Duration) -> Result<CanMessage, Self::Error> {
        self.0.recv_timeout(timeout)
    }
}

fn link() -> (ChannelSender, ChannelReceiver) {
    let (tx, rx) = unbounded();
    (ChannelSender(tx), ChannelReceiver(rx))
}

fn elapsed_us(start: Instant) -> u64 {
    start.elapsed().as_micros() as u64
}

fn send_all(tx: &mut ChannelSender, frames: Vec<CanMessage>) {
    for msg in frames {
        if let Err(e) = tx.send(msg) {
            log::error!("{e}");
        }
    }
}

fn build_drive(args: &Args) -> Result<(CanopenDevice, AxisHandle), BoxError> {
    let settings = match &args.config {
        Some(path) => {
            let config = DeviceConfig::load(path)?;
            if !config.objects.is_empty() {
                log::warn!(
                    "Ignoring {} application objects in {}",
                    config.objects.len(),
                    path.display()
                );
            }
            config.device_settings()
        }
        None => {
            let mut settings = DeviceSettings::new(args.node_id);
            settings.heartbeat_producer_ms = 200;
            settings
        }
    };
    let axis = Cia402Axis::new(0);
    let handle = axis.handle();
    let device = DeviceBuilder::new(ObjectDictionary::default(), settings)
        .protocol(axis)
        .build(|_| Ok(()))?;
    Ok((device, handle))
}

/// Run the drive until `stop` is set
fn run_drive(
    mut device: CanopenDevice,
    handle: AxisHandle,
    mut rx: ChannelReceiver,
    mut tx: ChannelSender,
    start: Instant,
    stop: Arc<AtomicBool>,
) {
    // Callbacks must be static, so leak the mailbox and notifier
    let mailbox: &'static FrameMailbox<32> = Box::leak(Box::new(FrameMailbox::new()));
    let (notify_tx, notify_rx) = bounded::<()>(1);
    let notify_cb = Box::leak(Box::new(move || {
        let _ = notify_tx.try_send(());
    }));
    mailbox.set_process_notify_callback(notify_cb);

    let rx_stop = stop.clone();
    let rx_thread = thread::spawn(move || {
        while !rx_stop.load(Ordering::Relaxed) {
            match rx.recv(Duration::from_millis(10)) {
                Ok(msg) => {
                    if let Err(msg) = mailbox.store_message(msg) {
                        log::warn!("Dropped frame {:?}", msg);
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    // The motor follows the demand exactly
    let mut position = 0i64;
    let mut last_us = elapsed_us(start);
    while !stop.load(Ordering::Relaxed) {
        let _ = notify_rx.recv_timeout(Duration::from_millis(1));
        let now = elapsed_us(start);
        let mut frames = Vec::new();
        device.process_mailbox(mailbox, now, &mut |msg| frames.push(msg));
        device.update(now, &mut |msg| frames.push(msg));

        let velocity = handle.demand_velocity();
        position += velocity as i64 * (now - last_us) as i64 / 1_000_000;
        last_us = now;
        handle.set_actual(position as i32, velocity);

        send_all(&mut tx, frames);
    }
    let _ = rx_thread.join();
}

/// The process data the master exchanges with the drive
#[derive(Default)]
struct DriveMirror {
    control_word: Arc<AtomicCell<u16>>,
    target_velocity: Arc<AtomicCell<i32>>,
    status_word: Arc<AtomicCell<u16>>,
    velocity_demand: Arc<AtomicCell<i32>>,
}

struct Master {
    master: CanopenMaster,
    rx: ChannelReceiver,
    tx: ChannelSender,
    start: Instant,
}

impl Master {
    /// Process received frames and run the master's periodic update for `duration`
    fn pump(&mut self, duration: Duration) {
        let until = Instant::now() + duration;
        while Instant::now() < until {
            let now = elapsed_us(self.start);
            self.master.process_rx(&mut self.rx, now);
            let mut frames = Vec::new();
            self.master.update(now, &mut |msg| frames.push(msg));
            send_all(&mut self.tx, frames);
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Run `f` with a sink to the bus
    fn with<R>(
        &mut self,
        f: impl FnOnce(&CanopenMaster, u64, &mut dyn FnMut(CanMessage)) -> R,
    ) -> R {
        let now = elapsed_us(self.start);
        let mut frames = Vec::new();
        let result = f(&self.master, now, &mut |msg| frames.push(msg));
        send_all(&mut self.tx, frames);
        result
    }

    /// Pump until every SDO request has completed
    fn settle_sdo(&mut self) {
        while self.master.sdo_client().waiting() {
            self.pump(Duration::from_millis(5));
        }
    }

    fn sdo_write(&mut self, node: u8, index: u16, value: Value) {
        let address = Address::new(index, 0);
        let result = self.with(|master, now, send| master.sdo_write(node, address, value, now, send));
        if !result.is_ok() {
            log::error!("Write of {index:#06x} refused: {result:?}");
        }
    }
}

fn mapping(index: u16, size: u8) -> MappingConfig {
    MappingConfig {
        index,
        sub: 0,
        size,
    }
}

fn process_data(indices: &[u16]) -> PdoConfig {
    let size = |index| match index {
        CONTROL_WORD | STATUS_WORD => 16,
        _ => 32,
    };
    PdoConfig {
        cob: None,
        enabled: true,
        mappings: indices.iter().map(|&i| mapping(i, size(i))).collect(),
        transmission_type: 254,
        inhibit_time: 0,
    }
}

fn main() -> Result<(), BoxError> {
    env_logger::init();
    let args = Args::parse();

    let (device, handle) = build_drive(&args)?;
    let node = device.node_id();
    let start = Instant::now();
    let stop = Arc::new(AtomicBool::new(false));
    let (to_drive, drive_rx) = link();
    let (drive_tx, from_drive) = link();
    let drive_stop = stop.clone();
    let drive_thread =
        thread::spawn(move || run_drive(device, handle, drive_rx, drive_tx, start, drive_stop));

    let mut master = Master {
        master: CanopenMaster::new(MasterConfig {
            sync_period_us: 10_000,
            sync_window_us: 5_000,
            ..Default::default()
        }),
        rx: from_drive,
        tx: to_drive,
        start,
    };
    master.master.set_completion_callback(Box::new(|node, address, code| {
        if code != SdoErrorCode::NoError {
            log::error!("SDO transfer to node {node} at {address} failed: {code:?}");
        }
    }));

    let od: ObjectDictionary = entries(0)
        .into_iter()
        .filter(|e| {
            [CONTROL_WORD, TARGET_VELOCITY, STATUS_WORD, VELOCITY_DEMAND]
                .contains(&e.address.index)
        })
        .collect();
    let mirror = DriveMirror::default();
    master.master.add_device(node, &od, |b| {
        b.bind(Address::new(CONTROL_WORD, 0), mirror.control_word.clone())?
            .bind(Address::new(TARGET_VELOCITY, 0), mirror.target_velocity.clone())?
            .bind(Address::new(STATUS_WORD, 0), mirror.status_word.clone())?
            .bind(Address::new(VELOCITY_DEMAND, 0), mirror.velocity_demand.clone())?;
        Ok(())
    })?;

    log::info!("Waiting for node {node}");
    while master.master.node_state(node).is_none() {
        master.pump(Duration::from_millis(10));
    }

    let rpdo = process_data(&[CONTROL_WORD, TARGET_VELOCITY]);
    let tpdo = process_data(&[STATUS_WORD, VELOCITY_DEMAND]);
    master.with(|master, now, send| {
        master.configure_remote_rpdo(node, 0, &rpdo, now, send)?;
        master.configure_remote_tpdo(node, 0, &tpdo, now, send)
    })?;
    master.sdo_write(node, MODES_OF_OPERATION, Value::Int8(3));
    master.sdo_write(node, PROFILE_ACCELERATION, Value::UInt32(args.acceleration));
    master.settle_sdo();

    master
        .master
        .set_tpdo(node, 0, 254, &rpdo.pdo_mappings())
        .into_result()
        .map_err(|code| format!("Transmit mirror rejected: {code:?}"))?;
    master
        .master
        .set_rpdo(node, 0, 254, &tpdo.pdo_mappings())
        .into_result()
        .map_err(|code| format!("Receive mirror rejected: {code:?}"))?;
    master.with(|master, _now, send| master.send_nmt(NmtCommandCmd::Start, node, send));

    let command = |master: &mut Master, command: CommandName| {
        mirror.control_word.store(command.control_word());
        master.master.set_value_changed(node, Address::new(CONTROL_WORD, 0));
        master.pump(Duration::from_millis(20));
    };
    mirror.target_velocity.store(args.velocity);
    for c in [
        CommandName::Shutdown,
        CommandName::SwitchOn,
        CommandName::EnableOperation,
    ] {
        command(&mut master, c);
    }
    log::info!("Drive status {:#06x}", mirror.status_word.load());

    let run_until = Instant::now() + Duration::from_secs_f32(args.duration);
    while Instant::now() < run_until {
        master.pump(Duration::from_millis(250));
        let status_word = mirror.status_word.load();
        log::info!(
            "velocity demand {} status {:#06x}{}",
            mirror.velocity_demand.load(),
            status_word,
            if status_word & status::TARGET_REACHED != 0 {
                " (target reached)"
            } else {
                ""
            }
        );
    }

    command(&mut master, CommandName::DisableVoltage);
    master.with(|master, _now, send| master.send_nmt(NmtCommandCmd::Stop, node, send));
    master.pump(Duration::from_millis(20));
    stop.store(true, Ordering::Relaxed);
    let _ = drive_thread.join();
    Ok(())
}
