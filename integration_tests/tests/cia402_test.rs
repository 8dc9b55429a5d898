use std::sync::{Arc, Mutex};

use integration_tests::{network::SimNetwork, Completions};
use motocan_cia402::{
    bits::status,
    objects::{
        entries, CONTROL_WORD, MODES_OF_OPERATION, PROFILE_ACCELERATION, STATUS_WORD,
        TARGET_VELOCITY, VELOCITY_DEMAND,
    },
    AxisHandle, Cia402Axis, CommandName, State,
};
use motocan_client::{
    node_config::{MappingConfig, PdoConfig},
    MasterConfig,
};
use motocan_common::{
    messages::NmtCommandCmd,
    objects::{Address, ObjectDictionary},
    sdo::{AbortCode, SdoErrorCode},
    AtomicCell, DeviceSettings, Value,
};
use motocan_node::DeviceBuilder;

const NODE: u8 = 3;
const TICK_US: u64 = 10_000;

fn at(index: u16) -> Address {
    Address::new(index, 0)
}

fn add_drive(net: &mut SimNetwork) -> AxisHandle {
    let axis = Cia402Axis::new(0);
    let handle = axis.handle();
    let device = DeviceBuilder::new(ObjectDictionary::default(), DeviceSettings::new(NODE))
        .protocol(axis)
        .build(|_| Ok(()))
        .unwrap();
    net.add_device(device);
    handle
}

fn sdo_write(net: &mut SimNetwork, index: u16, value: Value) {
    net.with_master(|master, now, send| {
        assert!(master.sdo_write(NODE, at(index), value, now, send).is_ok());
    });
}

fn sdo_read(net: &mut SimNetwork, index: u16) -> Option<Value> {
    let result = Arc::new(Mutex::new(None));
    let sink = result.clone();
    net.with_master(|master, now, send| {
        master.sdo_read(
            NODE,
            at(index),
            Some(Box::new(move |_, _, value| *sink.lock().unwrap() = Some(value))),
            now,
            send,
        )
    });
    let value = *result.lock().unwrap();
    value
}

fn start(net: &mut SimNetwork) {
    net.with_master(|master, _now, send| master.send_nmt(NmtCommandCmd::Start, NODE, send));
}

#[test]
#[serial_test::serial]
fn test_enable_and_run_over_sdo() {
    let _ = env_logger::try_init();
    let mut net = SimNetwork::new(MasterConfig {
        sync_period_us: 0,
        ..Default::default()
    });
    let handle = add_drive(&mut net);
    net.master()
        .add_device(NODE, &ObjectDictionary::default(), |_| Ok(()))
        .unwrap();
    let completions = Completions::install(net.master());
    net.step(TICK_US);
    start(&mut net);

    assert_eq!(
        sdo_read(&mut net, STATUS_WORD)
            .and_then(|v| v.get::<u16>())
            .map(|s| s & status::STATE_MASK),
        Some(0x40)
    );

    sdo_write(&mut net, MODES_OF_OPERATION, Value::Int8(3));
    sdo_write(&mut net, PROFILE_ACCELERATION, Value::UInt32(1000));
    sdo_write(&mut net, TARGET_VELOCITY, Value::Int32(100));
    // Not accepted from switch on disabled
    sdo_write(
        &mut net,
        CONTROL_WORD,
        Value::UInt16(CommandName::EnableOperation.control_word()),
    );
    assert_eq!(handle.state(), State::SwitchOnDisabled);

    for command in [
        CommandName::Shutdown,
        CommandName::SwitchOn,
        CommandName::EnableOperation,
    ] {
        sdo_write(&mut net, CONTROL_WORD, Value::UInt16(command.control_word()));
    }
    assert_eq!(handle.state(), State::OperationEnabled);
    assert!(completions
        .codes()
        .iter()
        .all(|c| *c == SdoErrorCode::NoError));

    // An unsupported mode is refused
    sdo_write(&mut net, MODES_OF_OPERATION, Value::Int8(5));
    assert_eq!(
        completions.codes(),
        [AbortCode::Standard(SdoErrorCode::InvalidValue)]
    );

    net.run_for(200_000, TICK_US);
    assert_eq!(handle.demand_velocity(), 100);
    assert_eq!(sdo_read(&mut net, VELOCITY_DEMAND), Some(Value::Int32(100)));
    let status_word = sdo_read(&mut net, STATUS_WORD)
        .and_then(|v| v.get::<u16>())
        .unwrap();
    assert_eq!(status_word & status::STATE_MASK, 0x27);
    assert_ne!(status_word & status::TARGET_REACHED, 0);
}

#[derive(Default)]
struct DriveMirror {
    control_word: Arc<AtomicCell<u16>>,
    target_velocity: Arc<AtomicCell<i32>>,
    status_word: Arc<AtomicCell<u16>>,
    velocity_demand: Arc<AtomicCell<i32>>,
}

fn mapping(index: u16, size: u8) -> MappingConfig {
    MappingConfig {
        index,
        sub: 0,
        size,
    }
}

#[test]
#[serial_test::serial]
fn test_enable_and_run_over_pdo() {
    let _ = env_logger::try_init();
    let mut net = SimNetwork::new(MasterConfig {
        sync_period_us: 0,
        ..Default::default()
    });
    let handle = add_drive(&mut net);

    // The master only mirrors the process data
    let od: ObjectDictionary = entries(0)
        .into_iter()
        .filter(|e| {
            [CONTROL_WORD, TARGET_VELOCITY, STATUS_WORD, VELOCITY_DEMAND]
                .contains(&e.address.index)
        })
        .collect();
    let mirror = DriveMirror::default();
    net.master()
        .add_device(NODE, &od, |b| {
            b.bind(at(CONTROL_WORD), mirror.control_word.clone())?
                .bind(at(TARGET_VELOCITY), mirror.target_velocity.clone())?
                .bind(at(STATUS_WORD), mirror.status_word.clone())?
                .bind(at(VELOCITY_DEMAND), mirror.velocity_demand.clone())?;
            Ok(())
        })
        .unwrap();
    let completions = Completions::install(net.master());
    net.step(TICK_US);

    let rpdo = PdoConfig {
        cob: None,
        enabled: true,
        mappings: vec![mapping(CONTROL_WORD, 16), mapping(TARGET_VELOCITY, 32)],
        transmission_type: 254,
        inhibit_time: 0,
    };
    let tpdo = PdoConfig {
        cob: None,
        enabled: true,
        mappings: vec![mapping(STATUS_WORD, 16), mapping(VELOCITY_DEMAND, 32)],
        transmission_type: 254,
        inhibit_time: 0,
    };
    net.with_master(|master, now, send| {
        master.configure_remote_rpdo(NODE, 0, &rpdo, now, send)?;
        master.configure_remote_tpdo(NODE, 0, &tpdo, now, send)
    })
    .unwrap();
    sdo_write(&mut net, MODES_OF_OPERATION, Value::Int8(3));
    sdo_write(&mut net, PROFILE_ACCELERATION, Value::UInt32(1000));
    let codes = completions.codes();
    assert_eq!(codes.len(), 16);
    assert!(codes.iter().all(|c| *c == SdoErrorCode::NoError));

    let master = net.master();
    assert!(master.set_tpdo(NODE, 0, 254, &rpdo.pdo_mappings()).is_ok());
    assert!(master.set_rpdo(NODE, 0, 254, &tpdo.pdo_mappings()).is_ok());
    start(&mut net);

    mirror.target_velocity.store(100);
    for command in [
        CommandName::Shutdown,
        CommandName::SwitchOn,
        CommandName::EnableOperation,
    ] {
        mirror.control_word.store(command.control_word());
        net.master().set_value_changed(NODE, at(CONTROL_WORD));
        net.step(TICK_US);
    }
    assert_eq!(handle.state(), State::OperationEnabled);

    net.run_for(200_000, TICK_US);
    assert_eq!(handle.demand_velocity(), 100);
    assert_eq!(mirror.velocity_demand.load(), 100);
    assert_eq!(mirror.status_word.load() & status::STATE_MASK, 0x27);
}
