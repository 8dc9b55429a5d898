use std::sync::{Arc, Mutex};

use integration_tests::{
    add_test_node,
    network::SimNetwork,
    test_od::{test_od, TestObjects, COMMAND, COUNTER, GAIN, PARAM, SETPOINT, STATUS},
    Completions,
};
use motocan_client::{MasterConfig, SdoClientConfig};
use motocan_common::{
    messages::{CanId, CanMessage, NmtCommandCmd},
    objects::Address,
    sdo::{AbortCode, SdoErrorCode, SdoResponse},
    DeviceSettings, Value,
};

const NODE: u8 = 5;

fn no_sync() -> MasterConfig {
    MasterConfig {
        sync_period_us: 0,
        ..Default::default()
    }
}

fn setup() -> (SimNetwork, TestObjects, TestObjects) {
    let _ = env_logger::try_init();
    let mut net = SimNetwork::new(no_sync());
    let (objects, mirror) = add_test_node(&mut net, DeviceSettings::new(NODE));
    // Boot-up
    net.step(1000);
    net.bus_log();
    (net, objects, mirror)
}

type Uploads = Arc<Mutex<Vec<(u8, Address, Value)>>>;

fn sdo_read_into(net: &mut SimNetwork, address: Address, uploads: &Uploads) -> SdoErrorCode {
    let sink = uploads.clone();
    net.with_master(|master, now, send| {
        master.sdo_read(
            NODE,
            address,
            Some(Box::new(move |node, address, value| {
                sink.lock().unwrap().push((node, address, value))
            })),
            now,
            send,
        )
    })
}

#[test]
#[serial_test::serial]
fn test_expedited_upload_frames() {
    let (mut net, objects, _mirror) = setup();
    assert!(net
        .device(NODE)
        .write_value(PARAM, Value::UInt32(0x1234_5678))
        .is_ok());
    assert_eq!(objects.param.load(), 0x1234_5678);

    let uploads = Uploads::default();
    assert!(sdo_read_into(&mut net, PARAM, &uploads).is_ok());

    assert_eq!(
        *uploads.lock().unwrap(),
        [(NODE, PARAM, Value::UInt32(0x1234_5678))]
    );
    assert_eq!(
        net.bus_log(),
        [
            CanMessage::new(CanId::std(0x605), &[0x40, 0x02, 0x20, 0x00, 0, 0, 0, 0]),
            CanMessage::new(
                CanId::std(0x585),
                &[0x43, 0x02, 0x20, 0x00, 0x78, 0x56, 0x34, 0x12]
            ),
        ]
    );
    assert!(!net.master().sdo_client().waiting());
}

#[test]
#[serial_test::serial]
fn test_upload_without_callback_fills_mirror() {
    let (mut net, objects, mirror) = setup();
    objects.status.store(0xBEEF);
    objects.gain.store(2.5);

    net.with_master(|master, now, send| {
        assert!(master.sdo_read(NODE, STATUS, None, now, send).is_ok());
        assert!(master.sdo_read(NODE, GAIN, None, now, send).is_ok());
    });

    assert_eq!(mirror.status.load(), 0xBEEF);
    assert_eq!(mirror.gain.load(), 2.5);
    assert_eq!(
        net.master().read(NODE, GAIN),
        Ok(Value::Real32(2.5))
    );
}

#[test]
#[serial_test::serial]
fn test_download_and_completion() {
    let (mut net, objects, _mirror) = setup();
    let completions = Completions::install(net.master());

    net.with_master(|master, now, send| {
        assert!(master
            .sdo_write(NODE, SETPOINT, Value::Int32(-42), now, send)
            .is_ok());
        assert!(master
            .sdo_write(NODE, GAIN, Value::Real32(0.25), now, send)
            .is_ok());
        assert!(master
            .sdo_write(NODE, COMMAND, Value::UInt8(7), now, send)
            .is_ok());
    });

    assert_eq!(objects.setpoint.load(), -42);
    assert_eq!(objects.gain.load(), 0.25);
    assert_eq!(objects.command.load(), 7);
    assert_eq!(
        completions.take(),
        [
            (NODE, SETPOINT, AbortCode::Standard(SdoErrorCode::NoError)),
            (NODE, GAIN, AbortCode::Standard(SdoErrorCode::NoError)),
            (NODE, COMMAND, AbortCode::Standard(SdoErrorCode::NoError)),
        ]
    );
}

#[test]
#[serial_test::serial]
fn test_access_errors_abort() {
    let (mut net, objects, _mirror) = setup();
    let completions = Completions::install(net.master());
    let uploads = Uploads::default();

    net.with_master(|master, now, send| {
        assert!(master
            .sdo_write(NODE, STATUS, Value::UInt16(1), now, send)
            .is_ok());
    });
    assert_eq!(sdo_read_into(&mut net, COMMAND, &uploads), SdoErrorCode::NoError);
    assert_eq!(
        sdo_read_into(&mut net, Address::new(0x3000, 0), &uploads),
        SdoErrorCode::NoError
    );
    assert_eq!(
        sdo_read_into(&mut net, Address::new(0x2001, 3), &uploads),
        SdoErrorCode::NoError
    );
    // Too large for an expedited transfer
    assert_eq!(sdo_read_into(&mut net, COUNTER, &uploads), SdoErrorCode::NoError);

    assert!(uploads.lock().unwrap().is_empty());
    assert_eq!(objects.status.load(), 0);
    assert_eq!(
        completions.codes(),
        [
            SdoErrorCode::WriteOfReadOnlyObject,
            SdoErrorCode::ReadOfWriteOnlyObject,
            SdoErrorCode::ObjectDoesNotExist,
            SdoErrorCode::SubIndexDoesNotExist,
            SdoErrorCode::UnsupportedAccess,
        ]
        .map(AbortCode::Standard)
    );
}

#[test]
#[serial_test::serial]
fn test_large_value_rejected_by_client() {
    let (mut net, objects, _mirror) = setup();
    let result = net.with_master(|master, now, send| {
        master.sdo_write(NODE, COUNTER, Value::UInt64(1 << 40), now, send)
    });
    assert_eq!(result, SdoErrorCode::UnsupportedAccess);
    assert!(net.bus_log().is_empty());
    assert_eq!(objects.counter.load(), 0);
    assert!(!net.master().sdo_client().waiting());
}

#[test]
#[serial_test::serial]
fn test_declared_size_mismatch() {
    let (mut net, objects, _mirror) = setup();
    // Expedited download declaring one byte, to a u32 object
    net.inject(CanMessage::new(
        CanId::std(0x605),
        &[0x2F, 0x02, 0x20, 0x00, 0x01, 0, 0, 0],
    ));
    let log = net.bus_log();
    assert_eq!(log.len(), 2);
    assert_eq!(
        log[1],
        SdoResponse::abort(PARAM, SdoErrorCode::UnsupportedAccess).to_can_message(CanId::std(0x585))
    );
    assert_eq!(objects.param.load(), 0);
}

#[test]
#[serial_test::serial]
fn test_unknown_node() {
    let (mut net, _objects, _mirror) = setup();
    let result = net.with_master(|master, now, send| master.sdo_read(9, PARAM, None, now, send));
    assert_eq!(result, SdoErrorCode::GeneralError);
    assert!(net.bus_log().is_empty());
}

#[test]
#[serial_test::serial]
fn test_timeout_after_retries() {
    let _ = env_logger::try_init();
    let config = MasterConfig {
        sync_period_us: 0,
        sdo: SdoClientConfig {
            timeout_us: 10_000,
            max_attempts: Some(3),
        },
        ..Default::default()
    };
    let mut net = SimNetwork::new(config);
    // Registered with the master, but absent from the bus
    let mirror = TestObjects::default();
    net.master()
        .add_device(9, &test_od(), |b| mirror.register(b))
        .unwrap();
    let completions = Completions::install(net.master());

    net.with_master(|master, now, send| master.sdo_read(9, PARAM, None, now, send));
    net.run_for(25_000, 5_000);
    assert!(net.master().sdo_client().waiting_on(9));
    assert!(completions.take().is_empty());

    net.run_for(10_000, 5_000);
    assert!(!net.master().sdo_client().waiting_on(9));
    assert_eq!(
        completions.take(),
        [(9, PARAM, AbortCode::Standard(SdoErrorCode::SDOProtocolTimedOut))]
    );
    let requests = net
        .bus_log()
        .iter()
        .filter(|m| m.id() == CanId::std(0x609))
        .count();
    assert_eq!(requests, 3);
}

#[test]
#[serial_test::serial]
fn test_stopped_node_does_not_answer() {
    let (mut net, _objects, _mirror) = setup();
    net.with_master(|master, _now, send| master.send_nmt(NmtCommandCmd::Stop, NODE, send));
    net.with_master(|master, now, send| master.sdo_read(NODE, PARAM, None, now, send));
    assert!(net.master().sdo_client().waiting_on(NODE));
    assert!(net
        .bus_log()
        .iter()
        .all(|m| m.id() != CanId::std(0x585)));
}
