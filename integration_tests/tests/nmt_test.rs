use integration_tests::{add_test_node, network::SimNetwork};
use motocan_client::MasterConfig;
use motocan_common::{
    emcy::EmcyError,
    messages::{CanId, CanMessage, Heartbeat, NmtCommandCmd, NmtState},
    settings::HeartbeatConsumer,
    DeviceSettings,
};

fn no_sync() -> MasterConfig {
    MasterConfig {
        sync_period_us: 0,
        ..Default::default()
    }
}

fn emcy_codes(frames: &[CanMessage], node: u8) -> Vec<u16> {
    frames
        .iter()
        .filter(|m| m.id() == CanId::std(0x80 + node as u16))
        .map(|m| u16::from_le_bytes([m.data()[0], m.data()[1]]))
        .collect()
}

fn nmt(net: &mut SimNetwork, cmd: NmtCommandCmd, node: u8) {
    net.with_master(|master, _now, send| master.send_nmt(cmd, node, send));
}

#[test]
#[serial_test::serial]
fn test_boot_up_and_state_tracking() {
    let _ = env_logger::try_init();
    let mut net = SimNetwork::new(no_sync());
    for node in [5, 6] {
        let mut settings = DeviceSettings::new(node);
        settings.heartbeat_producer_ms = 100;
        add_test_node(&mut net, settings);
    }
    assert!(net.master().nodes_seen().is_empty());

    net.step(1000);
    assert_eq!(
        net.bus_log(),
        [
            CanMessage::new(CanId::std(0x705), &[0]),
            CanMessage::new(CanId::std(0x706), &[0]),
        ]
    );
    assert_eq!(net.master().node_state(5), Some(NmtState::Bootup));
    assert_eq!(net.device(5).nmt_state(), NmtState::PreOperational);

    net.run_for(100_000, 10_000);
    assert_eq!(net.master().node_state(5), Some(NmtState::PreOperational));
    assert_eq!(net.master().node_state(6), Some(NmtState::PreOperational));
    let seen = net.master().nodes_seen();
    assert_eq!(seen.iter().map(|s| s.id).collect::<Vec<_>>(), [5, 6]);
    assert_eq!(seen[0].last_seen_us, 101_000);

    nmt(&mut net, NmtCommandCmd::Start, 5);
    assert_eq!(net.device(5).nmt_state(), NmtState::Operational);
    assert_eq!(net.device(6).nmt_state(), NmtState::PreOperational);
    net.run_for(100_000, 10_000);
    assert_eq!(net.master().node_state(5), Some(NmtState::Operational));

    nmt(&mut net, NmtCommandCmd::Stop, 0);
    net.run_for(100_000, 10_000);
    assert_eq!(net.master().node_state(5), Some(NmtState::Stopped));
    assert_eq!(net.master().node_state(6), Some(NmtState::Stopped));

    // A reset announces itself with a new boot-up
    nmt(&mut net, NmtCommandCmd::ResetComm, 6);
    net.bus_log();
    net.step(1000);
    assert_eq!(net.bus_log(), [CanMessage::new(CanId::std(0x706), &[0])]);
    assert_eq!(net.master().node_state(6), Some(NmtState::Bootup));
    assert_eq!(net.device(6).nmt_state(), NmtState::PreOperational);
    assert_eq!(net.device(5).nmt_state(), NmtState::Stopped);
}

#[test]
#[serial_test::serial]
fn test_node_guarding() {
    let _ = env_logger::try_init();
    let mut net = SimNetwork::new(no_sync());
    add_test_node(&mut net, DeviceSettings::new(5));
    net.step(1000);
    net.bus_log();

    let rtr = CanMessage::new_rtr(CanId::std(0x705));
    net.inject(rtr);
    net.inject(rtr);
    let log = net.bus_log();
    assert_eq!(log.len(), 4);
    assert_eq!(log[1].data(), &[127]);
    assert_eq!(log[3].data(), &[127 | 0x80]);
}

#[test]
#[serial_test::serial]
fn test_sync_producer_and_window() {
    let _ = env_logger::try_init();
    let mut net = SimNetwork::new(MasterConfig {
        sync_period_us: 10_000,
        sync_window_us: 2_000,
        sync_counter_overflow: 4,
        ..Default::default()
    });
    let mut settings = DeviceSettings::new(5);
    settings.sync.period_us = 10_000;
    settings.sync.window_us = 2_000;
    settings.sync.counter_overflow = 4;
    add_test_node(&mut net, settings);
    nmt(&mut net, NmtCommandCmd::Start, 0);

    // The first SYNC goes out on the first update
    net.step(1000);
    assert!(net.master().is_in_sync_window());
    net.step(1000);
    assert!(net.device(5).is_in_sync_window());
    net.step(2000);
    assert!(!net.master().is_in_sync_window());
    assert!(!net.device(5).is_in_sync_window());

    net.run_for(46_000, 1000);
    let log = net.bus_log();
    let counters: Vec<u8> = log
        .iter()
        .filter(|m| m.id() == CanId::std(0x80))
        .map(|m| m.data()[0])
        .collect();
    assert_eq!(counters, [1, 2, 3, 4, 1]);
    assert!(emcy_codes(&log, 5).is_empty());
    assert!(net.device(5).current_error().is_none());
    assert_eq!(net.device(5).nmt_state(), NmtState::Operational);
}

#[test]
#[serial_test::serial]
fn test_missed_sync_reported_once_per_period() {
    let _ = env_logger::try_init();
    let mut net = SimNetwork::new(no_sync());
    let mut settings = DeviceSettings::new(5);
    settings.sync.period_us = 10_000;
    add_test_node(&mut net, settings);
    net.step(1000);
    nmt(&mut net, NmtCommandCmd::Start, 5);

    // A single SYNC, then silence
    net.inject(CanMessage::new(CanId::std(0x80), &[]));
    net.bus_log();

    net.run_for(10_500, 500);
    assert!(emcy_codes(&net.bus_log(), 5).is_empty());
    assert_eq!(net.device(5).nmt_state(), NmtState::Operational);

    net.run_for(10_000, 500);
    assert_eq!(emcy_codes(&net.bus_log(), 5), [0x8100]);
    // A communication error leaves the operational state
    assert_eq!(net.device(5).nmt_state(), NmtState::PreOperational);
    let status = net.master().node_status(5).unwrap();
    assert_eq!(
        status.last_emcy.and_then(|e| e.error()),
        Some(EmcyError::GenericCommunicationError)
    );

    net.run_for(10_000, 500);
    assert_eq!(emcy_codes(&net.bus_log(), 5), [0x8100]);
    assert_eq!(net.device(5).error_history()[0], 0x8100);
}

#[test]
#[serial_test::serial]
fn test_heartbeat_consumer_timeout() {
    let _ = env_logger::try_init();
    let mut net = SimNetwork::new(no_sync());
    let mut settings = DeviceSettings::new(5);
    settings.heartbeat_consumer = HeartbeatConsumer {
        node: 0x20,
        time_ms: 100,
    };
    add_test_node(&mut net, settings);
    net.step(1000);

    let heartbeat: CanMessage = Heartbeat {
        node: 0x20,
        toggle: false,
        state: NmtState::Operational,
    }
    .into();
    net.inject(heartbeat);
    assert_eq!(net.master().node_state(0x20), Some(NmtState::Operational));
    net.bus_log();

    net.run_for(100_000, 10_000);
    assert!(!net.device(5).has_missed_heartbeat());
    net.step(10_000);
    assert!(net.device(5).has_missed_heartbeat());
    assert_eq!(emcy_codes(&net.bus_log(), 5), [0x8130]);

    // Reported once
    net.run_for(100_000, 10_000);
    assert!(emcy_codes(&net.bus_log(), 5).is_empty());

    net.inject(heartbeat);
    assert!(!net.device(5).has_missed_heartbeat());
}
