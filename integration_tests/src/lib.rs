//! Support code for the cross-crate tests
pub mod network;
pub mod sim_bus;
pub mod test_od;

use std::sync::{Arc, Mutex};

use motocan_client::CanopenMaster;
use motocan_common::{objects::Address, sdo::AbortCode, DeviceSettings};
use motocan_node::CanopenDevice;
use network::SimNetwork;
use test_od::{test_od, TestObjects};

/// Create a device serving the test dictionary, returning the device and its object storage
pub fn test_device(settings: DeviceSettings) -> (CanopenDevice, TestObjects) {
    let objects = TestObjects::default();
    let o = objects.clone();
    let device = CanopenDevice::new(test_od(), settings, move |builder| o.register(builder))
        .unwrap_or_else(|e| panic!("failed to build test device: {e}"));
    (device, objects)
}

/// Attach a test device to `net` and register its mirror with the master
///
/// Returns the device's objects and the mirror's objects.
pub fn add_test_node(net: &mut SimNetwork, settings: DeviceSettings) -> (TestObjects, TestObjects) {
    let node = settings.node_id;
    let (device, objects) = test_device(settings);
    net.add_device(device);
    let mirror = TestObjects::default();
    let m = mirror.clone();
    net.master()
        .add_device(node, &test_od(), move |builder| m.register(builder))
        .unwrap_or_else(|e| panic!("failed to register node {node}: {e}"));
    (objects, mirror)
}

/// One finished SDO request
pub type Completion = (u8, Address, AbortCode);

/// Records the SDO completions reported by a master
#[derive(Debug, Clone, Default)]
pub struct Completions(Arc<Mutex<Vec<Completion>>>);

impl Completions {
    /// Install a recorder as the completion callback of `master`
    pub fn install(master: &CanopenMaster) -> Self {
        let completions = Self::default();
        let sink = completions.0.clone();
        master.set_completion_callback(Box::new(move |node, address, code| {
            sink.lock().unwrap().push((node, address, code));
        }));
        completions
    }

    /// Take every completion recorded so far
    pub fn take(&self) -> Vec<Completion> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    /// Take the abort codes recorded so far
    pub fn codes(&self) -> Vec<AbortCode> {
        self.take().into_iter().map(|(_, _, code)| code).collect()
    }
}
