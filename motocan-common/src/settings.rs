//! Start-up settings for a node
//!
//! These are the initial values of the standard communication objects. Most of them can be changed
//! later over SDO.

/// The upper limit on the number of RPDOs or TPDOs a node may have
pub const MAX_PDOS: usize = 8;

/// The 128-bit identity of a device (object 0x1018)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
pub struct Identity {
    /// The 32-bit vendor ID for this device
    pub vendor_id: u32,
    /// The 32-bit product code for this device
    pub product_code: u32,
    /// The 32-bit revision number for this device
    pub revision_number: u32,
    /// The 32-bit serial number for this device
    #[cfg_attr(feature = "serde", serde(default))]
    pub serial_number: u32,
}

/// SYNC consumer settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct SyncSettings {
    /// COB-ID of the SYNC object (0x1005)
    pub cob_id: u32,
    /// Expected period between SYNC messages in microseconds (0x1006). 0 disables monitoring.
    pub period_us: u32,
    /// Length of the synchronous window in microseconds (0x1007)
    pub window_us: u32,
    /// Counter overflow value (0x1019). 0 means SYNC carries no counter.
    pub counter_overflow: u8,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cob_id: 0x80,
            period_us: 0,
            window_us: 0,
            counter_overflow: 0,
        }
    }
}

/// A monitored heartbeat producer (object 0x1016 sub1)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
pub struct HeartbeatConsumer {
    /// The node whose heartbeat is expected
    pub node: u8,
    /// Timeout in milliseconds. 0 disables monitoring.
    pub time_ms: u16,
}

impl HeartbeatConsumer {
    /// Encode as the 0x1016 sub-object value: `node << 16 | time_ms`
    pub fn encode(&self) -> u32 {
        ((self.node as u32) << 16) | self.time_ms as u32
    }

    /// Decode from the 0x1016 sub-object value
    pub fn decode(value: u32) -> Self {
        Self {
            node: (value >> 16) as u8,
            time_ms: value as u16,
        }
    }
}

/// Everything a device needs at construction besides its object dictionary
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Node ID, 1..=127
    pub node_id: u8,
    /// Value of the device type object (0x1000)
    pub device_type: u32,
    /// Identity object values
    pub identity: Identity,
    /// Heartbeat producer time in milliseconds (0x1017). 0 disables the heartbeat.
    pub heartbeat_producer_ms: u16,
    /// Heartbeat consumer (0x1016)
    pub heartbeat_consumer: HeartbeatConsumer,
    /// SYNC consumer settings
    pub sync: SyncSettings,
    /// EMCY inhibit time in units of 100us (0x1015)
    pub emcy_inhibit_100us: u16,
    /// Number of RPDO slots, at most [`MAX_PDOS`]
    pub num_rpdo: u8,
    /// Number of TPDO slots, at most [`MAX_PDOS`]
    pub num_tpdo: u8,
}

impl DeviceSettings {
    /// Default settings for `node_id`
    pub fn new(node_id: u8) -> Self {
        Self {
            node_id,
            device_type: 0,
            identity: Identity::default(),
            heartbeat_producer_ms: 0,
            heartbeat_consumer: HeartbeatConsumer::default(),
            sync: SyncSettings::default(),
            emcy_inhibit_100us: 0,
            num_rpdo: 4,
            num_tpdo: 4,
        }
    }
}
