//! Constants defining standard object indices

/// Object indices for standard communication objects
pub mod object_ids {
    /// Device type
    pub const DEVICE_TYPE: u16 = 0x1000;
    /// Error register
    pub const ERROR_REGISTER: u16 = 0x1001;
    /// Pre-defined error field (error history)
    pub const ERROR_HISTORY: u16 = 0x1003;
    /// SYNC COB-ID
    pub const SYNC_COB_ID: u16 = 0x1005;
    /// Communication cycle period, in microseconds
    pub const SYNC_PERIOD: u16 = 0x1006;
    /// Synchronous window length, in microseconds
    pub const SYNC_WINDOW: u16 = 0x1007;
    /// EMCY COB-ID
    pub const EMCY_COB_ID: u16 = 0x1014;
    /// EMCY inhibit time, in units of 100us
    pub const EMCY_INHIBIT_TIME: u16 = 0x1015;
    /// Consumer heartbeat time
    pub const HEARTBEAT_CONSUMER_TIME: u16 = 0x1016;
    /// Producer heartbeat time, in milliseconds
    pub const HEARTBEAT_PRODUCER_TIME: u16 = 0x1017;
    /// Identity object
    pub const IDENTITY: u16 = 0x1018;
    /// Synchronous counter overflow value
    pub const SYNC_COUNTER_OVERFLOW: u16 = 0x1019;
    /// First SDO server parameter object
    pub const SDO_SERVER: u16 = 0x1200;
    /// First RPDO communication parameter object
    pub const RPDO_COMM_BASE: u16 = 0x1400;
    /// First RPDO mapping parameter object
    pub const RPDO_MAPPING_BASE: u16 = 0x1600;
    /// First TPDO communication parameter object
    pub const TPDO_COMM_BASE: u16 = 0x1800;
    /// First TPDO mapping parameter object
    pub const TPDO_MAPPING_BASE: u16 = 0x1A00;
}

/// Depth of the pre-defined error field
pub const ERROR_HISTORY_DEPTH: usize = 8;

/// Bit 31 of the EMCY COB-ID object; when set, EMCY messages are not sent
pub const EMCY_DISABLE_BIT: u32 = 1 << 31;
