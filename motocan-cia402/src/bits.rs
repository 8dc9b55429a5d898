//! Bit positions of the control word (0x6040) and status word (0x6041)

/// Control word bits
pub mod control {
    /// Switch on
    pub const SWITCH_ON: u16 = 1 << 0;
    /// Enable voltage
    pub const ENABLE_VOLTAGE: u16 = 1 << 1;
    /// Quick stop, active low
    pub const QUICK_STOP: u16 = 1 << 2;
    /// Enable operation
    pub const ENABLE_OPERATION: u16 = 1 << 3;
    /// New set-point (profile position mode)
    pub const NEW_SET_POINT: u16 = 1 << 4;
    /// Change set immediately (profile position mode)
    pub const CHANGE_IMMEDIATELY: u16 = 1 << 5;
    /// Target is relative to the current demand (profile position mode)
    pub const RELATIVE: u16 = 1 << 6;
    /// Fault reset, acts on a rising edge
    pub const FAULT_RESET: u16 = 1 << 7;
    /// Halt
    pub const HALT: u16 = 1 << 8;
}

/// Status word bits
pub mod status {
    /// Ready to switch on
    pub const READY_TO_SWITCH_ON: u16 = 1 << 0;
    /// Switched on
    pub const SWITCHED_ON: u16 = 1 << 1;
    /// Operation enabled
    pub const OPERATION_ENABLED: u16 = 1 << 2;
    /// Fault
    pub const FAULT: u16 = 1 << 3;
    /// Voltage present
    pub const VOLTAGE_PRESENT: u16 = 1 << 4;
    /// Not quick stopping, active low
    pub const NOT_QUICK_STOPPING: u16 = 1 << 5;
    /// Switch on disabled
    pub const SWITCH_ON_DISABLED: u16 = 1 << 6;
    /// Warning
    pub const WARNING: u16 = 1 << 7;
    /// Manufacturer specific
    pub const BUSY: u16 = 1 << 8;
    /// Controlled remotely over CAN
    pub const REMOTE: u16 = 1 << 9;
    /// Target reached
    pub const TARGET_REACHED: u16 = 1 << 10;
    /// Internal limit active
    pub const INTERNAL_LIMIT: u16 = 1 << 11;
    /// Operating mode specific; set-point acknowledge in profile position mode
    pub const SET_POINT_ACKNOWLEDGE: u16 = 1 << 12;
    /// Operating mode specific; following error in profile position mode
    pub const FOLLOWING_ERROR: u16 = 1 << 13;

    /// The bits of the status word which encode the drive state
    pub const STATE_MASK: u16 = 0x6F;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mask_covers_state_bits() {
        let state_bits = status::READY_TO_SWITCH_ON
            | status::SWITCHED_ON
            | status::OPERATION_ENABLED
            | status::FAULT
            | status::NOT_QUICK_STOPPING
            | status::SWITCH_ON_DISABLED;
        assert_eq!(status::STATE_MASK, state_bits);
        assert_eq!(status::STATE_MASK & status::VOLTAGE_PRESENT, 0);
        assert_eq!(control::HALT, 0x100);
        assert_eq!(control::FAULT_RESET, 0x80);
    }
}
