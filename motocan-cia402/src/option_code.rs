//! Option codes selecting the stopping behavior of the reaction states
use int_enum::IntEnum;

/// Stopping behavior for a reaction state (objects 0x605A to 0x605E)
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(i16)]
pub enum OptionCode {
    /// Disable the drive function immediately
    DisableDrive = 0,
    /// Decelerate with the profile deceleration
    SlowDownWithRamp = 1,
    /// Decelerate with the quick stop deceleration
    SlowDownWithQuickStopRamp = 2,
    /// Decelerate with the profile deceleration, then stay in the reaction state
    SlowDownWithRampAndStay = 5,
    /// Decelerate with the quick stop deceleration, then stay in the reaction state
    SlowDownWithQuickStopRampAndStay = 6,
}

/// The deceleration used while stopping
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ramp {
    /// Stop immediately
    None,
    /// Profile deceleration
    Profile,
    /// Quick stop deceleration
    QuickStop,
}

impl OptionCode {
    /// Returns true if the drive remains in the reaction state after stopping
    pub fn is_and_stay(self) -> bool {
        matches!(
            self,
            OptionCode::SlowDownWithRampAndStay | OptionCode::SlowDownWithQuickStopRampAndStay
        )
    }

    /// The deceleration used by this option
    pub fn ramp(self) -> Ramp {
        match self {
            OptionCode::DisableDrive => Ramp::None,
            OptionCode::SlowDownWithRamp | OptionCode::SlowDownWithRampAndStay => Ramp::Profile,
            OptionCode::SlowDownWithQuickStopRamp
            | OptionCode::SlowDownWithQuickStopRampAndStay => Ramp::QuickStop,
        }
    }
}

/// The option code of each reaction state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OptionCodes {
    /// Quick stop option code, 0x605A
    pub quick_stop: OptionCode,
    /// Shutdown option code, 0x605B
    pub shutdown: OptionCode,
    /// Disable operation option code, 0x605C
    pub disable_operation: OptionCode,
    /// Halt option code, 0x605D
    pub halt: OptionCode,
    /// Fault reaction option code, 0x605E
    pub fault_reaction: OptionCode,
}

impl Default for OptionCodes {
    fn default() -> Self {
        Self {
            quick_stop: OptionCode::SlowDownWithQuickStopRamp,
            shutdown: OptionCode::SlowDownWithRamp,
            disable_operation: OptionCode::SlowDownWithRamp,
            halt: OptionCode::SlowDownWithRamp,
            fault_reaction: OptionCode::SlowDownWithQuickStopRamp,
        }
    }
}
