//! Modes of operation (0x6060) and the supported modes bitmask (0x6502)
use int_enum::IntEnum;

/// A CiA402 mode of operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(i8)]
#[allow(missing_docs)]
pub enum OperatingMode {
    Disabled = 0,
    ProfilePosition = 1,
    Velocity = 2,
    ProfileVelocity = 3,
    ProfileTorque = 4,
    Homing = 6,
    InterpolatedPosition = 7,
    CyclicSyncPosition = 8,
    CyclicSyncVelocity = 9,
    CyclicSyncTorque = 10,
}

impl OperatingMode {
    /// The bit representing this mode in the supported drive modes object
    ///
    /// `Disabled` has no bit.
    pub fn supported_bit(self) -> u32 {
        match self {
            OperatingMode::Disabled => 0,
            mode => 1 << (i8::from(mode) - 1),
        }
    }

    /// Returns true for the modes which command a velocity
    pub fn is_velocity_mode(self) -> bool {
        matches!(
            self,
            OperatingMode::Velocity
                | OperatingMode::ProfileVelocity
                | OperatingMode::CyclicSyncVelocity
        )
    }
}

/// Compute the value of the supported drive modes object
pub fn supported_modes_mask(modes: &[OperatingMode]) -> u32 {
    modes.iter().fold(0, |mask, mode| mask | mode.supported_bit())
}
