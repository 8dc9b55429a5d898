//! Drive states and the command table driving transitions between them
use int_enum::IntEnum;

use crate::bits::status::STATE_MASK;

/// A CiA402 drive state
///
/// The low bits of each discriminant are the state bits of the status word. The transient
/// reaction states carry the bits of the state they settle into, plus a marker bit above
/// [`STATE_MASK`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum State {
    /// Power-on initialisation
    NotReadyToSwitchOn = 0x00,
    /// Initialised, high voltage may be off
    SwitchOnDisabled = 0x40,
    /// Ready for the switch-on command
    ReadyToSwitchOn = 0x21,
    /// Power stage on, drive function off
    SwitchedOn = 0x23,
    /// Drive function enabled
    OperationEnabled = 0x27,
    /// Stopping with the quick stop option code
    QuickStopActive = 0x07,
    /// Reacting to a fault
    FaultReactionActive = 0x0F,
    /// Faulted; waits for a fault reset
    Fault = 0x08,
    /// Stopping with the shutdown option code, then `ReadyToSwitchOn`
    ShutdownReactionActive = 0x121,
    /// Stopping with the disable operation option code, then `SwitchedOn`
    DisableReactionActive = 0x223,
    /// Stopping with the halt option code, then `OperationEnabled`
    HaltReactionActive = 0x427,
}

impl State {
    /// The state bits reported in the status word
    pub fn status_bits(self) -> u16 {
        u16::from(self) & STATE_MASK
    }

    /// The state this one settles into once its reaction completes
    ///
    /// Non-transient states return themselves.
    pub fn settled(self) -> State {
        State::try_from(self.status_bits()).unwrap_or(self)
    }

    /// Returns true for the states which run an option-code ramp before settling
    pub fn is_reaction(self) -> bool {
        matches!(
            self,
            State::QuickStopActive
                | State::FaultReactionActive
                | State::ShutdownReactionActive
                | State::DisableReactionActive
                | State::HaltReactionActive
        )
    }
}

/// The named commands of the control word
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandName {
    /// Shutdown
    Shutdown,
    /// Switch on
    SwitchOn,
    /// Disable voltage
    DisableVoltage,
    /// Disable operation
    DisableOperation,
    /// Enable operation
    EnableOperation,
    /// Fault reset
    FaultReset,
    /// Quick stop
    QuickStop,
}

impl CommandName {
    /// A control word which issues this command
    pub fn control_word(self) -> u16 {
        match self {
            CommandName::Shutdown => 0x06,
            CommandName::SwitchOn => 0x07,
            CommandName::DisableVoltage => 0x00,
            CommandName::DisableOperation => 0x07,
            CommandName::EnableOperation => 0x0F,
            CommandName::FaultReset => 0x80,
            CommandName::QuickStop => 0x02,
        }
    }
}

/// One row of the transition table
#[derive(Clone, Copy, Debug)]
pub struct Command {
    /// The command this row implements
    pub name: CommandName,
    /// Control word bits examined
    pub mask: u16,
    /// Required value of the examined bits
    pub value: u16,
    /// Bits which must change for the command to fire, or 0
    pub changing: u16,
    /// State entered
    pub destination: State,
    /// States the command is accepted in
    pub from: &'static [State],
}

impl Command {
    /// Returns true if a control word change from `old` to `new` issues this command
    pub fn matches(&self, new: u16, old: u16) -> bool {
        (new & self.mask) == self.value
            && (self.changing == 0 || (old & self.changing) != (new & self.changing))
    }

    /// Returns true if the command is accepted in `state`
    pub fn accepted_in(&self, state: State) -> bool {
        self.from.contains(&state.settled())
    }
}

/// The transition table, searched in order
pub const COMMANDS: [Command; 8] = [
    Command {
        name: CommandName::Shutdown,
        mask: 0x87,
        value: 0x06,
        changing: 0,
        destination: State::ReadyToSwitchOn,
        from: &[State::SwitchOnDisabled, State::SwitchedOn],
    },
    Command {
        name: CommandName::Shutdown,
        mask: 0x87,
        value: 0x06,
        changing: 0,
        destination: State::ShutdownReactionActive,
        from: &[State::OperationEnabled],
    },
    Command {
        name: CommandName::SwitchOn,
        mask: 0x8F,
        value: 0x07,
        changing: 0,
        destination: State::SwitchedOn,
        from: &[State::ReadyToSwitchOn],
    },
    Command {
        name: CommandName::DisableVoltage,
        mask: 0x82,
        value: 0x00,
        changing: 0,
        destination: State::SwitchOnDisabled,
        from: &[
            State::ReadyToSwitchOn,
            State::OperationEnabled,
            State::SwitchedOn,
        ],
    },
    Command {
        name: CommandName::DisableOperation,
        mask: 0x8F,
        value: 0x07,
        changing: 0,
        destination: State::DisableReactionActive,
        from: &[State::OperationEnabled],
    },
    Command {
        name: CommandName::EnableOperation,
        mask: 0x8F,
        value: 0x0F,
        changing: 0,
        destination: State::OperationEnabled,
        from: &[State::SwitchedOn, State::QuickStopActive],
    },
    Command {
        name: CommandName::FaultReset,
        mask: 0x80,
        value: 0x80,
        changing: 0x80,
        destination: State::SwitchOnDisabled,
        from: &[State::Fault],
    },
    Command {
        name: CommandName::QuickStop,
        mask: 0x86,
        value: 0x02,
        changing: 0,
        destination: State::QuickStopActive,
        from: &[State::OperationEnabled],
    },
];
