//! The CiA402 device control state machine
use defmt_or_log::debug;

use crate::{
    bits::{control, status},
    option_code::OptionCode,
    state::{CommandName, State, COMMANDS},
};

/// Tracks the drive state from successive control words, and composes the status word
#[derive(Clone, Copy, Debug)]
pub struct StateMachine {
    state: State,
    control: u16,
    status: u16,
    last_command: Option<CommandName>,
    quick_stop_option: OptionCode,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a state machine in `SwitchOnDisabled`
    pub fn new() -> Self {
        Self {
            state: State::SwitchOnDisabled,
            control: 0,
            status: 0,
            last_command: None,
            quick_stop_option: OptionCode::SlowDownWithQuickStopRamp,
        }
    }

    /// The current state
    pub fn state(&self) -> State {
        self.state
    }

    /// The last control word passed to [`StateMachine::update`]
    pub fn control_word(&self) -> u16 {
        self.control
    }

    /// The last command which caused a transition
    pub fn last_command(&self) -> Option<CommandName> {
        self.last_command
    }

    /// The quick stop option code
    pub fn quick_stop_option(&self) -> OptionCode {
        self.quick_stop_option
    }

    /// Set the quick stop option code, which decides where `QuickStopActive` settles
    pub fn set_quick_stop_option(&mut self, option: OptionCode) {
        self.quick_stop_option = option;
    }

    /// Process a new control word
    ///
    /// Returns false if the word changed without issuing a command accepted in the current
    /// state. The state is left unchanged in that case. This includes changes to the
    /// mode-specific bits alone (new set-point, change immediately, relative) and a falling
    /// halt bit, so false is not an error by itself.
    pub fn update(&mut self, control_word: u16) -> bool {
        let old = self.control;
        if control_word == old {
            return true;
        }
        self.control = control_word;

        let command = COMMANDS
            .iter()
            .find(|c| c.matches(control_word, old) && c.accepted_in(self.state));
        if let Some(command) = command {
            self.set_state(command.destination);
            self.last_command = Some(command.name);
            return true;
        }

        let halt_rising = control_word & control::HALT != 0 && old & control::HALT == 0;
        if halt_rising && self.state == State::OperationEnabled {
            self.set_state(State::HaltReactionActive);
            return true;
        }

        false
    }

    /// Complete the stopping reaction of the current state
    pub fn set_reaction_done(&mut self) {
        let next = match self.state {
            State::FaultReactionActive => State::Fault,
            State::QuickStopActive if self.quick_stop_option.is_and_stay() => {
                State::QuickStopActive
            }
            State::QuickStopActive => State::SwitchOnDisabled,
            other => other.settled(),
        };
        self.set_state(next);
    }

    /// Enter `FaultReactionActive` from any state
    pub fn start_fault_reaction(&mut self) {
        self.set_state(State::FaultReactionActive);
    }

    /// The status word: state bits from the current state, other bits as set
    pub fn status(&self) -> u16 {
        (self.status & !status::STATE_MASK) | self.state.status_bits()
    }

    /// Set or clear one or more non-state status bits
    ///
    /// State bits in `bits` are ignored.
    pub fn set_status_bits(&mut self, bits: u16, value: bool) {
        let bits = bits & !status::STATE_MASK;
        if value {
            self.status |= bits;
        } else {
            self.status &= !bits;
        }
    }

    /// Returns true if all of `bits` are set in the status word
    pub fn is_status_set(&self, bits: u16) -> bool {
        self.status() & bits == bits
    }

    /// Returns true if all of `bits` are set in the last control word
    pub fn is_control_set(&self, bits: u16) -> bool {
        self.control & bits == bits
    }

    fn set_state(&mut self, state: State) {
        if state != self.state {
            debug!(
                "CiA402 state 0x{:X} -> 0x{:X}",
                u16::from(self.state),
                u16::from(state)
            );
        }
        self.state = state;
    }
}
