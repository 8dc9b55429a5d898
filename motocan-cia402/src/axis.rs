//! A CiA402 axis, served as a [`Protocol`] of a motocan device
use alloc::{sync::Arc, vec::Vec};
use core::cell::RefCell;

use critical_section::Mutex;
use defmt_or_log::{debug, info};
use micromath::F32Ext;
use motocan_common::{
    emcy::{error_register, EmcyError},
    objects::{Address, Entry},
    SdoErrorCode,
};
use motocan_node::{handler_map::HandlerValue, BuildError, DeviceEvents, HandlerMapBuilder, Protocol};

use crate::{
    bits::{control, status},
    objects::*,
    operating_mode::{supported_modes_mask, OperatingMode},
    option_code::{OptionCode, OptionCodes, Ramp},
    scaling::{FactorTerm, Polarity, Scaling, FIRST_FACTOR_INDEX, NUM_FACTORS},
    state::State,
    state_machine::StateMachine,
    trajectory::Trajectory,
};

/// Number of axes a device can carry
pub const MAX_AXES: u8 = 8;

/// Modes supported by [`Cia402Axis::new`]
pub const DEFAULT_MODES: [OperatingMode; 4] = [
    OperatingMode::ProfilePosition,
    OperatingMode::ProfileVelocity,
    OperatingMode::CyclicSyncPosition,
    OperatingMode::CyclicSyncVelocity,
];

// Objects reported as changed to trigger TPDOs, in the order of `Snapshot`
const REPORTED_OBJECTS: [u16; 6] = [
    STATUS_WORD,
    MODES_OF_OPERATION_DISPLAY,
    POSITION_DEMAND,
    VELOCITY_DEMAND,
    POSITION_ACTUAL,
    VELOCITY_ACTUAL,
];

type Snapshot = [i32; 6];
type Shared = Arc<Mutex<RefCell<AxisState>>>;

fn with<R>(shared: &Shared, f: impl FnOnce(&mut AxisState) -> R) -> R {
    critical_section::with(|cs| f(&mut shared.borrow_ref_mut(cs)))
}

fn approach(current: f32, target: f32, step: f32) -> f32 {
    if current < target {
        (current + step).min(target)
    } else {
        (current - step).max(target)
    }
}

#[derive(Debug)]
struct AxisState {
    machine: StateMachine,
    options: OptionCodes,
    mode: OperatingMode,
    supported_modes: u32,
    scaling: Scaling,
    target_position: i32,
    target_velocity: i32,
    profile_velocity: u32,
    profile_acceleration: u32,
    quick_stop_deceleration: u32,
    position_limits: [i32; 2],
    trajectory: Trajectory,
    actual: Option<(i32, i32)>,
    new_set_point: bool,
    set_point_acknowledged: bool,
    target_reached: bool,
    internal_limit: bool,
    pending_fault: Option<EmcyError>,
    last_update_us: Option<u64>,
}

impl AxisState {
    fn new(supported_modes: u32) -> Self {
        let mut machine = StateMachine::new();
        machine.set_status_bits(status::REMOTE, true);
        let options = OptionCodes::default();
        machine.set_quick_stop_option(options.quick_stop);
        Self {
            machine,
            options,
            mode: OperatingMode::Disabled,
            supported_modes,
            scaling: Scaling::default(),
            target_position: 0,
            target_velocity: 0,
            profile_velocity: 0,
            profile_acceleration: 0,
            quick_stop_deceleration: 0,
            position_limits: [i32::MIN, i32::MAX],
            trajectory: Trajectory::new(),
            actual: None,
            new_set_point: false,
            set_point_acknowledged: false,
            target_reached: false,
            internal_limit: false,
            pending_fault: None,
            last_update_us: None,
        }
    }

    fn write_control_word(&mut self, control_word: u16) -> SdoErrorCode {
        let old = self.machine.control_word();
        if !self.machine.update(control_word) {
            debug!(
                "Control word 0x{:X} ignored in state 0x{:X}",
                control_word,
                u16::from(self.machine.state())
            );
        }
        let set_point = control_word & control::NEW_SET_POINT != 0;
        if set_point && old & control::NEW_SET_POINT == 0 {
            self.new_set_point = true;
        } else if !set_point {
            self.set_point_acknowledged = false;
        }
        self.refresh_status();
        SdoErrorCode::NoError
    }

    fn option(&self, index: u16) -> OptionCode {
        match index {
            QUICK_STOP_OPTION => self.options.quick_stop,
            SHUTDOWN_OPTION => self.options.shutdown,
            DISABLE_OPERATION_OPTION => self.options.disable_operation,
            HALT_OPTION => self.options.halt,
            _ => self.options.fault_reaction,
        }
    }

    fn write_option(&mut self, index: u16, value: i16) -> SdoErrorCode {
        let Ok(option) = OptionCode::try_from(value) else {
            return SdoErrorCode::InvalidValue;
        };
        match index {
            QUICK_STOP_OPTION => {
                self.options.quick_stop = option;
                self.machine.set_quick_stop_option(option);
            }
            SHUTDOWN_OPTION => self.options.shutdown = option,
            DISABLE_OPERATION_OPTION => self.options.disable_operation = option,
            HALT_OPTION => self.options.halt = option,
            _ => self.options.fault_reaction = option,
        }
        SdoErrorCode::NoError
    }

    fn write_mode(&mut self, value: i8) -> SdoErrorCode {
        let mode = match OperatingMode::try_from(value) {
            Ok(mode)
                if mode == OperatingMode::Disabled
                    || self.supported_modes & mode.supported_bit() != 0 =>
            {
                mode
            }
            _ => return SdoErrorCode::InvalidValue,
        };
        if mode != self.mode {
            info!("CiA402 mode {} -> {}", i8::from(self.mode), value);
            self.mode = mode;
            let (position, velocity) = (self.trajectory.position(), self.trajectory.velocity());
            self.trajectory.reset(position, velocity);
            self.new_set_point = false;
        }
        SdoErrorCode::NoError
    }

    fn reaction_option(&self, state: State) -> Option<OptionCode> {
        match state {
            State::QuickStopActive => Some(self.options.quick_stop),
            State::ShutdownReactionActive => Some(self.options.shutdown),
            State::DisableReactionActive => Some(self.options.disable_operation),
            State::HaltReactionActive => Some(self.options.halt),
            State::FaultReactionActive => Some(self.options.fault_reaction),
            _ => None,
        }
    }

    fn position_limits_internal(&self) -> (f32, f32) {
        let [min, max] = self.position_limits;
        let a = self.scaling.position_to_internal(min) as f32;
        let b = self.scaling.position_to_internal(max) as f32;
        (a.min(b), a.max(b))
    }

    /// Advance the axis by one control period. Returns a fault raised since the last step.
    fn step(&mut self, now_us: u64) -> Option<EmcyError> {
        let dt = match self.last_update_us.replace(now_us) {
            Some(last) if now_us > last => (now_us - last) as f32 / 1_000_000.0,
            _ => 0.0,
        };
        let fault = self.pending_fault.take();
        if fault.is_some() {
            self.machine.start_fault_reaction();
        }

        let (min, max) = self.position_limits_internal();
        self.trajectory.set_limits(min, max);
        self.trajectory.set_profile(
            self.scaling.speed_to_internal(self.profile_velocity) as f32,
            self.scaling.acceleration_to_internal(self.profile_acceleration) as f32,
        );

        let state = self.machine.state();
        if state == State::OperationEnabled {
            if self.machine.is_control_set(control::HALT) {
                self.stop(self.options.halt.ramp(), dt);
                self.target_reached = self.trajectory.velocity() == 0.0;
            } else {
                self.run_mode(dt);
            }
        } else if let Some(option) = self.reaction_option(state) {
            self.stop(option.ramp(), dt);
            let stopped = self.trajectory.velocity() == 0.0;
            if stopped && state != State::FaultReactionActive && !option.is_and_stay() {
                self.machine.set_reaction_done();
            }
        } else {
            self.hold();
        }
        self.refresh_status();
        fault
    }

    fn run_mode(&mut self, dt: f32) {
        match self.mode {
            OperatingMode::ProfilePosition => {
                if core::mem::take(&mut self.new_set_point) {
                    let mut target = self.scaling.position_to_internal(self.target_position) as f32;
                    if self.machine.is_control_set(control::RELATIVE) {
                        target += self.trajectory.target();
                    }
                    self.internal_limit = !self.trajectory.set_target(target);
                    self.set_point_acknowledged = true;
                }
                self.trajectory.step(dt);
                self.target_reached = self.trajectory.is_done();
            }
            mode if mode.is_velocity_mode() => {
                let target = self.scaling.velocity_to_internal(self.target_velocity) as f32;
                let accel = self.scaling.acceleration_to_internal(self.profile_acceleration) as f32;
                let velocity = if mode == OperatingMode::CyclicSyncVelocity || accel <= 0.0 {
                    target
                } else {
                    approach(self.trajectory.velocity(), target, accel * dt)
                };
                self.advance(velocity, dt);
                self.target_reached = velocity == target;
            }
            OperatingMode::CyclicSyncPosition | OperatingMode::InterpolatedPosition => {
                let (min, max) = self.position_limits_internal();
                let requested = self.scaling.position_to_internal(self.target_position) as f32;
                let target = requested.clamp(min, max);
                let velocity = if dt > 0.0 {
                    (target - self.trajectory.position()) / dt
                } else {
                    0.0
                };
                self.internal_limit = target != requested;
                self.trajectory.reset(target, velocity);
                self.target_reached = true;
            }
            _ => {
                self.stop(Ramp::None, dt);
                self.target_reached = false;
            }
        }
    }

    fn stop(&mut self, ramp: Ramp, dt: f32) {
        let decel = match ramp {
            Ramp::None => 0.0,
            Ramp::Profile => self.scaling.acceleration_to_internal(self.profile_acceleration) as f32,
            Ramp::QuickStop => {
                self.scaling.acceleration_to_internal(self.quick_stop_deceleration) as f32
            }
        };
        let velocity = if decel <= 0.0 {
            0.0
        } else {
            approach(self.trajectory.velocity(), 0.0, decel * dt)
        };
        self.advance(velocity, dt);
    }

    fn advance(&mut self, velocity: f32, dt: f32) {
        let position =
            self.trajectory.position() + (self.trajectory.velocity() + velocity) * 0.5 * dt;
        self.trajectory.reset(position, velocity);
    }

    // Drive function disabled: demand follows the actual position
    fn hold(&mut self) {
        let position = match self.actual {
            Some((position, _)) => position as f32,
            None => self.trajectory.position(),
        };
        self.trajectory.reset(position, 0.0);
        self.new_set_point = false;
        self.target_reached = false;
    }

    fn refresh_status(&mut self) {
        let machine = &mut self.machine;
        machine.set_status_bits(status::TARGET_REACHED, self.target_reached);
        machine.set_status_bits(status::SET_POINT_ACKNOWLEDGE, self.set_point_acknowledged);
        machine.set_status_bits(status::INTERNAL_LIMIT, self.internal_limit);
    }

    fn demand_internal(&self) -> (i32, i32) {
        (
            F32Ext::round(self.trajectory.position()) as i32,
            F32Ext::round(self.trajectory.velocity()) as i32,
        )
    }

    fn actual_internal(&self) -> (i32, i32) {
        self.actual.unwrap_or_else(|| self.demand_internal())
    }

    fn demand_position(&self) -> i32 {
        self.scaling.position_to_user(self.demand_internal().0)
    }

    fn demand_velocity(&self) -> i32 {
        self.scaling.velocity_to_user(self.demand_internal().1)
    }

    fn actual_position(&self) -> i32 {
        self.scaling.position_to_user(self.actual_internal().0)
    }

    fn actual_velocity(&self) -> i32 {
        self.scaling.velocity_to_user(self.actual_internal().1)
    }

    fn snapshot(&self) -> Snapshot {
        [
            i32::from(self.machine.status()),
            i32::from(i8::from(self.mode)),
            self.demand_position(),
            self.demand_velocity(),
            self.actual_position(),
            self.actual_velocity(),
        ]
    }
}

fn serve_read<T: HandlerValue>(
    builder: &mut HandlerMapBuilder,
    address: Address,
    shared: &Shared,
    read: impl Fn(&AxisState) -> T + Send + 'static,
) -> Result<(), BuildError> {
    let shared = shared.clone();
    builder.set_read_handler(address, move || with(&shared, |s| read(s)))?;
    Ok(())
}

fn serve_write<T: HandlerValue>(
    builder: &mut HandlerMapBuilder,
    address: Address,
    shared: &Shared,
    mut write: impl FnMut(&mut AxisState, T) -> SdoErrorCode + Send + 'static,
) -> Result<(), BuildError> {
    let shared = shared.clone();
    builder.set_write_handler(address, move |value: T| {
        with(&shared, |s| write(s, value))
    })?;
    Ok(())
}

fn serve_field<T: HandlerValue>(
    builder: &mut HandlerMapBuilder,
    address: Address,
    shared: &Shared,
    field: fn(&mut AxisState) -> &mut T,
) -> Result<(), BuildError> {
    let reader = shared.clone();
    builder.set_read_handler(address, move || with(&reader, |s| *field(s)))?;
    serve_write(builder, address, shared, move |s, value: T| {
        *field(s) = value;
        SdoErrorCode::NoError
    })
}

/// A CiA402 drive axis
///
/// The axis adds the profile objects (0x6040 onwards, offset by [`AXIS_OFFSET`] per axis) to a
/// device, and runs the drive state machine and set-point generation from the device's
/// `update`. The application exchanges demand and feedback values with it through an
/// [`AxisHandle`].
pub struct Cia402Axis {
    axis: u8,
    base: u16,
    supported_modes: u32,
    shared: Shared,
    reported: Option<Snapshot>,
}

impl core::fmt::Debug for Cia402Axis {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cia402Axis")
            .field("axis", &self.axis)
            .field("supported_modes", &self.supported_modes)
            .finish()
    }
}

impl Cia402Axis {
    /// Create axis number `axis`, supporting the [`DEFAULT_MODES`]
    ///
    /// Axis numbers wrap at [`MAX_AXES`].
    pub fn new(axis: u8) -> Self {
        Self::with_modes(axis, &DEFAULT_MODES)
    }

    /// Create axis number `axis`, supporting `modes`
    pub fn with_modes(axis: u8, modes: &[OperatingMode]) -> Self {
        let axis = axis % MAX_AXES;
        let supported_modes = supported_modes_mask(modes);
        Self {
            axis,
            base: u16::from(axis) * AXIS_OFFSET,
            supported_modes,
            shared: Arc::new(Mutex::new(RefCell::new(AxisState::new(supported_modes)))),
            reported: None,
        }
    }

    /// The axis number
    pub fn axis(&self) -> u8 {
        self.axis
    }

    /// The dictionary address of a profile object on this axis
    pub fn address(&self, index: u16, sub: u8) -> Address {
        Address::new(self.base + index, sub)
    }

    /// Get a handle for exchanging values with the application
    pub fn handle(&self) -> AxisHandle {
        AxisHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Protocol for Cia402Axis {
    fn object_entries(&self) -> Vec<Entry> {
        entries(self.axis)
    }

    fn register_handlers(&mut self, builder: &mut HandlerMapBuilder) -> Result<(), BuildError> {
        let base = self.base;
        let at = |index: u16, sub: u8| Address::new(base + index, sub);
        let shared = &self.shared;

        serve_read(builder, at(CONTROL_WORD, 0), shared, |s| s.machine.control_word())?;
        serve_write(builder, at(CONTROL_WORD, 0), shared, AxisState::write_control_word)?;
        serve_read(builder, at(STATUS_WORD, 0), shared, |s| s.machine.status())?;

        for index in OPTION_CODE_OBJECTS {
            serve_read(builder, at(index, 0), shared, move |s| i16::from(s.option(index)))?;
            serve_write(builder, at(index, 0), shared, move |s, v: i16| {
                s.write_option(index, v)
            })?;
        }

        serve_read(builder, at(MODES_OF_OPERATION, 0), shared, |s| i8::from(s.mode))?;
        serve_write(builder, at(MODES_OF_OPERATION, 0), shared, AxisState::write_mode)?;
        serve_read(builder, at(MODES_OF_OPERATION_DISPLAY, 0), shared, |s| {
            i8::from(s.mode)
        })?;

        serve_read(builder, at(POSITION_DEMAND, 0), shared, AxisState::demand_position)?;
        serve_read(builder, at(VELOCITY_DEMAND, 0), shared, AxisState::demand_velocity)?;
        serve_read(builder, at(POSITION_ACTUAL, 0), shared, AxisState::actual_position)?;
        serve_read(builder, at(VELOCITY_ACTUAL, 0), shared, AxisState::actual_velocity)?;

        serve_field(builder, at(TARGET_POSITION, 0), shared, |s| &mut s.target_position)?;
        serve_field(builder, at(TARGET_VELOCITY, 0), shared, |s| &mut s.target_velocity)?;
        serve_field(builder, at(PROFILE_VELOCITY, 0), shared, |s| &mut s.profile_velocity)?;
        serve_field(builder, at(PROFILE_ACCELERATION, 0), shared, |s| {
            &mut s.profile_acceleration
        })?;
        serve_field(builder, at(QUICK_STOP_DECELERATION, 0), shared, |s| {
            &mut s.quick_stop_deceleration
        })?;

        builder.set_constant(at(POSITION_LIMIT, 0), 2u8)?;
        serve_field(builder, at(POSITION_LIMIT, 1), shared, |s| &mut s.position_limits[0])?;
        serve_field(builder, at(POSITION_LIMIT, 2), shared, |s| &mut s.position_limits[1])?;

        serve_read(builder, at(POLARITY, 0), shared, |s| s.scaling.polarity.0)?;
        serve_write(builder, at(POLARITY, 0), shared, |s, v: u8| {
            s.scaling.polarity = Polarity(v);
            SdoErrorCode::NoError
        })?;

        for i in 0..NUM_FACTORS as u16 {
            let index = FIRST_FACTOR_INDEX + i;
            builder.set_constant(at(index, 0), 2u8)?;
            for (sub, term) in [(1, FactorTerm::Numerator), (2, FactorTerm::Divisor)] {
                serve_read(builder, at(index, sub), shared, move |s| s.scaling.term(index, term))?;
                serve_write(builder, at(index, sub), shared, move |s, v: u32| {
                    s.scaling.set_term(index, term, v)
                })?;
            }
        }

        builder.set_constant(at(SUPPORTED_DRIVE_MODES, 0), self.supported_modes)?;
        Ok(())
    }

    fn update(&mut self, now_us: u64, events: &mut DeviceEvents) {
        let (fault, snapshot) = with(&self.shared, |s| (s.step(now_us), s.snapshot()));
        if let Some(error) = fault {
            events.set_error(error, error_register::DEVICE_PROFILE, [0; 5]);
        }
        let previous = self.reported.replace(snapshot);
        for (i, index) in REPORTED_OBJECTS.iter().enumerate() {
            if previous.map_or(true, |p| p[i] != snapshot[i]) {
                events.value_changed(Address::new(self.base + index, 0));
            }
        }
    }
}

/// Application side access to a [`Cia402Axis`]
///
/// Positions and velocities exchanged through the handle are in internal units.
#[derive(Clone)]
pub struct AxisHandle {
    shared: Shared,
}

impl core::fmt::Debug for AxisHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AxisHandle")
            .field("state", &self.state())
            .finish()
    }
}

impl AxisHandle {
    /// The drive state
    pub fn state(&self) -> State {
        with(&self.shared, |s| s.machine.state())
    }

    /// The status word
    pub fn status_word(&self) -> u16 {
        with(&self.shared, |s| s.machine.status())
    }

    /// The last control word received
    pub fn control_word(&self) -> u16 {
        with(&self.shared, |s| s.machine.control_word())
    }

    /// The active mode of operation
    pub fn operating_mode(&self) -> OperatingMode {
        with(&self.shared, |s| s.mode)
    }

    /// The demanded position
    pub fn demand_position(&self) -> i32 {
        with(&self.shared, |s| s.demand_internal().0)
    }

    /// The demanded velocity
    pub fn demand_velocity(&self) -> i32 {
        with(&self.shared, |s| s.demand_internal().1)
    }

    /// Report the measured position and velocity
    ///
    /// Until this is first called, the actual values mirror the demand.
    pub fn set_actual(&self, position: i32, velocity: i32) {
        with(&self.shared, |s| s.actual = Some((position, velocity)));
    }

    /// Raise a drive fault
    ///
    /// On the next update the axis enters `FaultReactionActive` and the error is latched on the
    /// device. The application completes the reaction with [`AxisHandle::set_reaction_done`].
    pub fn raise_fault(&self, error: EmcyError) {
        with(&self.shared, |s| s.pending_fault = Some(error));
    }

    /// Complete the stopping reaction of the current state
    pub fn set_reaction_done(&self) {
        with(&self.shared, |s| s.machine.set_reaction_done());
    }

    /// Set or clear non-state status bits, e.g. [`status::VOLTAGE_PRESENT`] or
    /// [`status::WARNING`]
    pub fn set_status_bits(&self, bits: u16, value: bool) {
        with(&self.shared, |s| s.machine.set_status_bits(bits, value));
    }

    /// The current scaling configuration
    pub fn scaling(&self) -> Scaling {
        with(&self.shared, |s| s.scaling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CommandName;
    use assertables::assert_gt;
    use motocan_common::{
        messages::{CanMessage, NmtCommand, NmtCommandCmd, NmtState},
        value::Value,
        DeviceSettings, ObjectDictionary,
    };
    use motocan_node::{CanopenDevice, DeviceBuilder};

    const NODE: u8 = 3;
    const PERIOD_US: u64 = 10_000;

    struct Fixture {
        dev: CanopenDevice,
        handle: AxisHandle,
        now: u64,
        sent: Vec<CanMessage>,
    }

    impl Fixture {
        fn new(axis: Cia402Axis) -> Self {
            let handle = axis.handle();
            let dev = DeviceBuilder::new(ObjectDictionary::default(), DeviceSettings::new(NODE))
                .protocol(axis)
                .build(|_| Ok(()))
                .unwrap();
            let mut fixture = Self {
                dev,
                handle,
                now: 0,
                sent: Vec::new(),
            };
            fixture.tick();
            let start: CanMessage = NmtCommand {
                cmd: NmtCommandCmd::Start,
                node: NODE,
            }
            .into();
            let sent = &mut fixture.sent;
            fixture
                .dev
                .process_message(&start, fixture.now, &mut |m| sent.push(m));
            assert_eq!(fixture.dev.nmt_state(), NmtState::Operational);
            fixture
        }

        fn tick(&mut self) {
            self.now += PERIOD_US;
            let sent = &mut self.sent;
            self.dev.update(self.now, &mut |m| sent.push(m));
        }

        fn ticks(&mut self, n: usize) {
            for _ in 0..n {
                self.tick();
            }
        }

        fn write(&mut self, index: u16, value: Value) -> SdoErrorCode {
            self.dev.write_value((index, 0), value)
        }

        fn command(&mut self, command: CommandName) {
            let cw = command.control_word();
            assert_eq!(self.write(CONTROL_WORD, Value::UInt16(cw)), SdoErrorCode::NoError);
        }

        fn enable(&mut self) {
            self.command(CommandName::Shutdown);
            self.command(CommandName::SwitchOn);
            self.command(CommandName::EnableOperation);
            assert_eq!(self.handle.state(), State::OperationEnabled);
        }

        fn status(&mut self) -> u16 {
            match self.dev.read((STATUS_WORD, 0)) {
                Ok(Value::UInt16(v)) => v,
                other => panic!("unexpected status read {other:?}"),
            }
        }
    }

    #[test]
    fn test_objects_served() {
        let mut f = Fixture::new(Cia402Axis::new(0));
        assert_eq!(
            f.dev.read((SUPPORTED_DRIVE_MODES, 0)),
            Ok(Value::UInt32(0x185))
        );
        assert_eq!(f.dev.read((0x6093, 0)), Ok(Value::UInt8(2)));
        assert_eq!(f.dev.read((0x6093, 2)), Ok(Value::UInt32(1)));
        assert_eq!(f.status() & status::STATE_MASK, 0x40);
        assert_ne!(f.status() & status::REMOTE, 0);
    }

    #[test]
    fn test_enable_over_dictionary() {
        let mut f = Fixture::new(Cia402Axis::new(0));
        f.command(CommandName::EnableOperation);
        assert_eq!(f.handle.state(), State::SwitchOnDisabled);
        f.enable();
        assert_eq!(f.status() & status::STATE_MASK, 0x27);
    }

    #[test]
    fn test_mode_validation() {
        let mut f = Fixture::new(Cia402Axis::with_modes(
            0,
            &[OperatingMode::ProfileVelocity],
        ));
        assert_eq!(
            f.write(MODES_OF_OPERATION, Value::Int8(1)),
            SdoErrorCode::InvalidValue
        );
        assert_eq!(
            f.write(MODES_OF_OPERATION, Value::Int8(5)),
            SdoErrorCode::InvalidValue
        );
        assert_eq!(f.write(MODES_OF_OPERATION, Value::Int8(3)), SdoErrorCode::NoError);
        assert_eq!(f.dev.read((MODES_OF_OPERATION_DISPLAY, 0)), Ok(Value::Int8(3)));
        assert_eq!(f.handle.operating_mode(), OperatingMode::ProfileVelocity);
    }

    #[test]
    fn test_option_and_factor_validation() {
        let mut f = Fixture::new(Cia402Axis::new(0));
        assert_eq!(
            f.write(QUICK_STOP_OPTION, Value::Int16(3)),
            SdoErrorCode::InvalidValue
        );
        assert_eq!(f.write(QUICK_STOP_OPTION, Value::Int16(6)), SdoErrorCode::NoError);
        assert_eq!(
            f.dev.write_value((0x6097, 2), Value::UInt32(0)),
            SdoErrorCode::InvalidValue
        );
        assert_eq!(
            f.dev.write_value((0x6093, 1), Value::UInt32(10)),
            SdoErrorCode::NoError
        );
        assert_eq!(f.handle.scaling().position_to_internal(3), 30);
    }

    #[test]
    fn test_profile_velocity_ramp() {
        let mut f = Fixture::new(Cia402Axis::new(0));
        f.write(MODES_OF_OPERATION, Value::Int8(3));
        f.write(PROFILE_ACCELERATION, Value::UInt32(1000));
        f.write(TARGET_VELOCITY, Value::Int32(100));
        f.enable();
        f.tick();
        f.tick();
        // 1000 units/s^2 over 10ms
        assert_eq!(f.handle.demand_velocity(), 10);
        assert_eq!(f.status() & status::TARGET_REACHED, 0);
        f.ticks(10);
        assert_eq!(f.handle.demand_velocity(), 100);
        assert_ne!(f.status() & status::TARGET_REACHED, 0);
        assert_gt!(f.handle.demand_position(), 0);
    }

    #[test]
    fn test_profile_position_move() {
        let mut f = Fixture::new(Cia402Axis::new(0));
        f.write(MODES_OF_OPERATION, Value::Int8(1));
        f.write(PROFILE_VELOCITY, Value::UInt32(1000));
        f.write(PROFILE_ACCELERATION, Value::UInt32(10_000));
        f.write(TARGET_POSITION, Value::Int32(100));
        f.enable();
        f.write(CONTROL_WORD, Value::UInt16(0x0F | control::NEW_SET_POINT));
        f.tick();
        assert_ne!(f.status() & status::SET_POINT_ACKNOWLEDGE, 0);
        f.write(CONTROL_WORD, Value::UInt16(0x0F));
        assert_eq!(f.status() & status::SET_POINT_ACKNOWLEDGE, 0);
        f.ticks(100);
        assert_eq!(f.handle.demand_position(), 100);
        assert_eq!(f.dev.read((POSITION_DEMAND, 0)), Ok(Value::Int32(100)));
        assert_ne!(f.status() & status::TARGET_REACHED, 0);
    }

    #[test]
    fn test_quick_stop_ramps_then_disables() {
        let mut f = Fixture::new(Cia402Axis::new(0));
        f.write(MODES_OF_OPERATION, Value::Int8(9));
        f.write(QUICK_STOP_DECELERATION, Value::UInt32(5000));
        f.write(TARGET_VELOCITY, Value::Int32(100));
        f.enable();
        f.tick();
        f.tick();
        assert_eq!(f.handle.demand_velocity(), 100);

        f.command(CommandName::QuickStop);
        f.tick();
        assert_eq!(f.handle.state(), State::QuickStopActive);
        assert_eq!(f.handle.demand_velocity(), 50);
        f.tick();
        assert_eq!(f.handle.demand_velocity(), 0);
        assert_eq!(f.handle.state(), State::SwitchOnDisabled);
    }

    #[test]
    fn test_quick_stop_and_stay() {
        let mut f = Fixture::new(Cia402Axis::new(0));
        f.write(QUICK_STOP_OPTION, Value::Int16(6));
        f.write(MODES_OF_OPERATION, Value::Int8(9));
        f.enable();
        f.command(CommandName::QuickStop);
        f.ticks(5);
        assert_eq!(f.handle.state(), State::QuickStopActive);
        f.command(CommandName::EnableOperation);
        assert_eq!(f.handle.state(), State::OperationEnabled);
    }

    #[test]
    fn test_shutdown_reaction_advances() {
        let mut f = Fixture::new(Cia402Axis::new(0));
        f.enable();
        f.command(CommandName::Shutdown);
        assert_eq!(f.handle.state(), State::ShutdownReactionActive);
        f.tick();
        assert_eq!(f.handle.state(), State::ReadyToSwitchOn);
    }

    #[test]
    fn test_fault_reaction_waits_for_application() {
        let mut f = Fixture::new(Cia402Axis::new(0));
        f.enable();
        f.handle.raise_fault(EmcyError::GenericCurrentError);
        f.ticks(3);
        assert_eq!(f.handle.state(), State::FaultReactionActive);
        let error = f.dev.current_error().unwrap();
        assert_eq!(error.code, 0x2000);
        assert_ne!(error.register & error_register::DEVICE_PROFILE, 0);

        f.handle.set_reaction_done();
        assert_eq!(f.handle.state(), State::Fault);
        f.command(CommandName::FaultReset);
        assert_eq!(f.handle.state(), State::SwitchOnDisabled);
    }

    #[test]
    fn test_second_axis_offset() {
        let mut f = Fixture::new(Cia402Axis::new(1));
        assert!(f.dev.read((STATUS_WORD, 0)).is_err());
        assert_eq!(
            f.dev.write_value((CONTROL_WORD + AXIS_OFFSET, 0), Value::UInt16(0x06)),
            SdoErrorCode::NoError
        );
        assert_eq!(f.handle.state(), State::ReadyToSwitchOn);
    }
}
