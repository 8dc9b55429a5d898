//! Trapezoidal position profile
use micromath::F32Ext;

/// Generates a trapezoidal velocity profile towards a target position
///
/// All quantities are in internal units, per second where applicable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trajectory {
    position: f32,
    velocity: f32,
    target: f32,
    max_velocity: f32,
    max_acceleration: f32,
    min_position: f32,
    max_position: f32,
}

impl Default for Trajectory {
    fn default() -> Self {
        Self::new()
    }
}

impl Trajectory {
    /// Create a trajectory at rest at position 0, with no position limits
    pub fn new() -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            target: 0.0,
            max_velocity: 0.0,
            max_acceleration: 0.0,
            min_position: f32::MIN,
            max_position: f32::MAX,
        }
    }

    /// The current position
    pub fn position(&self) -> f32 {
        self.position
    }

    /// The current velocity
    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    /// The target position
    pub fn target(&self) -> f32 {
        self.target
    }

    /// Set the velocity and acceleration limits
    pub fn set_profile(&mut self, max_velocity: f32, max_acceleration: f32) {
        self.max_velocity = F32Ext::abs(max_velocity);
        self.max_acceleration = F32Ext::abs(max_acceleration);
    }

    /// Set the position limits. The current target is clamped into them.
    pub fn set_limits(&mut self, min_position: f32, max_position: f32) {
        self.min_position = min_position.min(max_position);
        self.max_position = max_position.max(min_position);
        self.target = self.target.clamp(self.min_position, self.max_position);
    }

    /// Set a new target
    ///
    /// Returns false if the target was outside the position limits and has been clamped.
    pub fn set_target(&mut self, target: f32) -> bool {
        self.target = target.clamp(self.min_position, self.max_position);
        self.target == target
    }

    /// Jump to a position and velocity, and hold there
    pub fn reset(&mut self, position: f32, velocity: f32) {
        self.position = position;
        self.velocity = velocity;
        self.target = position.clamp(self.min_position, self.max_position);
    }

    /// Returns true when stopped at the target
    pub fn is_done(&self) -> bool {
        self.position == self.target && self.velocity == 0.0
    }

    /// Advance the profile by `dt` seconds
    pub fn step(&mut self, dt: f32) {
        if dt <= 0.0 || self.max_acceleration <= 0.0 || self.is_done() {
            return;
        }
        let accel_step = self.max_acceleration * dt;
        let distance = self.target - self.position;

        let braking_distance = self.velocity * self.velocity / (2.0 * self.max_acceleration);
        let moving_away = self.velocity != 0.0 && (self.velocity > 0.0) != (distance > 0.0);
        let desired = if moving_away || braking_distance >= F32Ext::abs(distance) {
            0.0
        } else if distance > 0.0 {
            self.max_velocity
        } else {
            -self.max_velocity
        };

        let velocity = if self.velocity < desired {
            (self.velocity + accel_step).min(desired)
        } else {
            (self.velocity - accel_step).max(desired)
        };
        self.position += (self.velocity + velocity) * 0.5 * dt;
        self.velocity = velocity;

        let remaining = self.target - self.position;
        let crossed = distance != 0.0 && (remaining > 0.0) != (distance > 0.0);
        let settled = F32Ext::abs(remaining) <= accel_step * dt
            && F32Ext::abs(self.velocity) <= accel_step;
        if crossed || settled {
            self.position = self.target;
            self.velocity = 0.0;
        }
    }
}
