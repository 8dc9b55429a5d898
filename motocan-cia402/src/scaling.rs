//! Conversion between user units on the bus and the drive's internal units
use motocan_common::SdoErrorCode;

/// A numeric type which can be scaled by a [`ScalingFactor`]
pub trait Scaled: Copy {
    /// Multiply by `numerator / divisor`, rounding integers to nearest and saturating to the
    /// type's range. `divisor` must not be zero.
    fn scale(self, numerator: u32, divisor: u32) -> Self;

    /// Negate, saturating to the type's range
    fn negate(self) -> Self;
}

macro_rules! impl_scaled_int {
    ($($ty:ty),*) => {
        $(
            impl Scaled for $ty {
                fn scale(self, numerator: u32, divisor: u32) -> Self {
                    let divisor = i128::from(divisor);
                    let n = i128::from(self) * i128::from(numerator);
                    let rounded = if n >= 0 {
                        (2 * n + divisor) / (2 * divisor)
                    } else {
                        (2 * n - divisor) / (2 * divisor)
                    };
                    rounded.clamp(i128::from(<$ty>::MIN), i128::from(<$ty>::MAX)) as $ty
                }

                fn negate(self) -> Self {
                    (-i128::from(self)).clamp(i128::from(<$ty>::MIN), i128::from(<$ty>::MAX)) as $ty
                }
            }
        )*
    };
}

impl_scaled_int!(i8, i16, i32, u8, u16, u32);

impl Scaled for f32 {
    fn scale(self, numerator: u32, divisor: u32) -> Self {
        self * numerator as f32 / divisor as f32
    }

    fn negate(self) -> Self {
        -self
    }
}

/// A fixed ratio between user and internal units
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScalingFactor {
    numerator: u32,
    divisor: u32,
}

impl Default for ScalingFactor {
    fn default() -> Self {
        Self {
            numerator: 1,
            divisor: 1,
        }
    }
}

impl ScalingFactor {
    /// Create a factor, or None if either term is zero
    pub fn new(numerator: u32, divisor: u32) -> Option<Self> {
        if numerator == 0 || divisor == 0 {
            None
        } else {
            Some(Self { numerator, divisor })
        }
    }

    /// The numerator
    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    /// The divisor
    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Convert a user value to internal units
    pub fn to_internal<T: Scaled>(&self, value: T, inverted: bool) -> T {
        let value = if inverted { value.negate() } else { value };
        value.scale(self.numerator, self.divisor)
    }

    /// Convert an internal value to user units
    pub fn to_user<T: Scaled>(&self, value: T, inverted: bool) -> T {
        let value = value.scale(self.divisor, self.numerator);
        if inverted {
            value.negate()
        } else {
            value
        }
    }
}

/// The polarity object (0x607E)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Polarity(pub u8);

impl Polarity {
    /// Bit inverting position values
    pub const POSITION: u8 = 1 << 7;
    /// Bit inverting velocity values
    pub const VELOCITY: u8 = 1 << 6;

    /// Returns true if positions are inverted
    pub fn position_inverted(&self) -> bool {
        self.0 & Self::POSITION != 0
    }

    /// Returns true if velocities are inverted
    pub fn velocity_inverted(&self) -> bool {
        self.0 & Self::VELOCITY != 0
    }
}

/// The factor objects, in index order from [`FIRST_FACTOR_INDEX`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum FactorObject {
    PositionEncoderResolution = 0x608F,
    VelocityEncoderResolution = 0x6090,
    GearRatio = 0x6091,
    FeedConstant = 0x6092,
    PositionFactor = 0x6093,
    VelocityEncoderFactor = 0x6094,
    VelocityFactor1 = 0x6095,
    VelocityFactor2 = 0x6096,
    AccelerationFactor = 0x6097,
}

/// Index of the first factor object
pub const FIRST_FACTOR_INDEX: u16 = 0x608F;
/// Number of factor objects
pub const NUM_FACTORS: usize = 9;

/// Which term of a factor a sub-index addresses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactorTerm {
    /// Sub-index 1
    Numerator,
    /// Sub-index 2
    Divisor,
}

/// The scaling configuration of one axis
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Scaling {
    factors: [ScalingFactor; NUM_FACTORS],
    /// The polarity object
    pub polarity: Polarity,
}

impl Scaling {
    /// The factor stored at `object`
    pub fn factor(&self, object: FactorObject) -> ScalingFactor {
        self.factors[Self::slot(object as u16)]
    }

    /// Read one term of the factor object at dictionary `index`
    pub fn term(&self, index: u16, term: FactorTerm) -> u32 {
        let factor = self.factors[Self::slot(index)];
        match term {
            FactorTerm::Numerator => factor.numerator,
            FactorTerm::Divisor => factor.divisor,
        }
    }

    /// Write one term of the factor object at dictionary `index`
    ///
    /// A zero term is rejected with `InvalidValue`.
    pub fn set_term(&mut self, index: u16, term: FactorTerm, value: u32) -> SdoErrorCode {
        let slot = Self::slot(index);
        let current = self.factors[slot];
        let updated = match term {
            FactorTerm::Numerator => ScalingFactor::new(value, current.divisor),
            FactorTerm::Divisor => ScalingFactor::new(current.numerator, value),
        };
        match updated {
            Some(factor) => {
                self.factors[slot] = factor;
                SdoErrorCode::NoError
            }
            None => SdoErrorCode::InvalidValue,
        }
    }

    /// Convert a user position to internal units
    pub fn position_to_internal(&self, value: i32) -> i32 {
        self.factor(FactorObject::PositionFactor)
            .to_internal(value, self.polarity.position_inverted())
    }

    /// Convert an internal position to user units
    pub fn position_to_user(&self, value: i32) -> i32 {
        self.factor(FactorObject::PositionFactor)
            .to_user(value, self.polarity.position_inverted())
    }

    /// Convert a user velocity to internal units
    pub fn velocity_to_internal(&self, value: i32) -> i32 {
        self.factor(FactorObject::VelocityFactor1)
            .to_internal(value, self.polarity.velocity_inverted())
    }

    /// Convert an internal velocity to user units
    pub fn velocity_to_user(&self, value: i32) -> i32 {
        self.factor(FactorObject::VelocityFactor1)
            .to_user(value, self.polarity.velocity_inverted())
    }

    /// Convert a user speed, with no sign, to internal units
    pub fn speed_to_internal(&self, value: u32) -> u32 {
        self.factor(FactorObject::VelocityFactor1)
            .to_internal(value, false)
    }

    /// Convert a user acceleration to internal units
    pub fn acceleration_to_internal(&self, value: u32) -> u32 {
        self.factor(FactorObject::AccelerationFactor)
            .to_internal(value, false)
    }

    fn slot(index: u16) -> usize {
        usize::from(index.saturating_sub(FIRST_FACTOR_INDEX)).min(NUM_FACTORS - 1)
    }
}
