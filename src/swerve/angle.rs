// Wrapped planar angle used for steering and heading math.
//
// Every `Angle` is stored normalized to [-π, π). Subtraction yields the
// shortest signed difference, so comparisons never see the ±π seam.

use std::f64::consts::{PI, TAU};
use std::fmt;
use std::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Angle(f64);

impl Angle {
    pub const ZERO: Self = Angle(0.0);

    /// Build from an unbounded radian value (continuous encoders, gyros).
    pub fn from_radians(radians: f64) -> Self {
        Angle(normalize(radians))
    }

    pub fn from_degrees(degrees: f64) -> Self {
        Self::from_radians(degrees.to_radians())
    }

    /// Direction of the vector (x, y). A zero vector maps to 0 rather than NaN.
    pub fn from_vector(x: f64, y: f64) -> Self {
        Self::from_radians(y.atan2(x))
    }

    #[inline]
    pub fn radians(self) -> f64 {
        self.0
    }

    #[inline]
    pub fn degrees(self) -> f64 {
        self.0.to_degrees()
    }

    #[inline]
    pub fn cos(self) -> f64 {
        self.0.cos()
    }

    #[inline]
    pub fn sin(self) -> f64 {
        self.0.sin()
    }

    /// The opposite direction (self + π).
    pub fn flipped(self) -> Self {
        Self::from_radians(self.0 + PI)
    }

    /// Rotate the vector (x, y) by this angle.
    pub fn rotate(self, x: f64, y: f64) -> (f64, f64) {
        let (sin, cos) = self.0.sin_cos();
        (x * cos - y * sin, x * sin + y * cos)
    }
}

/// Map any finite radian value into [-π, π).
fn normalize(radians: f64) -> f64 {
    let wrapped = (radians + PI).rem_euclid(TAU) - PI;
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= PI { wrapped - TAU } else { wrapped }
}

impl From<f64> for Angle {
    fn from(radians: f64) -> Self {
        Angle::from_radians(radians)
    }
}

impl From<Angle> for f64 {
    fn from(angle: Angle) -> Self {
        angle.0
    }
}

impl Add for Angle {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Angle::from_radians(self.0 + rhs.0)
    }
}

/// Shortest signed difference, in [-π, π).
impl Sub for Angle {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Angle::from_radians(self.0 - rhs.0)
    }
}

impl Neg for Angle {
    type Output = Self;
    fn neg(self) -> Self {
        Angle::from_radians(-self.0)
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}°", self.degrees())
    }
}
