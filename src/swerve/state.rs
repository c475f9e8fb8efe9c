// Plain data carried through one control cycle: module identity and
// geometry, wheel states, chassis commands and the odometry pose.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::angle::Angle;
use crate::config::DriveConfig;

/// Number of swerve modules on the chassis.
pub const MODULE_COUNT: usize = 4;

/// Module slot. The discriminant is the index used by every per-module array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleIndex {
    FrontLeft = 0,
    FrontRight = 1,
    BackLeft = 2,
    BackRight = 3,
}

impl ModuleIndex {
    /// All modules in canonical order.
    pub const ALL: [ModuleIndex; MODULE_COUNT] = [
        ModuleIndex::FrontLeft,
        ModuleIndex::FrontRight,
        ModuleIndex::BackLeft,
        ModuleIndex::BackRight,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ModuleIndex::FrontLeft => "front_left",
            ModuleIndex::FrontRight => "front_right",
            ModuleIndex::BackLeft => "back_left",
            ModuleIndex::BackRight => "back_right",
        }
    }
}

impl fmt::Display for ModuleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a module sits on the chassis and how its steering encoder is zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModuleGeometry {
    /// Meters forward of the chassis center
    pub mount_x: f64,
    /// Meters left of the chassis center
    pub mount_y: f64,
    /// Encoder reading when the wheel points chassis-forward
    pub steer_zero_offset: Angle,
}

impl ModuleGeometry {
    pub fn new(mount_x: f64, mount_y: f64, steer_zero_offset: Angle) -> Self {
        Self {
            mount_x,
            mount_y,
            steer_zero_offset,
        }
    }

    /// Distance from the chassis center.
    pub fn radius(&self) -> f64 {
        self.mount_x.hypot(self.mount_y)
    }
}

/// Wheel speed (m/s, signed) and steering angle. Used for both setpoints and
/// measurements.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleState {
    pub speed: f64,
    pub angle: Angle,
}

impl ModuleState {
    pub fn new(speed: f64, angle: Angle) -> Self {
        Self { speed, angle }
    }
}

/// Accumulated drive distance (m) and steering angle, for odometry.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModulePosition {
    pub distance: f64,
    pub angle: Angle,
}

impl ModulePosition {
    pub fn new(distance: f64, angle: Angle) -> Self {
        Self { distance, angle }
    }
}

/// Requested chassis motion. vx is forward, vy is left (m/s), omega is
/// counter-clockwise (rad/s).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChassisSpeeds {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
    /// vx/vy are expressed in the field frame rather than the chassis frame
    pub field_relative: bool,
}

impl ChassisSpeeds {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self {
            vx,
            vy,
            omega,
            field_relative: false,
        }
    }

    pub fn field_relative(vx: f64, vy: f64, omega: f64) -> Self {
        Self {
            field_relative: true,
            ..Self::new(vx, vy, omega)
        }
    }

    /// Scale operator input in [-1, 1] by the configured speed limits.
    /// Out-of-range input is clamped; deadband is applied upstream.
    pub fn from_normalized(
        x: f64,
        y: f64,
        rotation: f64,
        field_relative: bool,
        config: &DriveConfig,
    ) -> Self {
        Self {
            vx: x.clamp(-1.0, 1.0) * config.max_speed,
            vy: y.clamp(-1.0, 1.0) * config.max_speed,
            omega: rotation.clamp(-1.0, 1.0) * config.max_angular_speed,
            field_relative,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.vx == 0.0 && self.vy == 0.0 && self.omega == 0.0
    }
}

/// What the coordinator is asked to do this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChassisCommand {
    Velocity(ChassisSpeeds),
    /// Zero speed with the wheels crossed in an X so the base resists pushing
    XStance,
}

impl ChassisCommand {
    /// The all-zero velocity command; doubles as emergency stop.
    pub fn stop() -> Self {
        ChassisCommand::Velocity(ChassisSpeeds::default())
    }
}

impl From<ChassisSpeeds> for ChassisCommand {
    fn from(speeds: ChassisSpeeds) -> Self {
        ChassisCommand::Velocity(speeds)
    }
}

/// Heading read from the gyro, sign-corrected, counter-clockwise positive.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadingSample {
    /// Continuous (unwrapped) heading in radians
    pub angle_rad: f64,
}

impl HeadingSample {
    pub fn new(angle_rad: f64) -> Self {
        Self { angle_rad }
    }

    pub fn angle(&self) -> Angle {
        Angle::from_radians(self.angle_rad)
    }
}

/// Rigid-body displacement in the chassis frame over one odometry step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChassisDisplacement {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

/// Field-frame pose accumulated by odometry.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub heading: Angle,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: Angle) -> Self {
        Self { x, y, heading }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_index_order_matches_discriminants() {
        for (i, module) in ModuleIndex::ALL.iter().enumerate() {
            assert_eq!(module.index(), i);
        }
    }

    #[test]
    fn test_from_normalized_scales_and_clamps() {
        let config = DriveConfig::default();
        let speeds = ChassisSpeeds::from_normalized(0.5, -2.0, 1.0, true, &config);
        assert!((speeds.vx - 0.5 * config.max_speed).abs() < 1e-12);
        assert!((speeds.vy + config.max_speed).abs() < 1e-12);
        assert!((speeds.omega - config.max_angular_speed).abs() < 1e-12);
        assert!(speeds.field_relative);
    }

    #[test]
    fn test_stop_is_zero_velocity() {
        match ChassisCommand::stop() {
            ChassisCommand::Velocity(speeds) => assert!(speeds.is_zero()),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
