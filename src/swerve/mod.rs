// Swerve control core
//
// Provides:
// - Chassis kinematics (chassis velocity <-> module states, odometry solve)
// - Wheel-speed desaturation
// - Per-module closed-loop controller with offset correction and angle optimization
// - The drive coordinator that runs one control cycle and accumulates odometry

pub mod angle;
pub mod desaturate;
pub mod drive;
pub mod kinematics;
pub mod module;
pub mod state;

pub use angle::Angle;
pub use desaturate::desaturate;
pub use drive::{ModuleHardware, Odometry, SwerveDrive};
pub use kinematics::{to_chassis_displacement, to_chassis_speeds, to_module_states, x_stance_states};
pub use module::{optimize, SwerveModule};
pub use state::{
    ChassisCommand, ChassisDisplacement, ChassisSpeeds, HeadingSample, ModuleGeometry,
    ModuleIndex, ModulePosition, ModuleState, Pose, MODULE_COUNT,
};
