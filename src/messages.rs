// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::swerve::{ChassisCommand, ChassisSpeeds, ModuleIndex, ModuleState, Pose};

// Command from teleop/autonomy -> runtime
// Velocities are m/s (x forward, y left) and rad/s (counter-clockwise)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DriveCommand {
    Velocity {
        x_vel: f64,
        y_vel: f64,
        theta_vel: f64,
        #[serde(default)]
        field_relative: bool,
    },
    XStance,
}

impl From<&DriveCommand> for ChassisCommand {
    fn from(cmd: &DriveCommand) -> Self {
        match *cmd {
            DriveCommand::Velocity {
                x_vel,
                y_vel,
                theta_vel,
                field_relative,
            } => ChassisCommand::Velocity(ChassisSpeeds {
                vx: x_vel,
                vy: y_vel,
                omega: theta_vel,
                field_relative,
            }),
            DriveCommand::XStance => ChassisCommand::XStance,
        }
    }
}

// One-shot maintenance requests, handled as soon as they arrive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResetRequest {
    ZeroHeading,
    ResetEncoders,
    ResetOdometry {
        #[serde(default)]
        pose: Pose,
    },
}

// Yaw from the IMU node -> runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeadingMessage {
    pub yaw_deg: f64,
}

/// Per-module telemetry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleTelemetry {
    pub module: ModuleIndex,
    /// Measured state, chassis frame; absent when unreadable
    pub measured: Option<ModuleState>,
    /// Last accepted target, chassis frame
    pub desired: ModuleState,
    /// Last setpoint sent to the actuators, encoder frame
    pub setpoint: ModuleState,
    pub fault: Option<String>,
}

/// Drive telemetry published every cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveTelemetry {
    pub modules: Vec<ModuleTelemetry>,
    pub heading_rad: f64,
    pub pose: Pose,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    ModuleFault,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_velocity_command() {
        let cmd: DriveCommand = serde_json::from_str(
            r#"{"mode":"velocity","x_vel":1.0,"y_vel":-0.5,"theta_vel":0.2}"#,
        )
        .unwrap();
        match ChassisCommand::from(&cmd) {
            ChassisCommand::Velocity(s) => {
                assert_eq!((s.vx, s.vy, s.omega), (1.0, -0.5, 0.2));
                assert!(!s.field_relative);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_x_stance() {
        let cmd: DriveCommand = serde_json::from_str(r#"{"mode":"x_stance"}"#).unwrap();
        assert_eq!(ChassisCommand::from(&cmd), ChassisCommand::XStance);
    }

    #[test]
    fn test_parse_reset_requests() {
        let zero: ResetRequest = serde_json::from_str(r#"{"action":"zero_heading"}"#).unwrap();
        assert_eq!(zero, ResetRequest::ZeroHeading);

        let odo: ResetRequest = serde_json::from_str(
            r#"{"action":"reset_odometry","pose":{"x":1.0,"y":2.0,"heading":0.5}}"#,
        )
        .unwrap();
        match odo {
            ResetRequest::ResetOdometry { pose } => {
                assert_eq!((pose.x, pose.y), (1.0, 2.0));
                assert!((pose.heading.radians() - 0.5).abs() < 1e-12);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_health_serialization() {
        assert_eq!(
            serde_json::to_string(&RuntimeHealth::ModuleFault).unwrap(),
            "\"module_fault\""
        );
    }
}
