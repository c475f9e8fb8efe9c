// Hardware collaborators for the swerve base
//
// Provides:
// - Actuator and heading-sensor traits the control core drives
// - A simulated plant for tests and `--sim` runs
// - Feetech STS serial servos as drive/steer actuators
// - A heading sensor fed from yaw samples on the message bus

pub mod feetech;
pub mod servo;
pub mod sim;
pub mod topic_heading;

pub use servo::{open_servo_modules, FeetechDrive, FeetechSteer};
pub use sim::{SimDrive, SimGyro, SimPlant, SimSteer};
pub use topic_heading::{HeadingFeed, TopicHeading};

/// Fault reported by an actuator or sensor handle.
///
/// Retries belong to the handle; the control core only records and reports.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActuatorError {
    #[error("communication failure: {0}")]
    Comm(String),

    #[error("reading is stale ({age_ms} ms old)")]
    Stale { age_ms: u64 },

    #[error("device unavailable")]
    Unavailable,
}

/// Wheel drive motor under closed-loop velocity control.
pub trait DriveActuator {
    /// Command wheel surface speed in m/s
    fn set_velocity_setpoint(&mut self, meters_per_sec: f64) -> Result<(), ActuatorError>;

    /// Measured wheel surface speed in m/s
    fn velocity(&mut self) -> Result<f64, ActuatorError>;

    /// Distance travelled in meters since the last reset
    fn distance(&mut self) -> Result<f64, ActuatorError>;

    fn stop(&mut self) -> Result<(), ActuatorError>;

    fn reset_distance(&mut self) -> Result<(), ActuatorError>;
}

/// Steering motor under closed-loop position control, with its encoder.
pub trait SteerActuator {
    /// Command steering position in radians (encoder frame)
    fn set_position_setpoint(&mut self, radians: f64) -> Result<(), ActuatorError>;

    /// Measured steering position in radians. May be continuous or wrapped.
    fn position(&mut self) -> Result<f64, ActuatorError>;

    fn stop(&mut self) -> Result<(), ActuatorError>;

    /// One-time re-sync of a relative encoder against an absolute reference.
    fn sync_to_absolute(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

/// Yaw sensor (gyro / IMU).
pub trait HeadingSensor {
    /// Continuous yaw in degrees, in the sensor's own sign convention
    fn angle_degrees(&mut self) -> Result<f64, ActuatorError>;

    /// Make the current orientation read as zero
    fn reset(&mut self) -> Result<(), ActuatorError>;
}

impl<T: DriveActuator + ?Sized> DriveActuator for Box<T> {
    fn set_velocity_setpoint(&mut self, meters_per_sec: f64) -> Result<(), ActuatorError> {
        (**self).set_velocity_setpoint(meters_per_sec)
    }

    fn velocity(&mut self) -> Result<f64, ActuatorError> {
        (**self).velocity()
    }

    fn distance(&mut self) -> Result<f64, ActuatorError> {
        (**self).distance()
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        (**self).stop()
    }

    fn reset_distance(&mut self) -> Result<(), ActuatorError> {
        (**self).reset_distance()
    }
}

impl<T: SteerActuator + ?Sized> SteerActuator for Box<T> {
    fn set_position_setpoint(&mut self, radians: f64) -> Result<(), ActuatorError> {
        (**self).set_position_setpoint(radians)
    }

    fn position(&mut self) -> Result<f64, ActuatorError> {
        (**self).position()
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        (**self).stop()
    }

    fn sync_to_absolute(&mut self) -> Result<(), ActuatorError> {
        (**self).sync_to_absolute()
    }
}

impl<T: HeadingSensor + ?Sized> HeadingSensor for Box<T> {
    fn angle_degrees(&mut self) -> Result<f64, ActuatorError> {
        (**self).angle_degrees()
    }

    fn reset(&mut self) -> Result<(), ActuatorError> {
        (**self).reset()
    }
}
