// Swerve actuators backed by Feetech STS servos
//
// Drive servos run in velocity mode, steer servos in multi-turn position
// mode. All servos share one serial bus; the control loop is
// single-threaded, so the bus is shared through Rc<RefCell<_>>.

use std::cell::RefCell;
use std::f64::consts::TAU;
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::feetech::{
    FeetechBus, FeetechError, OperatingMode, MAX_MULTI_TURN_STEPS, STEPS_PER_REVOLUTION,
};
use super::{ActuatorError, DriveActuator, SteerActuator};
use crate::config::{ConfigError, DriveConfig};
use crate::swerve::{ModuleHardware, ModuleIndex, MODULE_COUNT};

pub type SharedBus = Rc<RefCell<FeetechBus>>;

/// Maximum raw velocity command (safety limit)
const MAX_RAW: i16 = 3000;

const STEPS: f64 = STEPS_PER_REVOLUTION as f64;

impl From<FeetechError> for ActuatorError {
    fn from(e: FeetechError) -> Self {
        match e {
            FeetechError::Timeout { .. } => ActuatorError::Unavailable,
            other => ActuatorError::Comm(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServoSetupError {
    #[error(transparent)]
    Bus(#[from] FeetechError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("servo {id} ({owner}) not responding")]
    NoResponse { id: u8, owner: String },

    #[error("max_speed {max_speed:.3} m/s exceeds the drive servo limit of {limit:.3} m/s")]
    SpeedLimit { max_speed: f64, limit: f64 },
}

fn steps_per_meter(config: &DriveConfig) -> f64 {
    config.motor_turns_per_meter() * STEPS
}

/// Fastest wheel speed (m/s) the drive servos can run without clamping
pub fn servo_speed_limit(config: &DriveConfig) -> f64 {
    MAX_RAW as f64 / steps_per_meter(config)
}

/// Per-wheel clamping would break the desaturated wheel-speed ratios, so the
/// configured max speed has to fit under the raw limit.
pub fn check_speed_limit(config: &DriveConfig) -> Result<(), ServoSetupError> {
    let limit = servo_speed_limit(config);
    if config.max_speed > limit {
        return Err(ServoSetupError::SpeedLimit {
            max_speed: config.max_speed,
            limit,
        });
    }
    Ok(())
}

/// Wheel speed (m/s) to raw servo velocity, clamped to the safety limit
fn speed_to_raw(meters_per_sec: f64, steps_per_meter: f64) -> i16 {
    let raw = (meters_per_sec * steps_per_meter).round();
    raw.clamp(-(MAX_RAW as f64), MAX_RAW as f64) as i16
}

fn radians_to_steps(radians: f64) -> u16 {
    let steps = (radians.rem_euclid(TAU) / TAU * STEPS).round() as u32;
    (steps % STEPS_PER_REVOLUTION as u32) as u16
}

fn steps_to_radians(steps: i32) -> f64 {
    steps as f64 * TAU / STEPS
}

/// Signed step change between two wrapped position readings, assuming less
/// than half a turn between samples
fn wrapped_delta(now: u16, before: u16) -> i64 {
    let half = STEPS_PER_REVOLUTION as i64 / 2;
    let d = (now as i64 - before as i64).rem_euclid(STEPS_PER_REVOLUTION as i64);
    if d >= half { d - STEPS_PER_REVOLUTION as i64 } else { d }
}

/// Multi-turn goal reaching `target` (single-turn steps) the short way from
/// `current`. Near the end of the multi-turn range the goal takes the other
/// way round instead.
fn seam_free_goal(current: i32, target: u16) -> i32 {
    let wrapped = current.rem_euclid(STEPS_PER_REVOLUTION as i32) as u16;
    let goal = current + wrapped_delta(target, wrapped) as i32;
    let turn = STEPS_PER_REVOLUTION as i32;
    if goal > MAX_MULTI_TURN_STEPS as i32 {
        goal - turn
    } else if goal < -(MAX_MULTI_TURN_STEPS as i32) {
        goal + turn
    } else {
        goal
    }
}

/// Drive servo. Distance is integrated from wrapped position readings.
pub struct FeetechDrive {
    bus: SharedBus,
    id: u8,
    steps_per_meter: f64,
    last_position: Option<u16>,
    distance_steps: i64,
}

impl FeetechDrive {
    pub fn new(bus: SharedBus, id: u8, config: &DriveConfig) -> Self {
        Self {
            bus,
            id,
            steps_per_meter: steps_per_meter(config),
            last_position: None,
            distance_steps: 0,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }
}

impl DriveActuator for FeetechDrive {
    fn set_velocity_setpoint(&mut self, meters_per_sec: f64) -> Result<(), ActuatorError> {
        let raw = speed_to_raw(meters_per_sec, self.steps_per_meter);
        self.bus.borrow_mut().set_velocity(self.id, raw)?;
        Ok(())
    }

    fn velocity(&mut self) -> Result<f64, ActuatorError> {
        let raw = self.bus.borrow_mut().velocity(self.id)?;
        Ok(raw as f64 / self.steps_per_meter)
    }

    fn distance(&mut self) -> Result<f64, ActuatorError> {
        let now = self.bus.borrow_mut().position(self.id)?;
        if let Some(before) = self.last_position {
            self.distance_steps += wrapped_delta(now, before);
        }
        self.last_position = Some(now);
        Ok(self.distance_steps as f64 / self.steps_per_meter)
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.bus.borrow_mut().set_velocity(self.id, 0)?;
        Ok(())
    }

    fn reset_distance(&mut self) -> Result<(), ActuatorError> {
        let now = self.bus.borrow_mut().position(self.id)?;
        self.last_position = Some(now);
        self.distance_steps = 0;
        Ok(())
    }
}

impl Drop for FeetechDrive {
    fn drop(&mut self) {
        // Leave the wheel stopped
        if let Err(e) = self.stop() {
            warn!("Failed to stop drive servo {} on drop: {}", self.id, e);
        }
    }
}

/// Steer servo in multi-turn position mode. Goals are placed relative to the
/// present reading so the wheel never sweeps across the encoder seam.
pub struct FeetechSteer {
    bus: SharedBus,
    id: u8,
}

impl FeetechSteer {
    pub fn new(bus: SharedBus, id: u8) -> Self {
        Self { bus, id }
    }

    pub fn id(&self) -> u8 {
        self.id
    }
}

impl SteerActuator for FeetechSteer {
    fn set_position_setpoint(&mut self, radians: f64) -> Result<(), ActuatorError> {
        let mut bus = self.bus.borrow_mut();
        let current = bus.present_steps(self.id)?;
        bus.set_goal_steps(self.id, seam_free_goal(current, radians_to_steps(radians)))?;
        Ok(())
    }

    /// Unwrapped angle; the controller normalizes it
    fn position(&mut self) -> Result<f64, ActuatorError> {
        let steps = self.bus.borrow_mut().present_steps(self.id)?;
        Ok(steps_to_radians(steps))
    }

    /// Hold the current angle
    fn stop(&mut self) -> Result<(), ActuatorError> {
        let mut bus = self.bus.borrow_mut();
        let steps = bus.present_steps(self.id)?;
        bus.set_goal_steps(self.id, steps)?;
        Ok(())
    }
}

/// Open the servo bus and bring up every module's drive and steer servo.
///
/// Checks the speed limit, pings all servos, then disables torque, sets
/// operating modes (multi-turn for steering) and re-enables torque.
pub fn open_servo_modules(
    port: &str,
    config: &DriveConfig,
) -> Result<[ModuleHardware<FeetechDrive, FeetechSteer>; MODULE_COUNT], ServoSetupError> {
    config.validate()?;
    check_speed_limit(config)?;
    info!("Opening servo bus on {}", port);
    let bus: SharedBus = Rc::new(RefCell::new(FeetechBus::open(port)?));

    let mut wiring = Vec::with_capacity(MODULE_COUNT);
    for index in ModuleIndex::ALL {
        let module = config
            .module(index)
            .ok_or(ConfigError::MissingModule(index))?;
        wiring.push((index, module.drive_id, module.steer_id));
    }

    {
        let mut bus = bus.borrow_mut();
        for &(index, drive_id, steer_id) in &wiring {
            for (id, role) in [(drive_id, "drive"), (steer_id, "steer")] {
                if !bus.ping(id)? {
                    warn!("Servo {} ({} {}) not responding to ping", id, index, role);
                    return Err(ServoSetupError::NoResponse {
                        id,
                        owner: format!("{} {}", index, role),
                    });
                }
                debug!("Servo {} ({} {}) responding", id, index, role);
            }
        }

        for &(_, drive_id, steer_id) in &wiring {
            bus.disable_torque(drive_id)?;
            bus.disable_torque(steer_id)?;
            bus.set_operating_mode(drive_id, OperatingMode::Velocity)?;
            bus.set_multi_turn(steer_id)?;
            bus.set_operating_mode(steer_id, OperatingMode::Position)?;
            bus.enable_torque(drive_id)?;
            bus.enable_torque(steer_id)?;
        }
    }

    let hardware: Vec<_> = wiring
        .into_iter()
        .map(|(index, drive_id, steer_id)| {
            ModuleHardware::new(
                index,
                FeetechDrive::new(bus.clone(), drive_id, config),
                FeetechSteer::new(bus.clone(), steer_id),
            )
        })
        .collect();

    info!("Servos initialized successfully");
    hardware
        .try_into()
        .map_err(|h: Vec<_>| ConfigError::ModuleCount(h.len()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_speed_to_raw_scales_and_clamps() {
        assert_eq!(speed_to_raw(0.0, 1000.0), 0);
        assert_eq!(speed_to_raw(0.5, 1000.0), 500);
        assert_eq!(speed_to_raw(-0.25, 1000.0), -250);
        assert_eq!(speed_to_raw(100.0, 1000.0), MAX_RAW);
        assert_eq!(speed_to_raw(-100.0, 1000.0), -MAX_RAW);
    }

    #[test]
    fn test_radians_steps_conversion() {
        assert_eq!(radians_to_steps(0.0), 0);
        assert_eq!(radians_to_steps(PI), 2048);
        assert_eq!(radians_to_steps(-PI / 2.0), 3072);
        assert_eq!(radians_to_steps(TAU - 1e-6), 0);
        assert!((steps_to_radians(1024) - PI / 2.0).abs() < 1e-12);
        assert!((steps_to_radians(-2048) + PI).abs() < 1e-12);
    }

    #[test]
    fn test_wrapped_delta_crosses_zero() {
        assert_eq!(wrapped_delta(10, 4090), 16);
        assert_eq!(wrapped_delta(4090, 10), -16);
        assert_eq!(wrapped_delta(2000, 1000), 1000);
    }

    #[test]
    fn test_goal_crosses_seam_the_short_way() {
        // 350° -> 10°: +20° through 0, not -340°
        assert_eq!(seam_free_goal(3982, 114), 4210);
        assert_eq!(seam_free_goal(114, 3982), -114);
        // Already wound up two turns
        assert_eq!(seam_free_goal(2 * 4096 + 100, 200), 2 * 4096 + 200);
        assert_eq!(seam_free_goal(-4000, 0), -4096);
    }

    #[test]
    fn test_goal_stays_inside_multi_turn_range() {
        let current = 30700; // 2028 steps into its turn
        let goal = seam_free_goal(current, 2128);
        assert_eq!(goal, 30800 - 4096);
        assert_eq!(goal.rem_euclid(4096), 2128);
        assert_eq!(seam_free_goal(-current, 4096 - 2128), -(30800 - 4096));
    }

    #[test]
    fn test_unreachable_max_speed_rejected() {
        let config = DriveConfig::default();
        match check_speed_limit(&config) {
            Err(ServoSetupError::SpeedLimit { max_speed, limit }) => {
                assert_eq!(max_speed, 4.8);
                assert!(limit < max_speed);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_shipped_config_keeps_wheel_ratios() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/swerve.json");
        let config = DriveConfig::load(path).unwrap();
        check_speed_limit(&config).unwrap();

        // No wheel is clamped at full speed, so a 2:1 pair stays 2:1
        let spm = steps_per_meter(&config);
        let full = speed_to_raw(config.max_speed, spm);
        let half = speed_to_raw(config.max_speed / 2.0, spm);
        assert!(full <= MAX_RAW);
        assert!((full as f64 - 2.0 * half as f64).abs() <= 1.0);
    }
}
