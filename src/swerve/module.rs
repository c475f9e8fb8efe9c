// Closed-loop controller for one swerve module
//
// Translates chassis-frame (speed, angle) targets into drive velocity and
// steer position setpoints, correcting for the steering encoder's mounting
// offset and never steering more than 90° to reach a heading.

use std::f64::consts::FRAC_PI_2;

use tracing::{debug, info, warn};

use super::angle::Angle;
use super::state::{ModuleIndex, ModulePosition, ModuleState};
use crate::hardware::{ActuatorError, DriveActuator, SteerActuator};

/// Reverse the wheel instead of steering past 90°.
///
/// If `target` is more than a quarter turn away from `current`, returns the
/// opposite angle with the speed negated. Exactly 90° is not flipped.
pub fn optimize(target: ModuleState, current: Angle) -> ModuleState {
    let delta = target.angle - current;
    if delta.radians().abs() > FRAC_PI_2 {
        ModuleState::new(-target.speed, target.angle.flipped())
    } else {
        target
    }
}

pub struct SwerveModule<D, S> {
    index: ModuleIndex,
    drive: D,
    steer: S,
    steer_offset: Angle,
    /// Last accepted target, chassis frame
    desired: ModuleState,
    /// Last setpoint sent to the actuators, encoder frame
    setpoint: ModuleState,
    fault: Option<ActuatorError>,
}

impl<D: DriveActuator, S: SteerActuator> SwerveModule<D, S> {
    /// Take ownership of one module's actuators.
    ///
    /// The initial desired angle is the wheel's current heading so the first
    /// zero-speed cycle leaves the steering where it is.
    pub fn new(index: ModuleIndex, drive: D, mut steer: S, steer_offset: Angle) -> Self {
        let (setpoint, fault) = match steer.position() {
            Ok(raw) => (ModuleState::new(0.0, Angle::from_radians(raw)), None),
            Err(e) => {
                warn!("Module {}: steer unreadable at startup: {}", index, e);
                (ModuleState::new(0.0, steer_offset), Some(e))
            }
        };

        Self {
            index,
            drive,
            steer,
            steer_offset,
            desired: ModuleState::new(0.0, setpoint.angle - steer_offset),
            setpoint,
            fault,
        }
    }

    /// Drive the module toward `target` (chassis frame).
    ///
    /// On an actuator fault the previous setpoint is held and the fault is
    /// recorded; nothing is retried inside the cycle.
    pub fn set_desired_state(&mut self, target: ModuleState) {
        let corrected = ModuleState::new(target.speed, target.angle + self.steer_offset);

        let current = match self.steer.position() {
            Ok(raw) => Angle::from_radians(raw),
            Err(e) => return self.report_fault(e),
        };
        let optimized = optimize(corrected, current);

        // Steer first: a failed steer write leaves the module fully unchanged
        if let Err(e) = self.steer.set_position_setpoint(optimized.angle.radians()) {
            return self.report_fault(e);
        }
        if let Err(e) = self.drive.set_velocity_setpoint(optimized.speed) {
            // The drive still runs the held speed, so the steering goes back to the held angle
            if let Err(restore) = self.steer.set_position_setpoint(self.setpoint.angle.radians()) {
                debug!("Module {}: steer restore failed: {}", self.index, restore);
            }
            return self.report_fault(e);
        }

        self.clear_fault();
        self.desired = target;
        self.setpoint = optimized;
    }

    /// Measured speed and chassis-frame angle.
    pub fn state(&mut self) -> Result<ModuleState, ActuatorError> {
        let speed = self.drive.velocity()?;
        let angle = self.chassis_angle()?;
        Ok(ModuleState::new(speed, angle))
    }

    /// Accumulated drive distance and chassis-frame angle.
    pub fn position(&mut self) -> Result<ModulePosition, ActuatorError> {
        let distance = self.drive.distance()?;
        let angle = self.chassis_angle()?;
        Ok(ModulePosition::new(distance, angle))
    }

    /// Zero the drive distance and re-sync the steering encoder if supported.
    pub fn reset_encoders(&mut self) {
        if let Err(e) = self.drive.reset_distance() {
            warn!("Module {}: drive distance reset failed: {}", self.index, e);
        }
        if let Err(e) = self.steer.sync_to_absolute() {
            warn!("Module {}: steer encoder sync failed: {}", self.index, e);
        }
    }

    /// Stop both actuators, best effort.
    pub fn stop(&mut self) {
        if let Err(e) = self.drive.stop() {
            debug!("Module {}: drive stop failed: {}", self.index, e);
        }
        if let Err(e) = self.steer.stop() {
            debug!("Module {}: steer stop failed: {}", self.index, e);
        }
        self.desired.speed = 0.0;
        self.setpoint.speed = 0.0;
    }

    pub fn index(&self) -> ModuleIndex {
        self.index
    }

    pub fn desired_state(&self) -> ModuleState {
        self.desired
    }

    pub fn setpoint(&self) -> ModuleState {
        self.setpoint
    }

    pub fn fault(&self) -> Option<&ActuatorError> {
        self.fault.as_ref()
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    fn chassis_angle(&mut self) -> Result<Angle, ActuatorError> {
        Ok(Angle::from_radians(self.steer.position()?) - self.steer_offset)
    }

    fn report_fault(&mut self, error: ActuatorError) {
        if self.fault.is_none() {
            warn!(
                "Module {} fault ({}), holding speed={:.2} angle={}",
                self.index, error, self.setpoint.speed, self.setpoint.angle
            );
        }
        self.fault = Some(error);
    }

    fn clear_fault(&mut self) {
        if self.fault.take().is_some() {
            info!("Module {} recovered", self.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::{SimDrive, SimPlant, SimSteer};
    use crate::swerve::state::{ModuleGeometry, MODULE_COUNT};
    use std::cell::RefCell;
    use std::f64::consts::PI;
    use std::rc::Rc;

    const TOL: f64 = 1e-9;

    fn plant() -> Rc<RefCell<SimPlant>> {
        SimPlant::shared([ModuleGeometry::default(); MODULE_COUNT])
    }

    fn module(
        plant: &Rc<RefCell<SimPlant>>,
        offset: Angle,
    ) -> SwerveModule<SimDrive, SimSteer> {
        let index = ModuleIndex::FrontLeft;
        SwerveModule::new(
            index,
            SimDrive::new(plant.clone(), index),
            SimSteer::new(plant.clone(), index),
            offset,
        )
    }

    fn wheel_setpoints(plant: &Rc<RefCell<SimPlant>>) -> (f64, f64) {
        let plant = plant.borrow();
        let wheel = plant.wheel(ModuleIndex::FrontLeft);
        (wheel.velocity_setpoint, wheel.steer_position)
    }

    #[test]
    fn test_optimize_flips_past_ninety() {
        let target = ModuleState::new(2.0, Angle::from_degrees(91.0));
        let out = optimize(target, Angle::ZERO);
        assert_eq!(out.speed, -2.0);
        assert!((out.angle.degrees() + 89.0).abs() < TOL);
    }

    #[test]
    fn test_optimize_keeps_under_ninety() {
        let target = ModuleState::new(2.0, Angle::from_degrees(89.0));
        let out = optimize(target, Angle::ZERO);
        assert_eq!(out, target);
    }

    #[test]
    fn test_optimize_exactly_ninety_not_flipped() {
        let target = ModuleState::new(1.0, Angle::from_radians(FRAC_PI_2));
        assert_eq!(optimize(target, Angle::ZERO).speed, 1.0);
    }

    #[test]
    fn test_optimize_across_seam() {
        // 170° to -170° is only 20° the short way
        let target = ModuleState::new(1.0, Angle::from_degrees(-170.0));
        let out = optimize(target, Angle::from_degrees(170.0));
        assert_eq!(out, target);
    }

    #[test]
    fn test_offset_applied_on_write() {
        let plant = plant();
        let mut m = module(&plant, Angle::from_radians(-FRAC_PI_2));
        m.set_desired_state(ModuleState::new(1.5, Angle::from_degrees(30.0)));
        let (speed, steer) = wheel_setpoints(&plant);
        assert!((speed - 1.5).abs() < TOL);
        assert!((Angle::from_radians(steer).degrees() + 60.0).abs() < TOL);
    }

    #[test]
    fn test_state_round_trips_through_offset() {
        for offset in [0.0, -FRAC_PI_2, PI, FRAC_PI_2, 2.7] {
            let plant = plant();
            let mut m = module(&plant, Angle::from_radians(offset));
            let target = ModuleState::new(3.0, Angle::from_degrees(-120.0));
            m.set_desired_state(target);
            let state = m.state().unwrap();
            // The wheel may have flipped; the resulting motion must match
            let same = (state.angle - target.angle).radians().abs() < TOL
                && (state.speed - target.speed).abs() < TOL;
            let flipped = (state.angle - target.angle.flipped()).radians().abs() < TOL
                && (state.speed + target.speed).abs() < TOL;
            assert!(same || flipped, "offset {}: got {:?}", offset, state);
        }
    }

    #[test]
    fn test_state_angle_matches_target_when_no_flip_needed() {
        let plant = plant();
        let offset = Angle::from_radians(PI);
        let mut m = module(&plant, offset);
        // Start the encoder at the offset so the target is reachable without flipping
        plant.borrow_mut().wheel_mut(ModuleIndex::FrontLeft).steer_position = offset.radians();
        let target = ModuleState::new(1.0, Angle::from_degrees(20.0));
        m.set_desired_state(target);
        let state = m.state().unwrap();
        assert!((state.angle - target.angle).radians().abs() < TOL);
        assert!((state.speed - 1.0).abs() < TOL);
    }

    #[test]
    fn test_repeated_target_does_not_drift() {
        let plant = plant();
        let mut m = module(&plant, Angle::from_degrees(45.0));
        let target = ModuleState::new(2.0, Angle::from_degrees(160.0));
        m.set_desired_state(target);
        let first = m.setpoint();
        let first_wheel = wheel_setpoints(&plant);
        m.set_desired_state(target);
        assert_eq!(m.setpoint(), first);
        let second_wheel = wheel_setpoints(&plant);
        assert!((first_wheel.0 - second_wheel.0).abs() < TOL);
        assert!(
            (Angle::from_radians(first_wheel.1) - Angle::from_radians(second_wheel.1))
                .radians()
                .abs()
                < TOL
        );
    }

    #[test]
    fn test_unwrapped_encoder_is_normalized() {
        let plant = plant();
        let mut m = module(&plant, Angle::ZERO);
        // Encoder has wound up several turns; 10° physically
        plant.borrow_mut().wheel_mut(ModuleIndex::FrontLeft).steer_position =
            4.0 * PI + 10f64.to_radians();
        m.set_desired_state(ModuleState::new(1.0, Angle::from_degrees(40.0)));
        assert_eq!(m.setpoint().speed, 1.0);
        assert!((m.setpoint().angle.degrees() - 40.0).abs() < TOL);
    }

    #[test]
    fn test_fault_holds_last_setpoint() {
        let plant = plant();
        let mut m = module(&plant, Angle::ZERO);
        m.set_desired_state(ModuleState::new(1.0, Angle::from_degrees(10.0)));
        let held = m.setpoint();

        plant.borrow_mut().wheel_mut(ModuleIndex::FrontLeft).steer_fault = true;
        m.set_desired_state(ModuleState::new(4.0, Angle::from_degrees(60.0)));
        assert!(m.is_faulted());
        assert_eq!(m.setpoint(), held);
        assert!((wheel_setpoints(&plant).0 - 1.0).abs() < TOL);

        plant.borrow_mut().wheel_mut(ModuleIndex::FrontLeft).steer_fault = false;
        m.set_desired_state(ModuleState::new(4.0, Angle::from_degrees(60.0)));
        assert!(!m.is_faulted());
        assert!((wheel_setpoints(&plant).0 - 4.0).abs() < TOL);
    }

    #[test]
    fn test_drive_fault_recorded() {
        let plant = plant();
        let mut m = module(&plant, Angle::ZERO);
        plant.borrow_mut().wheel_mut(ModuleIndex::FrontLeft).drive_fault = true;
        m.set_desired_state(ModuleState::new(1.0, Angle::ZERO));
        assert!(matches!(m.fault(), Some(ActuatorError::Comm(_))));
    }

    #[test]
    fn test_drive_fault_restores_held_steer_angle() {
        let plant = plant();
        let mut m = module(&plant, Angle::ZERO);
        m.set_desired_state(ModuleState::new(4.0, Angle::ZERO));
        let held = m.setpoint();

        plant.borrow_mut().wheel_mut(ModuleIndex::FrontLeft).drive_fault = true;
        m.set_desired_state(ModuleState::new(0.0, Angle::from_degrees(80.0)));
        assert!(m.is_faulted());
        assert_eq!(m.setpoint(), held);

        // The wheel keeps doing what the held setpoint says: old speed, old angle
        let (speed, steer) = wheel_setpoints(&plant);
        assert!((speed - 4.0).abs() < TOL);
        assert!(Angle::from_radians(steer).radians().abs() < TOL);
    }

    #[test]
    fn test_reset_encoders_zeroes_distance() {
        let plant = plant();
        let mut m = module(&plant, Angle::from_degrees(90.0));
        plant.borrow_mut().wheel_mut(ModuleIndex::FrontLeft).distance = 3.2;
        assert!((m.position().unwrap().distance - 3.2).abs() < TOL);
        m.reset_encoders();
        assert_eq!(m.position().unwrap().distance, 0.0);
    }

    #[test]
    fn test_position_subtracts_offset() {
        let plant = plant();
        let mut m = module(&plant, Angle::from_degrees(90.0));
        plant.borrow_mut().wheel_mut(ModuleIndex::FrontLeft).steer_position =
            120f64.to_radians();
        assert!((m.position().unwrap().angle.degrees() - 30.0).abs() < TOL);
    }
}
