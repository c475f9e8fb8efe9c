// Simulated swerve plant
//
// Drive and steer actuators reach their setpoints instantly; `step` integrates
// wheel distances and chassis yaw. Faults can be injected per device.

use std::cell::RefCell;
use std::rc::Rc;

use super::{ActuatorError, DriveActuator, HeadingSensor, SteerActuator};
use crate::swerve::kinematics::to_chassis_speeds;
use crate::swerve::{Angle, ModuleGeometry, ModuleIndex, ModuleState, MODULE_COUNT};

/// Simulated state of one module.
#[derive(Debug, Clone, Default)]
pub struct SimWheel {
    pub velocity_setpoint: f64,
    pub distance: f64,
    /// Encoder-frame steering position in radians (unwrapped)
    pub steer_position: f64,
    pub drive_stopped: bool,
    pub steer_stopped: bool,
    pub drive_fault: bool,
    pub steer_fault: bool,
}

#[derive(Debug)]
pub struct SimPlant {
    wheels: [SimWheel; MODULE_COUNT],
    geometry: [ModuleGeometry; MODULE_COUNT],
    /// True chassis yaw, counter-clockwise positive, radians
    yaw: f64,
    gyro_zero: f64,
    gyro_reversed: bool,
    gyro_fault: bool,
}

impl SimPlant {
    pub fn new(geometry: [ModuleGeometry; MODULE_COUNT]) -> Self {
        Self {
            wheels: Default::default(),
            geometry,
            yaw: 0.0,
            gyro_zero: 0.0,
            gyro_reversed: false,
            gyro_fault: false,
        }
    }

    /// Wrap in the shared handle the simulated devices hold
    pub fn shared(geometry: [ModuleGeometry; MODULE_COUNT]) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(geometry)))
    }

    /// Report yaw clockwise-positive, like gyros mounted upside down
    pub fn with_gyro_reversed(mut self, reversed: bool) -> Self {
        self.gyro_reversed = reversed;
        self
    }

    pub fn wheel(&self, module: ModuleIndex) -> &SimWheel {
        &self.wheels[module.index()]
    }

    pub fn wheel_mut(&mut self, module: ModuleIndex) -> &mut SimWheel {
        &mut self.wheels[module.index()]
    }

    pub fn set_yaw(&mut self, yaw: f64) {
        self.yaw = yaw;
    }

    pub fn set_gyro_fault(&mut self, fault: bool) {
        self.gyro_fault = fault;
    }

    /// Chassis-frame wheel states the plant is currently producing.
    pub fn wheel_states(&self) -> [ModuleState; MODULE_COUNT] {
        std::array::from_fn(|i| {
            let wheel = &self.wheels[i];
            let angle = Angle::from_radians(wheel.steer_position)
                - self.geometry[i].steer_zero_offset;
            ModuleState::new(wheel.velocity_setpoint, angle)
        })
    }

    /// Advance the plant by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        let chassis = to_chassis_speeds(&self.wheel_states(), &self.geometry);
        for wheel in &mut self.wheels {
            wheel.distance += wheel.velocity_setpoint * dt;
        }
        self.yaw += chassis.omega * dt;
    }

    fn gyro_degrees(&self) -> f64 {
        let degrees = (self.yaw - self.gyro_zero).to_degrees();
        if self.gyro_reversed { -degrees } else { degrees }
    }
}

/// Simulated drive motor handle.
pub struct SimDrive {
    plant: Rc<RefCell<SimPlant>>,
    module: ModuleIndex,
}

impl SimDrive {
    pub fn new(plant: Rc<RefCell<SimPlant>>, module: ModuleIndex) -> Self {
        Self { plant, module }
    }

    fn with_wheel<T>(
        &self,
        f: impl FnOnce(&mut SimWheel) -> T,
    ) -> Result<T, ActuatorError> {
        let mut plant = self.plant.borrow_mut();
        let wheel = plant.wheel_mut(self.module);
        if wheel.drive_fault {
            return Err(ActuatorError::Comm(format!("sim drive {} faulted", self.module)));
        }
        Ok(f(wheel))
    }
}

impl DriveActuator for SimDrive {
    fn set_velocity_setpoint(&mut self, meters_per_sec: f64) -> Result<(), ActuatorError> {
        self.with_wheel(|w| {
            w.velocity_setpoint = meters_per_sec;
            w.drive_stopped = false;
        })
    }

    fn velocity(&mut self) -> Result<f64, ActuatorError> {
        self.with_wheel(|w| w.velocity_setpoint)
    }

    fn distance(&mut self) -> Result<f64, ActuatorError> {
        self.with_wheel(|w| w.distance)
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.with_wheel(|w| {
            w.velocity_setpoint = 0.0;
            w.drive_stopped = true;
        })
    }

    fn reset_distance(&mut self) -> Result<(), ActuatorError> {
        self.with_wheel(|w| w.distance = 0.0)
    }
}

/// Simulated steering motor handle.
pub struct SimSteer {
    plant: Rc<RefCell<SimPlant>>,
    module: ModuleIndex,
}

impl SimSteer {
    pub fn new(plant: Rc<RefCell<SimPlant>>, module: ModuleIndex) -> Self {
        Self { plant, module }
    }

    fn with_wheel<T>(
        &self,
        f: impl FnOnce(&mut SimWheel) -> T,
    ) -> Result<T, ActuatorError> {
        let mut plant = self.plant.borrow_mut();
        let wheel = plant.wheel_mut(self.module);
        if wheel.steer_fault {
            return Err(ActuatorError::Comm(format!("sim steer {} faulted", self.module)));
        }
        Ok(f(wheel))
    }
}

impl SteerActuator for SimSteer {
    fn set_position_setpoint(&mut self, radians: f64) -> Result<(), ActuatorError> {
        self.with_wheel(|w| {
            w.steer_position = radians;
            w.steer_stopped = false;
        })
    }

    fn position(&mut self) -> Result<f64, ActuatorError> {
        self.with_wheel(|w| w.steer_position)
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.with_wheel(|w| w.steer_stopped = true)
    }
}

/// Simulated gyro handle.
pub struct SimGyro {
    plant: Rc<RefCell<SimPlant>>,
}

impl SimGyro {
    pub fn new(plant: Rc<RefCell<SimPlant>>) -> Self {
        Self { plant }
    }
}

impl HeadingSensor for SimGyro {
    fn angle_degrees(&mut self) -> Result<f64, ActuatorError> {
        let plant = self.plant.borrow();
        if plant.gyro_fault {
            return Err(ActuatorError::Unavailable);
        }
        Ok(plant.gyro_degrees())
    }

    fn reset(&mut self) -> Result<(), ActuatorError> {
        let mut plant = self.plant.borrow_mut();
        if plant.gyro_fault {
            return Err(ActuatorError::Unavailable);
        }
        plant.gyro_zero = plant.yaw;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> [ModuleGeometry; MODULE_COUNT] {
        [
            ModuleGeometry::new(0.5, 0.5, Angle::ZERO),
            ModuleGeometry::new(0.5, -0.5, Angle::ZERO),
            ModuleGeometry::new(-0.5, 0.5, Angle::ZERO),
            ModuleGeometry::new(-0.5, -0.5, Angle::ZERO),
        ]
    }

    #[test]
    fn test_step_integrates_distance() {
        let plant = SimPlant::shared(square());
        let mut drive = SimDrive::new(plant.clone(), ModuleIndex::BackLeft);
        drive.set_velocity_setpoint(2.0).unwrap();
        plant.borrow_mut().step(0.5);
        assert!((drive.distance().unwrap() - 1.0).abs() < 1e-12);
        drive.reset_distance().unwrap();
        assert_eq!(drive.distance().unwrap(), 0.0);
    }

    #[test]
    fn test_injected_fault_surfaces_as_error() {
        let plant = SimPlant::shared(square());
        let mut steer = SimSteer::new(plant.clone(), ModuleIndex::FrontRight);
        plant.borrow_mut().wheel_mut(ModuleIndex::FrontRight).steer_fault = true;
        assert!(matches!(steer.position(), Err(ActuatorError::Comm(_))));
    }

    #[test]
    fn test_gyro_reset_and_reversal() {
        let plant = Rc::new(RefCell::new(SimPlant::new(square()).with_gyro_reversed(true)));
        let mut gyro = SimGyro::new(plant.clone());
        plant.borrow_mut().set_yaw(std::f64::consts::FRAC_PI_2);
        assert!((gyro.angle_degrees().unwrap() + 90.0).abs() < 1e-9);
        gyro.reset().unwrap();
        assert!(gyro.angle_degrees().unwrap().abs() < 1e-9);
    }
}
