// Swerve drive coordinator
//
// One call to `drive` is one control cycle:
// command -> (field-relative rotation) -> kinematics -> desaturation -> modules.
// Between cycles the only state kept is the heading reference, the last
// module targets and the odometry accumulator.

use tracing::{debug, error, info, warn};

use super::angle::Angle;
use super::desaturate::desaturate;
use super::kinematics::{to_chassis_displacement, to_module_states, x_stance_states};
use super::module::SwerveModule;
use super::state::{
    ChassisCommand, HeadingSample, ModuleGeometry, ModuleIndex, ModulePosition, ModuleState, Pose,
    MODULE_COUNT,
};
use crate::config::{ConfigError, DriveConfig};
use crate::hardware::{ActuatorError, DriveActuator, HeadingSensor, SteerActuator};

/// Actuator handles for one module, tagged with the slot they are wired to.
pub struct ModuleHardware<D, S> {
    pub position: ModuleIndex,
    pub drive: D,
    pub steer: S,
}

impl<D, S> ModuleHardware<D, S> {
    pub fn new(position: ModuleIndex, drive: D, steer: S) -> Self {
        Self {
            position,
            drive,
            steer,
        }
    }
}

/// Pose integration from module distance deltas.
#[derive(Debug, Clone, Default)]
pub struct Odometry {
    pose: Pose,
    last_positions: Option<[ModulePosition; MODULE_COUNT]>,
    /// Continuous gyro heading at the last update
    last_gyro: Option<f64>,
}

impl Odometry {
    pub fn new(pose: Pose) -> Self {
        Self {
            pose,
            ..Self::default()
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Start over from `pose`; the next update only re-baselines.
    pub fn reset(&mut self, pose: Pose) {
        self.pose = pose;
        self.last_positions = None;
        self.last_gyro = None;
    }

    /// Forget the encoder baseline (after the encoders were zeroed).
    pub fn rebaseline(&mut self) {
        self.last_positions = None;
    }

    /// Forget the gyro baseline (after the gyro was zeroed).
    pub fn rebaseline_heading(&mut self) {
        self.last_gyro = None;
    }

    /// Integrate one step.
    ///
    /// Rotation comes from the gyro delta when a fresh sample is given,
    /// otherwise from the wheels. Translation is rotated into the field frame
    /// using the heading halfway through the step.
    pub fn update(
        &mut self,
        positions: &[ModulePosition; MODULE_COUNT],
        gyro: Option<HeadingSample>,
        geometry: &[ModuleGeometry; MODULE_COUNT],
    ) -> Pose {
        let Some(last) = self.last_positions.replace(*positions) else {
            self.last_gyro = gyro.map(|h| h.angle_rad);
            return self.pose;
        };

        let steps: [ModulePosition; MODULE_COUNT] = std::array::from_fn(|i| {
            ModulePosition::new(positions[i].distance - last[i].distance, positions[i].angle)
        });
        let displacement = to_chassis_displacement(&steps, geometry);

        let dtheta = match (gyro, self.last_gyro) {
            (Some(now), Some(before)) => now.angle_rad - before,
            _ => displacement.dtheta,
        };
        self.last_gyro = gyro.map(|h| h.angle_rad);

        let mid = self.pose.heading + Angle::from_radians(dtheta / 2.0);
        let (dx, dy) = mid.rotate(displacement.dx, displacement.dy);
        self.pose.x += dx;
        self.pose.y += dy;
        self.pose.heading = self.pose.heading + Angle::from_radians(dtheta);
        self.pose
    }
}

/// Four swerve modules, the heading source and odometry.
pub struct SwerveDrive<D, S, G> {
    modules: [SwerveModule<D, S>; MODULE_COUNT],
    gyro: G,
    geometry: [ModuleGeometry; MODULE_COUNT],
    max_speed: f64,
    gyro_reversed: bool,
    last_heading: HeadingSample,
    heading_fault: bool,
    all_faulted: bool,
    odometry: Odometry,
}

impl<D: DriveActuator, S: SteerActuator, G: HeadingSensor> SwerveDrive<D, S, G> {
    /// Validate the configuration and place each module's hardware in its slot.
    ///
    /// Fails if the config is invalid or the hardware does not cover every
    /// slot exactly once.
    pub fn new(
        config: &DriveConfig,
        hardware: [ModuleHardware<D, S>; MODULE_COUNT],
        gyro: G,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let geometry = config.geometry();

        let mut slots: [Option<ModuleHardware<D, S>>; MODULE_COUNT] = Default::default();
        for hw in hardware {
            let slot = &mut slots[hw.position.index()];
            if slot.is_some() {
                return Err(ConfigError::DuplicateModule(hw.position));
            }
            *slot = Some(hw);
        }

        let mut modules = Vec::with_capacity(MODULE_COUNT);
        for (index, slot) in ModuleIndex::ALL.into_iter().zip(slots) {
            let hw = slot.ok_or(ConfigError::MissingModule(index))?;
            let offset = geometry[index.index()].steer_zero_offset;
            modules.push(SwerveModule::new(index, hw.drive, hw.steer, offset));
        }
        let modules: [SwerveModule<D, S>; MODULE_COUNT] = modules
            .try_into()
            .map_err(|m: Vec<_>| ConfigError::ModuleCount(m.len()))?;

        info!(
            "Swerve drive ready: max speed {:.2} m/s, gyro {}",
            config.max_speed,
            if config.gyro_reversed { "reversed" } else { "normal" }
        );

        let mut drive = Self {
            modules,
            gyro,
            geometry,
            max_speed: config.max_speed,
            gyro_reversed: config.gyro_reversed,
            last_heading: HeadingSample::default(),
            heading_fault: false,
            all_faulted: false,
            odometry: Odometry::default(),
        };
        drive.heading();
        Ok(drive)
    }

    /// Run one control cycle. Safe to call every cycle with the same command.
    pub fn drive(&mut self, command: ChassisCommand) {
        let targets = match command {
            ChassisCommand::Velocity(speeds) => {
                let heading = self.heading();
                let previous = self.modules.each_ref().map(|m| m.desired_state().angle);
                let raw = to_module_states(&speeds, &self.geometry, heading, &previous);
                desaturate(&raw, self.max_speed)
            }
            ChassisCommand::XStance => x_stance_states(&self.geometry),
        };
        self.dispatch(&targets);
    }

    /// Desaturate caller-provided module states and send them out.
    pub fn set_module_states(&mut self, states: &[ModuleState; MODULE_COUNT]) {
        let targets = desaturate(states, self.max_speed);
        self.dispatch(&targets);
    }

    /// Command zero velocity on every module.
    pub fn stop(&mut self) {
        self.drive(ChassisCommand::stop());
    }

    /// Make the current orientation the zero heading. Module encoders are
    /// untouched.
    pub fn zero_heading(&mut self) {
        match self.gyro.reset() {
            Ok(()) => {
                info!("Heading zeroed");
                self.last_heading = HeadingSample::default();
                self.odometry.rebaseline_heading();
            }
            Err(e) => warn!("Heading reset failed: {}", e),
        }
    }

    /// Sign-corrected, continuous heading. Falls back to the last good sample
    /// while the sensor is faulted.
    pub fn heading(&mut self) -> HeadingSample {
        self.sample_heading().unwrap_or(self.last_heading)
    }

    pub fn reset_encoders(&mut self) {
        for module in &mut self.modules {
            module.reset_encoders();
        }
        self.odometry.rebaseline();
    }

    /// Integrate odometry from the current module positions.
    ///
    /// If any module cannot be read, the pose is held for this cycle.
    pub fn update_odometry(&mut self) -> Pose {
        let mut positions = [ModulePosition::default(); MODULE_COUNT];
        for (slot, module) in positions.iter_mut().zip(self.modules.iter_mut()) {
            match module.position() {
                Ok(p) => *slot = p,
                Err(e) => {
                    debug!("Odometry skipped, module {} unreadable: {}", module.index(), e);
                    return self.odometry.pose();
                }
            }
        }
        let gyro = self.sample_heading();
        self.odometry.update(&positions, gyro, &self.geometry)
    }

    pub fn pose(&self) -> Pose {
        self.odometry.pose()
    }

    pub fn reset_odometry(&mut self, pose: Pose) {
        self.odometry.reset(pose);
    }

    pub fn module(&self, index: ModuleIndex) -> &SwerveModule<D, S> {
        &self.modules[index.index()]
    }

    pub fn module_mut(&mut self, index: ModuleIndex) -> &mut SwerveModule<D, S> {
        &mut self.modules[index.index()]
    }

    /// Measured speed and angle of every module, chassis frame
    pub fn module_states(&mut self) -> [Result<ModuleState, ActuatorError>; MODULE_COUNT] {
        self.modules.each_mut().map(|m| m.state())
    }

    pub fn module_positions(&mut self) -> [Result<ModulePosition, ActuatorError>; MODULE_COUNT] {
        self.modules.each_mut().map(|m| m.position())
    }

    /// Modules whose last command hit an actuator fault.
    pub fn faulted_modules(&self) -> Vec<ModuleIndex> {
        self.modules
            .iter()
            .filter(|m| m.is_faulted())
            .map(|m| m.index())
            .collect()
    }

    pub fn geometry(&self) -> &[ModuleGeometry; MODULE_COUNT] {
        &self.geometry
    }

    fn dispatch(&mut self, targets: &[ModuleState; MODULE_COUNT]) {
        for (module, target) in self.modules.iter_mut().zip(targets.iter()) {
            module.set_desired_state(*target);
        }

        let all_faulted = self.modules.iter().all(|m| m.is_faulted());
        if all_faulted {
            if !self.all_faulted {
                error!("All modules faulted, stopping drive");
            }
            for module in &mut self.modules {
                module.stop();
            }
        }
        self.all_faulted = all_faulted;
    }

    fn sample_heading(&mut self) -> Option<HeadingSample> {
        match self.gyro.angle_degrees() {
            Ok(degrees) => {
                let radians = degrees.to_radians();
                let sample = HeadingSample::new(if self.gyro_reversed { -radians } else { radians });
                if self.heading_fault {
                    info!("Heading sensor recovered");
                    self.heading_fault = false;
                }
                self.last_heading = sample;
                Some(sample)
            }
            Err(e) => {
                if !self.heading_fault {
                    warn!("Heading sensor fault ({}), using last heading", e);
                    self.heading_fault = true;
                }
                None
            }
        }
    }
}
