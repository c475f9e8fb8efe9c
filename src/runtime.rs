// 50 Hz control loop with watchdog
// Note: if teleop crashes and stops sending commands, the watchdog swaps in a
// zero command so the base stops instead of driving on the last one

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};

// local imports
use crate::config::{
    DriveConfig, CMD_TIMEOUT, HEADING_TIMEOUT, LOOP_HZ, TOPIC_CMD_DRIVE, TOPIC_CMD_RESET,
    TOPIC_HEADING, TOPIC_HEALTH, TOPIC_STATE_DRIVE,
};
use crate::hardware::{
    open_servo_modules, DriveActuator, HeadingFeed, HeadingSensor, SimDrive, SimGyro, SimPlant,
    SimSteer, SteerActuator, TopicHeading,
};
use crate::messages::{
    DriveCommand, DriveTelemetry, HeadingMessage, ModuleTelemetry, ResetRequest, RuntimeHealth,
};
use crate::swerve::{ChassisCommand, ModuleHardware, ModuleIndex, SwerveDrive};

type BoxedSwerve =
    SwerveDrive<Box<dyn DriveActuator>, Box<dyn SteerActuator>, Box<dyn HeadingSensor>>;

type DriveParts = (BoxedSwerve, Option<Rc<RefCell<SimPlant>>>, Option<HeadingFeed>);

/// Where the actuators come from
#[derive(Debug, Clone)]
pub enum Backend {
    /// In-process plant, heading from the simulated gyro
    Sim,
    /// Feetech servo bus, heading from the IMU topic
    Servo { port: String },
}

pub struct RunOptions {
    pub config: DriveConfig,
    pub backend: Backend,
}

pub struct Runtime {
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming command
    fn on_command(&mut self, cmd: DriveCommand) {
        debug!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Pick the chassis command for this cycle based on watchdog state
    fn compute_command(&mut self) -> ChassisCommand {
        let cmd_age = self.cmd_received_at.elapsed();

        if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the robot
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old), stopping robot", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            ChassisCommand::stop()
        } else if let Some(ref cmd) = self.latest_cmd {
            if self.health == RuntimeHealth::CmdStale {
                info!("Commands resumed");
            }
            self.health = RuntimeHealth::Ok;
            ChassisCommand::from(cmd)
        } else {
            // No command ever received
            self.health = RuntimeHealth::CmdStale;
            ChassisCommand::stop()
        }
    }

    /// Fold module faults into the reported health. A fault outranks a
    /// stale command.
    fn report_health(&self, faulted_modules: usize) -> RuntimeHealth {
        if faulted_modules > 0 {
            RuntimeHealth::ModuleFault
        } else {
            self.health
        }
    }
}

fn apply_reset<D, S, G>(drive: &mut SwerveDrive<D, S, G>, request: ResetRequest)
where
    D: DriveActuator,
    S: SteerActuator,
    G: HeadingSensor,
{
    info!("Reset request: {:?}", request);
    match request {
        ResetRequest::ZeroHeading => drive.zero_heading(),
        ResetRequest::ResetEncoders => drive.reset_encoders(),
        ResetRequest::ResetOdometry { pose } => drive.reset_odometry(pose),
    }
}

/// Snapshot of every module plus heading and pose
pub fn telemetry<D, S, G>(drive: &mut SwerveDrive<D, S, G>) -> DriveTelemetry
where
    D: DriveActuator,
    S: SteerActuator,
    G: HeadingSensor,
{
    let measured = drive.module_states();
    let modules = ModuleIndex::ALL
        .into_iter()
        .zip(measured)
        .map(|(index, measured)| {
            let module = drive.module(index);
            ModuleTelemetry {
                module: index,
                measured: measured.ok(),
                desired: module.desired_state(),
                setpoint: module.setpoint(),
                fault: module.fault().map(|e| e.to_string()),
            }
        })
        .collect();

    DriveTelemetry {
        modules,
        heading_rad: drive.heading().angle_rad,
        pose: drive.pose(),
    }
}

/// Build the drive for the chosen backend. Also returns the simulated plant
/// (to step every cycle) or the heading feed (to push IMU samples into).
fn build_drive(
    options: &RunOptions,
) -> Result<DriveParts, Box<dyn std::error::Error + Send + Sync>> {
    let config = &options.config;
    match &options.backend {
        Backend::Sim => {
            info!("Using simulated plant");
            let plant = SimPlant::shared(config.geometry());
            let hardware = ModuleIndex::ALL.map(|index| {
                ModuleHardware::new(
                    index,
                    Box::new(SimDrive::new(plant.clone(), index)) as Box<dyn DriveActuator>,
                    Box::new(SimSteer::new(plant.clone(), index)) as Box<dyn SteerActuator>,
                )
            });
            let gyro: Box<dyn HeadingSensor> = Box::new(SimGyro::new(plant.clone()));
            let drive = SwerveDrive::new(config, hardware, gyro)?;
            Ok((drive, Some(plant), None))
        }
        Backend::Servo { port } => {
            let hardware = open_servo_modules(port, config)?.map(|hw| {
                ModuleHardware::new(
                    hw.position,
                    Box::new(hw.drive) as Box<dyn DriveActuator>,
                    Box::new(hw.steer) as Box<dyn SteerActuator>,
                )
            });
            let (heading, feed) = TopicHeading::new(HEADING_TIMEOUT);
            let gyro: Box<dyn HeadingSensor> = Box::new(heading);
            let drive = SwerveDrive::new(config, hardware, gyro)?;
            Ok((drive, None, Some(feed)))
        }
    }
}

pub async fn run(options: RunOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut drive, plant, heading_feed) = build_drive(&options)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_cmd = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let sub_reset = session.declare_subscriber(TOPIC_CMD_RESET).await?;
    let sub_heading = session.declare_subscriber(TOPIC_HEADING).await?;
    let pub_state = session.declare_publisher(TOPIC_STATE_DRIVE).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let period = Duration::from_millis(1000 / LOOP_HZ);
    let mut tick = interval(period);
    let mut last_health = None;

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}, {}, {}", TOPIC_CMD_DRIVE, TOPIC_CMD_RESET, TOPIC_HEADING);
    info!("Publishing to: {}, {}", TOPIC_STATE_DRIVE, TOPIC_HEALTH);

    drive.update_odometry();

    loop {
        tick.tick().await;

        // 1. Advance the simulated plant by one period
        if let Some(plant) = &plant {
            plant.borrow_mut().step(period.as_secs_f64());
        }

        // 2. Feed the latest IMU samples to the heading sensor
        while let Ok(Some(sample)) = sub_heading.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<HeadingMessage>(&payload) {
                Ok(msg) => {
                    if let Some(feed) = &heading_feed {
                        feed.push(msg.yaw_deg);
                    }
                }
                Err(e) => warn!("Failed to parse heading: {}", e),
            }
        }

        // 3. Handle reset requests
        while let Ok(Some(sample)) = sub_reset.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ResetRequest>(&payload) {
                Ok(request) => apply_reset(&mut drive, request),
                Err(e) => warn!("Failed to parse reset request: {}", e),
            }
        }

        // 4. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = sub_cmd.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 5. Run one control cycle (includes watchdog logic)
        let command = runtime.compute_command();
        drive.drive(command);
        drive.update_odometry();

        // 6. Publish telemetry
        let state_json = serde_json::to_string(&telemetry(&mut drive))?;
        pub_state.put(state_json).await?;

        // 7. Publish health
        let health = runtime.report_health(drive.faulted_modules().len());
        if last_health != Some(health) {
            info!("Health: {:?}", health);
            last_health = Some(health);
        }
        let health_json = serde_json::to_string(&health)?;
        pub_health.put(health_json).await?;
    }
}
