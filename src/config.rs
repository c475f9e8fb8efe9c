// Timeouts, topics, drive configuration
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::swerve::{Angle, ModuleGeometry, ModuleIndex, MODULE_COUNT};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Heading samples older than this are treated as a sensor fault
pub const HEADING_TIMEOUT: Duration = Duration::from_millis(100);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "swerve/cmd/drive"; // commands
pub const TOPIC_STATE_DRIVE: &str = "swerve/state/drive"; // module + odometry telemetry
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status
pub const TOPIC_CMD_RESET: &str = "swerve/cmd/reset"; // heading / encoder / odometry resets
pub const TOPIC_HEADING: &str = "swerve/sensor/heading"; // yaw from the IMU node

// Serial port for the Feetech servo bus
pub const SERVO_PORT: &str = "/dev/ttyACM0";

const INCH: f64 = 0.0254;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("expected 4 modules, found {0}")]
    ModuleCount(usize),

    #[error("module {0} configured more than once")]
    DuplicateModule(ModuleIndex),

    #[error("module {0} missing")]
    MissingModule(ModuleIndex),

    #[error("motor id {id} used by both {first} and {second}")]
    DuplicateMotorId {
        id: u8,
        first: String,
        second: String,
    },

    #[error("{name} must be positive and finite, got {value}")]
    InvalidLimit { name: &'static str, value: f64 },

    #[error("module {0} has a non-finite mounting offset")]
    InvalidGeometry(ModuleIndex),

    #[error("module mounting points are collinear; chassis motion is unobservable")]
    DegenerateLayout,

    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Per-module wiring and calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub position: ModuleIndex,
    pub drive_id: u8,
    pub steer_id: u8,
    /// Steering encoder reading (rad) when the wheel points chassis-forward
    pub steer_offset: Angle,
    /// Override of the mounting point derived from wheelbase/track width
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_y: Option<f64>,
}

impl ModuleConfig {
    fn new(position: ModuleIndex, drive_id: u8, steer_id: u8, steer_offset: f64) -> Self {
        Self {
            position,
            drive_id,
            steer_id,
            steer_offset: Angle::from_radians(steer_offset),
            mount_x: None,
            mount_y: None,
        }
    }
}

/// Immutable drive configuration handed to the coordinator at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Allowed wheel speed, m/s
    pub max_speed: f64,
    /// Allowed rotation rate, rad/s
    pub max_angular_speed: f64,
    /// Front-to-back wheel center distance, m
    pub wheelbase: f64,
    /// Left-to-right wheel center distance, m
    pub track_width: f64,
    pub wheel_diameter: f64,
    /// Drive motor turns per wheel turn
    pub drive_reduction: f64,
    /// Gyro reports clockwise-positive yaw
    pub gyro_reversed: bool,
    pub modules: Vec<ModuleConfig>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            max_speed: 4.8,
            max_angular_speed: TAU,
            wheelbase: 26.5 * INCH,
            track_width: 26.5 * INCH,
            wheel_diameter: 0.0762,
            // 45t bevel, 22t spur, 15t bevel pinion, 13t motor pinion
            drive_reduction: (45.0 * 22.0) / (13.0 * 15.0),
            gyro_reversed: false,
            modules: vec![
                ModuleConfig::new(ModuleIndex::FrontLeft, 3, 5, -FRAC_PI_2),
                ModuleConfig::new(ModuleIndex::FrontRight, 32, 2, 0.0),
                ModuleConfig::new(ModuleIndex::BackLeft, 22, 4, PI),
                ModuleConfig::new(ModuleIndex::BackRight, 8, 7, FRAC_PI_2),
            ],
        }
    }
}

impl DriveConfig {
    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: DriveConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Refuse anything that would run with an incomplete or miswired module set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modules.len() != MODULE_COUNT {
            return Err(ConfigError::ModuleCount(self.modules.len()));
        }

        let mut seen = [false; MODULE_COUNT];
        for module in &self.modules {
            let slot = &mut seen[module.position.index()];
            if *slot {
                return Err(ConfigError::DuplicateModule(module.position));
            }
            *slot = true;
        }

        // Catches copy-paste wiring such as two modules sharing a steer id
        let mut ids: Vec<(u8, String)> = Vec::with_capacity(2 * MODULE_COUNT);
        for module in &self.modules {
            for (id, role) in [(module.drive_id, "drive"), (module.steer_id, "steer")] {
                let owner = format!("{} {}", module.position, role);
                if let Some((_, first)) = ids.iter().find(|(used, _)| *used == id) {
                    return Err(ConfigError::DuplicateMotorId {
                        id,
                        first: first.clone(),
                        second: owner,
                    });
                }
                ids.push((id, owner));
            }
        }

        for (name, value) in [
            ("max_speed", self.max_speed),
            ("max_angular_speed", self.max_angular_speed),
            ("wheel_diameter", self.wheel_diameter),
            ("drive_reduction", self.drive_reduction),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidLimit { name, value });
            }
        }

        let geometry = self.geometry();
        for (index, g) in ModuleIndex::ALL.iter().zip(geometry.iter()) {
            if !(g.mount_x.is_finite() && g.mount_y.is_finite()) {
                return Err(ConfigError::InvalidGeometry(*index));
            }
        }
        if is_collinear(&geometry) {
            return Err(ConfigError::DegenerateLayout);
        }

        Ok(())
    }

    /// Module geometry in canonical order.
    pub fn geometry(&self) -> [ModuleGeometry; MODULE_COUNT] {
        ModuleIndex::ALL.map(|index| {
            let (default_x, default_y) = self.default_mount(index);
            match self.module(index) {
                Some(m) => ModuleGeometry::new(
                    m.mount_x.unwrap_or(default_x),
                    m.mount_y.unwrap_or(default_y),
                    m.steer_offset,
                ),
                None => ModuleGeometry::new(default_x, default_y, Angle::ZERO),
            }
        })
    }

    pub fn module(&self, index: ModuleIndex) -> Option<&ModuleConfig> {
        self.modules.iter().find(|m| m.position == index)
    }

    /// Drive motor turns per meter of wheel travel
    pub fn motor_turns_per_meter(&self) -> f64 {
        self.drive_reduction / (self.wheel_diameter * PI)
    }

    fn default_mount(&self, index: ModuleIndex) -> (f64, f64) {
        let x = self.wheelbase / 2.0;
        let y = self.track_width / 2.0;
        match index {
            ModuleIndex::FrontLeft => (x, y),
            ModuleIndex::FrontRight => (x, -y),
            ModuleIndex::BackLeft => (-x, y),
            ModuleIndex::BackRight => (-x, -y),
        }
    }
}

fn is_collinear(geometry: &[ModuleGeometry; MODULE_COUNT]) -> bool {
    const EPS: f64 = 1e-9;
    let origin = geometry[0];
    let far = geometry[1..]
        .iter()
        .map(|g| (g.mount_x - origin.mount_x, g.mount_y - origin.mount_y))
        .max_by(|a, b| a.0.hypot(a.1).total_cmp(&b.0.hypot(b.1)));
    let Some((ax, ay)) = far else {
        return true;
    };
    if ax.hypot(ay) < EPS {
        return true;
    }
    geometry[1..].iter().all(|g| {
        let (bx, by) = (g.mount_x - origin.mount_x, g.mount_y - origin.mount_y);
        (ax * by - ay * bx).abs() < EPS
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        DriveConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_geometry_is_symmetric_square() {
        let geometry = DriveConfig::default().geometry();
        let half = 26.5 * INCH / 2.0;
        assert!((geometry[0].mount_x - half).abs() < 1e-12);
        assert!((geometry[0].mount_y - half).abs() < 1e-12);
        assert!((geometry[3].mount_x + half).abs() < 1e-12);
        assert!((geometry[3].mount_y + half).abs() < 1e-12);
        assert!((geometry[2].steer_zero_offset.radians() + PI).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_steer_id_rejected() {
        let mut config = DriveConfig::default();
        // back-left steering wired to the back-right steer id
        config.modules[2].steer_id = config.modules[3].steer_id;
        match config.validate() {
            Err(ConfigError::DuplicateMotorId { id, .. }) => assert_eq!(id, 7),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_and_duplicate_modules_rejected() {
        let mut config = DriveConfig::default();
        config.modules.pop();
        assert!(matches!(config.validate(), Err(ConfigError::ModuleCount(3))));

        let mut config = DriveConfig::default();
        config.modules[1].position = ModuleIndex::FrontLeft;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateModule(ModuleIndex::FrontLeft))
        ));
    }

    #[test]
    fn test_non_positive_limit_rejected() {
        let config = DriveConfig {
            max_speed: 0.0,
            ..DriveConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLimit { name: "max_speed", .. })
        ));
    }

    #[test]
    fn test_collinear_layout_rejected() {
        let mut config = DriveConfig::default();
        for (i, m) in config.modules.iter_mut().enumerate() {
            m.mount_x = Some(i as f64 * 0.1);
            m.mount_y = Some(0.0);
        }
        assert!(matches!(config.validate(), Err(ConfigError::DegenerateLayout)));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: DriveConfig =
            serde_json::from_str(r#"{ "max_speed": 3.0, "gyro_reversed": true }"#).unwrap();
        assert_eq!(config.max_speed, 3.0);
        assert!(config.gyro_reversed);
        assert_eq!(config.modules.len(), MODULE_COUNT);
        config.validate().unwrap();
    }

    #[test]
    fn test_shipped_config_keeps_default_layout() {
        // Servo base: same frame and wiring, direct-drive wheels at servo speed
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/swerve.json");
        let loaded = DriveConfig::load(path).unwrap();
        let default = DriveConfig::default();
        assert!((loaded.wheelbase - default.wheelbase).abs() < 1e-9);
        assert!((loaded.track_width - default.track_width).abs() < 1e-9);
        assert!(loaded.max_speed < default.max_speed);
        for (a, b) in loaded.modules.iter().zip(&default.modules) {
            assert_eq!((a.position, a.drive_id, a.steer_id), (b.position, b.drive_id, b.steer_id));
            assert!((a.steer_offset - b.steer_offset).radians().abs() < 1e-9);
        }
    }

    #[test]
    fn test_module_override_parsed() {
        let json = r#"{
            "modules": [
                { "position": "front_left", "drive_id": 1, "steer_id": 2, "steer_offset": 0.0, "mount_x": 0.4 },
                { "position": "front_right", "drive_id": 3, "steer_id": 4, "steer_offset": 0.0 },
                { "position": "back_left", "drive_id": 5, "steer_id": 6, "steer_offset": 0.0 },
                { "position": "back_right", "drive_id": 7, "steer_id": 8, "steer_offset": 0.0 }
            ]
        }"#;
        let config: DriveConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.geometry()[0].mount_x, 0.4);
    }
}
