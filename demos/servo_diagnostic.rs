// Servo diagnostic: READ-ONLY check of every configured swerve servo
//
// This tool does NOT write anything to the servos - no torque, no movement.
// Run it before the runtime when bringing up a new base.
//
// Usage: cargo run --example servo_diagnostic -- [--port PORT] [--config FILE]

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use swerve_zenoh_runtime::config::{DriveConfig, SERVO_PORT};
use swerve_zenoh_runtime::hardware::feetech::{FeetechBus, Register, STEPS_PER_REVOLUTION};
use swerve_zenoh_runtime::swerve::Angle;

#[derive(Parser)]
struct Args {
    #[arg(short, long, default_value = SERVO_PORT)]
    port: String,

    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => DriveConfig::load(path)?,
        None => DriveConfig::default(),
    };

    // (label, id, steer offset when the servo steers)
    let mut servos = Vec::new();
    for module in &config.modules {
        servos.push((format!("{} drive", module.position), module.drive_id, None));
        servos.push((
            format!("{} steer", module.position),
            module.steer_id,
            Some(module.steer_offset),
        ));
    }

    println!("Swerve servo diagnostic (read-only)");
    println!("Serial port: {}", args.port);
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match FeetechBus::open(&args.port) {
        Ok(bus) => {
            println!("  ok");
            bus
        }
        Err(e) => {
            println!("  failed: {}", e);
            println!("  - Check the port path and the USB cable");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Pinging servos...");
    let mut missing = 0;
    for (label, id, _) in &servos {
        print!("  {:<18} (ID {:>2}): ", label, id);
        io::stdout().flush()?;
        match bus.ping(*id) {
            Ok(true) => println!("responding"),
            Ok(false) => {
                println!("NO RESPONSE");
                missing += 1;
            }
            Err(e) => {
                println!("ERROR: {}", e);
                missing += 1;
            }
        }
    }
    println!();
    if missing > 0 {
        println!("{} servo(s) missing - check power, IDs and wiring", missing);
        println!();
    }

    println!("Step 3: Reading registers...");
    for (label, id, offset) in &servos {
        println!("  === {} (ID {}) ===", label, id);

        match bus.model_number(*id) {
            Ok(model) => println!("    Model:            {}", model),
            Err(e) => println!("    Model:            ERROR - {}", e),
        }

        match bus.read_u8(*id, Register::OperatingMode) {
            Ok(mode) => {
                let name = match mode {
                    0 => "Position",
                    1 => "Velocity",
                    _ => "Other",
                };
                println!("    Operating Mode:   {} ({})", mode, name);
            }
            Err(e) => println!("    Operating Mode:   ERROR - {}", e),
        }

        match bus.read_u8(*id, Register::TorqueEnable) {
            Ok(val) => println!("    Torque Enable:    {}", val),
            Err(e) => println!("    Torque Enable:    ERROR - {}", e),
        }

        // Steer servos run multi-turn, so the reading may be signed
        match bus.present_steps(*id) {
            Ok(steps) => {
                let radians =
                    steps as f64 / STEPS_PER_REVOLUTION as f64 * std::f64::consts::TAU;
                println!("    Present Position: {} ({:.1} deg)", steps, radians.to_degrees());
                // Steering angle the controller would see for this reading
                if let Some(offset) = offset {
                    let chassis = Angle::from_radians(radians) - *offset;
                    println!("    Wheel Angle:      {:.1} deg", chassis.degrees());
                }
            }
            Err(e) => println!("    Present Position: ERROR - {}", e),
        }

        match bus.velocity(*id) {
            Ok(vel) => println!("    Present Velocity: {} (raw)", vel),
            Err(e) => println!("    Present Velocity: ERROR - {}", e),
        }
        println!();
    }

    println!("Diagnostic complete.");
    Ok(())
}
