use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swerve_zenoh_runtime::config::{DriveConfig, SERVO_PORT};
use swerve_zenoh_runtime::runtime::{self, Backend, RunOptions};

#[derive(Parser)]
#[command(about = "Swerve drive runtime")]
struct Args {
    /// Drive configuration (JSON); built-in defaults when omitted. The servo
    /// backend needs a max_speed its servos can reach, e.g. config/swerve.json
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run against the simulated plant instead of the servo bus
    #[arg(long)]
    sim: bool,

    /// Serial port of the servo bus
    #[arg(short, long, default_value = SERVO_PORT)]
    port: String,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init(); // installs the subscriber globally

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            info!("Loading drive config from {}", path.display());
            DriveConfig::load(path)
        }
        None => Ok(DriveConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            std::process::exit(1);
        }
    };

    let backend = if args.sim {
        Backend::Sim
    } else {
        Backend::Servo { port: args.port }
    };

    if let Err(e) = runtime::run(RunOptions { config, backend }).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
