use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use openbot_runtime::config::{
    DEFAULT_BAUDRATE, DEFAULT_SPEED_MULTIPLIER, LINK_TIMEOUT, SERIAL_PORT, SPEED_MULTIPLIERS,
};
use openbot_runtime::runtime::{self, RuntimeOptions};
use openbot_runtime::vehicle::LinkConfig;

/// Vehicle control runtime: drives the controller board over serial and
/// publishes telemetry for the remote controller
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Serial port of the controller board
    #[arg(long, default_value = SERIAL_PORT)]
    port: String,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baud: u32,

    /// Initial speed multiplier (128, 192 or 255)
    #[arg(long, default_value_t = DEFAULT_SPEED_MULTIPLIER, value_parser = parse_multiplier)]
    speed_multiplier: i32,

    /// Start the dither loop on startup
    #[arg(long)]
    dither: bool,

    /// Run without opening the serial port
    #[arg(long)]
    no_serial: bool,
}

fn parse_multiplier(raw: &str) -> Result<i32, String> {
    let value: i32 = raw.parse().map_err(|e| format!("{}", e))?;
    if SPEED_MULTIPLIERS.contains(&value) {
        Ok(value)
    } else {
        Err(format!("expected one of {:?}", SPEED_MULTIPLIERS))
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init(); // installs the subscriber globally

    let cli = Cli::parse();
    let options = RuntimeOptions {
        link: LinkConfig {
            port: cli.port,
            baud_rate: cli.baud,
            timeout: LINK_TIMEOUT,
        },
        serial: !cli.no_serial,
        dither: cli.dither,
        speed_multiplier: cli.speed_multiplier,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
