// Timeouts, topics, link and dither defaults
use std::time::Duration;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Dither scheduler cadence (one tick + one control line per period)
pub const DITHER_PERIOD: Duration = Duration::from_millis(50);

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "openbot/cmd/drive"; // remote control messages
pub const TOPIC_TELEMETRY: &str = "openbot/state/telemetry"; // derived metrics
pub const TOPIC_HEALTH: &str = "openbot/state/health"; // health status

// Serial link to the controller board
pub const SERIAL_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUDRATE: u32 = 115_200;

// Upper bound on a single serial write, keeps the 50ms cadence intact
pub const LINK_TIMEOUT: Duration = Duration::from_millis(20);

// Speed multipliers the controller is tuned for
pub const SPEED_MULTIPLIERS: [i32; 3] = [128, 192, 255];
pub const DEFAULT_SPEED_MULTIPLIER: i32 = 192;

// Dither waveform bounds
pub const DITHER_MIN_PERIOD_MS: u64 = 1000;
pub const DITHER_MAX_PERIOD_MS: u64 = 2000;
pub const DITHER_MAX_AMPLITUDE: f32 = 0.5;
