// 50 Hz loop with watchdog
// Note: the watchdog stops the wheels if the remote controller goes quiet,
// otherwise the last drive command would keep being sent to the board

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};

// local imports
use crate::config::{CMD_TIMEOUT, LOOP_HZ, TOPIC_CMD_DRIVE, TOPIC_HEALTH, TOPIC_TELEMETRY};
use crate::messages::{RemoteMessage, RuntimeHealth, TelemetrySnapshot};
use crate::vehicle::{LinkConfig, TelemetryReader, Vehicle};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Startup options for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub link: LinkConfig,
    /// Open the serial link (false runs without the controller board)
    pub serial: bool,
    /// Start the dither loop right away
    pub dither: bool,
    pub speed_multiplier: i32,
}

/// Applies remote messages to the vehicle and runs the watchdog
pub struct Controller {
    drive_received_at: Option<Instant>,
    cmd_stale: bool,
    link_failing: bool,
    health: RuntimeHealth,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self {
            drive_received_at: None,
            cmd_stale: true, // Start stale until first drive message
            link_failing: false,
            health: RuntimeHealth::CmdStale,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming message
    pub fn on_message(&mut self, vehicle: &Vehicle, msg: RemoteMessage, now: Instant) {
        debug!("Received message: {:?}", &msg);
        match msg {
            RemoteMessage::Drive { left, right } => {
                vehicle.set_command(left, right);
                self.drive_received_at = Some(now);
            }
            RemoteMessage::Indicator { value } => {
                if let Err(e) = vehicle.set_indicator(value) {
                    warn!("Failed to send indicator {}: {}", value, e);
                }
            }
            RemoteMessage::SpeedMultiplier { value } => {
                info!("Speed multiplier: {}", value);
                vehicle.set_speed_multiplier(value);
            }
            RemoteMessage::Dither { enabled: true } => {
                if let Err(e) = vehicle.start_dither() {
                    warn!("Failed to start dither: {}", e);
                }
            }
            RemoteMessage::Dither { enabled: false } => vehicle.stop_dither(),
        }
    }

    /// Zero the drive command once it goes stale, and refresh health
    pub fn check_watchdog(&mut self, vehicle: &Vehicle, now: Instant) -> RuntimeHealth {
        let stale = match self.drive_received_at {
            Some(at) => now.saturating_duration_since(at) > CMD_TIMEOUT,
            None => true,
        };

        if stale && !self.cmd_stale {
            // Watchdog triggered - stop the robot
            warn!("Drive command stale (> {:?}), stopping vehicle", CMD_TIMEOUT);
            vehicle.set_command(0.0, 0.0);
        }
        self.cmd_stale = stale;

        self.health = if !vehicle.is_connected() {
            RuntimeHealth::LinkDown
        } else if stale {
            RuntimeHealth::CmdStale
        } else {
            RuntimeHealth::Ok
        };
        self.health
    }

    /// Send the current command unless the dither loop already does
    pub fn transmit(&mut self, vehicle: &Vehicle) {
        if vehicle.is_dithering() || !vehicle.is_connected() {
            return;
        }
        match vehicle.transmit_once() {
            Ok(()) if self.link_failing => {
                info!("Controller link recovered");
                self.link_failing = false;
            }
            Ok(()) => {}
            Err(e) if !self.link_failing => {
                warn!("Failed to send drive command: {}", e);
                self.link_failing = true;
            }
            Err(e) => debug!("Drive command still failing: {}", e),
        }
    }
}

async fn publish_state(
    pub_telemetry: &zenoh::pubsub::Publisher<'_>,
    pub_health: &zenoh::pubsub::Publisher<'_>,
    vehicle: &Vehicle,
    health: RuntimeHealth,
) -> Result<(), BoxError> {
    let snapshot_json = serde_json::to_string(&TelemetrySnapshot::from(vehicle))?;
    pub_telemetry.put(snapshot_json).await?;

    let health_json = serde_json::to_string(&health)?;
    pub_health.put(health_json).await?;
    Ok(())
}

pub async fn run(options: RuntimeOptions) -> Result<(), BoxError> {
    let vehicle = Arc::new(Vehicle::new(options.link.clone()));
    vehicle.set_speed_multiplier(options.speed_multiplier);

    if options.serial && !vehicle.connect() {
        warn!("Controller board unavailable, continuing without it");
    }

    let telemetry = match vehicle.telemetry_source() {
        Some(source) => {
            let sink = Arc::clone(&vehicle);
            Some(TelemetryReader::spawn(source, move |frame| sink.ingest(frame))?)
        }
        None => None,
    };

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    if options.dither {
        vehicle.start_dither()?;
    }

    let mut controller = Controller::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_DRIVE);
    info!("Publishing to: {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    let result = loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break Ok(());
            }
        }

        // 1. Drain all pending messages (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<RemoteMessage>(&payload) {
                Ok(msg) => controller.on_message(&vehicle, msg, Instant::now()),
                Err(e) => warn!("Failed to parse message: {}", e),
            }
        }

        // 2. Watchdog, then drive the board
        let health = controller.check_watchdog(&vehicle, Instant::now());
        controller.transmit(&vehicle);

        // 3. Publish telemetry and health
        if let Err(e) = publish_state(&pub_telemetry, &pub_health, &vehicle, health).await {
            break Err(e);
        }
    };

    // Stop reading before releasing the link
    drop(telemetry);
    vehicle.stop_dither();
    vehicle.disconnect();
    result
}
