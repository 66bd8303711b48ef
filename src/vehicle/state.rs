// Vehicle state: telemetry cells, the current drive command and the link
//
// Shared between the caller, the telemetry reader and the dither scheduler.
// Every field has its own lock or atomic and no two locks are held at once.

use std::io::Read;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::command::{DriveCommand, encode_indicator};
use super::dither::DitherGenerator;
use super::link::{Link, LinkConfig, LinkError, SerialLink};
use super::lock;
use super::metrics::{self, Gear, Side};
use super::reading::SensorReading;
use super::scheduler::{Scheduler, SchedulerError};
use super::telemetry::TelemetryFrame;
use crate::config::{DEFAULT_SPEED_MULTIPLIER, DITHER_PERIOD};

#[derive(Debug, thiserror::Error)]
pub enum VehicleError {
    #[error("No controller link is bound")]
    ConnectionInactive,

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

pub type Result<T> = std::result::Result<T, VehicleError>;

/// State touched by the scheduler thread
struct Shared {
    command: Mutex<DriveCommand>,
    speed_multiplier: AtomicI32,
    dither: Mutex<DitherGenerator>,
    link: Mutex<Option<Box<dyn Link>>>,
}

impl Shared {
    fn send(&self, line: &str) -> Result<()> {
        let mut guard = lock(&self.link);
        let link = guard.as_mut().ok_or(VehicleError::ConnectionInactive)?;
        link.send_line(line)?;
        Ok(())
    }

    fn transmit_control(&self) -> Result<()> {
        let command = *lock(&self.command);
        let multiplier = self.speed_multiplier.load(Ordering::SeqCst);
        let offset = lock(&self.dither).offset();
        self.send(&command.encode(multiplier, offset))
    }
}

/// Control and telemetry core of the vehicle
pub struct Vehicle {
    link_config: LinkConfig,
    battery_voltage: SensorReading,
    left_wheel_ticks: SensorReading,
    right_wheel_ticks: SensorReading,
    sonar: SensorReading,
    indicator: AtomicI32,
    shared: Arc<Shared>,
    scheduler: Mutex<Scheduler>,
}

impl Vehicle {
    /// Create a disconnected vehicle; call `connect()` to open the link
    pub fn new(link_config: LinkConfig) -> Self {
        Self::with_dither(link_config, DitherGenerator::default())
    }

    /// Create with a custom dither generator
    pub fn with_dither(link_config: LinkConfig, dither: DitherGenerator) -> Self {
        Self {
            link_config,
            battery_voltage: SensorReading::new(),
            left_wheel_ticks: SensorReading::new(),
            right_wheel_ticks: SensorReading::new(),
            sonar: SensorReading::new(),
            indicator: AtomicI32::new(0),
            shared: Arc::new(Shared {
                command: Mutex::new(DriveCommand::neutral(DEFAULT_SPEED_MULTIPLIER)),
                speed_multiplier: AtomicI32::new(DEFAULT_SPEED_MULTIPLIER),
                dither: Mutex::new(dither),
                link: Mutex::new(None),
            }),
            scheduler: Mutex::new(Scheduler::new("dither-scheduler")),
        }
    }

    pub fn link_config(&self) -> &LinkConfig {
        &self.link_config
    }

    // === Connection lifecycle ===

    /// Open the serial link; failure leaves the vehicle disconnected
    pub fn connect(&self) -> bool {
        info!(
            "Opening controller link on {} @ {} baud",
            self.link_config.port, self.link_config.baud_rate
        );
        match SerialLink::open(&self.link_config) {
            Ok(link) => {
                self.attach(Box::new(link));
                true
            }
            Err(e) => {
                warn!("Failed to open {}: {}", self.link_config.port, e);
                false
            }
        }
    }

    /// Bind an already open link, replacing any previous one
    pub fn attach(&self, link: Box<dyn Link>) {
        if let Some(mut previous) = lock(&self.shared.link).replace(link) {
            previous.close();
        }
        info!("Controller link attached");
    }

    /// Stop the wheels, then close and release the link
    pub fn disconnect(&self) {
        let Some(mut link) = lock(&self.shared.link).take() else {
            return;
        };

        let neutral = DriveCommand::neutral(self.speed_multiplier());
        if let Err(e) = link.send_line(&neutral.encode(self.speed_multiplier(), None)) {
            debug!("Neutral command on disconnect failed: {}", e);
        }
        link.close();
        info!("Controller link released");
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.link).is_some()
    }

    /// Read half of the bound link, for the telemetry reader
    pub fn telemetry_source(&self) -> Option<Box<dyn Read + Send>> {
        lock(&self.shared.link).as_ref().and_then(|link| link.reader())
    }

    // === Telemetry ===

    /// Write all cells from one telemetry line
    pub fn ingest(&self, frame: TelemetryFrame) {
        let now = Instant::now();
        self.battery_voltage.set_at(frame.battery_voltage, now);
        self.left_wheel_ticks.set_at(frame.left_ticks, now);
        self.right_wheel_ticks.set_at(frame.right_ticks, now);
        self.sonar.set_at(frame.sonar_distance, now);
    }

    pub fn battery_voltage(&self) -> f32 {
        self.battery_voltage.get()
    }

    pub fn set_battery_voltage(&self, voltage: f32) {
        self.battery_voltage.set(voltage);
    }

    pub fn battery_percent(&self) -> i32 {
        metrics::battery_percent(self.battery_voltage.get())
    }

    pub fn wheel_ticks(&self, side: Side) -> f32 {
        self.wheel_cell(side).get()
    }

    pub fn set_wheel_ticks(&self, side: Side, ticks: f32) {
        self.wheel_cell(side).set(ticks);
    }

    /// Wheel speed from the last tick report; 0 without a fresh reading
    pub fn wheel_rpm(&self, side: Side) -> f32 {
        self.wheel_cell(side).sample().map_or(0.0, |s| {
            metrics::wheel_rpm(s.value, s.age_at(Instant::now()))
        })
    }

    fn wheel_cell(&self, side: Side) -> &SensorReading {
        match side {
            Side::Left => &self.left_wheel_ticks,
            Side::Right => &self.right_wheel_ticks,
        }
    }

    pub fn sonar_distance(&self) -> f32 {
        self.sonar.get()
    }

    pub fn sonar_age(&self) -> Option<Duration> {
        self.sonar.age()
    }

    pub fn set_sonar_distance(&self, distance: f32) {
        self.sonar.set(distance);
    }

    // === Drive command ===

    pub fn command(&self) -> DriveCommand {
        *lock(&self.shared.command)
    }

    /// Replace the drive command at the current multiplier (not transmitted)
    pub fn set_command(&self, left: f32, right: f32) {
        let command = DriveCommand::new(left, right, self.speed_multiplier());
        self.set_drive_command(command);
    }

    pub fn set_drive_command(&self, command: DriveCommand) {
        *lock(&self.shared.command) = command;
    }

    pub fn rotation_degrees(&self) -> f32 {
        let cmd = self.command();
        metrics::rotation_degrees(cmd.left(), cmd.right())
    }

    pub fn speed_percent(&self) -> i32 {
        let cmd = self.command();
        metrics::speed_percent(cmd.left(), cmd.right())
    }

    pub fn drive_gear(&self) -> Gear {
        let cmd = self.command();
        metrics::drive_gear(cmd.left(), cmd.right())
    }

    pub fn speed_multiplier(&self) -> i32 {
        self.shared.speed_multiplier.load(Ordering::SeqCst)
    }

    /// Multiplier for future encodes; the stored command keeps its own
    pub fn set_speed_multiplier(&self, multiplier: i32) {
        self.shared.speed_multiplier.store(multiplier, Ordering::SeqCst);
    }

    pub fn indicator(&self) -> i32 {
        self.indicator.load(Ordering::SeqCst)
    }

    /// Store the indicator state and send it right away
    pub fn set_indicator(&self, indicator: i32) -> Result<()> {
        self.indicator.store(indicator, Ordering::SeqCst);
        self.shared.send(&encode_indicator(indicator))
    }

    /// Encode the current command (with dither when active) and send it
    pub fn transmit_once(&self) -> Result<()> {
        self.shared.transmit_control()
    }

    // === Dither ===

    pub fn start_dither(&self) -> Result<()> {
        self.start_dither_with_period(DITHER_PERIOD)
    }

    /// Tick the dither generator and transmit every `period`
    pub fn start_dither_with_period(&self, period: Duration) -> Result<()> {
        let mut scheduler = lock(&self.scheduler);
        if scheduler.is_running() {
            return Err(SchedulerError::AlreadyRunning.into());
        }

        lock(&self.shared.dither).enable(period);
        let shared = Arc::clone(&self.shared);
        let mut failing = false;
        let started = scheduler.start(period, move || {
            lock(&shared.dither).tick();
            match shared.transmit_control() {
                Ok(()) if failing => {
                    info!("Dither transmit recovered");
                    failing = false;
                }
                Ok(()) => {}
                Err(e) if failing => debug!("Dither transmit still failing: {}", e),
                Err(e) => {
                    warn!("Dither transmit failed: {}", e);
                    failing = true;
                }
            }
        });

        if let Err(e) = started {
            lock(&self.shared.dither).disable();
            return Err(e.into());
        }
        info!("Dither started ({:?} period)", period);
        Ok(())
    }

    /// Stop the dither loop; returns once the scheduler thread has exited
    pub fn stop_dither(&self) {
        let mut scheduler = lock(&self.scheduler);
        if !scheduler.is_running() {
            return;
        }
        scheduler.stop();
        lock(&self.shared.dither).disable();
        info!("Dither stopped");
    }

    pub fn is_dithering(&self) -> bool {
        lock(&self.scheduler).is_running()
    }
}

impl Drop for Vehicle {
    fn drop(&mut self) {
        // Stop transmitting before the link goes away
        self.stop_dither();
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::super::dither::DitherConfig;
    use super::super::link::testing::{FailingLink, RecordingLink};
    use super::*;
    use std::thread;

    fn connected_vehicle() -> (Vehicle, RecordingLink) {
        let link = RecordingLink::new();
        let vehicle = Vehicle::new(LinkConfig::default());
        vehicle.attach(Box::new(link.clone()));
        (vehicle, link)
    }

    #[test]
    fn test_new_vehicle_is_disconnected_and_neutral() {
        let vehicle = Vehicle::new(LinkConfig::default());
        assert!(!vehicle.is_connected());
        assert_eq!(vehicle.command(), DriveCommand::neutral(DEFAULT_SPEED_MULTIPLIER));
        assert_eq!(vehicle.drive_gear(), Gear::Park);
        assert_eq!(vehicle.wheel_rpm(Side::Left), 0.0);
        assert!(vehicle.sonar_age().is_none());
    }

    #[test]
    fn test_connect_to_missing_port_reports_failure() {
        let vehicle = Vehicle::new(LinkConfig {
            port: "/dev/this-port-does-not-exist".to_string(),
            ..LinkConfig::default()
        });
        assert!(!vehicle.connect());
        assert!(!vehicle.is_connected());
    }

    #[test]
    fn test_transmit_without_link() {
        let vehicle = Vehicle::new(LinkConfig::default());
        assert!(matches!(
            vehicle.transmit_once(),
            Err(VehicleError::ConnectionInactive)
        ));
    }

    #[test]
    fn test_set_command_does_not_transmit() {
        let (vehicle, link) = connected_vehicle();
        vehicle.set_command(1.0, 0.5);
        assert_eq!(link.count(), 0);

        vehicle.transmit_once().unwrap();
        assert_eq!(link.lines(), vec!["c192,96\n".to_string()]);
    }

    #[test]
    fn test_speed_multiplier_applies_to_future_encodes() {
        let (vehicle, link) = connected_vehicle();
        vehicle.set_command(1.0, -1.0);
        vehicle.set_speed_multiplier(255);

        assert_eq!(vehicle.command().multiplier_at_issue(), 192);
        vehicle.transmit_once().unwrap();
        assert_eq!(link.lines(), vec!["c255,-255\n".to_string()]);

        vehicle.set_command(0.5, 0.5);
        assert_eq!(vehicle.command().multiplier_at_issue(), 255);
    }

    #[test]
    fn test_set_indicator_transmits_immediately() {
        let (vehicle, link) = connected_vehicle();
        vehicle.set_indicator(-1).unwrap();
        assert_eq!(vehicle.indicator(), -1);
        assert_eq!(link.lines(), vec!["i-1\n".to_string()]);
    }

    #[test]
    fn test_set_indicator_without_link_still_stores() {
        let vehicle = Vehicle::new(LinkConfig::default());
        assert!(vehicle.set_indicator(1).is_err());
        assert_eq!(vehicle.indicator(), 1);
    }

    #[test]
    fn test_send_failure_surfaces_as_link_error() {
        let vehicle = Vehicle::new(LinkConfig::default());
        vehicle.attach(Box::new(FailingLink::default()));
        assert!(matches!(
            vehicle.transmit_once(),
            Err(VehicleError::Link(LinkError::Io(_)))
        ));
    }

    #[test]
    fn test_disconnect_sends_neutral_and_releases() {
        let (vehicle, link) = connected_vehicle();
        vehicle.set_command(0.8, 0.8);
        vehicle.disconnect();

        assert!(!vehicle.is_connected());
        assert!(link.is_closed());
        assert_eq!(link.lines(), vec!["c0,0\n".to_string()]);

        // Second call is a no-op
        vehicle.disconnect();
        assert_eq!(link.count(), 1);
    }

    #[test]
    fn test_disconnect_ignores_send_failure() {
        let vehicle = Vehicle::new(LinkConfig::default());
        let link = FailingLink::default();
        vehicle.attach(Box::new(link.clone()));
        vehicle.disconnect();
        assert!(!vehicle.is_connected());
        assert_eq!(link.attempts(), 1);
    }

    #[test]
    fn test_ingest_updates_all_cells() {
        let vehicle = Vehicle::new(LinkConfig::default());
        vehicle.ingest(TelemetryFrame {
            battery_voltage: 10.8,
            left_ticks: 12.0,
            right_ticks: -4.0,
            sonar_distance: 87.0,
        });
        assert_eq!(vehicle.battery_percent(), 50);
        assert_eq!(vehicle.wheel_ticks(Side::Left), 12.0);
        assert_eq!(vehicle.wheel_ticks(Side::Right), -4.0);
        assert_eq!(vehicle.sonar_distance(), 87.0);
        assert!(vehicle.sonar_age().is_some());
    }

    #[test]
    fn test_wheel_rpm_from_aged_reading() {
        let vehicle = Vehicle::new(LinkConfig::default());
        vehicle.set_wheel_ticks(Side::Right, 128.0);
        thread::sleep(Duration::from_millis(20));
        assert!(vehicle.wheel_rpm(Side::Right) > 0.0);
        assert_eq!(vehicle.wheel_rpm(Side::Left), 0.0);
    }

    #[test]
    fn test_command_metrics() {
        let vehicle = Vehicle::new(LinkConfig::default());
        vehicle.set_command(0.5, -0.5);
        assert_eq!(vehicle.rotation_degrees(), 0.0);
        assert_eq!(vehicle.drive_gear(), Gear::Park);

        vehicle.set_command(-0.4, -0.2);
        assert_eq!(vehicle.drive_gear(), Gear::Reverse);
        assert_eq!(vehicle.speed_percent(), 0);
    }

    #[test]
    fn test_dither_double_start_rejected() {
        let (vehicle, _link) = connected_vehicle();
        vehicle.start_dither().unwrap();
        assert!(matches!(
            vehicle.start_dither(),
            Err(VehicleError::Scheduler(SchedulerError::AlreadyRunning))
        ));
        assert!(vehicle.is_dithering());
        vehicle.stop_dither();
        assert!(!vehicle.is_dithering());
    }

    #[test]
    fn test_no_transmissions_after_stop_dither() {
        let (vehicle, link) = connected_vehicle();
        vehicle.set_command(0.5, 0.5);
        vehicle
            .start_dither_with_period(Duration::from_millis(5))
            .unwrap();
        thread::sleep(Duration::from_millis(60));
        vehicle.stop_dither();

        let sent = link.count();
        assert!(sent >= 2);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(link.count(), sent);
    }

    #[test]
    fn test_dither_perturbs_one_wheel() {
        let config = DitherConfig {
            min_period_ms: 1000,
            max_period_ms: 1000,
            max_amplitude: 0.5,
        };
        let dither = DitherGenerator::with_seed(config, 7).unwrap();
        let vehicle = Vehicle::with_dither(LinkConfig::default(), dither);
        let link = RecordingLink::new();
        vehicle.attach(Box::new(link.clone()));
        vehicle.set_command(1.0, 1.0);
        vehicle.set_speed_multiplier(100);

        vehicle
            .start_dither_with_period(Duration::from_millis(5))
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        vehicle.stop_dither();

        // First segment reduces the left wheel; right stays at full scale
        for line in link.lines() {
            let body = line.trim_end().trim_start_matches('c');
            let (left, right) = body.split_once(',').unwrap();
            let left: i32 = left.parse().unwrap();
            assert!((50..=100).contains(&left), "left {} outside dither band", left);
            assert_eq!(right, "100");
        }

        // Disabled again: plain encode
        vehicle.transmit_once().unwrap();
        assert_eq!(link.lines().last().unwrap(), "c100,100\n");
    }

    #[test]
    fn test_dither_survives_link_failures() {
        let vehicle = Vehicle::new(LinkConfig::default());
        let link = FailingLink::default();
        vehicle.attach(Box::new(link.clone()));
        vehicle
            .start_dither_with_period(Duration::from_millis(5))
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(vehicle.is_dithering());
        vehicle.stop_dither();
        assert!(link.attempts() >= 2);
    }

    #[test]
    fn test_dither_without_link_keeps_running() {
        let vehicle = Vehicle::new(LinkConfig::default());
        vehicle
            .start_dither_with_period(Duration::from_millis(5))
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(vehicle.is_dithering());
        vehicle.stop_dither();
    }

    #[test]
    fn test_drop_stops_dither_and_disconnects() {
        let link = RecordingLink::new();
        {
            let vehicle = Vehicle::new(LinkConfig::default());
            vehicle.attach(Box::new(link.clone()));
            vehicle
                .start_dither_with_period(Duration::from_millis(5))
                .unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        assert!(link.is_closed());
        assert_eq!(link.lines().last().unwrap(), "c0,0\n");
        let sent = link.count();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(link.count(), sent);
    }
}
