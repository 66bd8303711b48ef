// Keyboard teleop: WASD drive, J/K/L indicator, R/F speed, N dither, Q quit
//
// Usage: cargo run --example teleop
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use openbot_runtime::config::{SPEED_MULTIPLIERS, TOPIC_CMD_DRIVE};
use openbot_runtime::messages::RemoteMessage;

const INPUT_TIMEOUT_MS: u64 = 100; // Reset wheels after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_DRIVE).await?;

    info!("Controls: WASD=drive, J/K/L=indicator, R/F=speed, N=dither, Q=quit");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn send(
    publisher: &zenoh::pubsub::Publisher<'_>,
    msg: &RemoteMessage,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(serde_json::to_string(msg)?).await?;
    Ok(())
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 1;
    let mut dither = false;

    // Persistent wheel state
    let mut left = 0.0f32;
    let mut right = 0.0f32;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Driving - update wheels and refresh timestamp
                    KeyCode::Char('w') if pressed => {
                        (left, right) = (1.0, 1.0);
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        (left, right) = (-1.0, -1.0);
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        (left, right) = (-0.5, 0.5);
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        (left, right) = (0.5, -0.5);
                        last_movement_input = Instant::now();
                    }

                    // Indicator
                    KeyCode::Char('j') if pressed => {
                        send(publisher, &RemoteMessage::Indicator { value: -1 }).await?
                    }
                    KeyCode::Char('k') if pressed => {
                        send(publisher, &RemoteMessage::Indicator { value: 0 }).await?
                    }
                    KeyCode::Char('l') if pressed => {
                        send(publisher, &RemoteMessage::Indicator { value: 1 }).await?
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(SPEED_MULTIPLIERS.len() - 1);
                        send_speed(publisher, speed_idx).await?;
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        send_speed(publisher, speed_idx).await?;
                    }

                    KeyCode::Char('n') if pressed => {
                        dither = !dither;
                        info!("Dither: {}", if dither { "ON" } else { "OFF" });
                        send(publisher, &RemoteMessage::Dither { enabled: dither }).await?;
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset wheels if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            left = 0.0;
            right = 0.0;
        }

        // Always publish at ~50Hz
        send(publisher, &RemoteMessage::Drive { left, right }).await?;
    }

    Ok(())
}

async fn send_speed(
    publisher: &zenoh::pubsub::Publisher<'_>,
    idx: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let value = SPEED_MULTIPLIERS[idx];
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {} ({})", label, value);
    send(publisher, &RemoteMessage::SpeedMultiplier { value }).await
}
