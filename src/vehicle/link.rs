// Serial link to the motor-controller board
//
// The board speaks a newline-terminated ASCII protocol at a fixed baud rate.
// Writes are bounded by the port timeout so a stalled board cannot hold up
// the control loop.

use serialport::{self, SerialPort};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

use crate::config::{DEFAULT_BAUDRATE, LINK_TIMEOUT, SERIAL_PORT};

/// Error types for link communication
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Timed out writing to {port}")]
    Timeout { port: String },
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// Serial port parameters
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUDRATE,
            timeout: LINK_TIMEOUT,
        }
    }
}

/// Line transport to the controller board
pub trait Link: Send {
    /// Send one protocol line (including its trailing newline)
    fn send_line(&mut self, line: &str) -> Result<()>;

    /// Independent read half for telemetry, if the transport has one
    fn reader(&self) -> Option<Box<dyn Read + Send>> {
        None
    }

    /// Flush and release the transport
    fn close(&mut self) {}
}

/// Controller board on a serial port
pub struct SerialLink {
    port_name: String,
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Open the port described by `config`
    pub fn open(config: &LinkConfig) -> Result<Self> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(config.timeout)
            .open()?;

        Ok(Self {
            port_name: config.port.clone(),
            port,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Link for SerialLink {
    fn send_line(&mut self, line: &str) -> Result<()> {
        debug!("-> {}: {:?}", self.port_name, line);
        let write = self
            .port
            .write_all(line.as_bytes())
            .and_then(|_| self.port.flush());

        write.map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                LinkError::Timeout {
                    port: self.port_name.clone(),
                }
            } else {
                LinkError::Io(e)
            }
        })
    }

    fn reader(&self) -> Option<Box<dyn Read + Send>> {
        match self.port.try_clone() {
            Ok(port) => Some(Box::new(port)),
            Err(e) => {
                debug!("No read half for {}: {}", self.port_name, e);
                None
            }
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.port.flush() {
            debug!("Flush on close of {} failed: {}", self.port_name, e);
        }
    }
}

/// In-memory links for exercising the vehicle without hardware
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every line sent; clones share the same log
    #[derive(Debug, Clone, Default)]
    pub struct RecordingLink {
        lines: Arc<Mutex<Vec<String>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl RecordingLink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }

        pub fn count(&self) -> usize {
            self.lines.lock().unwrap().len()
        }

        pub fn is_closed(&self) -> bool {
            *self.closed.lock().unwrap()
        }
    }

    impl Link for RecordingLink {
        fn send_line(&mut self, line: &str) -> Result<()> {
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    /// Fails every send, counting attempts
    #[derive(Debug, Clone, Default)]
    pub struct FailingLink {
        attempts: Arc<Mutex<usize>>,
    }

    impl FailingLink {
        pub fn attempts(&self) -> usize {
            *self.attempts.lock().unwrap()
        }
    }

    impl Link for FailingLink {
        fn send_line(&mut self, _line: &str) -> Result<()> {
            *self.attempts.lock().unwrap() += 1;
            Err(LinkError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "board unplugged",
            )))
        }
    }
}
