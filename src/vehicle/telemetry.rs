// Telemetry reported by the controller board
//
// One line per sample: <battery_voltage>,<left_ticks>,<right_ticks>,<sonar_distance>
// The reader thread tolerates port timeouts and exits on EOF or when dropped.

use std::io::{self, BufRead, BufReader, Read};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

const FIELDS: [&str; 4] = ["battery_voltage", "left_ticks", "right_ticks", "sonar_distance"];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TelemetryError {
    #[error("Expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("Invalid {field} value: {raw:?}")]
    InvalidNumber { field: &'static str, raw: String },
}

/// One parsed telemetry line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    pub battery_voltage: f32,
    pub left_ticks: f32,
    pub right_ticks: f32,
    pub sonar_distance: f32,
}

impl FromStr for TelemetryFrame {
    type Err = TelemetryError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.trim().split(',').collect();
        if parts.len() != FIELDS.len() {
            return Err(TelemetryError::FieldCount {
                expected: FIELDS.len(),
                got: parts.len(),
            });
        }

        let mut values = [0.0f32; 4];
        for (i, raw) in parts.iter().enumerate() {
            values[i] = raw
                .trim()
                .parse::<f32>()
                .map_err(|_| TelemetryError::InvalidNumber {
                    field: FIELDS[i],
                    raw: raw.to_string(),
                })?;
        }

        Ok(Self {
            battery_voltage: values[0],
            left_ticks: values[1],
            right_ticks: values[2],
            sonar_distance: values[3],
        })
    }
}

/// Background thread turning telemetry lines into frames
pub struct TelemetryReader {
    shutdown: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl TelemetryReader {
    /// Read lines from `source`, handing each parsed frame to `on_frame`
    pub fn spawn<F>(source: Box<dyn Read + Send>, mut on_frame: F) -> io::Result<Self>
    where
        F: FnMut(TelemetryFrame) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let join_handle = thread::Builder::new()
            .name("telemetry-reader".to_string())
            .spawn(move || {
                let mut reader = BufReader::new(source);
                let mut buf = Vec::new();
                while !shutdown_clone.load(Ordering::Relaxed) {
                    match reader.read_until(b'\n', &mut buf) {
                        Ok(0) => {
                            debug!("Telemetry source closed");
                            break;
                        }
                        Ok(_) => {
                            // A timeout can leave a partial line; wait for the rest
                            if buf.last() != Some(&b'\n') {
                                continue;
                            }
                            {
                                let line = String::from_utf8_lossy(&buf);
                                match line.parse::<TelemetryFrame>() {
                                    Ok(frame) => on_frame(frame),
                                    Err(e) => {
                                        warn!("Skipping telemetry line {:?}: {}", line.trim(), e)
                                    }
                                }
                            }
                            buf.clear();
                        }
                        Err(e) if is_transient(&e) => {}
                        Err(e) => {
                            warn!("Telemetry read failed: {}", e);
                            break;
                        }
                    }
                }
                trace!("Telemetry reader exiting cleanly");
            })?;

        Ok(Self {
            shutdown,
            join_handle: Some(join_handle),
        })
    }

    /// Whether the reader thread has stopped (source closed or failed)
    pub fn is_finished(&self) -> bool {
        self.join_handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

impl Drop for TelemetryReader {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // Exits after the current read returns (bounded by the port timeout)
        if let Some(handle) = self.join_handle.take() {
            if let Err(e) = handle.join() {
                warn!(?e, "Telemetry reader panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[test]
    fn test_parse_frame() {
        let frame: TelemetryFrame = "11.4,120,118,42.5".parse().unwrap();
        assert_eq!(
            frame,
            TelemetryFrame {
                battery_voltage: 11.4,
                left_ticks: 120.0,
                right_ticks: 118.0,
                sonar_distance: 42.5,
            }
        );
    }

    #[test]
    fn test_parse_tolerates_whitespace_and_crlf() {
        let frame: TelemetryFrame = " 10.0 , -3, 4 ,0\r\n".parse().unwrap();
        assert_eq!(frame.left_ticks, -3.0);
        assert_eq!(frame.sonar_distance, 0.0);
    }

    #[test]
    fn test_parse_wrong_field_count() {
        let err = "11.4,120,118".parse::<TelemetryFrame>().unwrap_err();
        assert_eq!(err, TelemetryError::FieldCount { expected: 4, got: 3 });
    }

    #[test]
    fn test_parse_invalid_number() {
        let err = "11.4,abc,118,3".parse::<TelemetryFrame>().unwrap_err();
        assert_eq!(
            err,
            TelemetryError::InvalidNumber {
                field: "left_ticks",
                raw: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_reader_skips_bad_lines_and_exits_on_eof() {
        let input = "12.0,10,20,35\ngarbage\n11.0,1,2,3\n";
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();

        let reader = TelemetryReader::spawn(Box::new(Cursor::new(input)), move |f| {
            sink.lock().unwrap().push(f)
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        drop(reader);

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].battery_voltage, 12.0);
        assert_eq!(frames[1].right_ticks, 2.0);
    }

    #[test]
    fn test_reader_ignores_unterminated_tail() {
        let input = "12.0,10,20,35\n11.0,1,2";
        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();

        let reader = TelemetryReader::spawn(Box::new(Cursor::new(input)), move |_| {
            *sink.lock().unwrap() += 1
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        drop(reader);
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
