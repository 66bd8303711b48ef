// Fixed-cadence task scheduler
//
// Runs one task on a dedicated thread: once immediately, then on every tick
// of a fixed-rate ticker. A slow task drops ticks rather than queueing them.
// `stop()` returns only after the worker has exited, so the task never runs
// after it.

use crossbeam_channel as xch;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler period must be non-zero")]
    InvalidPeriod,

    #[error("Failed to spawn scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct Worker {
    // Dropping the sender wakes the worker out of `select!`
    stop_tx: xch::Sender<()>,
    handle: JoinHandle<()>,
}

/// Idle / Running state machine around one worker thread
#[derive(Default)]
pub struct Scheduler {
    name: String,
    worker: Option<Worker>,
}

impl Scheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start running `task` every `period`
    pub fn start<F>(&mut self, period: Duration, mut task: F) -> Result<(), SchedulerError>
    where
        F: FnMut() + Send + 'static,
    {
        if self.worker.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        if period.is_zero() {
            return Err(SchedulerError::InvalidPeriod);
        }

        let (stop_tx, stop_rx) = xch::bounded::<()>(1);
        let name = self.name.clone();
        let handle = thread::Builder::new().name(self.name.clone()).spawn(move || {
            let ticker = xch::tick(period);
            task();
            loop {
                xch::select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => task(),
                }
            }
            trace!("{} worker exiting cleanly", name);
        })?;

        debug!("{} started with {:?} period", self.name, period);
        self.worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    /// Stop the worker and wait for it to exit; no-op when idle
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        drop(worker.stop_tx);
        match worker.handle.join() {
            Ok(()) => debug!("{} stopped", self.name),
            Err(e) => warn!(?e, "{} worker panicked", self.name),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(counter: &Arc<AtomicUsize>) -> impl FnMut() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_runs_immediately_and_periodically() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new("test-scheduler");
        scheduler
            .start(Duration::from_millis(10), counting_task(&counter))
            .unwrap();
        thread::sleep(Duration::from_millis(120));
        scheduler.stop();
        // 1 immediate run + ~12 ticks; leave room for a loaded machine
        assert!(counter.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_double_start_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new("test-scheduler");
        scheduler
            .start(Duration::from_millis(10), counting_task(&counter))
            .unwrap();
        let second = scheduler.start(Duration::from_millis(10), counting_task(&counter));
        assert!(matches!(second, Err(SchedulerError::AlreadyRunning)));
        assert!(scheduler.is_running());
        scheduler.stop();
    }

    #[test]
    fn test_no_runs_after_stop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new("test-scheduler");
        scheduler
            .start(Duration::from_millis(5), counting_task(&counter))
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        scheduler.stop();

        let after_stop = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut scheduler = Scheduler::new("test-scheduler");
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_restart_cycles() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new("test-scheduler");
        for _ in 0..10 {
            scheduler
                .start(Duration::from_millis(5), counting_task(&counter))
                .unwrap();
            thread::sleep(Duration::from_millis(10));
            scheduler.stop();
        }
        // Every start runs the task at least once before stop returns
        assert!(counter.load(Ordering::SeqCst) >= 10);
    }

    #[test]
    fn test_zero_period_rejected() {
        let mut scheduler = Scheduler::new("test-scheduler");
        let result = scheduler.start(Duration::ZERO, || {});
        assert!(matches!(result, Err(SchedulerError::InvalidPeriod)));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_drop_stops_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let mut scheduler = Scheduler::new("test-scheduler");
            scheduler
                .start(Duration::from_millis(5), counting_task(&counter))
                .unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        let after_drop = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), after_drop);
    }
}
