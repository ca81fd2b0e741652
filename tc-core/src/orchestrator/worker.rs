//! Stoppable periodic background task
//!
//! One OS thread per running worker. The thread waits on a condition
//! variable with a deadline, so `stop()` interrupts the wait immediately
//! instead of sleeping out the interval. `start`, `stop` and `restart` are
//! idempotent and a stopped worker never leaves its thread behind.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::Result;

type Task = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

pub struct PeriodicWorker {
    name: String,
    interval: Duration,
    task: Task,
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for PeriodicWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicWorker")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl PeriodicWorker {
    /// `task` runs every `interval` on the worker thread. It must tolerate
    /// running after its owner started shutting down.
    pub fn new(name: impl Into<String>, interval: Duration, task: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            interval,
            task: Arc::new(task),
            signal: Arc::new(StopSignal::default()),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        *self.signal.stopped.lock() = false;

        let signal = Arc::clone(&self.signal);
        let task = Arc::clone(&self.task);
        let interval = self.interval;
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || loop {
                let deadline = Instant::now() + interval;
                {
                    let mut stopped = signal.stopped.lock();
                    while !*stopped {
                        if signal.wake.wait_until(&mut stopped, deadline).timed_out() {
                            break;
                        }
                    }
                    if *stopped {
                        break;
                    }
                }
                task();
            })?;

        debug!(worker = %self.name, interval_ms = interval.as_millis() as u64, "worker started");
        self.handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if handle.join().is_err() {
            warn!(worker = %self.name, "worker thread panicked");
        }
        debug!(worker = %self.name, "worker stopped");
    }

    pub fn restart(&mut self) -> Result<()> {
        self.stop();
        self.start()
    }
}

impl Drop for PeriodicWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
