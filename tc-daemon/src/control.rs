//! Thermal control loop
//!
//! Drives `ThermalManager::poll_cycle` on the runtime thread, retries the
//! configuration while the platform is unsupported and follows the
//! log-level file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tc_core::constants::{pwm, timing};
use tc_core::ThermalManager;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::logging::LevelControl;

/// Consecutive failed cycles before full speed is forced
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Delay between configuration reload attempts while unsupported
const CONFIG_RETRY: Duration = Duration::from_secs(30);

/// Shared between the loop and the signal handler
#[derive(Default)]
pub struct ControlState {
    pub shutdown: AtomicBool,
    /// Wakes the loop out of its sleep
    pub wake: Notify,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Run until shutdown is requested, then leave the fans at full speed
pub async fn run_control_loop(mut manager: ThermalManager, state: Arc<ControlState>, mut levels: LevelControl) {
    info!("thermal control loop starting");

    let mut next_config_retry = Instant::now();
    let mut consecutive_loop_errors: u32 = 0;

    loop {
        if state.is_shutdown() {
            info!("thermal control loop shutting down");
            break;
        }

        levels.poll(manager.tree());

        let now = Instant::now();
        if (manager.config().is_none() || manager.is_unsupported()) && now >= next_config_retry {
            next_config_retry = now + CONFIG_RETRY;
            match manager.load_configuration() {
                Ok(()) => info!("configuration loaded"),
                Err(e) => debug!("configuration still unusable: {}", e),
            }
        }

        let sleep = match manager.poll_cycle(now) {
            Ok(sleep) => {
                if consecutive_loop_errors > 0 {
                    debug!("control loop recovered after {} errors", consecutive_loop_errors);
                    consecutive_loop_errors = 0;
                }
                sleep
            }
            Err(e) => {
                consecutive_loop_errors += 1;
                if consecutive_loop_errors == 1 || consecutive_loop_errors % MAX_CONSECUTIVE_ERRORS == 0 {
                    error!("control loop error (count: {}): {}", consecutive_loop_errors, e);
                }
                if consecutive_loop_errors == MAX_CONSECUTIVE_ERRORS {
                    warn!("too many consecutive errors, forcing full speed");
                    if let Err(e) = manager.actuate(pwm::FULL, Instant::now()) {
                        error!("failed to force full speed: {}", e);
                    }
                }
                timing::SENSOR_POLL
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = state.wake.notified() => {
                debug!("control loop woken up");
            }
        }
    }

    manager.shutdown();
    info!("thermal control loop stopped");
}
