//! thermalctl core library
//!
//! Fan control engine for network switches running the hw-management
//! sensor tree.
//!
//! # Module Structure
//!
//! - `hw/` - Sensor tree file access, PWM output, EEPROM identity
//! - `data/` - System configuration and layered per-sensor configuration
//! - `engine/` - Retry counter, regulators, smoothing, dmin escalation table
//! - `sensor/` - Sensor state machine and its variants
//! - `orchestrator/` - Discovery, system PWM decision, background workers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//! use tc_core::{DiagnosticContext, SensorTree, ThermalManager};
//!
//! let tree = SensorTree::new("/var/run/hw-management");
//! let diag = Arc::new(DiagnosticContext::new());
//! let mut manager = ThermalManager::new(tree, "/etc/thermalctl.json", diag).unwrap();
//! manager.load_configuration().unwrap();
//! let sleep = manager.poll_cycle(Instant::now()).unwrap();
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;
pub mod orchestrator;
pub mod sensor;

// Standalone modules
pub mod constants;

pub use tc_error as error;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export error types
pub use error::{Result, ThermalError};

// Re-export configuration
pub use data::{ConfigLayers, GeneralConfig, SensorConfig, SensorKindTag, SensorParams, SystemConfig};

// Re-export engine types
pub use engine::{DminTable, ErrorCounter, PwmBounds, Regulator};

// Re-export hardware access
pub use hw::{PwmOutput, SensorTree};

// Re-export sensors
pub use sensor::{FlowDirection, Sensor, SensorState};

// Re-export orchestrator
pub use orchestrator::{
    publish_report, DiagnosticContext, PeriodicWorker, StatusSnapshot, StopReason, SystemState,
    ThermalManager,
};
