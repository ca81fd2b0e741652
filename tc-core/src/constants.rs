//! Constants and configuration defaults for thermalctl
//!
//! Centralizes all magic numbers, tree-relative paths, and timing defaults.
//! Never use magic numbers in other files - add them here first.

use std::time::Duration;

/// Paths relative to the sensor tree root
pub mod paths {
    /// Default sensor tree root (hw-management layout)
    pub const TREE_ROOT: &str = "/var/run/hw-management";

    /// Default system configuration file
    pub const SYSTEM_CONFIG: &str = "/var/run/hw-management/config/tc_config.json";

    /// Temperature, tachometer and PWM attributes
    pub const THERMAL_DIR: &str = "thermal";

    /// Administrative flags and hardware counters
    pub const CONFIG_DIR: &str = "config";

    /// Module EEPROM identity files
    pub const EEPROM_DIR: &str = "eeprom";

    /// Readiness attributes of add-on devices
    pub const SYSTEM_DIR: &str = "system";

    /// `thermal/<attr>`
    pub fn thermal(attr: &str) -> String {
        format!("{}/{}", THERMAL_DIR, attr)
    }

    /// `config/<attr>`
    pub fn config(attr: &str) -> String {
        format!("{}/{}", CONFIG_DIR, attr)
    }

    /// `eeprom/<attr>`
    pub fn eeprom(attr: &str) -> String {
        format!("{}/{}", EEPROM_DIR, attr)
    }

    /// `system/<attr>`
    pub fn system(attr: &str) -> String {
        format!("{}/{}", SYSTEM_DIR, attr)
    }

    /// Main fan PWM control file (0-255)
    pub const PWM_FILE: &str = "thermal/pwm1";

    /// Suspend flag ("1" = thermal control suspended)
    pub const SUSPEND_FILE: &str = "config/suspend";

    /// Runtime log level flag
    pub const LOG_LEVEL_FILE: &str = "config/log_level";

    /// BMC ownership of the fan I2C bus ("1" = BMC owns it)
    pub const BMC_I2C_OWNER_FILE: &str = "config/bmc_i2c_owner";

    /// Board identity (SKU) used for board-scoped overrides
    pub const BOARD_ID_FILE: &str = "config/sku";

    /// Number of fan drawers
    pub const FAN_DRWR_NUM: &str = "config/fan_drwr_num";

    /// Number of PSUs
    pub const PSU_COUNT: &str = "config/psu_count";

    /// Number of ASICs
    pub const ASIC_NUM: &str = "config/asic_num";

    /// Number of DPUs
    pub const DPU_NUM: &str = "config/dpu_num";

    /// Hot-plug module counter
    pub const MODULE_COUNTER: &str = "thermal/module_counter";

    /// Hot-plug gearbox counter
    pub const GEARBOX_COUNTER: &str = "thermal/gearbox_counter";

    /// Device-tree-like descriptor listing extra thermal sensors
    pub const DEVTREE_FILE: &str = "config/devtree";
}

/// PWM control constants
pub mod pwm {
    /// Maximum raw PWM value (full speed)
    pub const RAW_MAX: u8 = 255;

    /// Lowest PWM the system ever asks for
    pub const SYSTEM_MIN: f64 = 20.0;

    /// Full speed
    pub const FULL: f64 = 100.0;

    /// PWM applied on start-up and when configuration is unavailable
    pub const SAFE: f64 = 60.0;

    /// Steady PWM held while an inserted attention fan recovers
    pub const ATTENTION: f64 = 40.0;

    /// Largest decrease applied per ramp-down step
    pub const MAX_REDUCTION: f64 = 8.0;

    /// Read-after-write tolerance in percent
    pub const VALIDATE_TOLERANCE: f64 = 1.0;

    /// Convert percentage (0-100) to raw PWM value (0-255)
    #[inline]
    pub fn from_percent(percent: f64) -> u8 {
        ((percent.clamp(0.0, 100.0) / 100.0) * RAW_MAX as f64).round() as u8
    }

    /// Convert raw PWM value (0-255) to percentage (0-100)
    #[inline]
    pub fn to_percent(value: u8) -> f64 {
        (value as f64 / RAW_MAX as f64) * 100.0
    }
}

/// Timing defaults for the control loop and workers
pub mod timing {
    use super::*;

    /// Lower clamp of the main loop sleep
    pub const LOOP_SLEEP_MIN: Duration = Duration::from_secs(1);

    /// Upper clamp of the main loop sleep
    pub const LOOP_SLEEP_MAX: Duration = Duration::from_secs(20);

    /// Hot-plug module scan interval
    pub const MODULE_SCAN: Duration = Duration::from_secs(30);

    /// Status report interval
    pub const PERIODIC_REPORT: Duration = Duration::from_secs(60);

    /// Ramp-down worker tick
    pub const PWM_WORKER_POLL: Duration = Duration::from_secs(5);

    /// Periodic PWM read-after-write revalidation
    pub const PWM_VALIDATE: Duration = Duration::from_secs(30);

    /// Fans need this long after a PWM change before tacho checks are meaningful
    pub const FAN_STEADY_STATE: Duration = Duration::from_secs(60);

    /// Default sensor poll interval
    pub const SENSOR_POLL: Duration = Duration::from_secs(3);

    /// Grace period for an attention fan to spin up after insertion
    pub const ATTENTION_GRACE: Duration = Duration::from_secs(30);

    /// Hold time of the attention-fan recovery PWM
    pub const ATTENTION_SETTLE: Duration = Duration::from_secs(20);
}

/// Error counter policy
pub mod retry {
    /// Consecutive failures before a cause is faulted
    pub const FAULT_THRESHOLD: u32 = 3;

    /// Always log the first N failures of a cause
    pub const LOG_FIRST_N: u32 = 3;

    /// After that, log every Nth failure
    pub const LOG_EVERY_N: u32 = 100;

    /// Maximum number of distinct causes tracked per counter
    pub const MAX_CAUSES: usize = 64;
}

/// Sensor defaults
pub mod sensor {
    /// Milli-units per unit in the sensor tree
    pub const MILLI_SCALE: f64 = 1000.0;

    /// Default value-smoothing level
    pub const SMOOTH_LEVEL: u32 = 4;

    /// Default hysteresis band (tree units)
    pub const HYSTERESIS: f64 = 0.0;

    /// Fallback lower critical limit (scaled units)
    pub const LCRIT: f64 = -127.0;

    /// Fallback upper critical limit (scaled units)
    pub const HCRIT: f64 = 150.0;

    /// Number of consecutive faulted sensors that forces full speed
    pub const TOTAL_ERR_CNT: usize = 2;

    /// Expected tachometer tolerance (fraction of target RPM)
    pub const RPM_TOLERANCE: f64 = 0.3;

    /// Ambient fallback when no ambient sensor exists (degrees)
    pub const AMBIENT_FALLBACK: f64 = 35.0;
}

/// Dynamic regulator defaults
pub mod dynamic {
    pub const INCREASE_STEP: f64 = 2.0;
    pub const DECREASE_STEP: f64 = 1.0;
    pub const UP_THRESHOLD: f64 = 1.0;
    pub const DOWN_THRESHOLD: f64 = 3.0;
    pub const RANGE: f64 = 0.0;
}

/// Escalation table defaults
pub mod dmin {
    /// Minimum PWM slope (percent per degree) for interpolated lookups
    pub const STEP_MIN: f64 = 2.0;

    /// Temperature probe used when the table has no bucket for the input
    pub const FALLBACK_PROBE: i64 = 100;
}
