//! System configuration
//!
//! One JSON document describes the platform: escalation table, per-sensor
//! overrides, ASIC capabilities, redundancy policy, the sensor enablement
//! list and general loop settings. Board-scoped overrides are merged in
//! before the document is deserialized.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::constants::{dmin, pwm, sensor, timing};
use crate::data::sensor_config::{compile_pattern, ConfigLayers, SensorParams};
use crate::engine::{builtin_dmin_table, DminTable};
use crate::error::{Result, ThermalError};
use crate::hw::RegisterConfig;

/// Failure tolerance of one group of redundant devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedundancyPolicy {
    /// Simultaneous member faults from which escalation is no longer suppressed
    pub min_err_cnt: usize,
    /// Fault causes suppressed while the group is under `min_err_cnt`
    #[serde(default)]
    pub err_mask: Vec<String>,
}

/// Per-ASIC capabilities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsicCapabilities {
    /// ASIC temperature takes part in fan control
    pub fan_control: bool,
}

impl Default for AsicCapabilities {
    fn default() -> Self {
        Self { fan_control: true }
    }
}

/// Loop, actuation and escalation settings; durations in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub pwm_min: f64,
    pub pwm_max: f64,
    /// PWM written on start and while no configuration is usable
    pub pwm_safe: f64,
    /// Sensors with unmasked faults from which full speed is forced
    pub total_err_cnt: usize,
    /// Largest decrease per ramp step
    pub pwm_max_reduction: f64,
    /// Ramp worker tick, 0 disables gradual ramp-down
    pub pwm_worker_poll_time: u64,
    pub pwm_validate_time: u64,
    pub periodic_report_time: u64,
    pub module_scan_time: u64,
    pub fan_steady_state_delay: u64,
    /// Interpolate between dmin buckets
    pub dmin_interpolation: bool,
    pub dmin_step_min: f64,
    /// Drawers that must spin up after insertion
    pub attention_fans: Vec<String>,
    pub attention_grace_time: u64,
    pub attention_settle_time: u64,
    pub attention_pwm: f64,
    /// Write PWM through a register tool instead of the tree file
    pub pwm_register: Option<RegisterConfig>,
    /// JSON status snapshot written by the report worker
    pub status_file: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            pwm_min: pwm::SYSTEM_MIN,
            pwm_max: pwm::FULL,
            pwm_safe: pwm::SAFE,
            total_err_cnt: sensor::TOTAL_ERR_CNT,
            pwm_max_reduction: pwm::MAX_REDUCTION,
            pwm_worker_poll_time: timing::PWM_WORKER_POLL.as_secs(),
            pwm_validate_time: timing::PWM_VALIDATE.as_secs(),
            periodic_report_time: timing::PERIODIC_REPORT.as_secs(),
            module_scan_time: timing::MODULE_SCAN.as_secs(),
            fan_steady_state_delay: timing::FAN_STEADY_STATE.as_secs(),
            dmin_interpolation: false,
            dmin_step_min: dmin::STEP_MIN,
            attention_fans: Vec::new(),
            attention_grace_time: timing::ATTENTION_GRACE.as_secs(),
            attention_settle_time: timing::ATTENTION_SETTLE.as_secs(),
            attention_pwm: pwm::ATTENTION,
            pwm_register: None,
            status_file: None,
        }
    }
}

impl GeneralConfig {
    pub fn pwm_worker_poll(&self) -> Option<Duration> {
        (self.pwm_worker_poll_time > 0).then(|| Duration::from_secs(self.pwm_worker_poll_time))
    }

    pub fn pwm_validate(&self) -> Duration {
        Duration::from_secs(self.pwm_validate_time.max(1))
    }

    pub fn periodic_report(&self) -> Option<Duration> {
        (self.periodic_report_time > 0).then(|| Duration::from_secs(self.periodic_report_time))
    }

    pub fn module_scan(&self) -> Duration {
        Duration::from_secs(self.module_scan_time.max(1))
    }

    pub fn fan_steady_state(&self) -> Duration {
        Duration::from_secs(self.fan_steady_state_delay)
    }
}

/// The platform configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub name: Option<String>,
    /// Escalation table; the built-in one when absent
    pub dmin: Option<Value>,
    /// Explicit per-sensor entries keyed by exact name
    pub sensors_config: BTreeMap<String, SensorParams>,
    /// Tuned overrides keyed by a sensor-name regex
    pub dev_tune: BTreeMap<String, SensorParams>,
    /// Device-class defaults keyed by a sensor-name regex
    pub sensor_class: BTreeMap<String, SensorParams>,
    /// Module overrides keyed by an EEPROM `manufacturer:part_number` regex
    pub module_params: BTreeMap<String, SensorParams>,
    /// ASIC capabilities keyed by ASIC index
    pub asic_config: BTreeMap<String, AsicCapabilities>,
    pub redundancy: BTreeMap<String, RedundancyPolicy>,
    /// Sensor-name regexes; when non-empty only matching sensors are created
    pub sensor_list: Vec<String>,
    /// Partial documents keyed by a board identity regex
    pub board_overrides: BTreeMap<String, Value>,
    pub general: GeneralConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let mut redundancy = BTreeMap::new();
        redundancy.insert(
            "drwr".to_string(),
            RedundancyPolicy { min_err_cnt: 2, err_mask: vec!["tacho".to_string()] },
        );
        redundancy.insert(
            "psu".to_string(),
            RedundancyPolicy { min_err_cnt: 2, err_mask: vec!["present".to_string()] },
        );
        Self {
            name: None,
            dmin: None,
            sensors_config: BTreeMap::new(),
            dev_tune: BTreeMap::new(),
            sensor_class: BTreeMap::new(),
            module_params: BTreeMap::new(),
            asic_config: BTreeMap::new(),
            redundancy,
            sensor_list: Vec::new(),
            board_overrides: BTreeMap::new(),
            general: GeneralConfig::default(),
        }
    }
}

impl SystemConfig {
    /// Load the configuration file; `board_id` selects board overrides
    pub fn load(path: &Path, board_id: Option<&str>) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ThermalError::FileNotFound(path.to_path_buf())
            } else {
                ThermalError::FileRead { path: path.to_path_buf(), source: e }
            }
        })?;
        let document: Value = serde_json::from_str(&content)?;
        let config = Self::from_value(document, board_id)?;
        info!(
            path = %path.display(),
            board = board_id.unwrap_or("-"),
            "loaded system configuration {}",
            config.name.as_deref().unwrap_or("")
        );
        Ok(config)
    }

    /// Apply board overrides to `document` and deserialize it
    pub fn from_value(mut document: Value, board_id: Option<&str>) -> Result<Self> {
        if !document.is_object() {
            return Err(ThermalError::config("configuration root must be a JSON object"));
        }

        let overrides = document
            .as_object_mut()
            .and_then(|o| o.remove("board_overrides"))
            .unwrap_or(Value::Null);

        if let (Some(board), Value::Object(overrides)) = (board_id, &overrides) {
            for (pattern, overlay) in overrides {
                if compile_pattern(pattern)?.is_match(board) {
                    debug!(board = %board, pattern = %pattern, "applying board override");
                    merge_json(&mut document, overlay);
                }
            }
        }

        let mut config: SystemConfig = serde_json::from_value(document)?;
        if let Value::Object(map) = overrides {
            config.board_overrides = map.into_iter().collect();
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let g = &self.general;
        if !(0.0..=pwm::FULL).contains(&g.pwm_min) || !(0.0..=pwm::FULL).contains(&g.pwm_max) {
            return Err(ThermalError::invalid_config("general.pwm_min/pwm_max", "must be within 0..100"));
        }
        if g.pwm_min > g.pwm_max {
            return Err(ThermalError::invalid_config("general.pwm_min", "above pwm_max"));
        }
        if g.pwm_max_reduction <= 0.0 {
            return Err(ThermalError::invalid_config("general.pwm_max_reduction", "must be positive"));
        }
        for pattern in &self.sensor_list {
            compile_pattern(pattern)?;
        }
        self.dmin_table()?;
        Ok(())
    }

    /// Compiled escalation table
    pub fn dmin_table(&self) -> Result<DminTable> {
        let raw = self.dmin.clone().unwrap_or_else(builtin_dmin_table);
        let table = DminTable::from_json(&raw, self.general.pwm_min)?;
        Ok(if self.general.dmin_interpolation {
            table.with_interpolation(self.general.dmin_step_min)
        } else {
            table
        })
    }

    /// Compiled sensor configuration layers
    pub fn layers(&self) -> Result<ConfigLayers> {
        ConfigLayers::new(self.sensors_config.clone(), &self.dev_tune, &self.sensor_class)
    }

    /// ASIC `index` takes part in fan control
    pub fn asic_enabled(&self, index: u32) -> bool {
        self.asic_config
            .get(&index.to_string())
            .map(|c| c.fan_control)
            .unwrap_or(true)
    }
}

/// Recursively merge `overlay` into `base`; objects merge, other values replace
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
