//! PWM actuation paths
//!
//! The main fan PWM is either a scalar file holding the raw duty cycle
//! (0-255) or a register on the fan controller reached through the
//! `i2cset`/`i2cget` tools. Both paths read back what they wrote.

use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::pwm;
use crate::error::{Result, ThermalError};
use crate::hw::SensorTree;

/// Percent (0-100) to raw duty cycle (0-255)
pub fn percent_to_raw(percent: f64) -> u8 {
    pwm::from_percent(percent)
}

/// Raw duty cycle (0-255) to percent (0-100)
pub fn raw_to_percent(raw: u8) -> f64 {
    pwm::to_percent(raw)
}

/// Direct register access to the fan controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterConfig {
    pub bus: u32,
    pub addr: u16,
    pub reg: u16,
    #[serde(default = "default_set_tool")]
    pub set_tool: String,
    #[serde(default = "default_get_tool")]
    pub get_tool: String,
}

fn default_set_tool() -> String {
    "i2cset".to_string()
}

fn default_get_tool() -> String {
    "i2cget".to_string()
}

/// Where the main PWM goes
#[derive(Debug, Clone)]
pub enum PwmOutput {
    /// Scalar file in the sensor tree
    File { tree: SensorTree, rel: String },
    /// Fan controller register
    Register(RegisterConfig),
}

impl PwmOutput {
    /// Human-readable target for log lines
    pub fn target(&self) -> String {
        match self {
            PwmOutput::File { tree, rel } => tree.path(rel).display().to_string(),
            PwmOutput::Register(r) => format!("i2c-{}:{:#04x}/{:#04x}", r.bus, r.addr, r.reg),
        }
    }

    pub fn write_raw(&self, raw: u8) -> Result<()> {
        match self {
            PwmOutput::File { tree, rel } => tree.write_int(rel, raw as i64).map_err(|e| ThermalError::PwmWrite {
                target: self.target(),
                reason: e.to_string(),
            }),
            PwmOutput::Register(r) => {
                let output = Command::new(&r.set_tool)
                    .args(["-f", "-y"])
                    .arg(r.bus.to_string())
                    .arg(format!("{:#04x}", r.addr))
                    .arg(format!("{:#04x}", r.reg))
                    .arg(raw.to_string())
                    .output()
                    .map_err(|e| ThermalError::RegisterAccess(format!("{}: {}", r.set_tool, e)))?;
                if !output.status.success() {
                    return Err(ThermalError::RegisterAccess(format!(
                        "{} failed: {}",
                        r.set_tool,
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn read_raw(&self) -> Result<u8> {
        let value = match self {
            PwmOutput::File { tree, rel } => tree.read_int(rel).map_err(|e| ThermalError::PwmRead {
                target: self.target(),
                reason: e.to_string(),
            })?,
            PwmOutput::Register(r) => {
                let output = Command::new(&r.get_tool)
                    .args(["-f", "-y"])
                    .arg(r.bus.to_string())
                    .arg(format!("{:#04x}", r.addr))
                    .arg(format!("{:#04x}", r.reg))
                    .output()
                    .map_err(|e| ThermalError::RegisterAccess(format!("{}: {}", r.get_tool, e)))?;
                if !output.status.success() {
                    return Err(ThermalError::RegisterAccess(format!(
                        "{} failed: {}",
                        r.get_tool,
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
                parse_register_value(&String::from_utf8_lossy(&output.stdout))
                    .ok_or_else(|| ThermalError::PwmRead {
                        target: self.target(),
                        reason: "unparsable register value".to_string(),
                    })?
            }
        };

        if !(0..=pwm::RAW_MAX as i64).contains(&value) {
            return Err(ThermalError::PwmRead {
                target: self.target(),
                reason: format!("raw value {} out of range", value),
            });
        }
        Ok(value as u8)
    }

    /// Write a percentage
    pub fn write_percent(&self, percent: f64) -> Result<()> {
        let raw = percent_to_raw(percent);
        debug!("PWM: writing {}% (raw {}) to {}", percent.round(), raw, self.target());
        self.write_raw(raw)
    }

    /// Read back the current percentage
    pub fn read_percent(&self) -> Result<f64> {
        self.read_raw().map(raw_to_percent)
    }

    /// Check that the hardware holds `expected` percent
    pub fn validate(&self, expected: f64) -> Result<()> {
        let actual = self.read_percent()?;
        if (actual - expected).abs() > pwm::VALIDATE_TOLERANCE {
            warn!(
                output = %self.target(),
                expected = expected.round(),
                actual = actual.round(),
                "PWM read-back mismatch"
            );
            return Err(ThermalError::PwmMismatch {
                expected: expected.round() as u8,
                actual: actual.round() as u8,
            });
        }
        Ok(())
    }
}

fn parse_register_value(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => trimmed.parse().ok(),
    }
}
