//! System PWM actuation
//!
//! Increases are written at once. With smoothing enabled a decrease only
//! moves the target; the ramp worker then walks the output down by at most
//! `max_reduction` per tick. The main loop and the ramp worker reach this
//! type through the same mutex.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::constants::pwm;
use crate::error::{Result, ThermalError};
use crate::hw::PwmOutput;

#[derive(Debug)]
pub struct PwmActuator {
    output: PwmOutput,
    current: Option<f64>,
    target: f64,
    max_reduction: f64,
    validate_period: Duration,
    last_change: Instant,
    last_validate: Instant,
}

impl PwmActuator {
    pub fn new(output: PwmOutput, max_reduction: f64, validate_period: Duration, now: Instant) -> Self {
        Self {
            output,
            current: None,
            target: pwm::SAFE,
            max_reduction: max_reduction.max(f64::EPSILON),
            validate_period,
            last_change: now,
            last_validate: now,
        }
    }

    /// Swap the output path and ramp settings after a configuration load
    pub fn reconfigure(&mut self, output: PwmOutput, max_reduction: f64, validate_period: Duration) {
        if output.target() != self.output.target() {
            info!(output = %output.target(), "PWM output changed");
            self.current = None;
        }
        self.output = output;
        self.max_reduction = max_reduction.max(f64::EPSILON);
        self.validate_period = validate_period;
    }

    pub fn output(&self) -> &PwmOutput {
        &self.output
    }

    /// Last PWM written, `None` before the first write
    pub fn current(&self) -> Option<f64> {
        self.current
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Time of the last change of the written PWM
    pub fn last_change(&self) -> Instant {
        self.last_change
    }

    /// A decrease is still being walked down
    pub fn is_ramping(&self) -> bool {
        self.current.map(|c| c > self.target).unwrap_or(false)
    }

    fn write(&mut self, percent: f64, now: Instant) -> Result<()> {
        self.output.write_percent(percent)?;
        if self.current != Some(percent) {
            debug!(pwm = percent, "system PWM written");
            self.last_change = now;
        }
        self.current = Some(percent);
        Ok(())
    }

    /// Request a new system PWM. Without `smooth` every change is written
    /// directly.
    pub fn set_target(&mut self, target: f64, smooth: bool, now: Instant) -> Result<()> {
        let target = target.clamp(0.0, pwm::FULL);
        self.target = target;
        match self.current {
            Some(current) if smooth && target < current => Ok(()),
            Some(current) if current == target => Ok(()),
            _ => self.write(target, now),
        }
    }

    /// Write `percent` now, bypassing the ramp
    pub fn force(&mut self, percent: f64, now: Instant) -> Result<()> {
        self.target = percent.clamp(0.0, pwm::FULL);
        self.write(self.target, now)
    }

    /// One ramp-down step; returns true if something was written
    pub fn step(&mut self, now: Instant) -> Result<bool> {
        let Some(current) = self.current else {
            return Ok(false);
        };
        if current <= self.target {
            return Ok(false);
        }
        let next = (current - self.max_reduction).max(self.target);
        self.write(next, now)?;
        Ok(true)
    }

    /// Periodic read-back check; a mismatch is logged and rewritten
    pub fn revalidate(&mut self, now: Instant) -> Result<()> {
        if now.saturating_duration_since(self.last_validate) < self.validate_period {
            return Ok(());
        }
        self.last_validate = now;
        let Some(current) = self.current else {
            return Ok(());
        };
        match self.output.validate(current) {
            Ok(()) => Ok(()),
            Err(ThermalError::PwmMismatch { expected, actual }) => {
                warn!(expected = expected, actual = actual, "correcting system PWM");
                self.output.write_percent(current)
            }
            Err(e) => Err(e),
        }
    }
}
