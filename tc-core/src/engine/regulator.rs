//! PWM regulators
//!
//! Map a filtered sensor value to a PWM percentage.
//!
//! - **Linear**: straight line from `(val_min, pwm_min)` to `(val_max, pwm_max)`,
//!   clamped at both ends.
//! - **Dynamic**: the same line, but its ceiling creeps above `pwm_max` while
//!   the value sits near `val_max` and relaxes back once it cools down. Used
//!   for optical modules whose limits rise under sustained load.

use serde::{Deserialize, Serialize};

use crate::constants::{dynamic, pwm};

/// Value and PWM range of a regulator. `val_min <= val_max` and
/// `pwm_min <= pwm_max` hold for every constructed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmBounds {
    val_min: f64,
    val_max: f64,
    pwm_min: f64,
    pwm_max: f64,
}

impl PwmBounds {
    pub fn new(val_min: f64, val_max: f64, pwm_min: f64, pwm_max: f64) -> Self {
        let (val_min, val_max) = if val_min <= val_max { (val_min, val_max) } else { (val_max, val_min) };
        let pwm_min = pwm_min.clamp(0.0, pwm::FULL);
        let pwm_max = pwm_max.clamp(pwm_min, pwm::FULL);
        Self { val_min, val_max, pwm_min, pwm_max }
    }

    pub fn val_min(&self) -> f64 {
        self.val_min
    }

    pub fn val_max(&self) -> f64 {
        self.val_max
    }

    pub fn pwm_min(&self) -> f64 {
        self.pwm_min
    }

    pub fn pwm_max(&self) -> f64 {
        self.pwm_max
    }
}

/// Linear formula evaluated against an arbitrary ceiling
fn linear(value: f64, b: &PwmBounds, ceiling: f64) -> f64 {
    let span = b.val_max - b.val_min;
    if span.abs() < f64::EPSILON || !value.is_finite() {
        return b.pwm_min;
    }
    let pwm = b.pwm_min + (value - b.val_min) / span * (ceiling - b.pwm_min);
    pwm.clamp(b.pwm_min, ceiling)
}

/// Linear regulator: `pwm_min + (v - val_min)/(val_max - val_min) * (pwm_max - pwm_min)`
pub fn linear_pwm(value: f64, bounds: &PwmBounds) -> f64 {
    linear(value, bounds, bounds.pwm_max)
}

/// Tuning of the dynamic regulator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicParams {
    pub increase_step: f64,
    pub decrease_step: f64,
    pub up_threshold: f64,
    pub down_threshold: f64,
    pub range: f64,
}

impl Default for DynamicParams {
    fn default() -> Self {
        Self {
            increase_step: dynamic::INCREASE_STEP,
            decrease_step: dynamic::DECREASE_STEP,
            up_threshold: dynamic::UP_THRESHOLD,
            down_threshold: dynamic::DOWN_THRESHOLD,
            range: dynamic::RANGE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DynamicRegulator {
    bounds: PwmBounds,
    params: DynamicParams,
    integral: f64,
    ceiling: f64,
}

impl DynamicRegulator {
    pub fn new(bounds: PwmBounds, params: DynamicParams) -> Self {
        Self { bounds, params, integral: 0.0, ceiling: bounds.pwm_max }
    }

    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn calculate(&mut self, value: f64) -> f64 {
        let val_max = self.bounds.val_max;
        let p = self.params;

        if value >= val_max - p.up_threshold {
            self.integral = (value - val_max) + 1.0;
            if self.integral > 0.0 {
                self.ceiling = (self.ceiling + p.increase_step * self.integral).min(pwm::FULL);
            }
        } else if value < val_max - p.down_threshold {
            self.integral -= val_max - value - p.range;
            if self.integral < -p.down_threshold {
                self.ceiling = (self.ceiling - p.decrease_step * self.integral.abs()).max(self.bounds.pwm_max);
                self.integral = 0.0;
            }
        } else {
            self.integral = 0.0;
        }

        linear(value, &self.bounds, self.ceiling)
    }

    fn set_params(&mut self, params: DynamicParams) {
        self.params = params;
    }

    fn set_bounds(&mut self, bounds: PwmBounds) {
        self.bounds = bounds;
        self.ceiling = self.ceiling.clamp(bounds.pwm_max, pwm::FULL);
    }
}

/// Per-sensor regulator state
#[derive(Debug, Clone)]
pub enum Regulator {
    Linear(PwmBounds),
    Dynamic(DynamicRegulator),
}

impl Regulator {
    pub fn linear(bounds: PwmBounds) -> Self {
        Regulator::Linear(bounds)
    }

    pub fn dynamic(bounds: PwmBounds, params: DynamicParams) -> Self {
        Regulator::Dynamic(DynamicRegulator::new(bounds, params))
    }

    pub fn bounds(&self) -> PwmBounds {
        match self {
            Regulator::Linear(b) => *b,
            Regulator::Dynamic(d) => d.bounds,
        }
    }

    /// Re-parameterize after a threshold change; dynamic state is kept
    pub fn set_bounds(&mut self, bounds: PwmBounds) {
        match self {
            Regulator::Linear(b) => *b = bounds,
            Regulator::Dynamic(d) => d.set_bounds(bounds),
        }
    }

    /// Retune a dynamic regulator; no-op for the linear one
    pub fn set_dynamic_params(&mut self, params: DynamicParams) {
        if let Regulator::Dynamic(d) = self {
            d.set_params(params);
        }
    }

    pub fn calculate(&mut self, value: f64) -> f64 {
        match self {
            Regulator::Linear(b) => linear_pwm(value, b),
            Regulator::Dynamic(d) => d.calculate(value),
        }
    }
}
