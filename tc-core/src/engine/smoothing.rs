//! Value smoothing and hysteresis
//!
//! Raw readings pass through a moving-average filter, then a hysteresis
//! gate decides whether the filtered value is "committed". Only committed
//! changes trigger a PWM recomputation.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Moving-average formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothFormula {
    /// Exponential moving average
    #[default]
    Ema,
    /// Simple moving average
    Sma,
    /// Weighted moving average, newest sample weighted heaviest
    Wma,
}

#[derive(Debug, Clone)]
pub struct ValueFilter {
    formula: SmoothFormula,
    level: usize,
    accumulator: Option<f64>,
    window: VecDeque<f64>,
    weights: Vec<f64>,
}

impl ValueFilter {
    pub fn new(formula: SmoothFormula, level: u32) -> Self {
        let level = level.max(1) as usize;
        Self {
            formula,
            level,
            accumulator: None,
            window: VecDeque::with_capacity(level),
            weights: wma_weights(level),
        }
    }

    pub fn formula(&self) -> SmoothFormula {
        self.formula
    }

    /// Feed one sample, return the filtered value
    pub fn update(&mut self, sample: f64) -> f64 {
        match self.formula {
            SmoothFormula::Ema => {
                let level = self.level as f64;
                let acc = match self.accumulator {
                    Some(acc) => acc - acc / level + sample,
                    None => sample * level,
                };
                self.accumulator = Some(acc);
                acc / level
            }
            SmoothFormula::Sma => {
                self.push(sample);
                self.window.iter().sum::<f64>() / self.window.len() as f64
            }
            SmoothFormula::Wma => {
                self.push(sample);
                // Newest sample first; renormalize while the window fills up
                let used = &self.weights[..self.window.len()];
                let total: f64 = used.iter().sum();
                self.window
                    .iter()
                    .rev()
                    .zip(used)
                    .map(|(v, w)| v * w)
                    .sum::<f64>()
                    / total
            }
        }
    }

    pub fn reset(&mut self) {
        self.accumulator = None;
        self.window.clear();
    }

    fn push(&mut self, sample: f64) {
        if self.window.len() == self.level {
            self.window.pop_front();
        }
        self.window.push_back(sample);
    }
}

/// Front weight `0.5 + 1/level`, the rest shared evenly; sums to 1
fn wma_weights(level: usize) -> Vec<f64> {
    if level == 1 {
        return vec![1.0];
    }
    let front = (0.5 + 1.0 / level as f64).min(1.0);
    let rest = (1.0 - front) / (level - 1) as f64;
    let mut weights = vec![rest; level];
    weights[0] = front;
    weights
}

/// Commit gate suppressing jitter
#[derive(Debug, Clone)]
pub struct Hysteresis {
    band: f64,
    committed: Option<f64>,
    rising: Option<bool>,
}

impl Hysteresis {
    pub fn new(band: f64) -> Self {
        Self { band: band.max(0.0), committed: None, rising: None }
    }

    pub fn committed(&self) -> Option<f64> {
        self.committed
    }

    /// Returns true if `value` is committed: it continues the last committed
    /// trend, or moved further than the band from the last commit.
    pub fn update(&mut self, value: f64) -> bool {
        let Some(last) = self.committed else {
            self.committed = Some(value);
            return true;
        };

        let delta = value - last;
        if delta == 0.0 {
            return false;
        }
        let rising = delta > 0.0;
        let same_trend = self.rising == Some(rising);

        if same_trend || delta.abs() > self.band {
            self.committed = Some(value);
            self.rising = Some(rising);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.committed = None;
        self.rising = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_converges() {
        let mut f = ValueFilter::new(SmoothFormula::Ema, 4);
        assert_eq!(f.update(40.0), 40.0);
        let v = f.update(60.0);
        assert!((v - 45.0).abs() < 1e-9);
        for _ in 0..100 {
            f.update(60.0);
        }
        assert!((f.update(60.0) - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_sma_window() {
        let mut f = ValueFilter::new(SmoothFormula::Sma, 3);
        f.update(10.0);
        f.update(20.0);
        assert!((f.update(30.0) - 20.0).abs() < 1e-9);
        assert!((f.update(40.0) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_wma_weights_sum_to_one() {
        for level in 1..10 {
            let sum: f64 = wma_weights(level).iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
        assert!((wma_weights(4)[0] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_wma_favours_newest() {
        let mut f = ValueFilter::new(SmoothFormula::Wma, 4);
        for v in [10.0, 10.0, 10.0] {
            f.update(v);
        }
        let v = f.update(50.0);
        // 0.75 * 50 + 3 * (0.25 / 3) * 10
        assert!((v - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_level_one_is_passthrough() {
        for formula in [SmoothFormula::Ema, SmoothFormula::Sma, SmoothFormula::Wma] {
            let mut f = ValueFilter::new(formula, 1);
            f.update(5.0);
            assert_eq!(f.update(9.0), 9.0);
        }
    }

    #[test]
    fn test_hysteresis_suppresses_jitter() {
        let mut h = Hysteresis::new(2.0);
        assert!(h.update(50.0));
        assert!(h.update(53.0)); // beyond band, trend now rising
        assert!(h.update(53.5)); // continues rising trend
        assert!(!h.update(52.5)); // reversal inside band
        assert!(!h.update(53.5)); // equal to committed
        assert!(h.update(51.0)); // reversal beyond band
        assert_eq!(h.committed(), Some(51.0));
    }
}
