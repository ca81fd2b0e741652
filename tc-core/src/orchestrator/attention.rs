//! Attention-fan recovery
//!
//! Some drawers must spin up by themselves after insertion. If one of them
//! shows a tachometer fault after the grace period, while it is still being
//! watched, the system PWM is held at a steady low value for the settle time
//! so the drawer can lock onto it, then normal control resumes.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::constants::{retry, timing};
use crate::data::GeneralConfig;

#[derive(Debug, Clone, Default)]
pub struct AttentionTracker {
    fans: BTreeSet<String>,
    grace: Duration,
    settle: Duration,
    /// How long past the grace period a new drawer is still judged
    watch: Duration,
    pwm: f64,
    present: BTreeMap<String, bool>,
    inserted: BTreeMap<String, Instant>,
    held: BTreeSet<String>,
    hold_until: Option<Instant>,
}

impl AttentionTracker {
    pub fn new(fans: &[String], grace: Duration, settle: Duration, watch: Duration, pwm: f64) -> Self {
        Self {
            fans: fans.iter().cloned().collect(),
            grace,
            settle,
            watch,
            pwm,
            ..Default::default()
        }
    }

    /// The watch window covers the fan settling delay plus the polls a
    /// tachometer fault needs to be raised.
    pub fn from_config(general: &GeneralConfig) -> Self {
        let watch = general.fan_steady_state() + timing::SENSOR_POLL * (retry::FAULT_THRESHOLD + 1);
        Self::new(
            &general.attention_fans,
            Duration::from_secs(general.attention_grace_time),
            Duration::from_secs(general.attention_settle_time),
            watch,
            general.attention_pwm,
        )
    }

    pub fn watches(&self, name: &str) -> bool {
        self.fans.contains(name)
    }

    /// Feed the latest presence and tachometer state of a watched drawer
    pub fn observe(&mut self, name: &str, present: bool, tacho_fault: bool, now: Instant) {
        if !self.watches(name) {
            return;
        }
        let was_present = self.present.insert(name.to_string(), present).unwrap_or(present);
        if present && !was_present {
            info!(fan = %name, "attention fan inserted");
            self.inserted.insert(name.to_string(), now);
        }
        if !present {
            self.inserted.remove(name);
            return;
        }

        let Some(&since) = self.inserted.get(name) else {
            return;
        };
        let elapsed = now.saturating_duration_since(since);
        if elapsed < self.grace {
            return;
        }
        if tacho_fault {
            self.inserted.remove(name);
            warn!(
                fan = %name,
                pwm = self.pwm,
                settle_secs = self.settle.as_secs(),
                "attention fan did not spin up, holding steady PWM"
            );
            self.held.insert(name.to_string());
            self.hold_until = Some(now + self.settle);
        } else if elapsed >= self.grace + self.watch {
            debug!(fan = %name, "attention fan spun up");
            self.inserted.remove(name);
        }
    }

    /// PWM floor while a hold is active
    pub fn override_pwm(&mut self, now: Instant) -> Option<f64> {
        match self.hold_until {
            Some(until) if now < until => Some(self.pwm),
            Some(_) => {
                info!("attention hold over, restoring normal control");
                self.hold_until = None;
                self.held.clear();
                None
            }
            None => None,
        }
    }

    /// `name` triggered the active hold
    pub fn is_held(&self, name: &str) -> bool {
        self.held.contains(name)
    }

    pub fn is_holding(&self) -> bool {
        self.hold_until.is_some()
    }
}
