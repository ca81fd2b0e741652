//! Chassis fan drawers and PSU fans
//!
//! Neither produces a regulator PWM; both only raise faults that the dmin
//! table turns into a forced minimum PWM. Drawer tachometers are checked
//! against the RPM expected for the current system PWM once the fans had
//! time to settle.

use tracing::debug;

use super::{cause, FlowDirection, SensorContext, SensorCore};
use crate::constants::paths;
use crate::data::FanParams;
use crate::hw::SensorTree;

/// Read `<name>_dir`; unreadable or unknown values give `None`
fn read_direction(tree: &SensorTree, name: &str) -> Option<FlowDirection> {
    tree.read_int(&paths::thermal(&format!("{}_dir", name)))
        .ok()
        .map(FlowDirection::from_dir_value)
        .filter(FlowDirection::is_known)
}

/// Raise `direction` when the unit blows against the system flow
fn check_direction(core: &mut SensorCore, dir: Option<FlowDirection>, system: FlowDirection) {
    let mismatch = matches!(dir, Some(d) if system.is_known() && d != system);
    core.set_fault(cause::DIRECTION, mismatch);
}

/// Read `<name>_status`; a missing or unparsable file counts as present
fn read_presence(tree: &SensorTree, name: &str) -> bool {
    tree.flag_or(&paths::thermal(&format!("{}_status", name)), true)
}

#[derive(Debug)]
pub struct FanDrawer {
    index: u32,
    fan: FanParams,
    dir: Option<FlowDirection>,
    present: bool,
}

impl FanDrawer {
    pub fn new(index: u32, fan: FanParams) -> Self {
        Self { index, fan, dir: None, present: true }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn present(&self) -> bool {
        self.present
    }

    pub fn direction(&self) -> Option<FlowDirection> {
        self.dir.filter(|_| self.present)
    }

    /// Tachometer attributes of this drawer; numbering is chassis-wide
    pub fn tacho_files(&self) -> Vec<String> {
        let count = self.fan.tacho_count.max(1);
        let first = (self.index.saturating_sub(1)) * count + 1;
        (first..first + count)
            .map(|n| paths::thermal(&format!("fan{}_speed_get", n)))
            .collect()
    }

    pub(super) fn handle_input(&mut self, core: &mut SensorCore, ctx: &SensorContext<'_>) -> bool {
        let present = read_presence(ctx.tree, core.name());
        self.present = present;
        core.set_fault(cause::PRESENT, !present);
        if !present {
            core.set_fault(cause::DIRECTION, false);
            core.record_success(cause::TACHO);
            core.record_success(cause::READ);
            self.dir = None;
            return false;
        }

        self.dir = read_direction(ctx.tree, core.name());
        check_direction(core, self.dir, ctx.flow);

        let mut slowest: Option<f64> = None;
        let mut unreadable = Vec::new();
        for rel in self.tacho_files() {
            match ctx.tree.read_int(&rel) {
                Ok(rpm) => slowest = Some(slowest.map_or(rpm as f64, |s| s.min(rpm as f64))),
                Err(e) => unreadable.push(format!("{}: {}", rel, e)),
            }
        }
        if unreadable.is_empty() {
            core.record_success(cause::READ);
        } else {
            core.record_failure(cause::READ, &format!("tacho read failed: {}", unreadable.join(", ")));
        }

        let Some(rpm) = slowest else {
            return false;
        };
        core.set_value(rpm);

        if ctx.fans_settled() {
            let expected = self.fan.expected_rpm(ctx.system_pwm);
            let deviation = (rpm - expected).abs() / expected.max(1.0);
            if deviation > self.fan.tolerance {
                core.record_failure(
                    cause::TACHO,
                    &format!("speed {:.0} rpm, expected {:.0} rpm", rpm, expected),
                );
            } else {
                core.record_success(cause::TACHO);
            }
        }
        false
    }
}

#[derive(Debug)]
pub struct PsuFan {
    index: u32,
    dir: Option<FlowDirection>,
    present: bool,
}

impl PsuFan {
    pub fn new(index: u32) -> Self {
        Self { index, dir: None, present: true }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn present(&self) -> bool {
        self.present
    }

    pub fn direction(&self) -> Option<FlowDirection> {
        self.dir.filter(|_| self.present)
    }

    pub(super) fn handle_input(&mut self, core: &mut SensorCore, ctx: &SensorContext<'_>) -> bool {
        let present = read_presence(ctx.tree, core.name());
        self.present = present;
        core.set_fault(cause::PRESENT, !present);
        if !present {
            core.set_fault(cause::DIRECTION, false);
            self.dir = None;
            return false;
        }
        self.dir = read_direction(ctx.tree, core.name());
        check_direction(core, self.dir, ctx.flow);
        false
    }

    /// Drive the PSU fan in lock-step with the system PWM
    pub(super) fn set_fan_pwm(&mut self, core: &mut SensorCore, tree: &SensorTree, pwm: f64) {
        if !self.present {
            return;
        }
        let rel = paths::thermal(&format!("{}_fan_pwm", core.name()));
        match tree.write_int(&rel, pwm.round() as i64) {
            Ok(()) => {
                debug!(sensor = %core.name(), pwm = pwm, "PSU fan set");
                core.retries.record_success(cause::PWM_SET);
            }
            Err(e) => core.count_failure(cause::PWM_SET, &format!("set PSU fan failed: {}", e)),
        }
    }
}
