//! Sensors
//!
//! A [`Sensor`] is one polled physical quantity. The state shared by every
//! sensor (smoothing, regulator, fault list, retry counter, poll schedule)
//! lives in [`SensorCore`]; the variant-specific part is a [`SensorKind`].
//!
//! Each tick of a running sensor:
//! 1. refresh thresholds when the refresh period elapsed
//! 2. read the input, smooth it, check critical limits, update faults
//! 3. compute the regulator PWM
//!
//! A separate pass ([`Sensor::handle_err`]) turns unmasked faults into a
//! forced minimum PWM through the dmin table.

mod ambient;
mod dpu;
mod factory;
mod fan;
mod module;
mod thermal;

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::constants::sensor as sensor_const;
use crate::data::{SensorConfig, SensorKindTag};
use crate::engine::{DminTable, ErrorCounter, Hysteresis, PwmBounds, Regulator, ValueFilter};
use crate::error::Result;
use crate::hw::SensorTree;

pub use ambient::AmbientSensor;
pub use dpu::DpuSensor;
pub use factory::{build, index_of};
pub use fan::{FanDrawer, PsuFan};
pub use module::{ModuleSensor, TecSensor};
pub use thermal::{AsicSensor, ThermalSensor};

/// Fault cause names
pub mod cause {
    /// Input unreadable for several consecutive polls
    pub const READ: &str = "read";
    /// Value outside the critical limits
    pub const CRIT: &str = "crit";
    pub const PRESENT: &str = "present";
    pub const DIRECTION: &str = "direction";
    pub const TACHO: &str = "tacho";
    /// Unrecoverable hardware condition; forces full speed
    pub const EMERGENCY: &str = "emergency";
    /// Not a fault; failures are only counted and logged
    pub const PWM_SET: &str = "pwm_set";
}

/// Fault categories used as the second level of the dmin table
pub mod category {
    pub const SENSOR: &str = "sensor_read_error";
    pub const FAN: &str = "fan_err";
    pub const PSU: &str = "psu_err";
}

/// Chassis airflow orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowDirection {
    /// Connector (port) side to power side
    C2P,
    /// Power side to connector side
    P2C,
    Unknown,
}

impl FlowDirection {
    /// Decode a `<name>_dir` attribute
    pub fn from_dir_value(value: i64) -> Self {
        match value {
            1 => FlowDirection::C2P,
            0 => FlowDirection::P2C,
            _ => FlowDirection::Unknown,
        }
    }

    /// dmin table keys to consult; both when the direction is unknown
    pub fn table_keys(&self) -> &'static [&'static str] {
        match self {
            FlowDirection::C2P => &["C2P"],
            FlowDirection::P2C => &["P2C"],
            FlowDirection::Unknown => &["C2P", "P2C"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDirection::C2P => "C2P",
            FlowDirection::P2C => "P2C",
            FlowDirection::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != FlowDirection::Unknown
    }
}

impl fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorState {
    Stopped,
    Running,
}

/// Active fault causes plus the static and dynamic masks
#[derive(Debug, Clone, Default)]
pub struct FaultList {
    active: BTreeSet<String>,
    static_mask: BTreeSet<String>,
    dynamic_mask: BTreeSet<String>,
    dynamic_filter: bool,
}

impl FaultList {
    pub fn new(static_mask: BTreeSet<String>) -> Self {
        Self { static_mask, ..Default::default() }
    }

    /// Raise or clear `cause`; returns true if that changed anything
    pub fn set(&mut self, cause: &str, on: bool) -> bool {
        if on {
            self.active.insert(cause.to_string())
        } else {
            self.active.remove(cause)
        }
    }

    pub fn contains(&self, cause: &str) -> bool {
        self.active.contains(cause)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn active(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(String::as_str)
    }

    /// Statically masked, or dynamically masked while dynamic filtering is on
    pub fn is_masked(&self, cause: &str) -> bool {
        self.static_mask.contains(cause) || (self.dynamic_filter && self.dynamic_mask.contains(cause))
    }

    /// Active causes that drive escalation
    pub fn unmasked(&self) -> Vec<&str> {
        self.active().filter(|c| !self.is_masked(c)).collect()
    }

    pub fn set_dynamic_filter(&mut self, mask: &[String], active: bool) {
        self.dynamic_mask = mask.iter().cloned().collect();
        self.dynamic_filter = active;
    }

    pub fn dynamic_filter_active(&self) -> bool {
        self.dynamic_filter
    }

    pub fn set_static_mask(&mut self, mask: BTreeSet<String>) {
        self.static_mask = mask;
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

/// Read-only system state handed to sensors each tick
#[derive(Debug, Clone)]
pub struct SensorContext<'a> {
    pub tree: &'a SensorTree,
    pub now: Instant,
    pub flow: FlowDirection,
    /// Ambient temperature in degrees
    pub ambient: f64,
    pub system_pwm: f64,
    /// Last change of the system PWM
    pub pwm_changed_at: Instant,
    /// Fans are only judged this long after a PWM change
    pub fan_steady_state: Duration,
}

impl SensorContext<'_> {
    /// Fans had time to settle on the current PWM
    pub fn fans_settled(&self) -> bool {
        self.now.saturating_duration_since(self.pwm_changed_at) >= self.fan_steady_state
    }
}

/// State shared by all sensor variants
#[derive(Debug)]
pub struct SensorCore {
    config: SensorConfig,
    state: SensorState,
    blocked: bool,
    filter: ValueFilter,
    hysteresis: Hysteresis,
    value: Option<f64>,
    last_raw: Option<f64>,
    regulator: Regulator,
    faults: FaultList,
    retries: ErrorCounter,
    pwm: f64,
    err_pwm: f64,
    next_poll: Option<Instant>,
    next_refresh: Option<Instant>,
    lcrit: f64,
    hcrit: f64,
}

impl SensorCore {
    pub fn new(config: SensorConfig) -> Self {
        let scale = config.scale;
        let literal = |v: &crate::data::ValueSource, fallback: f64| {
            v.as_literal().map(|x| x / scale).unwrap_or(fallback)
        };
        let val_min = literal(&config.val_min, sensor_const::LCRIT);
        let val_max = literal(&config.val_max, sensor_const::HCRIT);
        let bounds = PwmBounds::new(val_min, val_max, config.pwm_min, config.pwm_max);

        let regulator = match config.kind {
            SensorKindTag::Module => Regulator::dynamic(bounds, config.dynamic),
            _ => Regulator::linear(bounds),
        };

        Self {
            filter: ValueFilter::new(config.smooth_formula, config.smooth_level),
            hysteresis: Hysteresis::new(config.hysteresis / scale),
            faults: FaultList::new(config.static_err_mask.clone()),
            retries: ErrorCounter::new(config.name.clone()),
            lcrit: literal(&config.val_lcrit, sensor_const::LCRIT),
            hcrit: literal(&config.val_hcrit, sensor_const::HCRIT),
            pwm: config.pwm_min,
            blocked: !config.enable,
            state: SensorState::Stopped,
            value: None,
            last_raw: None,
            err_pwm: 0.0,
            next_poll: None,
            next_refresh: None,
            regulator,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn last_raw(&self) -> Option<f64> {
        self.last_raw
    }

    pub fn faults(&self) -> &FaultList {
        &self.faults
    }

    pub fn regulator(&self) -> &Regulator {
        &self.regulator
    }

    pub fn critical_limits(&self) -> (f64, f64) {
        (self.lcrit, self.hcrit)
    }

    /// Swap in a new configuration (EEPROM override); regulator state is kept
    pub(crate) fn reconfigure(&mut self, config: SensorConfig) {
        if config.smooth_formula != self.config.smooth_formula || config.smooth_level != self.config.smooth_level {
            self.filter = ValueFilter::new(config.smooth_formula, config.smooth_level);
        }
        self.hysteresis = Hysteresis::new(config.hysteresis / config.scale);
        self.faults.set_static_mask(config.static_err_mask.clone());
        self.regulator.set_dynamic_params(config.dynamic);
        let bounds = self.regulator.bounds();
        self.regulator.set_bounds(PwmBounds::new(
            bounds.val_min(),
            bounds.val_max(),
            config.pwm_min,
            config.pwm_max,
        ));
        self.config = config;
    }

    /// Re-read thresholds. Unresolvable thresholds keep their previous value.
    pub(crate) fn refresh_bounds(&mut self, tree: &SensorTree) -> Result<()> {
        let name = self.config.name.clone();
        let scale = self.config.scale;
        let bounds = self.regulator.bounds();
        let mut first_err = None;

        let mut resolve = |source: &crate::data::ValueSource, current: f64| match source.resolve(tree, &name) {
            Ok(v) => v / scale,
            Err(e) => {
                first_err.get_or_insert(e);
                current
            }
        };

        let val_min = resolve(&self.config.val_min.clone(), bounds.val_min());
        let val_max = resolve(&self.config.val_max.clone(), bounds.val_max());
        let lcrit = resolve(&self.config.val_lcrit.clone(), self.lcrit);
        let hcrit = resolve(&self.config.val_hcrit.clone(), self.hcrit);

        let bounds = PwmBounds::new(val_min, val_max, self.config.pwm_min, self.config.pwm_max);
        if bounds != self.regulator.bounds() {
            debug!(
                sensor = %name,
                val_min = bounds.val_min(),
                val_max = bounds.val_max(),
                "thresholds updated"
            );
        }
        self.regulator.set_bounds(bounds);
        self.lcrit = lcrit.min(hcrit);
        self.hcrit = hcrit.max(lcrit);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Read an integer attribute; failures count toward the `read` fault
    pub(crate) fn read_input(&mut self, tree: &SensorTree, rel: &str) -> Option<f64> {
        match tree.read_int(rel) {
            Ok(raw) => {
                self.record_success(cause::READ);
                Some(raw as f64)
            }
            Err(e) => {
                self.record_failure(cause::READ, &format!("read {} failed: {}", rel, e));
                None
            }
        }
    }

    /// Feed a raw reading; returns true if the smoothed value was committed
    pub(crate) fn accept_raw(&mut self, raw: f64) -> bool {
        self.last_raw = Some(raw);
        let scaled = raw / self.config.scale;

        let out_of_range = scaled < self.lcrit || scaled > self.hcrit;
        self.set_fault(cause::CRIT, out_of_range);
        if out_of_range {
            return false;
        }

        let value = self.filter.update(scaled);
        self.value = Some(value);
        self.hysteresis.update(value)
    }

    /// Set an unsmoothed value (tachometers, readiness flags)
    pub(crate) fn set_value(&mut self, value: f64) {
        self.last_raw = Some(value);
        self.value = Some(value);
    }

    /// Forget the value and return the regulator output to its floor
    pub(crate) fn clear_value(&mut self) {
        self.value = None;
        self.last_raw = None;
        self.filter.reset();
        self.hysteresis.reset();
        self.pwm = self.config.pwm_min;
    }

    /// Run the regulator. Linear regulators only move on committed values;
    /// the dynamic one integrates every tick.
    pub(crate) fn regulate(&mut self, committed: bool) -> f64 {
        let dynamic = matches!(self.regulator, Regulator::Dynamic(_));
        if committed || dynamic {
            if let Some(v) = self.hysteresis.committed() {
                self.pwm = self.regulator.calculate(v);
            }
        }
        self.pwm
    }

    /// Raise or clear a fault immediately, logging onset and recovery once
    pub(crate) fn set_fault(&mut self, cause: &str, on: bool) {
        if self.faults.set(cause, on) {
            if on {
                warn!(sensor = %self.config.name, cause = %cause, "fault raised");
            } else {
                info!(sensor = %self.config.name, cause = %cause, "fault cleared");
            }
        }
    }

    /// Count a failure; the fault is raised once the retry threshold is hit
    pub(crate) fn record_failure(&mut self, cause: &str, context: &str) {
        self.retries.record_failure(cause, context);
        if self.retries.is_faulted(cause) {
            self.set_fault(cause, true);
        }
    }

    pub(crate) fn record_success(&mut self, cause: &str) {
        self.retries.record_success(cause);
        self.set_fault(cause, false);
    }

    /// Count and log a failure without raising a fault
    pub(crate) fn count_failure(&mut self, cause: &str, context: &str) {
        self.retries.record_failure(cause, context);
    }

    pub(crate) fn clear_faults(&mut self) {
        if !self.faults.is_empty() {
            info!(sensor = %self.config.name, "faults cleared");
        }
        self.faults.clear();
        self.retries.reset();
    }

    /// Force a threshold refresh on the next tick
    pub(crate) fn request_refresh(&mut self) {
        self.next_refresh = Some(Instant::now());
    }
}

/// Variant-specific behaviour
#[derive(Debug)]
pub enum SensorKind {
    Thermal(ThermalSensor),
    Module(ModuleSensor),
    ModuleTec(TecSensor),
    Asic(AsicSensor),
    FanDrawer(FanDrawer),
    PsuFan(PsuFan),
    Ambient(AmbientSensor),
    Dpu(DpuSensor),
}

impl SensorKind {
    fn tag(&self) -> SensorKindTag {
        match self {
            SensorKind::Thermal(_) => SensorKindTag::Thermal,
            SensorKind::Module(_) => SensorKindTag::Module,
            SensorKind::ModuleTec(_) => SensorKindTag::ModuleTec,
            SensorKind::Asic(_) => SensorKindTag::Asic,
            SensorKind::FanDrawer(_) => SensorKindTag::FanDrawer,
            SensorKind::PsuFan(_) => SensorKindTag::PsuFan,
            SensorKind::Ambient(_) => SensorKindTag::Ambient,
            SensorKind::Dpu(_) => SensorKindTag::Dpu,
        }
    }

    /// Whether the variant produces a regulator PWM
    fn regulates(&self) -> bool {
        !matches!(self, SensorKind::FanDrawer(_) | SensorKind::PsuFan(_) | SensorKind::Dpu(_))
    }

    fn refresh_attr(&mut self, core: &mut SensorCore, ctx: &SensorContext<'_>) -> Result<()> {
        match self {
            SensorKind::Module(m) => m.refresh_attr(core, ctx),
            _ => core.refresh_bounds(ctx.tree),
        }
    }

    /// Returns true if a new value was committed
    fn handle_input(&mut self, core: &mut SensorCore, ctx: &SensorContext<'_>) -> bool {
        match self {
            SensorKind::Thermal(s) => s.handle_input(core, ctx),
            SensorKind::Module(s) => s.handle_input(core, ctx),
            SensorKind::ModuleTec(s) => s.handle_input(core, ctx),
            SensorKind::Asic(s) => s.handle_input(core, ctx),
            SensorKind::FanDrawer(s) => s.handle_input(core, ctx),
            SensorKind::PsuFan(s) => s.handle_input(core, ctx),
            SensorKind::Ambient(s) => s.handle_input(core, ctx),
            SensorKind::Dpu(s) => s.handle_input(core, ctx),
        }
    }

    fn fault_category(&self) -> &'static str {
        match self {
            SensorKind::FanDrawer(_) => category::FAN,
            SensorKind::PsuFan(_) => category::PSU,
            _ => category::SENSOR,
        }
    }
}

/// One polled sensor
#[derive(Debug)]
pub struct Sensor {
    core: SensorCore,
    kind: SensorKind,
}

impl Sensor {
    pub fn new(config: SensorConfig, kind: SensorKind) -> Self {
        Self { core: SensorCore::new(config), kind }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn tag(&self) -> SensorKindTag {
        self.kind.tag()
    }

    pub fn kind(&self) -> &SensorKind {
        &self.kind
    }

    pub fn core(&self) -> &SensorCore {
        &self.core
    }

    pub fn state(&self) -> SensorState {
        self.core.state
    }

    pub fn is_running(&self) -> bool {
        self.core.state == SensorState::Running
    }

    pub fn is_blocked(&self) -> bool {
        self.core.blocked
    }

    pub fn start(&mut self, now: Instant) {
        if self.core.blocked {
            debug!(sensor = %self.name(), "blocked, not starting");
            return;
        }
        if self.is_running() {
            return;
        }
        self.core.state = SensorState::Running;
        self.core.next_poll = Some(now);
        self.core.next_refresh = Some(now);
        debug!(sensor = %self.name(), "started");
    }

    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.core.state = SensorState::Stopped;
        self.core.next_poll = None;
        self.core.err_pwm = 0.0;
        debug!(sensor = %self.name(), "stopped");
    }

    /// Re-evaluate administrative blocking (ASIC readiness); returns true
    /// if the blocked state changed
    pub fn refresh_blocked(&mut self, tree: &SensorTree) -> bool {
        let blocked = !self.core.config.enable
            || match &self.kind {
                SensorKind::Asic(asic) => !asic.ready(tree),
                _ => false,
            };
        if blocked == self.core.blocked {
            return false;
        }
        self.core.blocked = blocked;
        if blocked {
            info!(sensor = %self.name(), "blocked");
            self.stop();
        } else {
            info!(sensor = %self.name(), "unblocked");
        }
        true
    }

    pub fn next_poll(&self) -> Option<Instant> {
        self.core.next_poll
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.core.next_poll.map(|t| now >= t).unwrap_or(false)
    }

    /// One poll tick
    pub fn update(&mut self, ctx: &SensorContext<'_>) {
        if !self.is_running() {
            return;
        }
        let now = ctx.now;

        if self.core.next_refresh.map(|t| now >= t).unwrap_or(false) {
            if let Err(e) = self.kind.refresh_attr(&mut self.core, ctx) {
                self.core.count_failure("refresh", &format!("threshold refresh failed: {}", e));
            }
            self.core.next_refresh = self.core.config.refresh_attr_period.map(|p| now + p);
        }

        let committed = self.kind.handle_input(&mut self.core, ctx);
        if self.kind.regulates() {
            self.core.regulate(committed);
        }

        self.core.next_poll = Some(now + self.core.config.poll_time);
    }

    /// Escalation PWM for the unmasked faults: the maximum dmin lookup over
    /// every unmasked cause (and both flows when the flow is unknown)
    pub fn handle_err(&mut self, dmin: &DminTable, flow: FlowDirection, ambient: f64) -> f64 {
        if !self.is_running() {
            self.core.err_pwm = 0.0;
            return 0.0;
        }
        let kind_category = self.kind.fault_category();
        let mut pwm: f64 = 0.0;
        for fault in self.core.faults.unmasked() {
            if fault == cause::EMERGENCY {
                continue;
            }
            // Read faults share one sub-table whatever the device
            let category = if fault == cause::READ { category::SENSOR } else { kind_category };
            for flow_key in flow.table_keys() {
                pwm = pwm.max(dmin.lookup(ambient, &[flow_key, category, fault]));
            }
        }
        self.core.err_pwm = pwm;
        pwm
    }

    /// Regulator PWM while running, for variants that regulate
    pub fn pwm(&self) -> Option<f64> {
        (self.is_running() && self.kind.regulates()).then_some(self.core.pwm)
    }

    pub fn err_pwm(&self) -> f64 {
        self.core.err_pwm
    }

    pub fn value(&self) -> Option<f64> {
        self.core.value
    }

    pub fn faults(&self) -> &FaultList {
        &self.core.faults
    }

    pub fn has_unmasked_faults(&self) -> bool {
        self.is_running() && !self.core.faults.unmasked().is_empty()
    }

    pub fn is_emergency(&self) -> bool {
        self.is_running() && self.core.faults.contains(cause::EMERGENCY)
    }

    pub fn redundancy_group(&self) -> Option<&'static str> {
        match self.kind {
            SensorKind::FanDrawer(_) => Some("drwr"),
            SensorKind::PsuFan(_) => Some("psu"),
            _ => None,
        }
    }

    pub fn set_dynamic_filter(&mut self, mask: &[String], active: bool) {
        self.core.faults.set_dynamic_filter(mask, active);
    }

    /// Hardware present as of the last poll
    pub fn present(&self) -> bool {
        match &self.kind {
            SensorKind::Module(m) => m.present(),
            SensorKind::ModuleTec(t) => t.present(),
            SensorKind::FanDrawer(d) => d.present(),
            SensorKind::PsuFan(p) => p.present(),
            SensorKind::Dpu(d) => d.ready(),
            _ => true,
        }
    }

    /// Airflow direction this sensor observed
    pub fn flow_hint(&self) -> Option<FlowDirection> {
        match &self.kind {
            SensorKind::FanDrawer(d) => d.direction(),
            SensorKind::PsuFan(p) => p.direction(),
            SensorKind::Ambient(a) => a.flow_hint(),
            _ => None,
        }
    }

    /// Names of child sensors this composite currently exposes
    pub fn children(&self, tree: &SensorTree) -> Vec<String> {
        match &self.kind {
            SensorKind::Dpu(d) if d.is_ready(tree) => self.core.config.child_sensors.clone(),
            SensorKind::Dpu(_) => Vec::new(),
            _ => self.core.config.child_sensors.clone(),
        }
    }

    /// Follow a new system PWM (PSU fans run in lock-step)
    pub fn on_system_pwm(&mut self, tree: &SensorTree, pwm: f64) {
        if let SensorKind::PsuFan(psu) = &mut self.kind {
            psu.set_fan_pwm(&mut self.core, tree, pwm);
        }
    }

    /// One-line status for the periodic report
    pub fn info(&self) -> String {
        let value = self
            .core
            .value
            .map(|v| format!("{:.1}", v))
            .unwrap_or_else(|| "-".to_string());
        let faults: Vec<String> = self
            .core
            .faults
            .active()
            .map(|c| if self.core.faults.is_masked(c) { format!("({})", c) } else { c.to_string() })
            .collect();
        format!(
            "{} [{}] {:?} value {} pwm {:.0} err_pwm {:.0} faults [{}]",
            self.name(),
            self.tag(),
            self.core.state,
            value,
            self.core.pwm,
            self.core.err_pwm,
            faults.join(",")
        )
    }

    pub fn status(&self) -> SensorStatus {
        SensorStatus {
            name: self.name().to_string(),
            kind: self.tag().as_str(),
            state: self.core.state,
            value: self.core.value,
            pwm: self.pwm(),
            err_pwm: self.core.err_pwm,
            faults: self.core.faults.active().map(str::to_string).collect(),
            unmasked: self.core.faults.unmasked().into_iter().map(str::to_string).collect(),
        }
    }
}

/// Serializable sensor snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SensorStatus {
    pub name: String,
    pub kind: &'static str,
    pub state: SensorState,
    pub value: Option<f64>,
    pub pwm: Option<f64>,
    pub err_pwm: f64,
    pub faults: Vec<String>,
    pub unmasked: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ConfigLayers;
    use crate::test_utils::TestTree;
    use serde_json::json;

    pub(crate) fn ctx(tree: &SensorTree, now: Instant) -> SensorContext<'_> {
        SensorContext {
            tree,
            now,
            flow: FlowDirection::C2P,
            ambient: 30.0,
            system_pwm: 60.0,
            pwm_changed_at: now,
            fan_steady_state: Duration::ZERO,
        }
    }

    fn thermal(name: &str) -> Sensor {
        let layers = ConfigLayers::builtin().unwrap();
        build(layers.resolve(name).unwrap(), &Default::default()).unwrap()
    }

    #[test]
    fn test_fault_list_masks() {
        let mut f = FaultList::new(["direction".to_string()].into_iter().collect());
        f.set("direction", true);
        f.set("tacho", true);
        assert_eq!(f.unmasked(), vec!["tacho"]);

        f.set_dynamic_filter(&["tacho".to_string()], true);
        assert!(f.unmasked().is_empty());

        f.set_dynamic_filter(&["tacho".to_string()], false);
        assert_eq!(f.unmasked(), vec!["tacho"]);
    }

    #[test]
    fn test_stopped_sensor_does_not_poll() {
        let t = TestTree::new();
        t.set("thermal/cpu_pack", "70000");
        let mut s = thermal("cpu_pack");
        let now = Instant::now();
        s.update(&ctx(&t.tree, now));
        assert_eq!(s.value(), None);
        assert_eq!(s.pwm(), None);
    }

    #[test]
    fn test_thermal_sensor_regulates() {
        let t = TestTree::new();
        t.set("thermal/cpu_pack", "70000");
        let mut s = thermal("cpu_pack");
        let now = Instant::now();
        s.start(now);
        s.update(&ctx(&t.tree, now));
        // 50..90 degrees maps to 20..100 %
        assert_eq!(s.value(), Some(70.0));
        assert!((s.pwm().unwrap() - 60.0).abs() < 1e-9);
        assert!(!s.is_due(now));
        assert!(s.is_due(now + Duration::from_secs(3)));
    }

    #[test]
    fn test_read_errors_escalate_after_retries() {
        let t = TestTree::new();
        let mut s = thermal("pch");
        let dmin = DminTable::from_json(&json!({"C2P": {"sensor_read_error": {"-127:120": 100}}}), 20.0).unwrap();
        let mut now = Instant::now();
        s.start(now);

        for _ in 0..2 {
            s.update(&ctx(&t.tree, now));
            now += Duration::from_secs(3);
        }
        assert!(!s.faults().contains(cause::READ));
        assert_eq!(s.handle_err(&dmin, FlowDirection::C2P, 30.0), 0.0);

        s.update(&ctx(&t.tree, now));
        assert!(s.faults().contains(cause::READ));
        assert_eq!(s.handle_err(&dmin, FlowDirection::C2P, 30.0), 100.0);

        t.set("thermal/pch", "60000");
        now += Duration::from_secs(3);
        s.update(&ctx(&t.tree, now));
        assert!(!s.faults().contains(cause::READ));
        assert_eq!(s.handle_err(&dmin, FlowDirection::C2P, 30.0), 0.0);
    }

    #[test]
    fn test_critical_value_is_immediate_fault() {
        let t = TestTree::new();
        t.set("thermal/pch", "200000");
        let mut s = thermal("pch");
        let now = Instant::now();
        s.start(now);
        s.update(&ctx(&t.tree, now));
        assert!(s.faults().contains(cause::CRIT));
        assert_eq!(s.value(), None);
        assert!(s.has_unmasked_faults());
    }

    #[test]
    fn test_unknown_flow_takes_both_tables() {
        let t = TestTree::new();
        let mut s = thermal("pch");
        let dmin = DminTable::from_json(
            &json!({
                "C2P": {"sensor_read_error": {"-127:120": 40}},
                "P2C": {"sensor_read_error": {"-127:120": 70}}
            }),
            20.0,
        )
        .unwrap();
        let mut now = Instant::now();
        s.start(now);
        for _ in 0..3 {
            s.update(&ctx(&t.tree, now));
            now += Duration::from_secs(3);
        }
        assert_eq!(s.handle_err(&dmin, FlowDirection::Unknown, 30.0), 70.0);
        assert_eq!(s.handle_err(&dmin, FlowDirection::C2P, 30.0), 40.0);
    }

    #[test]
    fn test_info_marks_masked_faults() {
        let t = TestTree::new();
        t.set("thermal/pch", "200000");
        let mut s = thermal("pch");
        s.core.faults.set_static_mask(["crit".to_string()].into_iter().collect());
        let now = Instant::now();
        s.start(now);
        s.update(&ctx(&t.tree, now));
        assert!(s.info().contains("(crit)"));
        assert!(!s.has_unmasked_faults());
    }
}
