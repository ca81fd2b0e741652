//! Thermal orchestrator
//!
//! [`ThermalManager`] owns the sensor registry and the system PWM decision.
//! It is driven by a single caller (the daemon loop) through
//! [`ThermalManager::poll_cycle`]; the two background workers only step the
//! actuator and publish the last status snapshot.
//!
//! ```text
//! Unconfigured --start--> Running <--suspend/bmc/missing hw/resume--> Stopped
//! ```

mod actuator;
mod attention;
mod diagnostics;
pub mod discovery;
mod redundancy;
mod worker;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::constants::{paths, pwm, sensor as sensor_const, timing};
use crate::data::{ConfigLayers, PatternTable, SensorParams, SystemConfig};
use crate::engine::{builtin_dmin_table, DminTable};
use crate::error::{Result, ThermalError};
use crate::hw::{PwmOutput, SensorTree};
use crate::sensor::{self, cause, FlowDirection, Sensor, SensorContext, SensorKind, SensorStatus};

pub use actuator::PwmActuator;
pub use attention::AttentionTracker;
pub use diagnostics::{DiagnosticContext, DiagnosticSnapshot};
pub use discovery::Scanner;
pub use redundancy::{GroupStatus, RedundancyGroups};
pub use worker::PeriodicWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    #[default]
    Unconfigured,
    Running,
    Stopped,
}

/// Why control is stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Suspend flag set; PWM left as is
    Suspend,
    /// The BMC owns the fan bus; PWM left as is
    BmcOwnership,
    /// No fan drawer present; full speed
    MissingHardware,
    /// Daemon exit; full speed
    Shutdown,
}

impl StopReason {
    /// Control stops without touching the PWM
    fn leaves_pwm(self) -> bool {
        matches!(self, StopReason::Suspend | StopReason::BmcOwnership)
    }
}

/// Published after every cycle; the report worker reads only this
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub state: SystemState,
    pub stop_reason: Option<StopReason>,
    pub unsupported: bool,
    pub flow: String,
    pub ambient: f64,
    pub pwm: Option<f64>,
    pub target: f64,
    pub emergency: bool,
    pub redundancy: BTreeMap<String, GroupStatus>,
    pub sensors: Vec<SensorStatus>,
    #[serde(skip)]
    pub lines: Vec<String>,
    pub diagnostics: DiagnosticSnapshot,
}

/// Log a snapshot and optionally write it as JSON
pub fn publish_report(snapshot: &StatusSnapshot, status_file: Option<&Path>) {
    info!(
        state = ?snapshot.state,
        pwm = snapshot.pwm.unwrap_or(0.0),
        target = snapshot.target,
        flow = %snapshot.flow,
        ambient = snapshot.ambient,
        "thermal status"
    );
    for line in &snapshot.lines {
        info!("  {}", line);
    }
    let Some(path) = status_file else {
        return;
    };
    match serde_json::to_string_pretty(snapshot) {
        Ok(json) => {
            if let Err(e) = fs::write(path, json) {
                warn!(path = %path.display(), "failed to write status file: {}", e);
            }
        }
        Err(e) => warn!("failed to serialize status: {}", e),
    }
}

pub struct ThermalManager {
    tree: SensorTree,
    config_path: PathBuf,
    config: Option<SystemConfig>,
    layers: ConfigLayers,
    module_params: PatternTable,
    scanner: Scanner,
    dmin: DminTable,
    sensors: BTreeMap<String, Sensor>,
    state: SystemState,
    stop_reason: Option<StopReason>,
    unsupported: bool,
    flow: FlowDirection,
    ambient: f64,
    emergency: bool,
    redundancy: RedundancyGroups,
    attention: AttentionTracker,
    actuator: Arc<Mutex<PwmActuator>>,
    snapshot: Arc<Mutex<StatusSnapshot>>,
    ramp_worker: Option<PeriodicWorker>,
    report_worker: Option<PeriodicWorker>,
    next_scan: Option<Instant>,
    /// Fixed sensors seen since the last configuration load
    pinned: BTreeSet<String>,
    diag: Arc<DiagnosticContext>,
}

impl ThermalManager {
    pub fn new(tree: SensorTree, config_path: impl Into<PathBuf>, diag: Arc<DiagnosticContext>) -> Result<Self> {
        let now = Instant::now();
        let output = PwmOutput::File { tree: tree.clone(), rel: paths::PWM_FILE.to_string() };
        let actuator = PwmActuator::new(output, pwm::MAX_REDUCTION, timing::PWM_VALIDATE, now);
        Ok(Self {
            config_path: config_path.into(),
            config: None,
            layers: ConfigLayers::builtin()?,
            module_params: PatternTable::default(),
            scanner: Scanner::new(&[])?,
            dmin: DminTable::from_json(&builtin_dmin_table(), pwm::SYSTEM_MIN)?,
            sensors: BTreeMap::new(),
            state: SystemState::Unconfigured,
            stop_reason: None,
            unsupported: false,
            flow: FlowDirection::Unknown,
            ambient: sensor_const::AMBIENT_FALLBACK,
            emergency: false,
            redundancy: RedundancyGroups::default(),
            attention: AttentionTracker::default(),
            actuator: Arc::new(Mutex::new(actuator)),
            snapshot: Arc::new(Mutex::new(StatusSnapshot::default())),
            ramp_worker: None,
            report_worker: None,
            next_scan: None,
            pinned: BTreeSet::new(),
            diag,
            tree,
        })
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn is_unsupported(&self) -> bool {
        self.unsupported
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    pub fn flow(&self) -> FlowDirection {
        self.flow
    }

    pub fn ambient(&self) -> f64 {
        self.ambient
    }

    pub fn tree(&self) -> &SensorTree {
        &self.tree
    }

    pub fn config(&self) -> Option<&SystemConfig> {
        self.config.as_ref()
    }

    pub fn sensor(&self, name: &str) -> Option<&Sensor> {
        self.sensors.get(name)
    }

    pub fn sensor_names(&self) -> Vec<&str> {
        self.sensors.keys().map(String::as_str).collect()
    }

    /// Last written system PWM
    pub fn current_pwm(&self) -> Option<f64> {
        self.actuator.lock().current()
    }

    pub fn target_pwm(&self) -> f64 {
        self.actuator.lock().target()
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticContext> {
        &self.diag
    }

    fn general_pwm_safe(&self) -> f64 {
        self.config.as_ref().map(|c| c.general.pwm_safe).unwrap_or(pwm::SAFE)
    }

    /// Load the system configuration. On failure the platform is marked
    /// unsupported and the safe PWM is written; the caller may retry.
    pub fn load_configuration(&mut self) -> Result<()> {
        let board = self.tree.read_str(paths::BOARD_ID_FILE).ok();
        let loaded = SystemConfig::load(&self.config_path, board.as_deref()).and_then(|c| self.apply_config(c));

        match loaded {
            Ok(()) => {
                if self.unsupported {
                    info!("configuration usable again");
                }
                self.unsupported = false;
                Ok(())
            }
            Err(e) => {
                if !self.unsupported {
                    error!(path = %self.config_path.display(), "platform unsupported: {}", e);
                }
                self.unsupported = true;
                let safe = self.general_pwm_safe();
                if let Err(we) = self.actuator.lock().force(safe, Instant::now()) {
                    warn!("failed to write safe PWM: {}", we);
                }
                Err(ThermalError::UnsupportedPlatform(e.to_string()))
            }
        }
    }

    fn apply_config(&mut self, config: SystemConfig) -> Result<()> {
        let layers = config.layers()?;
        let module_params = PatternTable::compile(&config.module_params)?;
        let scanner = Scanner::new(&config.sensor_list)?;
        let dmin = config.dmin_table()?;

        let output = match &config.general.pwm_register {
            Some(reg) => PwmOutput::Register(reg.clone()),
            None => PwmOutput::File { tree: self.tree.clone(), rel: paths::PWM_FILE.to_string() },
        };
        self.actuator
            .lock()
            .reconfigure(output, config.general.pwm_max_reduction, config.general.pwm_validate());

        self.layers = layers;
        self.module_params = module_params;
        self.scanner = scanner;
        self.dmin = dmin;
        self.redundancy = RedundancyGroups::new(config.redundancy.clone());
        self.attention = AttentionTracker::from_config(&config.general);

        // Sensors are rebuilt with the new layers on the next scan
        for s in self.sensors.values_mut() {
            s.stop();
        }
        self.sensors.clear();
        self.pinned.clear();
        self.next_scan = None;
        self.config = Some(config);

        if self.state == SystemState::Running {
            self.start_workers();
        }
        Ok(())
    }

    fn create_sensor(&self, name: &str, hint: Option<&SensorParams>) -> Result<Sensor> {
        let config = self.layers.resolve_with(name, hint)?;
        sensor::build(config, &self.module_params)
    }

    fn add_sensor(&mut self, name: &str, hint: Option<&SensorParams>, now: Instant) {
        match self.create_sensor(name, hint) {
            Ok(mut s) => {
                s.refresh_blocked(&self.tree);
                if self.state == SystemState::Running && !self.emergency {
                    s.start(now);
                }
                info!(sensor = %name, kind = %s.tag(), "sensor added");
                self.sensors.insert(name.to_string(), s);
            }
            Err(e) => warn!(sensor = %name, "sensor not created: {}", e),
        }
    }

    /// Converge the registry with the hardware: add new sensors, drop the
    /// ones that disappeared, register children of composite sensors.
    /// Returns the number of sensors added plus removed.
    pub fn discover_sensors(&mut self, now: Instant) -> Result<usize> {
        let Some(config) = &self.config else {
            return Ok(0);
        };
        let found = self.scanner.discover(&self.tree, config);
        self.diag.record_scan();

        let mut changes = 0;
        let mut wanted: BTreeSet<String> = BTreeSet::new();
        for d in &found {
            wanted.insert(d.name.clone());
            if d.fixed {
                self.pinned.insert(d.name.clone());
            }
            if !self.sensors.contains_key(&d.name) {
                self.add_sensor(&d.name, d.hint.as_ref(), now);
                changes += 1;
            }
        }

        let children: Vec<String> = found
            .iter()
            .filter_map(|d| self.sensors.get(&d.name))
            .flat_map(|s| s.children(&self.tree))
            .collect();
        for child in children {
            if wanted.insert(child.clone()) && !self.sensors.contains_key(&child) {
                self.add_sensor(&child, None, now);
                changes += 1;
            }
        }

        let stale: Vec<String> = self
            .sensors
            .keys()
            .filter(|n| !wanted.contains(*n) && !self.pinned.contains(*n))
            .cloned()
            .collect();
        for name in stale {
            if let Some(mut s) = self.sensors.remove(&name) {
                s.stop();
                info!(sensor = %name, "sensor removed");
                changes += 1;
            }
        }

        if changes > 0 {
            debug!(sensors = self.sensors.len(), changes = changes, "registry updated");
        }
        Ok(changes)
    }

    fn start_workers(&mut self) {
        self.stop_workers();
        let Some(config) = &self.config else {
            return;
        };

        if let Some(interval) = config.general.pwm_worker_poll() {
            let actuator = Arc::downgrade(&self.actuator);
            let mut worker = PeriodicWorker::new("pwm-ramp", interval, move || {
                let Some(actuator) = actuator.upgrade() else {
                    return;
                };
                let stepped = actuator.lock().step(Instant::now());
                if let Err(e) = stepped {
                    warn!("PWM ramp step failed: {}", e);
                }
            });
            match worker.start() {
                Ok(()) => self.ramp_worker = Some(worker),
                Err(e) => warn!("ramp worker not started, PWM changes are direct: {}", e),
            }
        }

        if let Some(interval) = config.general.periodic_report() {
            let snapshot = Arc::downgrade(&self.snapshot);
            let status_file = config.general.status_file.as_ref().map(|f| self.tree.root().join(f));
            let mut worker = PeriodicWorker::new("thermal-report", interval, move || {
                let Some(snapshot) = snapshot.upgrade() else {
                    return;
                };
                let current = snapshot.lock().clone();
                publish_report(&current, status_file.as_deref());
            });
            match worker.start() {
                Ok(()) => self.report_worker = Some(worker),
                Err(e) => warn!("report worker not started: {}", e),
            }
        }
    }

    fn stop_workers(&mut self) {
        if let Some(mut w) = self.ramp_worker.take() {
            w.stop();
        }
        if let Some(mut w) = self.report_worker.take() {
            w.stop();
        }
    }

    /// Enter `Running`: safe PWM, workers, every unblocked sensor
    pub fn start(&mut self, now: Instant) -> Result<()> {
        if self.config.is_none() {
            return Err(ThermalError::UnsupportedPlatform("no configuration loaded".to_string()));
        }
        if self.state == SystemState::Running {
            return Ok(());
        }
        info!(from = ?self.state, "thermal control starting");

        let safe = self.general_pwm_safe();
        let written = self.actuator.lock().force(safe, now);
        self.diag.record_actuation(written.is_ok());
        if let Err(e) = written {
            warn!("failed to write safe PWM: {}", e);
        }

        self.state = SystemState::Running;
        self.stop_reason = None;
        self.emergency = false;
        self.start_workers();
        for s in self.sensors.values_mut() {
            s.refresh_blocked(&self.tree);
            s.start(now);
        }
        Ok(())
    }

    /// Enter `Stopped`. Suspend and BMC hand-off leave the PWM untouched,
    /// anything else leaves the fans at full speed.
    pub fn stop(&mut self, reason: StopReason) {
        if self.state == SystemState::Stopped && self.stop_reason == Some(reason) {
            return;
        }
        info!(reason = ?reason, "thermal control stopping");
        self.stop_workers();
        for s in self.sensors.values_mut() {
            s.stop();
        }
        if !reason.leaves_pwm() {
            self.force_full(Instant::now());
        }
        self.state = SystemState::Stopped;
        self.stop_reason = Some(reason);
    }

    /// Final stop on daemon exit
    pub fn shutdown(&mut self) {
        self.stop(StopReason::Shutdown);
        self.publish();
    }

    /// All configured drawers report absent
    fn drawers_missing(&self) -> bool {
        let count = self.tree.read_int(paths::FAN_DRWR_NUM).unwrap_or(0);
        if count <= 0 {
            return false;
        }
        (1..=count).all(|i| !self.tree.flag_or(&paths::thermal(&format!("drwr{}_status", i)), true))
    }

    /// Evaluate suspend, BMC ownership and missing hardware and move
    /// between `Running` and `Stopped` accordingly
    pub fn check_control_inputs(&mut self, now: Instant) {
        let reason = if self.tree.flag_or(paths::SUSPEND_FILE, false) {
            Some(StopReason::Suspend)
        } else if self.tree.flag_or(paths::BMC_I2C_OWNER_FILE, false) {
            Some(StopReason::BmcOwnership)
        } else if self.drawers_missing() {
            Some(StopReason::MissingHardware)
        } else {
            None
        };

        match (self.state, reason) {
            (SystemState::Running, Some(r)) => self.stop(r),
            (SystemState::Stopped, Some(r)) if self.stop_reason != Some(r) => {
                if self.stop_reason != Some(StopReason::Shutdown) {
                    self.stop(r);
                }
            }
            (SystemState::Stopped, None) if self.stop_reason != Some(StopReason::Shutdown) => {
                info!(reason = ?self.stop_reason, "stop condition cleared");
                if let Err(e) = self.start(now) {
                    warn!("cannot resume: {}", e);
                }
            }
            (SystemState::Unconfigured, Some(r)) if self.config.is_some() => self.stop(r),
            (SystemState::Unconfigured, None) if self.config.is_some() => {
                if let Err(e) = self.start(now) {
                    warn!("cannot start: {}", e);
                }
            }
            _ => {}
        }
    }

    /// Majority of drawer/PSU directions, else the ambient hint
    fn detect_flow(&self) -> FlowDirection {
        let (mut c2p, mut p2c) = (0, 0);
        let mut ambient_hint = None;
        for s in self.sensors.values().filter(|s| s.is_running()) {
            match (s.kind(), s.flow_hint()) {
                (SensorKind::Ambient(_), hint) => ambient_hint = hint,
                (_, Some(FlowDirection::C2P)) => c2p += 1,
                (_, Some(FlowDirection::P2C)) => p2c += 1,
                _ => {}
            }
        }
        if c2p > p2c {
            FlowDirection::C2P
        } else if p2c > c2p {
            FlowDirection::P2C
        } else {
            ambient_hint.unwrap_or(if c2p > 0 { self.flow } else { FlowDirection::Unknown })
        }
    }

    fn detect_ambient(&self) -> f64 {
        self.sensors
            .values()
            .find(|s| matches!(s.kind(), SensorKind::Ambient(_)) && s.is_running())
            .and_then(Sensor::value)
            .unwrap_or(sensor_const::AMBIENT_FALLBACK)
    }

    fn enter_emergency(&mut self, now: Instant) {
        if !self.emergency {
            let culprits: Vec<&str> = self
                .sensors
                .values()
                .filter(|s| s.is_emergency())
                .map(Sensor::name)
                .collect();
            error!(sensors = ?culprits, "emergency, holding full speed");
            self.diag.record_emergency();
            self.emergency = true;
        }
        for s in self.sensors.values_mut() {
            if !s.is_emergency() {
                s.stop();
            }
        }
        self.force_full(now);
    }

    /// Full speed on the system PWM and every PSU fan
    fn force_full(&mut self, now: Instant) {
        for s in self.sensors.values_mut() {
            s.on_system_pwm(&self.tree, pwm::FULL);
        }
        let written = self.actuator.lock().force(pwm::FULL, now);
        self.diag.record_actuation(written.is_ok());
        if let Err(e) = written {
            error!("failed to write full speed: {}", e);
        }
    }

    fn leave_emergency(&mut self, now: Instant) {
        info!("emergency cleared, resuming normal control");
        self.emergency = false;
        for s in self.sensors.values_mut() {
            s.start(now);
        }
    }

    /// Drive the system PWM toward `target`. PSU fans follow at once; the
    /// main PWM ramps down through the worker when one is running.
    pub fn actuate(&mut self, target: f64, now: Instant) -> Result<()> {
        let smooth = self.ramp_worker.as_ref().map(PeriodicWorker::is_running).unwrap_or(false);
        let mut actuator = self.actuator.lock();
        if actuator.current().is_some() && actuator.target() == target {
            return Ok(());
        }
        for s in self.sensors.values_mut() {
            s.on_system_pwm(&self.tree, target);
        }
        let result = actuator.set_target(target, smooth, now);
        self.diag.record_actuation(result.is_ok());
        result
    }

    /// Compute the system PWM from the current sensor state
    fn compute_target(&mut self, now: Instant) -> f64 {
        let (pwm_min, pwm_max, total_err_cnt) = match &self.config {
            Some(c) => (c.general.pwm_min, c.general.pwm_max, c.general.total_err_cnt),
            None => (pwm::SYSTEM_MIN, pwm::FULL, sensor_const::TOTAL_ERR_CNT),
        };

        for s in self.sensors.values() {
            if self.attention.watches(s.name()) {
                let tacho = s.faults().contains(cause::TACHO);
                self.attention.observe(s.name(), s.present(), tacho, now);
            }
        }
        let hold = self.attention.override_pwm(now);

        let mut target = pwm_min;
        let mut faulted = Vec::new();
        for s in self.sensors.values_mut() {
            let err_pwm = s.handle_err(&self.dmin, self.flow, self.ambient);
            // The held drawer's own tacho escalation would defeat the hold
            if hold.is_none() || !self.attention.is_held(s.name()) {
                target = target.max(err_pwm);
            }
            if let Some(p) = s.pwm() {
                target = target.max(p);
            }
            if s.has_unmasked_faults() {
                faulted.push(s.name().to_string());
            }
        }
        let target = target.clamp(pwm_min, pwm_max);

        if total_err_cnt > 0 && faulted.len() >= total_err_cnt {
            debug!(faulted = ?faulted, "fault count reached {}, full speed", total_err_cnt);
            return pwm::FULL;
        }
        match hold {
            Some(hold) => target.max(hold),
            None => target,
        }
    }

    /// One pass of the control loop. Returns how long to sleep before the
    /// next pass (clamped to the loop window).
    pub fn poll_cycle(&mut self, now: Instant) -> Result<Duration> {
        let began = Instant::now();
        self.check_control_inputs(now);
        if self.state != SystemState::Running {
            self.publish();
            return Ok(timing::SENSOR_POLL);
        }

        if self.next_scan.map(|t| now >= t).unwrap_or(true) {
            if let Err(e) = self.discover_sensors(now) {
                warn!("sensor scan failed: {}", e);
            }
            let interval = self.config.as_ref().map(|c| c.general.module_scan()).unwrap_or(timing::MODULE_SCAN);
            self.next_scan = Some(now + interval);
        }

        let (system_pwm, pwm_changed_at) = {
            let a = self.actuator.lock();
            (a.current().unwrap_or(a.target()), a.last_change())
        };
        let fan_steady_state = self
            .config
            .as_ref()
            .map(|c| c.general.fan_steady_state())
            .unwrap_or(timing::FAN_STEADY_STATE);
        let ctx = SensorContext {
            tree: &self.tree,
            now,
            flow: self.flow,
            ambient: self.ambient,
            system_pwm,
            pwm_changed_at,
            fan_steady_state,
        };
        for s in self.sensors.values_mut() {
            if s.refresh_blocked(ctx.tree) && !s.is_blocked() && !self.emergency {
                s.start(now);
            }
            if s.is_due(now) {
                s.update(&ctx);
            }
        }

        self.flow = self.detect_flow();
        self.ambient = self.detect_ambient();
        self.redundancy.apply(&mut self.sensors);

        let result = if self.sensors.values().any(Sensor::is_emergency) {
            self.enter_emergency(now);
            Ok(())
        } else {
            if self.emergency {
                self.leave_emergency(now);
            }
            let target = self.compute_target(now);
            self.actuate(target, now)
        };

        if let Err(e) = self.actuator.lock().revalidate(now) {
            warn!("PWM revalidation failed: {}", e);
        }
        self.publish();
        self.diag.record_cycle(began.elapsed());
        result?;

        Ok(self.next_sleep(now))
    }

    fn next_sleep(&self, now: Instant) -> Duration {
        let next_poll = self
            .sensors
            .values()
            .filter_map(Sensor::next_poll)
            .chain(self.next_scan)
            .min()
            .map(|t| t.saturating_duration_since(now))
            .unwrap_or(timing::LOOP_SLEEP_MAX);
        next_poll.clamp(timing::LOOP_SLEEP_MIN, timing::LOOP_SLEEP_MAX)
    }

    /// Current status of the whole system
    pub fn report(&self) -> StatusSnapshot {
        let (current, target) = {
            let a = self.actuator.lock();
            (a.current(), a.target())
        };
        StatusSnapshot {
            state: self.state,
            stop_reason: self.stop_reason,
            unsupported: self.unsupported,
            flow: self.flow.to_string(),
            ambient: self.ambient,
            pwm: current,
            target,
            emergency: self.emergency,
            redundancy: self.redundancy.status().clone(),
            sensors: self.sensors.values().map(Sensor::status).collect(),
            lines: self.sensors.values().map(Sensor::info).collect(),
            diagnostics: self.diag.snapshot(),
        }
    }

    fn publish(&self) {
        let snapshot = self.report();
        *self.snapshot.lock() = snapshot;
    }
}

impl Drop for ThermalManager {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestTree;
    use serde_json::json;

    fn manager(t: &TestTree, config: serde_json::Value) -> ThermalManager {
        t.set("config/tc_config.json", &config.to_string());
        let path = t.tree.path("config/tc_config.json");
        let mut m = ThermalManager::new(t.tree.clone(), path, Arc::new(DiagnosticContext::new())).unwrap();
        m.load_configuration().unwrap();
        m
    }

    fn quiet() -> serde_json::Value {
        json!({"general": {"pwm_worker_poll_time": 0, "periodic_report_time": 0}})
    }

    #[test]
    fn test_flow_majority_and_ambient_fallback() {
        let t = TestTree::new();
        t.set("config/fan_drwr_num", "3");
        for (i, dir) in [(1, "0"), (2, "0"), (3, "1")] {
            t.set(&format!("thermal/drwr{}_status", i), "1");
            t.set(&format!("thermal/drwr{}_dir", i), dir);
        }
        let mut m = manager(&t, quiet());
        let now = Instant::now();
        m.poll_cycle(now).unwrap();
        assert_eq!(m.flow(), FlowDirection::P2C);
        assert_eq!(m.ambient(), sensor_const::AMBIENT_FALLBACK);
    }

    #[test]
    fn test_next_sleep_is_clamped() {
        let t = TestTree::new();
        t.set("thermal/cpu_pack", "40000");
        let mut m = manager(&t, quiet());
        let sleep = m.poll_cycle(Instant::now()).unwrap();
        assert!(sleep >= timing::LOOP_SLEEP_MIN && sleep <= timing::LOOP_SLEEP_MAX);
    }

    #[test]
    fn test_report_lists_sensors() {
        let t = TestTree::new();
        t.set("thermal/cpu_pack", "40000");
        let mut m = manager(&t, quiet());
        m.poll_cycle(Instant::now()).unwrap();
        let report = m.report();
        assert_eq!(report.state, SystemState::Running);
        assert_eq!(report.sensors.len(), 1);
        assert!(report.lines[0].starts_with("cpu_pack"));
        assert_eq!(report.diagnostics.cycles, 1);

        let file = t.root().join("status.json");
        publish_report(&report, Some(&file));
        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(file).unwrap()).unwrap();
        assert_eq!(written["state"], "running");
        assert_eq!(written["sensors"][0]["name"], "cpu_pack");
    }
}
