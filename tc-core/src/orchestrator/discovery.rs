//! Sensor discovery
//!
//! Fixed sensors come from counters and files in the tree (CPU, PCH,
//! ambient, drawers, PSUs, ASICs, voltage monitors, devtree entries).
//! Hot-pluggable ones (modules, gearboxes, DPUs) come from counters that
//! are re-read on every scan.

use std::collections::BTreeSet;

use regex::Regex;
use tracing::debug;

use crate::constants::paths;
use crate::data::{compile_pattern, tec_params, SensorParams, SystemConfig};
use crate::error::Result;
use crate::hw::SensorTree;

/// A sensor that should exist, with an optional discovery-time hint layer
#[derive(Debug, Clone, PartialEq)]
pub struct Discovered {
    pub name: String,
    pub hint: Option<SensorParams>,
    /// Fixed sensors stay registered when their input disappears
    pub fixed: bool,
}

impl Discovered {
    fn plain(name: impl Into<String>) -> Self {
        Self { name: name.into(), hint: None, fixed: true }
    }

    fn hotplug(name: impl Into<String>, hint: Option<SensorParams>) -> Self {
        Self { name: name.into(), hint, fixed: false }
    }
}

const VOLTMON_INPUT: &str = r"^(voltmon\d+_temp\d+)_input$";

fn count(tree: &SensorTree, rel: &str) -> u32 {
    tree.read_int(rel).ok().map(|n| n.clamp(0, u32::MAX as i64) as u32).unwrap_or(0)
}

/// Discovery patterns, compiled once per configuration
#[derive(Debug, Clone)]
pub struct Scanner {
    voltmon: Regex,
    /// `sensor_list` filter; empty keeps everything
    filter: Vec<Regex>,
}

impl Scanner {
    pub fn new(sensor_list: &[String]) -> Result<Self> {
        Ok(Self {
            voltmon: compile_pattern(VOLTMON_INPUT)?,
            filter: sensor_list.iter().map(|p| compile_pattern(p)).collect::<Result<Vec<_>>>()?,
        })
    }

    /// Sensors that exist for the lifetime of the platform
    pub fn fixed_sensors(&self, tree: &SensorTree, config: &SystemConfig) -> Vec<Discovered> {
        let mut found = Vec::new();

        for name in ["cpu_pack", "pch"] {
            if tree.exists(&paths::thermal(name)) {
                found.push(Discovered::plain(name));
            }
        }
        if tree.exists(&paths::thermal("port_amb")) || tree.exists(&paths::thermal("fan_amb")) {
            found.push(Discovered::plain("sensor_amb"));
        }

        for i in 1..=count(tree, paths::FAN_DRWR_NUM) {
            found.push(Discovered::plain(format!("drwr{}", i)));
        }
        for i in 1..=count(tree, paths::PSU_COUNT) {
            found.push(Discovered::plain(format!("psu{}", i)));
        }
        for i in 1..=count(tree, paths::ASIC_NUM) {
            if config.asic_enabled(i) {
                found.push(Discovered::plain(format!("asic{}", i)));
            } else {
                debug!(asic = i, "ASIC excluded from fan control");
            }
        }

        if let Ok(files) = tree.list(paths::THERMAL_DIR) {
            for file in files {
                if let Some(caps) = self.voltmon.captures(&file) {
                    found.push(Discovered::plain(&caps[1]));
                }
            }
        }

        if let Ok(devtree) = tree.read_str(paths::DEVTREE_FILE) {
            for line in devtree.lines().map(str::trim) {
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some(name) = line.split_whitespace().next() {
                    found.push(Discovered::plain(name));
                }
            }
        }

        found
    }

    /// Every sensor that should exist, after the `sensor_list` filter.
    /// Later duplicates of a name are dropped.
    pub fn discover(&self, tree: &SensorTree, config: &SystemConfig) -> Vec<Discovered> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for d in self.fixed_sensors(tree, config).into_iter().chain(hotplug_sensors(tree)) {
            if !self.filter.is_empty() && !self.filter.iter().any(|re| re.is_match(&d.name)) {
                continue;
            }
            if seen.insert(d.name.clone()) {
                out.push(d);
            }
        }
        out
    }
}

/// Modules, gearboxes and DPUs currently announced by their counters
pub fn hotplug_sensors(tree: &SensorTree) -> Vec<Discovered> {
    let mut found = Vec::new();

    for i in 1..=count(tree, paths::MODULE_COUNTER) {
        let name = format!("module{}", i);
        let tec = tree.exists(&paths::thermal(&format!("{}_cooling_level_input", name)));
        found.push(Discovered::hotplug(name, tec.then(tec_params)));
    }
    for i in 1..=count(tree, paths::GEARBOX_COUNTER) {
        found.push(Discovered::hotplug(format!("gearbox{}", i), None));
    }
    for i in 1..=count(tree, paths::DPU_NUM) {
        found.push(Discovered::hotplug(format!("dpu{}_module", i), None));
    }

    found
}
