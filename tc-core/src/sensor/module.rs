//! Hot-pluggable optical modules and gearboxes
//!
//! Modules report presence through `<name>_status`, temperature through
//! `<name>_temp_input` and their critical limit through `<name>_temp_crit`.
//! A temperature of 0 means the module has no sensor. Per-part limits are
//! selected by matching the EEPROM identity against `module_params`.

use tracing::info;

use super::{cause, SensorContext, SensorCore};
use crate::constants::paths;
use crate::data::{PatternTable, SensorConfig};
use crate::error::Result;
use crate::hw::{EepromIdentity, SensorTree};

fn module_present(tree: &SensorTree, name: &str) -> bool {
    tree.flag_or(&paths::thermal(&format!("{}_status", name)), true)
}

/// Track a presence change; an absent module has no value and no faults
fn update_presence(core: &mut SensorCore, tree: &SensorTree, was_present: bool) -> bool {
    let present = module_present(tree, core.name());
    if present != was_present {
        info!(sensor = %core.name(), present = present, "module presence changed");
        if present {
            core.request_refresh();
        } else {
            core.clear_faults();
            core.clear_value();
        }
    }
    present
}

#[derive(Debug)]
pub struct ModuleSensor {
    /// Configuration before any EEPROM override
    base: SensorConfig,
    overrides: PatternTable,
    identity: Option<EepromIdentity>,
    present: bool,
}

impl ModuleSensor {
    pub fn new(base: SensorConfig, overrides: PatternTable) -> Self {
        Self { base, overrides, identity: None, present: true }
    }

    pub fn present(&self) -> bool {
        self.present
    }

    pub fn identity(&self) -> Option<&EepromIdentity> {
        self.identity.as_ref()
    }

    /// Re-parse the EEPROM, apply the matching override, re-read thresholds
    pub(super) fn refresh_attr(&mut self, core: &mut SensorCore, ctx: &SensorContext<'_>) -> Result<()> {
        let rel = paths::eeprom(&format!("{}_data", core.name()));
        let identity = EepromIdentity::read(ctx.tree, &rel).ok().filter(|id| !id.is_empty());

        if identity != self.identity {
            let config = match &identity {
                Some(id) => match self.overrides.first_match(&id.match_key()) {
                    Some(overlay) => {
                        info!(
                            sensor = %core.name(),
                            part = %id.match_key(),
                            "applying per-part thermal limits"
                        );
                        self.base.with_override(overlay)?
                    }
                    None => self.base.clone(),
                },
                None => self.base.clone(),
            };
            core.reconfigure(config);
            self.identity = identity;
        }

        core.refresh_bounds(ctx.tree)
    }

    pub(super) fn handle_input(&mut self, core: &mut SensorCore, ctx: &SensorContext<'_>) -> bool {
        self.present = update_presence(core, ctx.tree, self.present);
        if !self.present {
            return false;
        }

        let rel = core.config().input_file.clone();
        let Some(raw) = core.read_input(ctx.tree, &rel) else {
            return false;
        };
        if raw == 0.0 {
            core.set_fault(cause::CRIT, false);
            core.clear_value();
            return false;
        }

        let emergency_rel = paths::thermal(&format!("{}_temp_emergency", core.name()));
        let emergency = ctx
            .tree
            .read_int(&emergency_rel)
            .ok()
            .filter(|limit| *limit > 0)
            .map(|limit| raw >= limit as f64)
            .unwrap_or(false);
        core.set_fault(cause::EMERGENCY, emergency);

        core.accept_raw(raw)
    }
}

/// TEC-cooled module: PWM follows `cooling_level_input / cooling_level_max`
#[derive(Debug)]
pub struct TecSensor {
    present: bool,
}

impl Default for TecSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl TecSensor {
    pub fn new() -> Self {
        Self { present: true }
    }

    pub fn present(&self) -> bool {
        self.present
    }

    pub(super) fn handle_input(&mut self, core: &mut SensorCore, ctx: &SensorContext<'_>) -> bool {
        self.present = update_presence(core, ctx.tree, self.present);
        if !self.present {
            return false;
        }
        let rel = core.config().input_file.clone();
        match core.read_input(ctx.tree, &rel) {
            Some(raw) => core.accept_raw(raw),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::data::{tec_params, ConfigLayers, SensorParams, ValueSource};
    use crate::sensor::tests::ctx;
    use crate::sensor::{build, Sensor};
    use crate::test_utils::TestTree;

    fn module(name: &str, overrides: &PatternTable) -> Sensor {
        let layers = ConfigLayers::builtin().unwrap();
        build(layers.resolve(name).unwrap(), overrides).unwrap()
    }

    #[test]
    fn test_module_reads_crit_threshold() {
        let t = TestTree::new();
        t.set("thermal/module1_status", "1");
        t.set("thermal/module1_temp_input", "70000");
        t.set("thermal/module1_temp_crit", "80000");

        let mut s = module("module1", &PatternTable::default());
        let now = Instant::now();
        s.start(now);
        s.update(&ctx(&t.tree, now));
        // 60..80 degrees, 20..100 %
        assert!((s.pwm().unwrap() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_absent_module_has_no_faults() {
        let t = TestTree::new();
        t.set("thermal/module2_status", "0");
        let mut s = module("module2", &PatternTable::default());
        let mut now = Instant::now();
        s.start(now);
        for _ in 0..5 {
            s.update(&ctx(&t.tree, now));
            now += Duration::from_secs(3);
        }
        assert!(s.faults().is_empty());
        assert!(!s.present());
        assert_eq!(s.pwm(), Some(20.0));
    }

    #[test]
    fn test_zero_temperature_means_no_sensor() {
        let t = TestTree::new();
        t.set("thermal/module3_temp_input", "0");
        t.set("thermal/module3_temp_crit", "0");
        let mut s = module("module3", &PatternTable::default());
        let now = Instant::now();
        s.start(now);
        s.update(&ctx(&t.tree, now));
        assert_eq!(s.value(), None);
        assert!(s.faults().is_empty());
    }

    #[test]
    fn test_emergency_threshold() {
        let t = TestTree::new();
        t.set("thermal/module4_temp_input", "90000");
        t.set("thermal/module4_temp_crit", "80000");
        t.set("thermal/module4_temp_emergency", "85000");
        let mut s = module("module4", &PatternTable::default());
        let now = Instant::now();
        s.start(now);
        s.update(&ctx(&t.tree, now));
        assert!(s.is_emergency());

        t.set("thermal/module4_temp_input", "70000");
        s.update(&ctx(&t.tree, now + Duration::from_secs(3)));
        assert!(!s.is_emergency());
    }

    #[test]
    fn test_eeprom_override_selects_limits() {
        let t = TestTree::new();
        t.set("thermal/module5_temp_input", "70000");
        t.set("thermal/module5_temp_crit", "80000");
        t.set("eeprom/module5_data", "Manufacturer: Mellanox\nPart Number: MMA1L30-CM\n");

        let mut map = BTreeMap::new();
        map.insert(
            "^Mellanox:MMA1L30".to_string(),
            SensorParams {
                val_max: Some(ValueSource::Text("!90000".to_string())),
                ..Default::default()
            },
        );
        let overrides = PatternTable::compile(&map).unwrap();
        let mut s = module("module5", &overrides);
        let now = Instant::now();
        s.start(now);
        s.update(&ctx(&t.tree, now));
        // 60..90 degrees now
        let expected = 20.0 + (10.0 / 30.0) * 80.0;
        assert!((s.pwm().unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_tec_cooling_level() {
        let t = TestTree::new();
        t.set("thermal/module6_cooling_level_input", "300");
        t.set("thermal/module6_cooling_level_max", "600");
        let layers = ConfigLayers::builtin().unwrap();
        let cfg = layers.resolve_with("module6", Some(&tec_params())).unwrap();
        let mut s = build(cfg, &PatternTable::default()).unwrap();
        let now = Instant::now();
        s.start(now);
        s.update(&ctx(&t.tree, now));
        assert!((s.pwm().unwrap() - 60.0).abs() < 1e-9);
    }
}
