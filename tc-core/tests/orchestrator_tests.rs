/*
 * Integration tests for the thermal orchestrator
 *
 * Every test builds a throw-away hw-management tree, writes a system
 * configuration into it and drives ThermalManager through poll cycles
 * with explicit timestamps.
 */

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tc_core::constants::{paths, pwm};
use tc_core::data::merge_json;
use tc_core::{DiagnosticContext, SensorTree, StopReason, SystemState, ThermalManager};
use tempfile::TempDir;

struct Rig {
    _dir: TempDir,
    tree: SensorTree,
    config: PathBuf,
}

impl Rig {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for sub in ["thermal", "config", "eeprom", "system"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        let tree = SensorTree::new(dir.path());
        let config = dir.path().join("config/tc_config.json");
        Self { _dir: dir, tree, config }
    }

    /// Write a configuration with both workers disabled, merged with `extra`
    fn with_config(extra: Value) -> Self {
        let rig = Self::new();
        let mut doc = json!({"general": {"pwm_worker_poll_time": 0, "periodic_report_time": 0}});
        merge_json(&mut doc, &extra);
        fs::write(&rig.config, doc.to_string()).unwrap();
        rig
    }

    fn set(&self, rel: &str, content: &str) {
        fs::write(self.tree.path(rel), content).unwrap();
    }

    fn raw_pwm(&self) -> Option<u8> {
        fs::read_to_string(self.tree.path(paths::PWM_FILE)).ok()?.trim().parse().ok()
    }

    fn manager(&self) -> ThermalManager {
        let diag = Arc::new(DiagnosticContext::new());
        ThermalManager::new(self.tree.clone(), self.config.clone(), diag).unwrap()
    }

    fn loaded(&self) -> ThermalManager {
        let mut m = self.manager();
        m.load_configuration().unwrap();
        m
    }
}

fn fast_cpu() -> Value {
    json!({"sensors_config": {"cpu_pack": {"smooth_level": 1}, "pch": {"smooth_level": 1}}})
}

#[test]
fn test_missing_config_is_unsupported_and_safe() {
    let rig = Rig::new();
    rig.set("thermal/cpu_pack", "70000");
    let mut m = rig.manager();

    assert!(m.load_configuration().is_err());
    assert!(m.is_unsupported());
    assert_eq!(rig.raw_pwm(), Some(pwm::from_percent(pwm::SAFE)));

    let now = Instant::now();
    m.poll_cycle(now).unwrap();
    assert_eq!(m.state(), SystemState::Unconfigured);
    assert!(m.sensor_names().is_empty());

    fs::write(&rig.config, fast_cpu().to_string()).unwrap();
    m.load_configuration().unwrap();
    assert!(!m.is_unsupported());
    m.poll_cycle(now + Duration::from_secs(3)).unwrap();
    assert_eq!(m.state(), SystemState::Running);
    assert_eq!(m.current_pwm(), Some(60.0));
}

#[test]
fn test_malformed_config_is_unsupported() {
    let rig = Rig::new();
    fs::write(&rig.config, "{ not json").unwrap();
    let mut m = rig.manager();
    assert!(m.load_configuration().is_err());
    assert!(m.is_unsupported());
    assert_eq!(rig.raw_pwm(), Some(pwm::from_percent(pwm::SAFE)));
}

#[test]
fn test_regulates_from_cpu_temperature() {
    let rig = Rig::with_config(fast_cpu());
    rig.set("thermal/cpu_pack", "70000");
    let mut m = rig.loaded();
    let now = Instant::now();

    m.poll_cycle(now).unwrap();
    assert_eq!(m.state(), SystemState::Running);
    // 50..90 degrees over 20..100 %
    assert_eq!(m.current_pwm(), Some(60.0));
    assert_eq!(rig.raw_pwm(), Some(pwm::from_percent(60.0)));

    rig.set("thermal/cpu_pack", "80000");
    m.poll_cycle(now + Duration::from_secs(3)).unwrap();
    assert_eq!(m.current_pwm(), Some(80.0));

    // Without the ramp worker decreases are written directly
    rig.set("thermal/cpu_pack", "40000");
    m.poll_cycle(now + Duration::from_secs(6)).unwrap();
    assert_eq!(m.current_pwm(), Some(20.0));
}

#[test]
fn test_suspend_leaves_pwm_and_resumes() {
    let rig = Rig::with_config(fast_cpu());
    rig.set("thermal/cpu_pack", "70000");
    let mut m = rig.loaded();
    let now = Instant::now();
    m.poll_cycle(now).unwrap();
    assert_eq!(rig.raw_pwm(), Some(pwm::from_percent(60.0)));

    rig.set(paths::SUSPEND_FILE, "1");
    rig.set("thermal/cpu_pack", "90000");
    m.poll_cycle(now + Duration::from_secs(3)).unwrap();
    assert_eq!(m.state(), SystemState::Stopped);
    assert_eq!(m.stop_reason(), Some(StopReason::Suspend));
    assert!(!m.sensor("cpu_pack").unwrap().is_running());
    assert_eq!(rig.raw_pwm(), Some(pwm::from_percent(60.0)));

    rig.set(paths::SUSPEND_FILE, "0");
    m.poll_cycle(now + Duration::from_secs(6)).unwrap();
    assert_eq!(m.state(), SystemState::Running);
    assert_eq!(m.current_pwm(), Some(100.0));
}

#[test]
fn test_bmc_ownership_stops_control() {
    let rig = Rig::with_config(fast_cpu());
    rig.set("thermal/cpu_pack", "70000");
    rig.set(paths::BMC_I2C_OWNER_FILE, "1");
    let mut m = rig.loaded();
    let now = Instant::now();
    m.poll_cycle(now).unwrap();
    assert_eq!(m.state(), SystemState::Stopped);
    assert_eq!(m.stop_reason(), Some(StopReason::BmcOwnership));
    assert_eq!(rig.raw_pwm(), None);

    rig.set(paths::BMC_I2C_OWNER_FILE, "0");
    m.poll_cycle(now + Duration::from_secs(3)).unwrap();
    assert_eq!(m.state(), SystemState::Running);
}

#[test]
fn test_drawers_missing_at_startup_force_full_speed() {
    let rig = Rig::with_config(fast_cpu());
    rig.set("thermal/cpu_pack", "50000");
    rig.set(paths::FAN_DRWR_NUM, "2");
    rig.set("thermal/drwr1_status", "0");
    rig.set("thermal/drwr2_status", "0");
    let mut m = rig.loaded();
    let now = Instant::now();
    m.poll_cycle(now).unwrap();
    assert_eq!(m.state(), SystemState::Stopped);
    assert_eq!(m.stop_reason(), Some(StopReason::MissingHardware));
    assert_eq!(rig.raw_pwm(), Some(pwm::RAW_MAX));

    rig.set("thermal/drwr1_status", "1");
    m.poll_cycle(now + Duration::from_secs(3)).unwrap();
    assert_eq!(m.state(), SystemState::Running);
}

#[test]
fn test_missing_drawers_force_full_speed() {
    let rig = Rig::with_config(fast_cpu());
    rig.set("thermal/cpu_pack", "50000");
    rig.set(paths::FAN_DRWR_NUM, "2");
    rig.set("thermal/drwr1_status", "1");
    rig.set("thermal/drwr2_status", "1");
    let mut m = rig.loaded();
    let now = Instant::now();
    m.poll_cycle(now).unwrap();
    assert_eq!(m.state(), SystemState::Running);

    rig.set("thermal/drwr1_status", "0");
    rig.set("thermal/drwr2_status", "0");
    m.poll_cycle(now + Duration::from_secs(3)).unwrap();
    assert_eq!(m.state(), SystemState::Stopped);
    assert_eq!(m.stop_reason(), Some(StopReason::MissingHardware));
    assert_eq!(rig.raw_pwm(), Some(pwm::RAW_MAX));
}

#[test]
fn test_emergency_holds_full_speed_until_cleared() {
    let rig = Rig::with_config(fast_cpu());
    rig.set("thermal/cpu_pack", "40000");
    rig.set(paths::MODULE_COUNTER, "1");
    rig.set("thermal/module1_temp_input", "90000");
    rig.set("thermal/module1_temp_crit", "100000");
    rig.set("thermal/module1_temp_emergency", "85000");
    rig.set(paths::PSU_COUNT, "1");
    rig.set("thermal/psu1_status", "1");
    let mut m = rig.loaded();
    let now = Instant::now();

    m.poll_cycle(now).unwrap();
    assert!(m.is_emergency());
    assert_eq!(rig.raw_pwm(), Some(pwm::RAW_MAX));
    assert_eq!(rig.tree.read_int("thermal/psu1_fan_pwm").unwrap(), 100);
    assert!(!m.sensor("cpu_pack").unwrap().is_running());
    assert!(m.sensor("module1").unwrap().is_running());
    assert_eq!(m.diagnostics().snapshot().emergencies, 1);

    rig.set("thermal/module1_temp_input", "60000");
    m.poll_cycle(now + Duration::from_secs(3)).unwrap();
    assert!(!m.is_emergency());
    assert!(m.sensor("cpu_pack").unwrap().is_running());
    assert!(m.current_pwm().unwrap() < 100.0);
}

#[test]
fn test_total_error_count_forces_full_speed() {
    // No sensor_read_error entry: a read fault alone only reaches pwm_min
    let mut extra = fast_cpu();
    merge_json(
        &mut extra,
        &json!({"dmin": {
            "C2P": {"fan_err": {"tacho": {"-127:120": 30}}},
            "P2C": {"fan_err": {"tacho": {"-127:120": 30}}}
        }}),
    );
    let rig = Rig::with_config(extra);
    rig.set("thermal/cpu_pack", "70000");
    rig.set("thermal/pch", "50000");
    rig.set("thermal/voltmon1_temp1_input", "50000");
    let mut m = rig.loaded();
    let mut now = Instant::now();
    m.poll_cycle(now).unwrap();
    assert_eq!(m.current_pwm(), Some(60.0));

    fs::remove_file(rig.tree.path("thermal/pch")).unwrap();
    for _ in 0..3 {
        now += Duration::from_secs(3);
        m.poll_cycle(now).unwrap();
    }
    assert!(m.sensor("pch").unwrap().has_unmasked_faults());
    assert_eq!(m.current_pwm(), Some(60.0));

    fs::remove_file(rig.tree.path("thermal/voltmon1_temp1_input")).unwrap();
    for _ in 0..3 {
        now += Duration::from_secs(3);
        m.poll_cycle(now).unwrap();
    }
    assert_eq!(m.current_pwm(), Some(100.0));
}

#[test]
fn test_read_errors_escalate_through_dmin() {
    // Rescan every cycle: a fixed sensor must survive losing its input
    let mut extra = fast_cpu();
    merge_json(&mut extra, &json!({"general": {"module_scan_time": 1}}));
    let rig = Rig::with_config(extra);
    rig.set("thermal/cpu_pack", "50000");
    rig.set("thermal/pch", "50000");
    let mut m = rig.loaded();
    let mut now = Instant::now();
    m.poll_cycle(now).unwrap();
    assert_eq!(m.current_pwm(), Some(20.0));

    fs::remove_file(rig.tree.path("thermal/pch")).unwrap();
    for _ in 0..2 {
        now += Duration::from_secs(3);
        m.poll_cycle(now).unwrap();
        assert_eq!(m.current_pwm(), Some(20.0));
    }
    now += Duration::from_secs(3);
    m.poll_cycle(now).unwrap();
    assert!(m.sensor("pch").is_some());
    assert_eq!(m.current_pwm(), Some(100.0));
}

#[test]
fn test_hotplug_modules_converge() {
    let rig = Rig::with_config(json!({"general": {"module_scan_time": 1}}));
    rig.set(paths::MODULE_COUNTER, "2");
    for i in 1..=2 {
        rig.set(&format!("thermal/module{}_temp_input", i), "50000");
        rig.set(&format!("thermal/module{}_temp_crit", i), "80000");
    }
    let mut m = rig.loaded();
    let now = Instant::now();
    m.poll_cycle(now).unwrap();
    assert_eq!(m.sensor_names(), vec!["module1", "module2"]);

    rig.set(paths::MODULE_COUNTER, "1");
    m.poll_cycle(now + Duration::from_secs(2)).unwrap();
    assert_eq!(m.sensor_names(), vec!["module1"]);
}

#[test]
fn test_dpu_children_follow_readiness() {
    let rig = Rig::with_config(json!({"general": {"module_scan_time": 1}}));
    rig.set(paths::DPU_NUM, "1");
    let mut m = rig.loaded();
    let now = Instant::now();
    m.poll_cycle(now).unwrap();
    assert_eq!(m.sensor_names(), vec!["dpu1_module"]);

    rig.set("system/dpu1_ready", "1");
    for child in ["cpu", "ddr", "drive"] {
        rig.set(&format!("thermal/dpu1_module_{}_temp_input", child), "50000");
    }
    m.poll_cycle(now + Duration::from_secs(2)).unwrap();
    assert_eq!(
        m.sensor_names(),
        vec!["dpu1_module", "dpu1_module_cpu", "dpu1_module_ddr", "dpu1_module_drive"]
    );

    rig.set("system/dpu1_ready", "0");
    m.poll_cycle(now + Duration::from_secs(4)).unwrap();
    assert_eq!(m.sensor_names(), vec!["dpu1_module"]);
}

#[test]
fn test_ramp_worker_steps_pwm_down() {
    let mut extra = fast_cpu();
    merge_json(&mut extra, &json!({"general": {"pwm_worker_poll_time": 1}}));
    let rig = Rig::with_config(extra);
    rig.set("thermal/cpu_pack", "90000");
    let mut m = rig.loaded();
    let now = Instant::now();
    m.poll_cycle(now).unwrap();
    assert_eq!(m.current_pwm(), Some(100.0));

    rig.set("thermal/cpu_pack", "50000");
    m.poll_cycle(now + Duration::from_secs(3)).unwrap();
    assert_eq!(m.target_pwm(), 20.0);
    assert_eq!(m.current_pwm(), Some(100.0));

    thread::sleep(Duration::from_millis(2500));
    let current = m.current_pwm().unwrap();
    assert!(current < 100.0 && current >= 20.0, "current {}", current);

    m.shutdown();
    assert_eq!(m.state(), SystemState::Stopped);
    assert_eq!(rig.raw_pwm(), Some(pwm::RAW_MAX));
}

/// Drawer 1 is inserted on the second cycle with stalled fans, drawer 2
/// runs at `drwr2_rpm` throughout.
fn attention_rig(cpu: &str, drwr2_rpm: &str) -> Rig {
    let mut extra = fast_cpu();
    merge_json(
        &mut extra,
        &json!({
            "general": {
                "attention_fans": ["drwr1"],
                "attention_grace_time": 0,
                "attention_settle_time": 20,
                "fan_steady_state_delay": 0
            },
            "redundancy": {"drwr": {"min_err_cnt": 1, "err_mask": ["tacho"]}}
        }),
    );
    let rig = Rig::with_config(extra);
    rig.set("thermal/cpu_pack", cpu);
    rig.set(paths::FAN_DRWR_NUM, "2");
    rig.set("thermal/drwr1_status", "0");
    rig.set("thermal/fan1_speed_get", "0");
    rig.set("thermal/fan2_speed_get", "0");
    rig.set("thermal/drwr2_status", "1");
    rig.set("thermal/drwr2_dir", "1");
    rig.set("thermal/fan3_speed_get", drwr2_rpm);
    rig.set("thermal/fan4_speed_get", drwr2_rpm);
    rig
}

#[test]
fn test_attention_hold_does_not_lower_thermal_demand() {
    let rig = attention_rig("90000", "21000");
    let mut m = rig.loaded();
    let mut now = Instant::now();
    m.poll_cycle(now).unwrap();

    rig.set("thermal/drwr1_status", "1");
    for _ in 0..3 {
        now += Duration::from_secs(3);
        m.poll_cycle(now).unwrap();
    }
    assert!(m.sensor("drwr1").unwrap().faults().contains("tacho"));
    assert_eq!(m.current_pwm(), Some(100.0));
}

#[test]
fn test_attention_hold_raises_floor_over_own_escalation() {
    let rig = attention_rig("50000", "3000");
    let mut m = rig.loaded();
    let mut now = Instant::now();
    m.poll_cycle(now).unwrap();

    rig.set("thermal/drwr1_status", "1");
    for _ in 0..2 {
        now += Duration::from_secs(3);
        m.poll_cycle(now).unwrap();
        assert_eq!(m.current_pwm(), Some(20.0));
    }
    now += Duration::from_secs(3);
    m.poll_cycle(now).unwrap();
    assert!(m.sensor("drwr1").unwrap().faults().contains("tacho"));
    assert_eq!(m.current_pwm(), Some(pwm::ATTENTION));
}
