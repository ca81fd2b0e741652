//! Redundancy accounting
//!
//! Per group (fan drawers, PSUs) count the members currently faulted on a
//! cause from the group's `err_mask`. While that count stays under
//! `min_err_cnt` those causes are dynamically masked on every member, so a
//! single failed unit is tolerated. From `min_err_cnt` on they escalate.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::data::RedundancyPolicy;
use crate::sensor::Sensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupStatus {
    pub members: usize,
    pub faulted: usize,
    /// Member faults are being tolerated
    pub masking: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RedundancyGroups {
    policies: BTreeMap<String, RedundancyPolicy>,
    status: BTreeMap<String, GroupStatus>,
}

impl RedundancyGroups {
    pub fn new(policies: BTreeMap<String, RedundancyPolicy>) -> Self {
        Self { policies, status: BTreeMap::new() }
    }

    pub fn status(&self) -> &BTreeMap<String, GroupStatus> {
        &self.status
    }

    /// Recount every group and set the members' dynamic masks
    pub fn apply(&mut self, sensors: &mut BTreeMap<String, Sensor>) {
        for (group, policy) in &self.policies {
            let mut members = 0;
            let mut faulted = 0;
            for sensor in sensors.values() {
                if sensor.redundancy_group() != Some(group.as_str()) || !sensor.is_running() {
                    continue;
                }
                members += 1;
                if sensor.faults().active().any(|c| policy.err_mask.iter().any(|m| m == c)) {
                    faulted += 1;
                }
            }

            let masking = faulted < policy.min_err_cnt;
            for sensor in sensors.values_mut() {
                if sensor.redundancy_group() == Some(group.as_str()) {
                    sensor.set_dynamic_filter(&policy.err_mask, masking);
                }
            }

            let status = GroupStatus { members, faulted, masking };
            let previous = self.status.insert(group.clone(), status);
            if previous.map(|p| p.masking) != Some(masking) && faulted > 0 {
                if masking {
                    info!(group = %group, faulted = faulted, "tolerating faults within redundancy");
                } else {
                    warn!(
                        group = %group,
                        faulted = faulted,
                        min_err_cnt = policy.min_err_cnt,
                        "redundancy exhausted, escalating"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::data::ConfigLayers;
    use crate::sensor::{build, cause, FlowDirection, SensorContext};
    use crate::test_utils::TestTree;

    fn drawer_files(t: &TestTree, index: u32, rpm: u32) {
        t.set(&format!("thermal/drwr{}_status", index), "1");
        t.set(&format!("thermal/drwr{}_dir", index), "1");
        for n in [index * 2 - 1, index * 2] {
            t.set(&format!("thermal/fan{}_speed_get", n), &rpm.to_string());
        }
    }

    fn poll_all(t: &TestTree, sensors: &mut BTreeMap<String, Sensor>, now: Instant) {
        let ctx = SensorContext {
            tree: &t.tree,
            now,
            flow: FlowDirection::C2P,
            ambient: 30.0,
            system_pwm: 60.0,
            pwm_changed_at: now,
            fan_steady_state: Duration::ZERO,
        };
        for s in sensors.values_mut() {
            s.update(&ctx);
        }
    }

    #[test]
    fn test_single_failure_is_tolerated_second_escalates() {
        let t = TestTree::new();
        let layers = ConfigLayers::builtin().unwrap();
        let mut sensors = BTreeMap::new();
        let mut now = Instant::now();
        for i in 1..=4 {
            drawer_files(&t, i, 12000);
            let mut s = build(layers.resolve(&format!("drwr{}", i)).unwrap(), &Default::default()).unwrap();
            s.start(now);
            sensors.insert(s.name().to_string(), s);
        }
        let mut policies = BTreeMap::new();
        policies.insert(
            "drwr".to_string(),
            RedundancyPolicy { min_err_cnt: 2, err_mask: vec![cause::TACHO.to_string()] },
        );
        let mut groups = RedundancyGroups::new(policies);

        t.set("thermal/fan1_speed_get", "500");
        for _ in 0..3 {
            poll_all(&t, &mut sensors, now);
            now += Duration::from_secs(3);
        }
        groups.apply(&mut sensors);
        assert!(sensors["drwr1"].faults().contains(cause::TACHO));
        assert!(!sensors["drwr1"].has_unmasked_faults());
        assert_eq!(groups.status()["drwr"].faulted, 1);

        t.set("thermal/fan3_speed_get", "500");
        for _ in 0..3 {
            poll_all(&t, &mut sensors, now);
            now += Duration::from_secs(3);
        }
        groups.apply(&mut sensors);
        assert!(sensors["drwr1"].has_unmasked_faults());
        assert!(sensors["drwr2"].has_unmasked_faults());
        assert!(!sensors["drwr3"].has_unmasked_faults());
        assert!(!groups.status()["drwr"].masking);
    }
}
