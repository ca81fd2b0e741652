//! Plain temperature sensors: CPU, PCH, voltage monitors and ASICs

use super::{SensorContext, SensorCore};
use crate::constants::paths;
use crate::hw::SensorTree;

/// Temperature read from a single tree attribute
#[derive(Debug, Default)]
pub struct ThermalSensor;

impl ThermalSensor {
    pub fn new() -> Self {
        Self
    }

    pub(super) fn handle_input(&mut self, core: &mut SensorCore, ctx: &SensorContext<'_>) -> bool {
        let rel = core.config().input_file.clone();
        match core.read_input(ctx.tree, &rel) {
            Some(raw) => core.accept_raw(raw),
            None => false,
        }
    }
}

/// ASIC temperature; ignored while the ASIC is not ready
#[derive(Debug)]
pub struct AsicSensor {
    index: u32,
    inner: ThermalSensor,
}

impl AsicSensor {
    pub fn new(index: u32) -> Self {
        Self { index, inner: ThermalSensor::new() }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// `config/asic{N}_ready`; a missing attribute means ready
    pub fn ready(&self, tree: &SensorTree) -> bool {
        tree.flag_or(&paths::config(&format!("asic{}_ready", self.index)), true)
    }

    pub(super) fn handle_input(&mut self, core: &mut SensorCore, ctx: &SensorContext<'_>) -> bool {
        self.inner.handle_input(core, ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crate::data::ConfigLayers;
    use crate::sensor::tests::ctx;
    use crate::sensor::{build, SensorState};
    use crate::test_utils::TestTree;

    #[test]
    fn test_asic_blocked_until_ready() {
        let t = TestTree::new();
        t.set("thermal/asic1", "80000");
        t.set("config/asic1_ready", "0");

        let layers = ConfigLayers::builtin().unwrap();
        let mut s = build(layers.resolve("asic1").unwrap(), &Default::default()).unwrap();
        let now = Instant::now();

        assert!(s.refresh_blocked(&t.tree));
        s.start(now);
        assert_eq!(s.state(), SensorState::Stopped);

        t.set("config/asic1_ready", "1");
        assert!(s.refresh_blocked(&t.tree));
        s.start(now);
        s.update(&ctx(&t.tree, now));
        assert_eq!(s.value(), Some(80.0));

        t.set("config/asic1_ready", "0");
        s.refresh_blocked(&t.tree);
        assert_eq!(s.state(), SensorState::Stopped);
    }

    #[test]
    fn test_hysteresis_holds_pwm_on_jitter() {
        let t = TestTree::new();
        t.set("thermal/pch", "70000");

        let mut explicit = std::collections::BTreeMap::new();
        explicit.insert(
            "pch".to_string(),
            crate::data::SensorParams {
                hysteresis: Some(2000.0),
                smooth_level: Some(1),
                ..Default::default()
            },
        );
        let layers = ConfigLayers::new(explicit, &Default::default(), &Default::default()).unwrap();
        let mut s = build(layers.resolve("pch").unwrap(), &Default::default()).unwrap();
        let mut now = Instant::now();
        s.start(now);
        s.update(&ctx(&t.tree, now));
        let first = s.pwm().unwrap();

        // Rising trend established, then a small dip inside the band
        t.set("thermal/pch", "73000");
        now += std::time::Duration::from_secs(3);
        s.update(&ctx(&t.tree, now));
        let risen = s.pwm().unwrap();
        assert!(risen > first);

        t.set("thermal/pch", "72000");
        now += std::time::Duration::from_secs(3);
        s.update(&ctx(&t.tree, now));
        assert_eq!(s.pwm().unwrap(), risen);
    }
}
