//! DPU presence sensor
//!
//! A DPU exposes readiness through `system/dpu{N}_ready` and, while ready,
//! its own temperature sensors. Those children are owned by the registry;
//! this sensor only names them.

use tracing::info;

use super::{SensorContext, SensorCore};
use crate::constants::paths;
use crate::hw::SensorTree;

#[derive(Debug)]
pub struct DpuSensor {
    index: u32,
    ready: bool,
}

impl DpuSensor {
    pub fn new(index: u32) -> Self {
        Self { index, ready: false }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    fn ready_file(&self) -> String {
        paths::system(&format!("dpu{}_ready", self.index))
    }

    /// Readiness as of the last poll
    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Readiness straight from the tree
    pub fn is_ready(&self, tree: &SensorTree) -> bool {
        tree.flag_or(&self.ready_file(), false)
    }

    pub(super) fn handle_input(&mut self, core: &mut SensorCore, ctx: &SensorContext<'_>) -> bool {
        let ready = self.is_ready(ctx.tree);
        if ready != self.ready {
            info!(sensor = %core.name(), ready = ready, "DPU readiness changed");
        }
        self.ready = ready;
        core.set_value(if ready { 1.0 } else { 0.0 });
        false
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crate::data::ConfigLayers;
    use crate::sensor::tests::ctx;
    use crate::sensor::build;
    use crate::test_utils::TestTree;

    #[test]
    fn test_children_follow_readiness() {
        let t = TestTree::new();
        let layers = ConfigLayers::builtin().unwrap();
        let mut s = build(layers.resolve("dpu2_module").unwrap(), &Default::default()).unwrap();
        let now = Instant::now();
        s.start(now);
        s.update(&ctx(&t.tree, now));
        assert!(!s.present());
        assert!(s.children(&t.tree).is_empty());

        t.set("system/dpu2_ready", "1");
        s.update(&ctx(&t.tree, now));
        assert!(s.present());
        assert_eq!(
            s.children(&t.tree),
            vec!["dpu2_module_cpu", "dpu2_module_ddr", "dpu2_module_drive"]
        );
        assert_eq!(s.pwm(), None);
    }
}
