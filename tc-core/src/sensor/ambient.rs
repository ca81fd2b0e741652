//! Composite ambient sensor
//!
//! Combines the port-side and fan-side ambient readings. The value is the
//! colder of the two; which side is colder tells the airflow direction.

use super::{cause, FlowDirection, SensorContext, SensorCore};
use crate::constants::paths;

const PORT_AMB: &str = "port_amb";
const FAN_AMB: &str = "fan_amb";

#[derive(Debug, Default)]
pub struct AmbientSensor {
    port: Option<f64>,
    fan: Option<f64>,
}

impl AmbientSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw port-side and fan-side readings of the last poll
    pub fn readings(&self) -> (Option<f64>, Option<f64>) {
        (self.port, self.fan)
    }

    /// Intake side is the colder one: port side colder means C2P
    pub fn flow_hint(&self) -> Option<FlowDirection> {
        match (self.port, self.fan) {
            (Some(port), Some(fan)) if port < fan => Some(FlowDirection::C2P),
            (Some(port), Some(fan)) if fan < port => Some(FlowDirection::P2C),
            _ => None,
        }
    }

    pub(super) fn handle_input(&mut self, core: &mut SensorCore, ctx: &SensorContext<'_>) -> bool {
        self.port = ctx.tree.read_int(&paths::thermal(PORT_AMB)).ok().map(|v| v as f64);
        self.fan = ctx.tree.read_int(&paths::thermal(FAN_AMB)).ok().map(|v| v as f64);

        let coldest = match (self.port, self.fan) {
            (Some(p), Some(f)) => Some(p.min(f)),
            (one, other) => one.or(other),
        };
        match coldest {
            Some(raw) => {
                core.record_success(cause::READ);
                core.accept_raw(raw)
            }
            None => {
                core.record_failure(cause::READ, "no ambient reading available");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crate::data::ConfigLayers;
    use crate::sensor::tests::ctx;
    use crate::sensor::{build, FlowDirection};
    use crate::test_utils::TestTree;

    #[test]
    fn test_ambient_takes_colder_side() {
        let t = TestTree::new();
        t.set("thermal/port_amb", "28000");
        t.set("thermal/fan_amb", "36000");
        let layers = ConfigLayers::builtin().unwrap();
        let mut s = build(layers.resolve("sensor_amb").unwrap(), &Default::default()).unwrap();
        let now = Instant::now();
        s.start(now);
        s.update(&ctx(&t.tree, now));
        assert_eq!(s.value(), Some(28.0));
        assert_eq!(s.flow_hint(), Some(FlowDirection::C2P));

        t.remove("thermal/port_amb");
        s.update(&ctx(&t.tree, now));
        assert_eq!(s.flow_hint(), None);
        assert!(s.faults().is_empty());
    }
}
