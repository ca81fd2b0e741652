//! Escalation ("dmin") table
//!
//! Nested JSON mapping: flow direction -> fault category -> (sub-category ...)
//! -> `"low:high"` temperature range -> forced minimum PWM.
//!
//! ```json
//! {"C2P": {"fan_err": {"tacho": {"-127:30": 60, "31:120": 100}}}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{dmin as dmin_const, pwm};
use crate::error::{Result, ThermalError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DminNode {
    Pwm(f64),
    Table(BTreeMap<String, DminNode>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Bucket {
    low: i64,
    high: i64,
    pwm: f64,
}

impl Bucket {
    fn contains(&self, t: i64) -> bool {
        self.low <= t && t <= self.high
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Ranges(Vec<Bucket>),
    Branch(BTreeMap<String, Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DminTable {
    root: BTreeMap<String, Node>,
    pwm_min: f64,
    step_min: Option<f64>,
}

impl DminTable {
    /// Build and validate a table. Range keys must be `"low:high"` integers.
    pub fn new(root: &BTreeMap<String, DminNode>, pwm_min: f64) -> Result<Self> {
        let mut compiled = BTreeMap::new();
        for (key, node) in root {
            compiled.insert(key.clone(), compile(key, node)?);
        }
        Ok(Self { root: compiled, pwm_min, step_min: None })
    }

    pub fn from_json(value: &serde_json::Value, pwm_min: f64) -> Result<Self> {
        let root: BTreeMap<String, DminNode> = serde_json::from_value(value.clone())?;
        Self::new(&root, pwm_min)
    }

    /// Enable smooth transitions between buckets with a minimum slope of
    /// `step_min` percent per degree
    pub fn with_interpolation(mut self, step_min: f64) -> Self {
        self.step_min = (step_min > 0.0).then_some(step_min);
        self
    }

    pub fn pwm_min(&self) -> f64 {
        self.pwm_min
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Walk `path` and look `temperature` up in the range table found there.
    /// A path that leads nowhere yields the configured minimum PWM. Walking
    /// stops early at the first range table, so sub-causes of a category
    /// with a single table share it.
    pub fn lookup(&self, temperature: f64, path: &[&str]) -> f64 {
        let mut level = &self.root;
        for key in path {
            match level.get(*key) {
                Some(Node::Branch(next)) => level = next,
                Some(Node::Ranges(buckets)) => return self.lookup_ranges(buckets, temperature),
                None => return self.pwm_min,
            }
        }
        self.pwm_min
    }

    fn lookup_ranges(&self, buckets: &[Bucket], temperature: f64) -> f64 {
        if !temperature.is_finite() {
            return pwm::FULL;
        }
        if buckets.is_empty() {
            return self.pwm_min;
        }
        let t = temperature.round() as i64;

        let idx = buckets
            .iter()
            .position(|b| b.contains(t))
            .or_else(|| buckets.iter().position(|b| b.contains(dmin_const::FALLBACK_PROBE)))
            .unwrap_or(buckets.len() - 1);
        let bucket = buckets[idx];

        let Some(step_min) = self.step_min else {
            return bucket.pwm;
        };
        if !bucket.contains(t) {
            return bucket.pwm;
        }
        let Some(next) = buckets.get(idx + 1) else {
            return bucket.pwm;
        };
        if next.pwm <= bucket.pwm {
            return bucket.pwm;
        }

        let boundary = next.low as f64;
        let smooth_start = boundary - (next.pwm - bucket.pwm) / step_min;
        if temperature < smooth_start {
            return bucket.pwm;
        }
        let ratio = ((temperature - smooth_start) / (boundary - smooth_start)).clamp(0.0, 1.0);
        bucket.pwm + (next.pwm - bucket.pwm) * ratio
    }
}

fn compile(key: &str, node: &DminNode) -> Result<Node> {
    let DminNode::Table(children) = node else {
        return Err(ThermalError::invalid_config(
            format!("dmin.{}", key),
            "expected a nested table",
        ));
    };

    let ranges: Vec<(&String, f64)> = children
        .iter()
        .filter_map(|(k, c)| match c {
            DminNode::Pwm(pwm) => Some((k, *pwm)),
            DminNode::Table(_) => None,
        })
        .collect();
    if !children.is_empty() && ranges.len() == children.len() {
        let mut buckets = Vec::with_capacity(ranges.len());
        for (range, pwm) in ranges {
            let (low, high) = parse_range(range)
                .ok_or_else(|| ThermalError::invalid_config(format!("dmin.{}.{}", key, range), "expected \"low:high\""))?;
            buckets.push(Bucket { low, high, pwm: pwm.clamp(0.0, pwm::FULL) });
        }
        buckets.sort_by_key(|b| b.low);
        return Ok(Node::Ranges(buckets));
    }

    let mut branch = BTreeMap::new();
    for (child_key, child) in children {
        if matches!(child, DminNode::Pwm(_)) {
            return Err(ThermalError::invalid_config(
                format!("dmin.{}.{}", key, child_key),
                "range mixed with sub-tables",
            ));
        }
        branch.insert(child_key.clone(), compile(child_key, child)?);
    }
    Ok(Node::Branch(branch))
}

fn parse_range(range: &str) -> Option<(i64, i64)> {
    let (low, high) = range.split_once(':')?;
    let low: i64 = low.trim().parse().ok()?;
    let high: i64 = high.trim().parse().ok()?;
    (low <= high).then_some((low, high))
}

/// Built-in table used when the system configuration carries none
pub fn builtin_table() -> serde_json::Value {
    let per_direction = serde_json::json!({
        "fan_err": {
            "tacho": {"-127:120": 100},
            "present": {"-127:120": 100},
            "direction": {"-127:120": 100}
        },
        "psu_err": {
            "present": {"-127:120": 100},
            "direction": {"-127:120": 100}
        },
        "sensor_read_error": {"-127:120": 100}
    });
    serde_json::json!({
        "C2P": per_direction.clone(),
        "P2C": per_direction
    })
}
