//! Per-sensor configuration
//!
//! A sensor's configuration is assembled from layers, highest priority first:
//!
//! 1. explicit entry keyed by the exact sensor name (`sensors_config`)
//! 2. tuned overrides keyed by a name regex (`dev_tune`)
//! 3. device-class defaults keyed by a name regex (`sensor_class`)
//! 4. built-in class table
//!
//! Each layer only fills keys left empty by the layers above it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{paths, pwm, sensor, timing};
use crate::engine::{DynamicParams, SmoothFormula};
use crate::error::{Result, ThermalError};
use crate::hw::{SensorTree, LITERAL_PREFIX};

/// Sensor type tag; the closed set of sensor implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKindTag {
    #[serde(rename = "thermal_sensor")]
    Thermal,
    #[serde(rename = "thermal_module_sensor")]
    Module,
    #[serde(rename = "thermal_module_tec_sensor")]
    ModuleTec,
    #[serde(rename = "thermal_asic_sensor")]
    Asic,
    #[serde(rename = "fan_sensor")]
    FanDrawer,
    #[serde(rename = "psu_fan_sensor")]
    PsuFan,
    #[serde(rename = "ambient_thermal_sensor")]
    Ambient,
    #[serde(rename = "dpu_module")]
    Dpu,
}

impl SensorKindTag {
    pub const ALL: [SensorKindTag; 8] = [
        SensorKindTag::Thermal,
        SensorKindTag::Module,
        SensorKindTag::ModuleTec,
        SensorKindTag::Asic,
        SensorKindTag::FanDrawer,
        SensorKindTag::PsuFan,
        SensorKindTag::Ambient,
        SensorKindTag::Dpu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKindTag::Thermal => "thermal_sensor",
            SensorKindTag::Module => "thermal_module_sensor",
            SensorKindTag::ModuleTec => "thermal_module_tec_sensor",
            SensorKindTag::Asic => "thermal_asic_sensor",
            SensorKindTag::FanDrawer => "fan_sensor",
            SensorKindTag::PsuFan => "psu_fan_sensor",
            SensorKindTag::Ambient => "ambient_thermal_sensor",
            SensorKindTag::Dpu => "dpu_module",
        }
    }

    /// Resolve a tag string, naming the sensor in the error
    pub fn for_sensor(sensor: &str, tag: &str) -> Result<Self> {
        tag.parse().map_err(|_| ThermalError::UnknownSensorType {
            sensor: sensor.to_string(),
            tag: tag.to_string(),
        })
    }
}

impl FromStr for SensorKindTag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SensorKindTag::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown sensor type '{}'", s))
    }
}

impl fmt::Display for SensorKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A threshold given either as a number or as a string: `"!N"` is a literal,
/// anything else names a file under `thermal/` (with `{name}` substituted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSource {
    Number(f64),
    Text(String),
}

impl ValueSource {
    pub fn literal(value: f64) -> Self {
        ValueSource::Number(value)
    }

    /// Value known without touching the tree
    pub fn as_literal(&self) -> Option<f64> {
        match self {
            ValueSource::Number(n) => Some(*n),
            ValueSource::Text(s) => s.strip_prefix(LITERAL_PREFIX)?.trim().parse().ok(),
        }
    }

    /// Raw value (tree units) for sensor `name`
    pub fn resolve(&self, tree: &SensorTree, name: &str) -> Result<f64> {
        match self {
            ValueSource::Number(n) => Ok(*n),
            ValueSource::Text(s) => Ok(tree.resolve_value(&expand(s, name))? as f64),
        }
    }

    fn expanded(&self, name: &str) -> Self {
        match self {
            ValueSource::Text(s) => ValueSource::Text(expand(s, name)),
            other => other.clone(),
        }
    }
}

fn expand(template: &str, name: &str) -> String {
    template.replace("{name}", name)
}

/// Fan drawer tachometer expectations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanParams {
    pub tacho_count: u32,
    /// RPM expected at `pwm_at_rpm_min`
    pub rpm_min: f64,
    /// RPM expected at full speed
    pub rpm_max: f64,
    pub pwm_at_rpm_min: f64,
    /// Accepted deviation as a fraction of the expected RPM
    pub tolerance: f64,
}

impl Default for FanParams {
    fn default() -> Self {
        Self {
            tacho_count: 2,
            rpm_min: 3000.0,
            rpm_max: 21000.0,
            pwm_at_rpm_min: pwm::SYSTEM_MIN,
            tolerance: sensor::RPM_TOLERANCE,
        }
    }
}

impl FanParams {
    /// RPM a healthy fan should reach at `pwm_percent`
    pub fn expected_rpm(&self, pwm_percent: f64) -> f64 {
        let span = pwm::FULL - self.pwm_at_rpm_min;
        if span <= 0.0 {
            return self.rpm_max;
        }
        let ratio = ((pwm_percent - self.pwm_at_rpm_min) / span).clamp(0.0, 1.0);
        self.rpm_min + ratio * (self.rpm_max - self.rpm_min)
    }
}

/// One configuration layer; every key optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorParams {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub sensor_type: Option<String>,
    /// Input attribute under `thermal/`, `{name}` is substituted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_file: Option<String>,
    /// Tree units per reported unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    /// Poll interval in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_min: Option<ValueSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_max: Option<ValueSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_lcrit: Option<ValueSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_hcrit: Option<ValueSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwm_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwm_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smooth_formula: Option<SmoothFormula>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smooth_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hysteresis: Option<f64>,
    /// Threshold refresh period in seconds (0 = only on start)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_attr_period: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_err_mask: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan: Option<FanParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_sensors: Option<Vec<String>>,
}

macro_rules! fill_missing {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        $(
            if $dst.$field.is_none() {
                $dst.$field = $src.$field.clone();
            }
        )+
    };
}

impl SensorParams {
    /// Copy every key of `lower` that is unset here
    pub fn fill_from(&mut self, lower: &SensorParams) {
        fill_missing!(
            self, lower,
            sensor_type, input_file, scale, poll_time,
            val_min, val_max, val_lcrit, val_hcrit,
            pwm_min, pwm_max, smooth_formula, smooth_level, hysteresis,
            refresh_attr_period, static_err_mask, enable, dynamic, fan, child_sensors,
        );
    }

    /// Built-in values for every key
    pub fn builtin_defaults() -> Self {
        Self {
            sensor_type: Some(SensorKindTag::Thermal.as_str().to_string()),
            input_file: Some("{name}".to_string()),
            scale: Some(sensor::MILLI_SCALE),
            poll_time: Some(timing::SENSOR_POLL.as_secs()),
            val_min: Some(ValueSource::Text("!60000".to_string())),
            val_max: Some(ValueSource::Text("!80000".to_string())),
            val_lcrit: Some(ValueSource::Number(sensor::LCRIT * sensor::MILLI_SCALE)),
            val_hcrit: Some(ValueSource::Number(sensor::HCRIT * sensor::MILLI_SCALE)),
            pwm_min: Some(pwm::SYSTEM_MIN),
            pwm_max: Some(pwm::FULL),
            smooth_formula: Some(SmoothFormula::Ema),
            smooth_level: Some(sensor::SMOOTH_LEVEL),
            hysteresis: Some(sensor::HYSTERESIS),
            refresh_attr_period: Some(0),
            static_err_mask: Some(Vec::new()),
            enable: Some(true),
            dynamic: Some(DynamicParams::default()),
            fan: Some(FanParams::default()),
            child_sensors: Some(Vec::new()),
        }
    }
}

/// Fully resolved configuration of one sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub name: String,
    pub kind: SensorKindTag,
    /// Input attribute relative to the tree root
    pub input_file: String,
    pub scale: f64,
    pub poll_time: Duration,
    pub val_min: ValueSource,
    pub val_max: ValueSource,
    pub val_lcrit: ValueSource,
    pub val_hcrit: ValueSource,
    pub pwm_min: f64,
    pub pwm_max: f64,
    pub smooth_formula: SmoothFormula,
    pub smooth_level: u32,
    pub hysteresis: f64,
    pub refresh_attr_period: Option<Duration>,
    pub static_err_mask: BTreeSet<String>,
    pub enable: bool,
    pub dynamic: DynamicParams,
    pub fan: FanParams,
    pub child_sensors: Vec<String>,
    /// Layer stack this configuration was resolved from
    params: SensorParams,
}

impl SensorConfig {
    /// Resolve a complete parameter set; missing keys fall back to built-ins
    pub fn from_params(name: &str, mut params: SensorParams) -> Result<Self> {
        params.fill_from(&SensorParams::builtin_defaults());

        let tag = params.sensor_type.clone().unwrap_or_default();
        let kind = SensorKindTag::for_sensor(name, &tag)?;

        let scale = params.scale.unwrap_or(sensor::MILLI_SCALE);
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ThermalError::invalid_config(format!("{}.scale", name), "must be positive"));
        }
        let pwm_min = params.pwm_min.unwrap_or(pwm::SYSTEM_MIN).clamp(0.0, pwm::FULL);
        let pwm_max = params.pwm_max.unwrap_or(pwm::FULL).clamp(0.0, pwm::FULL);
        if pwm_min > pwm_max {
            return Err(ThermalError::invalid_config(
                format!("{}.pwm_min", name),
                format!("{} above pwm_max {}", pwm_min, pwm_max),
            ));
        }

        let pick = |v: &Option<ValueSource>| -> ValueSource {
            v.as_ref().map(|s| s.expanded(name)).unwrap_or(ValueSource::Number(0.0))
        };

        let input = params.input_file.clone().unwrap_or_else(|| "{name}".to_string());
        let input_file = paths::thermal(&expand(&input, name));

        Ok(Self {
            name: name.to_string(),
            kind,
            input_file,
            scale,
            poll_time: Duration::from_secs(params.poll_time.unwrap_or(timing::SENSOR_POLL.as_secs()).max(1)),
            val_min: pick(&params.val_min),
            val_max: pick(&params.val_max),
            val_lcrit: pick(&params.val_lcrit),
            val_hcrit: pick(&params.val_hcrit),
            pwm_min,
            pwm_max,
            smooth_formula: params.smooth_formula.unwrap_or_default(),
            smooth_level: params.smooth_level.unwrap_or(sensor::SMOOTH_LEVEL).max(1),
            hysteresis: params.hysteresis.unwrap_or(sensor::HYSTERESIS).max(0.0),
            refresh_attr_period: params
                .refresh_attr_period
                .filter(|p| *p > 0)
                .map(Duration::from_secs),
            static_err_mask: params.static_err_mask.clone().unwrap_or_default().into_iter().collect(),
            enable: params.enable.unwrap_or(true),
            dynamic: params.dynamic.unwrap_or_default(),
            fan: params.fan.unwrap_or_default(),
            child_sensors: params
                .child_sensors
                .clone()
                .unwrap_or_default()
                .iter()
                .map(|c| expand(c, name))
                .collect(),
            params,
        })
    }

    /// Re-resolve with `overlay` taking priority over the current layers
    pub fn with_override(&self, overlay: &SensorParams) -> Result<Self> {
        let mut params = overlay.clone();
        // The sensor type never changes through an override
        params.sensor_type = self.params.sensor_type.clone();
        params.fill_from(&self.params);
        Self::from_params(&self.name, params)
    }

    pub fn params(&self) -> &SensorParams {
        &self.params
    }
}

/// Ordered list of pre-compiled `(pattern, params)` entries
#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    entries: Vec<(Regex, SensorParams)>,
}

impl PatternTable {
    pub fn compile(map: &BTreeMap<String, SensorParams>) -> Result<Self> {
        let mut entries = Vec::with_capacity(map.len());
        for (pattern, params) in map {
            entries.push((compile_pattern(pattern)?, params.clone()));
        }
        Ok(Self { entries })
    }

    fn from_entries(entries: Vec<(Regex, SensorParams)>) -> Self {
        Self { entries }
    }

    /// All entries whose pattern matches `key`, in table order
    pub fn matches<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a SensorParams> + 'a {
        self.entries.iter().filter(move |(re, _)| re.is_match(key)).map(|(_, p)| p)
    }

    /// First entry matching `key`
    pub fn first_match<'a>(&'a self, key: &'a str) -> Option<&'a SensorParams> {
        self.matches(key).next()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| ThermalError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// The four configuration layers, compiled once at configuration load
#[derive(Debug, Clone)]
pub struct ConfigLayers {
    explicit: BTreeMap<String, SensorParams>,
    tuned: PatternTable,
    classes: PatternTable,
    builtin: PatternTable,
}

impl ConfigLayers {
    pub fn new(
        explicit: BTreeMap<String, SensorParams>,
        tuned: &BTreeMap<String, SensorParams>,
        classes: &BTreeMap<String, SensorParams>,
    ) -> Result<Self> {
        Ok(Self {
            explicit,
            tuned: PatternTable::compile(tuned)?,
            classes: PatternTable::compile(classes)?,
            builtin: builtin_classes()?,
        })
    }

    /// Built-in layer only
    pub fn builtin() -> Result<Self> {
        Self::new(BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new())
    }

    pub fn resolve(&self, name: &str) -> Result<SensorConfig> {
        self.resolve_with(name, None)
    }

    /// Resolve `name`; `hint` sits just below the explicit layer and lets
    /// discovery pick a variant (e.g. TEC modules) without a config entry
    pub fn resolve_with(&self, name: &str, hint: Option<&SensorParams>) -> Result<SensorConfig> {
        let mut params = self.explicit.get(name).cloned().unwrap_or_default();
        if let Some(hint) = hint {
            params.fill_from(hint);
        }
        for layer in [&self.tuned, &self.classes] {
            for p in layer.matches(name) {
                params.fill_from(p);
            }
        }
        if let Some(p) = self.builtin.first_match(name) {
            params.fill_from(p);
        }
        SensorConfig::from_params(name, params)
    }
}

fn class(tag: SensorKindTag, input: &str) -> SensorParams {
    SensorParams {
        sensor_type: Some(tag.as_str().to_string()),
        input_file: Some(input.to_string()),
        ..Default::default()
    }
}

fn text(s: &str) -> Option<ValueSource> {
    Some(ValueSource::Text(s.to_string()))
}

/// Parameters turning a module sensor into its TEC-cooled variant
pub fn tec_params() -> SensorParams {
    SensorParams {
        val_min: text("!0"),
        val_max: text("{name}_cooling_level_max"),
        val_lcrit: Some(ValueSource::Number(0.0)),
        val_hcrit: Some(ValueSource::Number(f64::MAX)),
        scale: Some(1.0),
        ..class(SensorKindTag::ModuleTec, "{name}_cooling_level_input")
    }
}

/// Built-in device-class table, first match wins
fn builtin_classes() -> Result<PatternTable> {
    let no_regulation = SensorParams {
        scale: Some(1.0),
        val_lcrit: Some(ValueSource::Number(f64::MIN)),
        val_hcrit: Some(ValueSource::Number(f64::MAX)),
        ..Default::default()
    };

    let table: Vec<(&str, SensorParams)> = vec![
        (
            r"^cpu_pack$",
            SensorParams {
                val_min: text("!50000"),
                val_max: text("!90000"),
                ..class(SensorKindTag::Thermal, "{name}")
            },
        ),
        (
            r"^pch$",
            SensorParams {
                val_min: text("!50000"),
                val_max: text("!85000"),
                ..class(SensorKindTag::Thermal, "{name}")
            },
        ),
        (
            r"^voltmon\d+_temp\d+$",
            SensorParams {
                val_min: text("!85000"),
                val_max: text("!125000"),
                ..class(SensorKindTag::Thermal, "{name}_input")
            },
        ),
        (
            r"^module\d+$",
            SensorParams {
                val_min: text("!60000"),
                val_max: text("{name}_temp_crit"),
                refresh_attr_period: Some(30 * 60),
                ..class(SensorKindTag::Module, "{name}_temp_input")
            },
        ),
        (
            r"^gearbox\d+$",
            SensorParams {
                val_min: text("!70000"),
                val_max: text("!105000"),
                ..class(SensorKindTag::Module, "{name}_temp_input")
            },
        ),
        (
            r"^asic\d*$",
            SensorParams {
                val_min: text("!75000"),
                val_max: text("!105000"),
                ..class(SensorKindTag::Asic, "{name}")
            },
        ),
        (
            r"^drwr\d+$",
            no_regulation.clone().merged(class(SensorKindTag::FanDrawer, "{name}_status")),
        ),
        (
            r"^psu\d+$",
            no_regulation.clone().merged(class(SensorKindTag::PsuFan, "{name}_status")),
        ),
        (
            r"^sensor_amb$",
            SensorParams {
                val_min: text("!30000"),
                val_max: text("!55000"),
                ..class(SensorKindTag::Ambient, "port_amb")
            },
        ),
        (
            r"^dpu\d+_module$",
            SensorParams {
                child_sensors: Some(vec![
                    "{name}_cpu".to_string(),
                    "{name}_ddr".to_string(),
                    "{name}_drive".to_string(),
                ]),
                ..no_regulation.clone().merged(class(SensorKindTag::Dpu, "{name}_ready"))
            },
        ),
        (
            r"^dpu\d+_module_(cpu|ddr|drive)$",
            SensorParams {
                val_min: text("!60000"),
                val_max: text("!95000"),
                ..class(SensorKindTag::Thermal, "{name}_temp_input")
            },
        ),
    ];

    let mut entries = Vec::with_capacity(table.len());
    for (pattern, params) in table {
        entries.push((compile_pattern(pattern)?, params));
    }
    Ok(PatternTable::from_entries(entries))
}

impl SensorParams {
    /// `self` with every unset key taken from `other`
    fn merged(mut self, other: SensorParams) -> Self {
        self.fill_from(&other);
        self
    }
}
