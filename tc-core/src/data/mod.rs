//! Configuration data
//!
//! System configuration document and the layered per-sensor configuration.

mod config;
mod sensor_config;

pub use config::{merge_json, AsicCapabilities, GeneralConfig, RedundancyPolicy, SystemConfig};
pub(crate) use sensor_config::compile_pattern;
pub use sensor_config::{
    tec_params, ConfigLayers, FanParams, PatternTable, SensorConfig, SensorKindTag, SensorParams,
    ValueSource,
};
