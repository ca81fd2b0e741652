//! Sensor construction from a resolved configuration

use super::{
    AmbientSensor, AsicSensor, DpuSensor, FanDrawer, ModuleSensor, PsuFan, Sensor, SensorKind,
    TecSensor, ThermalSensor,
};
use crate::data::{PatternTable, SensorConfig, SensorKindTag};
use crate::error::{Result, ThermalError};

/// First run of digits in a sensor name (`drwr3` -> 3, `dpu1_module` -> 1)
pub fn index_of(name: &str) -> Option<u32> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let digits: String = name[start..].chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn required_index(config: &SensorConfig) -> Result<u32> {
    index_of(&config.name).ok_or_else(|| {
        ThermalError::invalid_config(
            config.name.clone(),
            format!("{} needs an indexed name", config.kind),
        )
    })
}

/// Build the sensor variant selected by `config.kind`. `module_params`
/// holds the per-part EEPROM overrides for module sensors.
pub fn build(config: SensorConfig, module_params: &PatternTable) -> Result<Sensor> {
    let kind = match config.kind {
        SensorKindTag::Thermal => SensorKind::Thermal(ThermalSensor::new()),
        SensorKindTag::Module => {
            SensorKind::Module(ModuleSensor::new(config.clone(), module_params.clone()))
        }
        SensorKindTag::ModuleTec => SensorKind::ModuleTec(TecSensor::new()),
        SensorKindTag::Asic => SensorKind::Asic(AsicSensor::new(index_of(&config.name).unwrap_or(1))),
        SensorKindTag::FanDrawer => SensorKind::FanDrawer(FanDrawer::new(required_index(&config)?, config.fan)),
        SensorKindTag::PsuFan => SensorKind::PsuFan(PsuFan::new(required_index(&config)?)),
        SensorKindTag::Ambient => SensorKind::Ambient(AmbientSensor::new()),
        SensorKindTag::Dpu => SensorKind::Dpu(DpuSensor::new(required_index(&config)?)),
    };
    Ok(Sensor::new(config, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ConfigLayers, SensorParams};
    use std::collections::BTreeMap;

    #[test]
    fn test_index_of() {
        assert_eq!(index_of("drwr3"), Some(3));
        assert_eq!(index_of("dpu12_module"), Some(12));
        assert_eq!(index_of("asic"), None);
    }

    #[test]
    fn test_every_tag_builds() {
        let layers = ConfigLayers::builtin().unwrap();
        let names = [
            ("cpu_pack", SensorKindTag::Thermal),
            ("module1", SensorKindTag::Module),
            ("asic", SensorKindTag::Asic),
            ("drwr1", SensorKindTag::FanDrawer),
            ("psu2", SensorKindTag::PsuFan),
            ("sensor_amb", SensorKindTag::Ambient),
            ("dpu1_module", SensorKindTag::Dpu),
        ];
        for (name, tag) in names {
            let sensor = build(layers.resolve(name).unwrap(), &PatternTable::default()).unwrap();
            assert_eq!(sensor.tag(), tag, "{}", name);
        }
    }

    #[test]
    fn test_fan_sensor_without_index_is_rejected() {
        let mut explicit = BTreeMap::new();
        explicit.insert(
            "rear_fan".to_string(),
            SensorParams { sensor_type: Some("fan_sensor".to_string()), ..Default::default() },
        );
        let layers = ConfigLayers::new(explicit, &BTreeMap::new(), &BTreeMap::new()).unwrap();
        let cfg = layers.resolve("rear_fan").unwrap();
        assert!(build(cfg, &PatternTable::default()).is_err());
    }
}
