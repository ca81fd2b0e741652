//! Module EEPROM identity
//!
//! Hot-pluggable modules publish a decoded EEPROM as `Key:  Value` lines.
//! Only the manufacturer and part number matter here: together they select
//! per-part thermal limits.

use crate::error::Result;
use crate::hw::SensorTree;

const MANUFACTURER_KEYS: &[&str] = &["manufacturer", "vendor name", "vendor"];
const PART_NUMBER_KEYS: &[&str] = &["part number", "partnumber", "vendor pn", "pn"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EepromIdentity {
    pub manufacturer: String,
    pub part_number: String,
}

impl EepromIdentity {
    /// Parse newline-delimited `Key: Value` pairs (keys are case-insensitive)
    pub fn parse(content: &str) -> Self {
        let mut identity = EepromIdentity::default();

        for line in content.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            if identity.manufacturer.is_empty() && MANUFACTURER_KEYS.contains(&key.as_str()) {
                identity.manufacturer = value.to_string();
            } else if identity.part_number.is_empty() && PART_NUMBER_KEYS.contains(&key.as_str()) {
                identity.part_number = value.to_string();
            }
        }
        identity
    }

    /// Read and parse an EEPROM file from the tree
    pub fn read(tree: &SensorTree, rel: &str) -> Result<Self> {
        let content = std::fs::read_to_string(tree.path(rel)).map_err(|e| crate::error::ThermalError::FileRead {
            path: tree.path(rel),
            source: e,
        })?;
        Ok(Self::parse(&content))
    }

    pub fn is_empty(&self) -> bool {
        self.manufacturer.is_empty() && self.part_number.is_empty()
    }

    /// Key matched against per-part override patterns
    pub fn match_key(&self) -> String {
        format!("{}:{}", self.manufacturer, self.part_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive_keys() {
        let content = "Identifier:      QSFP28\nMANUFACTURER:    Mellanox\nPart Number:     MMA1B00-C100D\nSerial Number:   MT1234\n";
        let id = EepromIdentity::parse(content);
        assert_eq!(id.manufacturer, "Mellanox");
        assert_eq!(id.part_number, "MMA1B00-C100D");
        assert_eq!(id.match_key(), "Mellanox:MMA1B00-C100D");
    }

    #[test]
    fn test_parse_vendor_aliases_and_values_with_colons() {
        let id = EepromIdentity::parse("Vendor Name: Acme\nVendor PN: X:1\n");
        assert_eq!(id.manufacturer, "Acme");
        assert_eq!(id.part_number, "X:1");
    }

    #[test]
    fn test_parse_empty() {
        assert!(EepromIdentity::parse("garbage\n\n").is_empty());
    }
}
