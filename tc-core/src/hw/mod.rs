//! Hardware interaction modules
//!
//! File access to the sensor tree, PWM actuation and EEPROM identity.

mod eeprom;
mod pwm;
mod tree;

pub use eeprom::EepromIdentity;
pub use pwm::{percent_to_raw, raw_to_percent, PwmOutput, RegisterConfig};
pub use tree::{SensorTree, LITERAL_PREFIX};
