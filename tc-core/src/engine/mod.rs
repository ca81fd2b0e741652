//! Control engine primitives
//!
//! Retry counter, PWM regulators, value smoothing and the dmin escalation
//! table. Everything here is pure state; file access lives in `hw`.

mod dmin;
mod error_counter;
mod regulator;
mod smoothing;

pub use dmin::{builtin_table as builtin_dmin_table, DminNode, DminTable};
pub use error_counter::ErrorCounter;
pub use regulator::{linear_pwm, DynamicParams, DynamicRegulator, PwmBounds, Regulator};
pub use smoothing::{Hysteresis, SmoothFormula, ValueFilter};
