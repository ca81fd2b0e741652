//! Tracing subscriber setup and run-time log level changes
//!
//! The filter sits in a `reload` layer so the level can follow the
//! hw-management `log_level` file without restarting the daemon.

use std::path::Path;

use tc_core::constants::paths;
use tc_core::SensorTree;
use tracing::{debug, info, warn};
use tracing_subscriber::{reload, EnvFilter, Registry};

pub type ReloadHandle = reload::Handle<EnvFilter, Registry>;

const JOURNAL_SOCKET: &str = "/run/systemd/journal/socket";

/// Where log events end up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Journal,
    Stdout,
}

impl std::fmt::Display for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sink::Journal => write!(f, "systemd journal"),
            Sink::Stdout => write!(f, "stdout"),
        }
    }
}

/// Install the global subscriber. Journald is used when its socket exists,
/// stdout otherwise.
pub fn init(filter: &str) -> (ReloadHandle, Sink) {
    use tracing_subscriber::prelude::*;

    let (filter_layer, handle) = reload::Layer::new(EnvFilter::new(filter));

    let journald = if Path::new(JOURNAL_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer),
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
                None
            }
        }
    } else {
        None
    };
    let sink = if journald.is_some() { Sink::Journal } else { Sink::Stdout };
    let stdout = journald
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_target(false).with_level(true));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(journald)
        .with(stdout)
        .init();

    (handle, sink)
}

/// Map the content of the log-level file to a filter directive.
///
/// Accepts level names as well as the numeric levels hw-management writes
/// (10 debug, 20 info, 30 warning, 40 error, 50 critical).
pub fn parse_level(content: &str) -> Option<&'static str> {
    match content.trim().to_ascii_lowercase().as_str() {
        "trace" | "5" => Some("trace"),
        "debug" | "10" => Some("debug"),
        "info" | "20" => Some("info"),
        "warn" | "warning" | "30" => Some("warn"),
        "error" | "critical" | "40" | "50" => Some("error"),
        _ => None,
    }
}

/// Applies log level changes requested through the tree
pub struct LevelControl {
    handle: ReloadHandle,
    current: String,
}

impl LevelControl {
    pub fn new(handle: ReloadHandle, initial: &str) -> Self {
        Self { handle, current: initial.to_string() }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Swap the active filter; returns false if `directive` is already active
    pub fn apply(&mut self, directive: &str) -> anyhow::Result<bool> {
        if directive == self.current {
            return Ok(false);
        }
        self.handle.reload(EnvFilter::new(directive))?;
        info!(from = %self.current, to = %directive, "log level changed");
        self.current = directive.to_string();
        Ok(true)
    }

    /// Check the log-level file and apply a changed level
    pub fn poll(&mut self, tree: &SensorTree) {
        let Ok(content) = tree.read_str(paths::LOG_LEVEL_FILE) else {
            return;
        };
        match parse_level(&content) {
            Some(level) => {
                if let Err(e) = self.apply(level) {
                    warn!("failed to change log level: {}", e);
                }
            }
            None => debug!(content = %content.trim(), "ignoring unknown log level"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_names_and_numbers() {
        assert_eq!(parse_level("debug\n"), Some("debug"));
        assert_eq!(parse_level("WARNING"), Some("warn"));
        assert_eq!(parse_level("20"), Some("info"));
        assert_eq!(parse_level(" 50 "), Some("error"));
        assert_eq!(parse_level("loud"), None);
        assert_eq!(parse_level(""), None);
    }

    #[test]
    fn test_apply_skips_unchanged_level() {
        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        let mut levels = LevelControl::new(handle, "info");
        assert!(!levels.apply("info").unwrap());
        assert_eq!(levels.current(), "info");
    }
}
