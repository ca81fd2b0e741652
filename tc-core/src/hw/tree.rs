//! Sensor tree file access
//!
//! The hw-management tree exposes every attribute as a small text file:
//! integers in milli-units, `"0"`/`"1"` flags, or short strings.
//! All paths handed to [`SensorTree`] are relative to its root.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{Result, ThermalError};

/// Literal prefix in configuration values: `"!70000"` means 70000, not a file
pub const LITERAL_PREFIX: char = '!';

/// Read/write access to a sensor tree rooted at a directory
#[derive(Debug, Clone)]
pub struct SensorTree {
    root: PathBuf,
}

impl SensorTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a tree-relative attribute
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    /// Read an attribute as a trimmed string
    pub fn read_str(&self, rel: &str) -> Result<String> {
        let path = self.path(rel);
        match fs::read_to_string(&path) {
            Ok(content) => {
                trace!("READ: {} = {}", rel, content.trim());
                Ok(content.trim().to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ThermalError::FileNotFound(path)),
            Err(e) => Err(ThermalError::FileRead { path, source: e }),
        }
    }

    /// Read an attribute as an integer (floats are rounded)
    pub fn read_int(&self, rel: &str) -> Result<i64> {
        let content = self.read_str(rel)?;
        parse_int(&content).ok_or_else(|| {
            ThermalError::parse(self.path(rel), format!("'{}' is not a number", content))
        })
    }

    /// Read a `"0"`/`"1"` flag
    pub fn read_flag(&self, rel: &str) -> Result<bool> {
        Ok(self.read_int(rel)? != 0)
    }

    /// Read a flag, treating a missing or unreadable file as `default`
    pub fn flag_or(&self, rel: &str, default: bool) -> bool {
        self.read_flag(rel).unwrap_or(default)
    }

    pub fn write_str(&self, rel: &str, value: &str) -> Result<()> {
        let path = self.path(rel);
        trace!("WRITE: {} = {}", rel, value);
        fs::write(&path, value).map_err(|e| ThermalError::FileWrite { path, source: e })
    }

    pub fn write_int(&self, rel: &str, value: i64) -> Result<()> {
        self.write_str(rel, &value.to_string())
    }

    /// List file names in a tree-relative directory (sorted)
    pub fn list(&self, rel_dir: &str) -> Result<Vec<String>> {
        let dir = self.path(rel_dir);
        let entries = fs::read_dir(&dir).map_err(|e| ThermalError::FileRead { path: dir, source: e })?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Resolve a configuration value: `"!N"` is a literal, anything else a
    /// file relative to the thermal directory.
    pub fn resolve_value(&self, spec: &str) -> Result<i64> {
        if let Some(literal) = spec.strip_prefix(LITERAL_PREFIX) {
            return parse_int(literal).ok_or_else(|| {
                ThermalError::invalid_config(spec, "literal is not a number")
            });
        }
        self.read_int(&crate::constants::paths::thermal(spec))
    }
}

fn parse_int(content: &str) -> Option<i64> {
    let trimmed = content.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.round() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestTree;

    #[test]
    fn test_read_int_and_flag() {
        let t = TestTree::new();
        t.set("thermal/cpu_pack", "45000\n");
        t.set("config/suspend", "1");

        assert_eq!(t.tree.read_int("thermal/cpu_pack").unwrap(), 45000);
        assert!(t.tree.read_flag("config/suspend").unwrap());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let t = TestTree::new();
        let err = t.tree.read_int("thermal/nothing").unwrap_err();
        assert!(err.is_not_found());
        assert!(!t.tree.flag_or("thermal/nothing", false));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let t = TestTree::new();
        t.set("thermal/asic", "N/A");
        assert!(matches!(t.tree.read_int("thermal/asic"), Err(ThermalError::Parse { .. })));
    }

    #[test]
    fn test_resolve_literal_and_file() {
        let t = TestTree::new();
        t.set("thermal/module1_temp_crit", "75000");

        assert_eq!(t.tree.resolve_value("!70000").unwrap(), 70000);
        assert_eq!(t.tree.resolve_value("module1_temp_crit").unwrap(), 75000);
        assert!(t.tree.resolve_value("!abc").is_err());
    }

    #[test]
    fn test_list_sorted() {
        let t = TestTree::new();
        t.set("thermal/b", "1");
        t.set("thermal/a", "1");
        assert_eq!(t.tree.list("thermal").unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
