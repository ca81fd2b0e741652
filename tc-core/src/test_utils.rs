/*
 * Test utilities for thermalctl
 *
 * Builds throw-away sensor trees in a temporary directory so sensor and
 * orchestrator code can run against real files.
 */

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use crate::hw::SensorTree;

/// A sensor tree backed by a temporary directory
pub struct TestTree {
    _dir: TempDir,
    pub tree: SensorTree,
}

impl TestTree {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        for sub in ["thermal", "config", "eeprom", "system"] {
            fs::create_dir_all(dir.path().join(sub)).expect("create tree dir");
        }
        let tree = SensorTree::new(dir.path());
        Self { _dir: dir, tree }
    }

    pub fn root(&self) -> &Path {
        self.tree.root()
    }

    /// Create or overwrite a tree attribute
    pub fn set(&self, rel: &str, content: &str) {
        let path = self.tree.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(path, content).expect("write tree file");
    }

    pub fn remove(&self, rel: &str) {
        let _ = fs::remove_file(self.tree.path(rel));
    }

    pub fn get(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.tree.path(rel)).ok().map(|s| s.trim().to_string())
    }
}
