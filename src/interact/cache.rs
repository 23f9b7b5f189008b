//! Role -> resource cache
//!
//! A small JSON object kept in the working directory so that the next run of
//! a tool finds the laser driver or power meter without asking again:
//!
//! ```json
//! {"LaserDriver": "ASRL/dev/ttyUSB0::INSTR", "OpticalPowerMeter": "USB0::0x1313::0x8078::P0012345::INSTR"}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl ResourceCache {
    /// Empty cache that will be written to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Read the cache file. `Ok(None)` when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        let entries: BTreeMap<String, String> = if text.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&text)?
        };
        debug!("Loaded {} cached assignments from {}", entries.len(), path.display());
        Ok(Some(Self {
            path: path.to_path_buf(),
            entries,
        }))
    }

    pub fn get(&self, role: &str) -> Option<&str> {
        self.entries.get(role).map(String::as_str)
    }

    /// Role a resource was remembered under
    pub fn role_for(&self, resource: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, cached)| cached.as_str() == resource)
            .map(|(role, _)| role.as_str())
    }

    pub fn insert(&mut self, role: impl Into<String>, resource: impl Into<String>) {
        self.entries.insert(role.into(), resource.into());
    }

    pub fn save(&self) -> AppResult<()> {
        fs::write(&self.path, serde_json::to_string(&self.entries)?)?;
        debug!("Saved {} assignments to {}", self.entries.len(), self.path.display());
        Ok(())
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempdir().unwrap();
        assert!(ResourceCache::load(dir.path().join(".measurement_tools"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".measurement_tools");

        let mut cache = ResourceCache::new(&path);
        cache.insert("LaserDriver", "ASRL/dev/ttyUSB0::INSTR");
        cache.save().unwrap();

        let loaded = ResourceCache::load(&path).unwrap().unwrap();
        assert_eq!(loaded.get("LaserDriver"), Some("ASRL/dev/ttyUSB0::INSTR"));
        assert_eq!(loaded.role_for("ASRL/dev/ttyUSB0::INSTR"), Some("LaserDriver"));
        assert_eq!(loaded.role_for("USB0::INSTR"), None);
    }

    #[test]
    fn test_reads_foreign_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".measurement_tools");
        fs::write(&path, r#"{"Agilent33500": "USB0::0x0957::0x2807::MY1::INSTR"}"#).unwrap();
        let cache = ResourceCache::load(&path).unwrap().unwrap();
        assert_eq!(cache.get("Agilent33500"), Some("USB0::0x0957::0x2807::MY1::INSTR"));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".measurement_tools");
        fs::write(&path, "not json").unwrap();
        assert!(ResourceCache::load(&path).is_err());
    }
}
