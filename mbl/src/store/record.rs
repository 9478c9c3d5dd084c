//! The record of known store UIDs and their locations.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, warn};

use super::{read_json, write_json};
use crate::error::{Result, StoreError};

/// `uid -> location` pairs persisted as one JSON object.
#[derive(Debug)]
pub struct StoreLocationsRecord {
    path: PathBuf,
    entries: IndexMap<String, PathBuf>,
}

impl StoreLocationsRecord {
    /// Load the record; a missing or empty file is an empty record.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = read_json(path)?.unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.entries.contains_key(uid)
    }

    /// Add a new UID. Known UIDs cannot be moved.
    pub fn update(&mut self, uid: &str, location: &Path) -> Result<()> {
        if self.contains(uid) {
            return Err(StoreError::DuplicateUid(uid.to_string()).into());
        }
        self.entries.insert(uid.to_string(), location.to_path_buf());
        debug!("Recorded store {} at {}", uid, location.display());
        write_json(&self.path, &self.entries)
    }

    /// Location of `uid`.
    ///
    /// A recorded location that no longer exists is dropped from the record.
    pub fn get(&mut self, uid: &str) -> Result<PathBuf> {
        let location = self
            .entries
            .get(uid)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(uid.to_string()))?;

        if !location.exists() {
            warn!(
                "Store {} location {} is gone, forgetting it",
                uid,
                location.display()
            );
            self.entries.shift_remove(uid);
            write_json(&self.path, &self.entries)?;
            return Err(StoreError::KnownLocationInvalid {
                uid: uid.to_string(),
                path: location,
            }
            .into());
        }
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_update_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let record_path = dir.path().join("stores.json");
        let mut record = StoreLocationsRecord::load(&record_path).unwrap();

        record.update("team-a", dir.path()).unwrap();
        assert!(matches!(
            record.update("team-a", dir.path()),
            Err(Error::Store(StoreError::DuplicateUid(_)))
        ));

        let mut reloaded = StoreLocationsRecord::load(&record_path).unwrap();
        assert_eq!(reloaded.get("team-a").unwrap(), dir.path());
        assert!(matches!(
            reloaded.get("nobody"),
            Err(Error::Store(StoreError::NotFound(_)))
        ));
    }

    #[test]
    fn test_vanished_location_is_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let record_path = dir.path().join("stores.json");
        let mut record = StoreLocationsRecord::load(&record_path).unwrap();
        record.update("gone", &dir.path().join("missing")).unwrap();

        assert!(matches!(
            record.get("gone"),
            Err(Error::Store(StoreError::KnownLocationInvalid { .. }))
        ));
        let reloaded = StoreLocationsRecord::load(&record_path).unwrap();
        assert!(!reloaded.contains("gone"));
    }
}
