//! Locations of the files mbl keeps on the host.

use std::path::{Path, PathBuf};

use crate::error::{DeviceError, Result};

/// File name of the selected-device cache.
pub const DEVICE_FILE_NAME: &str = ".mbl-dev.json";

/// File name of the store locations record.
pub const STORE_RECORD_FILE_NAME: &str = ".mbl-stores.json";

/// Directory holding the default stores.
pub const DEFAULT_STORE_DIR_NAME: &str = ".mbl-store";

/// Paths to the host-side state files.
#[derive(Debug, Clone)]
pub struct MblPaths {
    /// Selected-device cache (`{hostname, address}`).
    pub device_file: PathBuf,

    /// Record of known store UIDs and their locations.
    pub store_record: PathBuf,

    /// Parent directory of the default user and team stores.
    pub default_store_root: PathBuf,
}

impl MblPaths {
    /// Paths rooted at the user's home directory.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(DeviceError::NoHomeDirectory)?;
        Ok(Self::rooted(&home))
    }

    /// Paths rooted at an arbitrary directory.
    pub fn rooted(root: &Path) -> Self {
        Self {
            device_file: root.join(DEVICE_FILE_NAME),
            store_record: root.join(STORE_RECORD_FILE_NAME),
            default_store_root: root.join(DEFAULT_STORE_DIR_NAME),
        }
    }
}
