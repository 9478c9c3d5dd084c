//! Credential stores on the host.
//!
//! A store is a directory holding a `config.json` with the store's metadata,
//! saved API keys and the certificates written into the store. Known stores
//! are listed by UID in a [`StoreLocationsRecord`]. The two default stores,
//! `default-user` and `default-team`, are created on first use.

mod certificate;
mod record;

pub use certificate::{CertKind, parse_cert_header};
pub use record::StoreLocationsRecord;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::MblPaths;
use crate::error::{Result, StoreError};

/// Name of the metadata file inside a store.
pub const STORE_CONFIG_FILE: &str = "config.json";

/// Who a store belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    User,
    Team,
}

impl StoreType {
    /// UID of the default store of this type.
    pub fn default_uid(self) -> &'static str {
        match self {
            StoreType::User => "default-user",
            StoreType::Team => "default-team",
        }
    }

    /// Permission bits of the store directory.
    pub fn mode(self) -> u32 {
        match self {
            StoreType::User => 0o700,
            StoreType::Team => 0o750,
        }
    }

    fn from_default_uid(uid: &str) -> Option<Self> {
        [StoreType::User, StoreType::Team]
            .into_iter()
            .find(|kind| kind.default_uid().eq_ignore_ascii_case(uid))
    }
}

impl FromStr for StoreType {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(StoreType::User),
            "team" => Ok(StoreType::Team),
            _ => Err(StoreError::InvalidType(s.to_string())),
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::User => f.write_str("user"),
            StoreType::Team => f.write_str("team"),
        }
    }
}

/// Contents of a store's `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub uid: String,
    pub location: PathBuf,
    pub store_type: StoreType,
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Certificate name to the files holding its values.
    #[serde(default)]
    pub certificates: IndexMap<String, Vec<PathBuf>>,
}

/// A store directory and its metadata.
#[derive(Debug, Clone)]
pub struct Store {
    config: StoreConfig,
}

impl Store {
    /// Create a new store at `location` and add it to the record.
    ///
    /// `location` must not exist yet.
    pub fn create(
        paths: &MblPaths,
        uid: &str,
        store_type: StoreType,
        location: &Path,
    ) -> Result<Self> {
        let mut record = StoreLocationsRecord::load(&paths.store_record)?;
        if record.contains(uid) {
            return Err(StoreError::DuplicateUid(uid.to_string()).into());
        }
        if location.exists() {
            return Err(StoreError::AlreadyExists(location.to_path_buf()).into());
        }

        let store = Self::initialise(uid, store_type, location)?;
        record.update(uid, &store.config.location)?;
        Ok(store)
    }

    /// Open the store `uid`.
    ///
    /// The default stores are created on first use; any other UID must be in
    /// the record.
    pub fn get(paths: &MblPaths, uid: &str) -> Result<Self> {
        let location = match StoreType::from_default_uid(uid) {
            Some(store_type) => Self::default_location(paths, store_type)?,
            None => StoreLocationsRecord::load(&paths.store_record)?.get(uid)?,
        };

        let config_path = location.join(STORE_CONFIG_FILE);
        let config: StoreConfig =
            read_json(&config_path)?.ok_or(StoreError::EmptyConfig(config_path))?;
        Ok(Self { config })
    }

    /// Open the default store of `store_type`.
    pub fn default_store(paths: &MblPaths, store_type: StoreType) -> Result<Self> {
        Self::get(paths, store_type.default_uid())
    }

    fn default_location(paths: &MblPaths, store_type: StoreType) -> Result<PathBuf> {
        let location = paths.default_store_root.join(store_type.default_uid());
        if !location.exists() {
            debug!("Creating default {} store at {}", store_type, location.display());
            Self::initialise(store_type.default_uid(), store_type, &location)?;
        }
        Ok(location)
    }

    fn initialise(uid: &str, store_type: StoreType, location: &Path) -> Result<Self> {
        let io_error = |source| StoreError::Io {
            path: location.to_path_buf(),
            source,
        };
        fs::create_dir_all(location).map_err(io_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(location, fs::Permissions::from_mode(store_type.mode()))
                .map_err(io_error)?;
        }

        let location = location.canonicalize().map_err(io_error)?;
        let store = Self {
            config: StoreConfig {
                uid: uid.to_string(),
                location,
                store_type,
                api_keys: Vec::new(),
                certificates: IndexMap::new(),
            },
        };
        store.save()?;
        Ok(store)
    }

    pub fn uid(&self) -> &str {
        &self.config.uid
    }

    pub fn location(&self) -> &Path {
        &self.config.location
    }

    pub fn store_type(&self) -> StoreType {
        self.config.store_type
    }

    pub fn config_path(&self) -> PathBuf {
        self.config.location.join(STORE_CONFIG_FILE)
    }

    pub fn api_keys(&self) -> &[String] {
        &self.config.api_keys
    }

    /// Append API keys; call [`Store::save`] to persist them.
    pub fn add_api_keys<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.api_keys.extend(keys.into_iter().map(Into::into));
    }

    /// Names of the certificates held, in the order they were added.
    pub fn certificate_names(&self) -> impl Iterator<Item = &str> {
        self.config.certificates.keys().map(String::as_str)
    }

    /// Files holding the values of certificate `name`.
    pub fn certificate_paths(&self, name: &str) -> Result<&[PathBuf]> {
        self.config
            .certificates
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| StoreError::CertificateNotFound(name.to_string()).into())
    }

    /// Directory holding the files of certificate `name`.
    pub fn certificate_dir(&self, name: &str) -> PathBuf {
        self.config.location.join(name)
    }

    /// Write each credential value to `<store>/<name>/<variable>` and save.
    ///
    /// Adding a certificate under an existing name replaces it.
    pub fn add_certificate(&mut self, name: &str, credentials: &IndexMap<String, String>) -> Result<()> {
        let dir = self.certificate_dir(name);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut files = Vec::with_capacity(credentials.len());
        for (variable, value) in credentials {
            let path = dir.join(variable);
            fs::write(&path, value).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            files.push(path);
        }

        debug!("Stored certificate {} ({} values)", name, files.len());
        self.config.certificates.insert(name.to_string(), files);
        self.save()
    }

    /// Remove certificate `name` and its files, then save.
    pub fn delete_certificate(&mut self, name: &str) -> Result<()> {
        if self.config.certificates.shift_remove(name).is_none() {
            return Err(StoreError::CertificateNotFound(name.to_string()).into());
        }

        let dir = self.certificate_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        self.save()
    }

    /// Write the metadata to `config.json`.
    pub fn save(&self) -> Result<()> {
        write_json(&self.config_path(), &self.config)
    }
}

/// Read a JSON file; a missing or blank file reads as `None`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }
            .into());
        }
    };
    if data.trim().is_empty() {
        return Ok(None);
    }

    let value = serde_json::from_str(&data).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, data).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn paths() -> (tempfile::TempDir, MblPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = MblPaths::rooted(dir.path());
        (dir, paths)
    }

    #[test]
    fn test_store_type_parsing() {
        assert_eq!("user".parse::<StoreType>().unwrap(), StoreType::User);
        assert_eq!("TEAM".parse::<StoreType>().unwrap(), StoreType::Team);
        assert!("group".parse::<StoreType>().is_err());
    }

    #[test]
    fn test_default_store_created_on_first_use() {
        let (_dir, paths) = paths();
        let store = Store::get(&paths, "default-team").unwrap();
        assert_eq!(store.store_type(), StoreType::Team);
        assert!(store.config_path().is_file());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(store.location()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o750);
        }

        // Case-insensitive, and the second call reuses the directory.
        let again = Store::get(&paths, "Default-Team").unwrap();
        assert_eq!(again.location(), store.location());
    }

    #[test]
    fn test_create_then_get() {
        let (dir, paths) = paths();
        let location = dir.path().join("stores/lab");

        let mut store = Store::create(&paths, "lab", StoreType::User, &location).unwrap();
        store.add_api_keys(["ak_1", "ak_2"]);
        store.save().unwrap();

        let reopened = Store::get(&paths, "lab").unwrap();
        assert_eq!(reopened.api_keys(), ["ak_1", "ak_2"]);
        assert_eq!(reopened.store_type(), StoreType::User);

        assert!(matches!(
            Store::create(&paths, "lab", StoreType::User, &dir.path().join("other")),
            Err(Error::Store(StoreError::DuplicateUid(_)))
        ));
    }

    #[test]
    fn test_create_refuses_existing_location() {
        let (dir, paths) = paths();
        assert!(matches!(
            Store::create(&paths, "lab", StoreType::Team, dir.path()),
            Err(Error::Store(StoreError::AlreadyExists(_)))
        ));
    }

    #[test]
    fn test_unknown_uid() {
        let (_dir, paths) = paths();
        assert!(matches!(
            Store::get(&paths, "nobody"),
            Err(Error::Store(StoreError::NotFound(_)))
        ));
    }

    #[test]
    fn test_empty_config_is_an_error() {
        let (dir, paths) = paths();
        let location = dir.path().join("lab");
        let store = Store::create(&paths, "lab", StoreType::User, &location).unwrap();
        fs::write(store.config_path(), "").unwrap();

        assert!(matches!(
            Store::get(&paths, "lab"),
            Err(Error::Store(StoreError::EmptyConfig(_)))
        ));
    }

    #[test]
    fn test_certificates() {
        let (_dir, paths) = paths();
        let mut store = Store::default_store(&paths, StoreType::Team).unwrap();

        let mut creds = IndexMap::new();
        creds.insert("arm_uc_vendor_id".to_string(), "0x12\n0x34".to_string());
        creds.insert("arm_uc_class_id".to_string(), "0x56".to_string());
        store.add_certificate("update", &creds).unwrap();

        let reopened = Store::default_store(&paths, StoreType::Team).unwrap();
        let files = reopened.certificate_paths("update").unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "0x12\n0x34");
        assert_eq!(reopened.certificate_names().collect::<Vec<_>>(), vec!["update"]);

        let mut store = reopened;
        store.delete_certificate("update").unwrap();
        assert!(!store.certificate_dir("update").exists());
        assert!(store.certificate_paths("update").is_err());
        assert!(store.delete_certificate("update").is_err());
    }
}
