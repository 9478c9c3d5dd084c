//! The device abstraction and the selected-device cache.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};

/// Default login for devices on the network.
pub const DEFAULT_USERNAME: &str = "root";

/// A reachable device.
///
/// Identity is `(hostname, address)`; the credentials are connection
/// parameters and take no part in equality or hashing. `PartialEq` is only
/// implemented against `Device`, so comparing with any other type does not
/// compile.
#[derive(Clone, Serialize, Deserialize)]
pub struct Device {
    pub hostname: String,
    pub address: String,
    #[serde(skip, default = "default_username")]
    pub username: String,
    #[serde(skip)]
    pub password: String,
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

impl Device {
    /// Create a device with the default credentials (`root`, no password).
    pub fn new(hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
            username: default_username(),
            password: String::new(),
        }
    }

    /// Replace the login credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Create a device from a user-supplied address with no hostname.
    pub fn from_address(address: &str) -> Result<Self> {
        Ok(Self::new("", parse_address(address)?))
    }

    /// The mDNS name to try before the raw address, if there is a hostname.
    pub fn qualified_hostname(&self) -> Option<String> {
        if self.hostname.is_empty() {
            None
        } else {
            Some(format!("{}.local", self.hostname))
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.hostname == other.hostname && self.address == other.address
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hostname.hash(state);
        self.address.hash(state);
    }
}

// Keeps the password out of logs.
impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("hostname", &self.hostname)
            .field("address", &self.address)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hostname, self.address)
    }
}

/// Validate a user-supplied IPv4 or IPv6 address.
///
/// An IPv6 zone suffix (`fe80::1%eth0`) is accepted and kept.
pub fn parse_address(text: &str) -> Result<String> {
    let text = text.trim();
    let (addr, zone) = match text.split_once('%') {
        Some((addr, zone)) => (addr, Some(zone)),
        None => (text, None),
    };

    let valid = match zone {
        Some(zone) => !zone.is_empty() && addr.parse::<Ipv6Addr>().is_ok(),
        None => addr.parse::<IpAddr>().is_ok(),
    };

    if valid {
        Ok(text.to_string())
    } else {
        Err(DeviceError::InvalidAddress(text.to_string()).into())
    }
}

/// The selected-device cache file.
pub struct DeviceCache;

impl DeviceCache {
    /// Read the selected device.
    ///
    /// A missing file means no device has been selected yet.
    pub fn load(path: &Path) -> Result<Device> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeviceError::NoDeviceSelected.into());
            }
            Err(source) => {
                return Err(DeviceError::Io {
                    path: path.to_path_buf(),
                    source,
                }
                .into());
            }
        };

        let device: Device = serde_json::from_str(&data).map_err(|source| DeviceError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded selected device {} from {}", device, path.display());
        Ok(device)
    }

    /// Persist `device` as the selected device.
    pub fn save(path: &Path, device: &Device) -> Result<()> {
        let data = serde_json::to_string(device).map_err(|source| DeviceError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, data).map_err(|source| DeviceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Saved selected device {} to {}", device, path.display());
        Ok(())
    }

    /// Load the device addressed on the command line, or the cached one.
    pub fn resolve(path: &Path, address: Option<&str>) -> Result<Device> {
        match address {
            Some(address) => Device::from_address(address),
            None => Self::load(path),
        }
    }
}
