//! Discovery through `avahi-browse` parsable output.
//!
//! `avahi-browse -p` prints one `;`-separated record per line. Resolved
//! records start with `=` and carry ten fields:
//!
//! ```text
//! =;eth3;IPv6;mbed-linux-os-9999;_ssh._tcp;local;mbed-linux-os-9999.local;fe80::1;22;"mblos"
//! 0 1    2    3                  4         5     6                        7       8  9
//! ```

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::Arc;

use log::{debug, trace};
use tokio::process::Command;
use tokio::time::Instant;

use super::DiscoveryBackend;
use super::notifier::{AddressFamily, DiscoveryNotifier, ResolvedService, ServiceAddress, ServiceRecord};
use crate::error::{DiscoveryError, Result};

/// Marker that starts a resolved record line.
const RECORD_MARKER: &[u8] = b"=";

/// Number of fields in a resolved record.
const RECORD_FIELDS: usize = 10;

/// Service type used when handing avahi records to the notifier.
///
/// Avahi already reports bare instance names, so there is no suffix to strip.
pub const AVAHI_SERVICE_TYPE: &str = "local";

/// Positional fields of a resolved record.
mod field {
    pub const INTERFACE: usize = 1;
    pub const FAMILY: usize = 2;
    pub const NAME: usize = 3;
    pub const SERVICE_TYPE: usize = 4;
    pub const DOMAIN: usize = 5;
    pub const HOSTNAME: usize = 6;
    pub const IP: usize = 7;
    pub const PORT: usize = 8;
    pub const PROPERTIES: usize = 9;
}

/// One resolved record from the browser output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseRecord {
    pub interface: String,
    pub family: String,
    pub name: String,
    pub service_type: String,
    pub domain: String,
    pub hostname: String,
    pub ip: String,
    pub port: String,
    pub properties: String,
}

impl BrowseRecord {
    /// Parse one output line, or `None` if it is not a resolved record.
    pub fn parse_line(line: &[u8]) -> Option<Self> {
        if !line.starts_with(RECORD_MARKER) {
            return None;
        }

        let line = String::from_utf8_lossy(line);
        let tokens: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(';').collect();
        if tokens.len() < RECORD_FIELDS {
            trace!("Skipping short record: {}", line);
            return None;
        }

        Some(Self {
            interface: tokens[field::INTERFACE].to_string(),
            family: tokens[field::FAMILY].to_string(),
            name: unescape(tokens[field::NAME]),
            service_type: tokens[field::SERVICE_TYPE].to_string(),
            domain: tokens[field::DOMAIN].to_string(),
            hostname: tokens[field::HOSTNAME].to_string(),
            ip: tokens[field::IP].to_string(),
            port: tokens[field::PORT].to_string(),
            properties: tokens[field::PROPERTIES..].join(";"),
        })
    }

    /// Address family of the record.
    pub fn family(&self) -> AddressFamily {
        if self.family.eq_ignore_ascii_case("ipv6") {
            AddressFamily::Ipv6
        } else {
            AddressFamily::Ipv4
        }
    }

    /// Address to connect to; IPv6 addresses are zone-qualified.
    pub fn address(&self) -> String {
        match self.family() {
            AddressFamily::Ipv6 => format!("{}%{}", self.ip, self.interface),
            AddressFamily::Ipv4 => self.ip.clone(),
        }
    }

    /// TXT properties: each quoted string is one property, keyed by the text
    /// before `=`.
    pub fn property_map(&self) -> HashMap<Vec<u8>, Option<Vec<u8>>> {
        txt_strings(&self.properties)
            .into_iter()
            .filter(|item| !item.is_empty())
            .map(|item| match item.split_once('=') {
                Some((key, value)) => (key.as_bytes().to_vec(), Some(value.as_bytes().to_vec())),
                None => (item.as_bytes().to_vec(), None),
            })
            .collect()
    }

    /// Convert into the record shape shared with the native resolver.
    pub fn into_service_record(self) -> ServiceRecord {
        let properties = self.property_map();
        let family = self.family();
        ServiceRecord {
            address: ServiceAddress::Text(self.address()),
            name: self.name,
            interface: Some(self.interface),
            family: Some(family),
            properties,
        }
    }
}

/// Parse a whole output buffer, keeping the first record seen per name.
pub fn parse_browse_output(raw: &[u8]) -> Vec<BrowseRecord> {
    let mut known_names = HashSet::new();
    raw.split(|&b| b == b'\n')
        .filter_map(BrowseRecord::parse_line)
        .filter(|record| known_names.insert(record.name.clone()))
        .collect()
}

/// Split the TXT field into its strings.
///
/// Quoted strings may contain spaces; unquoted text is split on whitespace.
fn txt_strings(field: &str) -> Vec<&str> {
    let mut strings = Vec::new();
    let mut rest = field.trim_start();
    while !rest.is_empty() {
        let (item, tail) = match rest.strip_prefix('"') {
            Some(quoted) => match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            },
            None => match rest.find(char::is_whitespace) {
                Some(end) => (&rest[..end], &rest[end..]),
                None => (rest, ""),
            },
        };
        strings.push(item);
        rest = tail.trim_start();
    }
    strings
}

/// Undo avahi's `\DDD` decimal escapes in names.
fn unescape(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let digits = &bytes[i + 1..bytes.len().min(i + 4)];
            if digits.len() == 3 && digits.iter().all(u8::is_ascii_digit) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
            if let Some(&next) = bytes.get(i + 1) {
                out.push(next);
                i += 2;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Polling backend driving the `avahi-browse` utility.
#[derive(Debug, Clone)]
pub struct AvahiBrowser {
    program: String,
    service_type: String,
}

impl AvahiBrowser {
    /// Create a browser for `service_type` (e.g. `_ssh._tcp.local.`).
    pub fn new(program: impl Into<String>, service_type: &str) -> Self {
        Self {
            program: program.into(),
            service_type: avahi_service_type(service_type),
        }
    }

    /// Run the utility once and return stdout followed by stderr.
    ///
    /// A scan still running at `deadline` is killed and counts as having
    /// found nothing; the utility waits indefinitely when the avahi daemon
    /// is not running.
    pub async fn browse(&self, deadline: Instant) -> Result<Vec<u8>> {
        let mut command = Command::new(&self.program);
        command
            .args(["--terminate", "--resolve", "--no-fail", "-p"])
            .arg(&self.service_type)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("Running {} for {}", self.program, self.service_type);
        let output = match tokio::time::timeout_at(deadline, command.output()).await {
            Ok(output) => output.map_err(|source| DiscoveryError::Browser {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => {
                debug!("{} still running at the discovery deadline", self.program);
                return Ok(Vec::new());
            }
        };

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(combined)
    }

    /// Feed one buffer of browser output to the notifier.
    pub fn report(&self, raw: &[u8], notifier: &DiscoveryNotifier) -> Result<()> {
        for record in parse_browse_output(raw) {
            let name = record.name.clone();
            let source = ResolvedService(record.into_service_record());
            notifier.add_service(&source, AVAHI_SERVICE_TYPE, &name)?;
        }
        Ok(())
    }
}

impl DiscoveryBackend for AvahiBrowser {
    /// Run one scan and report what it found.
    async fn discover_all(&mut self, notifier: &Arc<DiscoveryNotifier>, deadline: Instant) -> Result<()> {
        let raw = self.browse(deadline).await?;
        self.report(&raw, notifier)
    }
}

/// `_ssh._tcp.local.` → `_ssh._tcp`; avahi takes the domain separately.
fn avahi_service_type(service_type: &str) -> String {
    service_type
        .trim_end_matches('.')
        .trim_end_matches(".local")
        .to_string()
}
