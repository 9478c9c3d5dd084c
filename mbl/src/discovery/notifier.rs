//! Listener fan-out and the de-duplicated list of discovered devices.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use crate::device::Device;
use crate::error::{DiscoveryError, Result};

/// Callback invoked with one formatted `"<hostname>: <address>"` line.
pub type Listener = Box<dyn Fn(&str) + Send + Sync>;

/// Holds a list of listeners and calls them in registration order.
#[derive(Default)]
pub struct Notifier {
    listeners: Mutex<Vec<Listener>>,
}

impl Notifier {
    /// Create a notifier with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in notifications.
    pub fn add_listener(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        lock(&self.listeners).push(Box::new(listener));
    }

    /// Call every listener with `message`.
    pub fn notify(&self, message: &str) {
        for listener in lock(&self.listeners).iter() {
            listener(message);
        }
    }
}

/// Address carried by a service advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceAddress {
    /// Packed network-order bytes as delivered by a resolver.
    Packed(Vec<u8>),
    /// Already-formatted address text.
    Text(String),
}

impl ServiceAddress {
    /// Render the address as text.
    ///
    /// Four bytes decode as a dotted quad; sixteen bytes are already IPv6
    /// and are formatted as such. Text is used as-is.
    pub fn render(&self, name: &str) -> Result<String> {
        match self {
            ServiceAddress::Packed(bytes) => match bytes.len() {
                4 => Ok(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string()),
                16 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(bytes);
                    Ok(Ipv6Addr::from(octets).to_string())
                }
                len => Err(DiscoveryError::AddressParse {
                    name: name.to_string(),
                    detail: format!("{} packed bytes", len),
                }
                .into()),
            },
            ServiceAddress::Text(text) if text.trim().is_empty() => {
                Err(DiscoveryError::AddressParse {
                    name: name.to_string(),
                    detail: "empty address".to_string(),
                }
                .into())
            }
            ServiceAddress::Text(text) => Ok(text.clone()),
        }
    }
}

/// Address family of an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// A resolved service advertisement, before it becomes a [`Device`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Full service instance name.
    pub name: String,
    pub address: ServiceAddress,
    /// Network interface the advertisement arrived on, when known.
    pub interface: Option<String>,
    pub family: Option<AddressFamily>,
    /// TXT record properties keyed by raw key bytes.
    pub properties: HashMap<Vec<u8>, Option<Vec<u8>>>,
}

impl ServiceRecord {
    /// Whether the TXT record carries `key`.
    pub fn has_property(&self, key: &[u8]) -> bool {
        self.properties.contains_key(key)
    }
}

/// Something that can resolve a service advertisement into a record.
///
/// Both discovery backends hand one of these to
/// [`DiscoveryNotifier::add_service`].
pub trait ServiceInfoSource {
    /// Look up the record for `name` of `service_type`.
    fn service_info(&self, service_type: &str, name: &str) -> Option<ServiceRecord>;
}

/// A record that was already resolved by the backend.
pub struct ResolvedService(pub ServiceRecord);

impl ServiceInfoSource for ResolvedService {
    fn service_info(&self, _service_type: &str, _name: &str) -> Option<ServiceRecord> {
        Some(self.0.clone())
    }
}

/// Observer of discovery backends for one discovery session.
///
/// Filters advertisements on the vendor marker, de-duplicates devices by
/// identity and notifies listeners once per new device. It may be fed from a
/// resolver thread while another thread reads [`devices`](Self::devices).
pub struct DiscoveryNotifier {
    notifier: Notifier,
    devices: Mutex<Vec<Device>>,
    vendor_marker: Vec<u8>,
}

impl DiscoveryNotifier {
    /// Create a notifier that accepts services carrying `vendor_marker`.
    pub fn new(vendor_marker: impl Into<Vec<u8>>) -> Self {
        Self {
            notifier: Notifier::new(),
            devices: Mutex::new(Vec::new()),
            vendor_marker: vendor_marker.into(),
        }
    }

    /// Register a callback for newly discovered devices.
    pub fn add_listener(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.notifier.add_listener(listener);
    }

    /// Handle one raw service advertisement.
    ///
    /// Listeners are called while the device list is locked, so they see
    /// devices in the order they were first recorded and must not call back
    /// into this notifier.
    pub fn add_service(
        &self,
        source: &impl ServiceInfoSource,
        service_type: &str,
        name: &str,
    ) -> Result<()> {
        let Some(info) = source.service_info(service_type, name) else {
            trace!("No service info for {}", name);
            return Ok(());
        };

        if !info.has_property(&self.vendor_marker) {
            trace!("Ignoring {}: no vendor marker", name);
            return Ok(());
        }

        let address = info.address.render(name)?;
        let device = Device::new(name, address);

        let mut devices = lock(&self.devices);
        if devices.contains(&device) {
            trace!("Already seen {}", device);
            return Ok(());
        }

        let short_name = short_name(name, service_type);
        let message = format!("{}: {}", short_name, device.address);
        debug!("Discovered {}", message);
        devices.push(device);
        self.notifier.notify(&message);
        Ok(())
    }

    /// Part of the backend contract; removals are not tracked.
    pub fn remove_service(&self, _service_type: &str, _name: &str) {}

    /// Snapshot of the devices found so far, in discovery order.
    pub fn devices(&self) -> Vec<Device> {
        lock(&self.devices).clone()
    }

    /// Number of devices found so far.
    pub fn device_count(&self) -> usize {
        lock(&self.devices).len()
    }
}

/// Strip the `.<service_type>` suffix from a service instance name.
pub fn short_name<'a>(name: &'a str, service_type: &str) -> &'a str {
    let suffix = format!(".{}", service_type);
    match name.find(&suffix) {
        Some(index) => &name[..index],
        None => name,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const SERVICE_TYPE: &str = "_ssh._tcp.local.";

    fn record(name: &str, address: ServiceAddress, marker: &[u8]) -> ResolvedService {
        let mut properties = HashMap::new();
        properties.insert(marker.to_vec(), None);
        ResolvedService(ServiceRecord {
            name: name.to_string(),
            address,
            interface: None,
            family: None,
            properties,
        })
    }

    fn collecting(notifier: &DiscoveryNotifier) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        notifier.add_listener(move |line| sink.lock().unwrap().push(line.to_string()));
        seen
    }

    #[test]
    fn test_single_device_notifies_short_name() {
        let notifier = DiscoveryNotifier::new(b"mblos".to_vec());
        let seen = collecting(&notifier);

        let name = "mbed-linux-os-8379._ssh._tcp.local.";
        let source = record(name, ServiceAddress::Packed(vec![168, 224, 0, 4]), b"mblos");
        notifier.add_service(&source, SERVICE_TYPE, name).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["mbed-linux-os-8379: 168.224.0.4"]);
        assert_eq!(notifier.devices(), vec![Device::new(name, "168.224.0.4")]);
    }

    #[test]
    fn test_dotted_names_keep_instance_prefix() {
        let notifier = DiscoveryNotifier::new(b"mblos".to_vec());
        let seen = collecting(&notifier);

        let name = "my_iot.nonsense._ssh._tcp.local.";
        let source = record(name, ServiceAddress::Packed(vec![254, 255, 255, 255]), b"mblos");
        notifier.add_service(&source, SERVICE_TYPE, name).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["my_iot.nonsense: 254.255.255.255"]);
    }

    #[test]
    fn test_duplicates_notify_once() {
        let notifier = DiscoveryNotifier::new(b"mblos".to_vec());
        let seen = collecting(&notifier);

        let adverts = [
            ("a._ssh._tcp.local.", vec![10, 0, 0, 1]),
            ("b._ssh._tcp.local.", vec![10, 0, 0, 2]),
            ("a._ssh._tcp.local.", vec![10, 0, 0, 1]),
            ("a._ssh._tcp.local.", vec![10, 0, 0, 9]),
            ("b._ssh._tcp.local.", vec![10, 0, 0, 2]),
        ];
        for (name, addr) in adverts {
            let source = record(name, ServiceAddress::Packed(addr), b"mblos");
            notifier.add_service(&source, SERVICE_TYPE, name).unwrap();
        }

        // Five adverts, two exact duplicates.
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(notifier.device_count(), 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["a: 10.0.0.1", "b: 10.0.0.2", "a: 10.0.0.9"]
        );
    }

    #[test]
    fn test_missing_marker_is_ignored() {
        let notifier = DiscoveryNotifier::new(b"mblos".to_vec());
        let seen = collecting(&notifier);

        for marker in [&b"sobl"[..], b"slobm", b"ham", b"009109"] {
            let name = "johnsdev._ssh._tcp.local.";
            let source = record(name, ServiceAddress::Packed(vec![192, 254, 255, 0]), marker);
            notifier.add_service(&source, SERVICE_TYPE, name).unwrap();
        }

        // Unusable addresses are never looked at without the marker either.
        let source = record("x._ssh._tcp.local.", ServiceAddress::Packed(vec![1, 2, 3]), b"other");
        notifier.add_service(&source, SERVICE_TYPE, "x._ssh._tcp.local.").unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(notifier.device_count(), 0);
    }

    #[test]
    fn test_bad_address_propagates() {
        let notifier = DiscoveryNotifier::new(b"mblos".to_vec());
        let name = "mbed-linux-os-0._ssh._tcp.local.";
        let source = record(name, ServiceAddress::Packed(vec![254, 255, 255, 255, 4]), b"mblos");

        let err = notifier.add_service(&source, SERVICE_TYPE, name).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Discovery(DiscoveryError::AddressParse { .. })
        ));
        assert_eq!(notifier.device_count(), 0);
    }

    #[test]
    fn test_text_and_ipv6_addresses_pass_through() {
        assert_eq!(
            ServiceAddress::Text("fe80::1%eth0".into()).render("x").unwrap(),
            "fe80::1%eth0"
        );
        let mut v6 = vec![0u8; 16];
        v6[0] = 0xfe;
        v6[1] = 0x80;
        v6[15] = 1;
        assert_eq!(ServiceAddress::Packed(v6).render("x").unwrap(), "fe80::1");
    }

    #[test]
    fn test_unresolved_service_is_ignored() {
        struct Unresolved;
        impl ServiceInfoSource for Unresolved {
            fn service_info(&self, _: &str, _: &str) -> Option<ServiceRecord> {
                None
            }
        }

        let notifier = DiscoveryNotifier::new(b"mblos".to_vec());
        notifier.add_service(&Unresolved, SERVICE_TYPE, "a").unwrap();
        assert_eq!(notifier.device_count(), 0);
    }

    #[test]
    fn test_listeners_called_in_registration_order() {
        let notifier = Notifier::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = order.clone();
            notifier.add_listener(move |msg| order.lock().unwrap().push(format!("{}:{}", id, msg)));
        }
        notifier.notify("hi");
        assert_eq!(*order.lock().unwrap(), vec!["0:hi", "1:hi", "2:hi"]);
    }

    #[test]
    fn test_concurrent_adds_never_double_notify() {
        let notifier = Arc::new(DiscoveryNotifier::new(b"mblos".to_vec()));
        let seen = collecting(&notifier);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let notifier = notifier.clone();
                std::thread::spawn(move || {
                    for i in 0..20u8 {
                        let name = format!("dev-{}._ssh._tcp.local.", i);
                        let source = record(&name, ServiceAddress::Packed(vec![10, 0, 0, i]), b"mblos");
                        notifier.add_service(&source, SERVICE_TYPE, &name).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(seen.lock().unwrap().len(), 20);
        assert_eq!(notifier.device_count(), 20);
    }
}
