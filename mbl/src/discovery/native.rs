//! Event-driven discovery through the `mdns-sd` resolver.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::time::Instant;

use super::DiscoveryBackend;
use super::notifier::{AddressFamily, DiscoveryNotifier, ResolvedService, ServiceAddress, ServiceRecord};
use crate::error::{DiscoveryError, Result};

/// Service browser backed by an in-process mDNS daemon.
///
/// The daemon delivers events on its own thread; a listener thread forwards
/// resolved services to the notifier. The daemon is shut down when the
/// browser is dropped.
pub struct NativeBrowser {
    daemon: ServiceDaemon,
    service_type: String,
    listener: Option<JoinHandle<Result<()>>>,
}

impl NativeBrowser {
    /// Start the mDNS daemon for `service_type`.
    pub fn new(service_type: &str) -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(DiscoveryError::Mdns)?;
        Ok(Self {
            daemon,
            service_type: service_type.to_string(),
            listener: None,
        })
    }

    fn join_listener(&mut self) -> Result<()> {
        match self.listener.take() {
            Some(handle) => handle.join().map_err(|_| DiscoveryError::EventThread)?,
            None => Ok(()),
        }
    }
}

impl DiscoveryBackend for NativeBrowser {
    /// Start browsing on the first call; later calls surface listener errors.
    async fn discover_all(&mut self, notifier: &Arc<DiscoveryNotifier>, _deadline: Instant) -> Result<()> {
        match &self.listener {
            None => {
                let events = self
                    .daemon
                    .browse(&self.service_type)
                    .map_err(DiscoveryError::Mdns)?;
                let notifier = Arc::clone(notifier);
                debug!("Browsing for {}", self.service_type);

                self.listener = Some(std::thread::spawn(move || {
                    while let Ok(event) = events.recv() {
                        match event {
                            ServiceEvent::ServiceResolved(info) => {
                                let Some(record) = service_record(&info) else {
                                    debug!(
                                        "Skipping {}: no address usable without an interface",
                                        info.get_fullname()
                                    );
                                    continue;
                                };
                                notifier.add_service(
                                    &ResolvedService(record),
                                    info.get_type(),
                                    info.get_fullname(),
                                )?;
                            }
                            ServiceEvent::ServiceRemoved(service_type, name) => {
                                notifier.remove_service(&service_type, &name);
                            }
                            _ => {}
                        }
                    }
                    Ok(())
                }));
                Ok(())
            }
            Some(handle) if handle.is_finished() => self.join_listener(),
            Some(_) => Ok(()),
        }
    }
}

impl Drop for NativeBrowser {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            warn!("Failed to shut down mDNS daemon: {}", e);
        }
    }
}

/// Convert a resolved mDNS service into a [`ServiceRecord`].
///
/// IPv4 addresses are preferred; they are passed on packed so the notifier
/// renders them. The resolver does not report which interface an address
/// arrived on, so link-local IPv6 addresses are unusable and skipped.
/// `None` when no usable address is left.
fn service_record(info: &ServiceInfo) -> Option<ServiceRecord> {
    let (address, family) = match usable_address(info.get_addresses().iter().copied())? {
        IpAddr::V4(v4) => (ServiceAddress::Packed(v4.octets().to_vec()), AddressFamily::Ipv4),
        IpAddr::V6(v6) => (ServiceAddress::Packed(v6.octets().to_vec()), AddressFamily::Ipv6),
    };

    let properties: HashMap<Vec<u8>, Option<Vec<u8>>> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().as_bytes().to_vec(), prop.val().map(<[u8]>::to_vec)))
        .collect();

    Some(ServiceRecord {
        name: info.get_fullname().to_string(),
        address,
        interface: None,
        family: Some(family),
        properties,
    })
}

/// First IPv4 address, else the first IPv6 address that needs no zone.
fn usable_address(addresses: impl Iterator<Item = IpAddr>) -> Option<IpAddr> {
    let mut v6 = None;
    for addr in addresses {
        match addr {
            IpAddr::V4(_) => return Some(addr),
            IpAddr::V6(v6_addr) if v6.is_none() && !v6_addr.is_unicast_link_local() => v6 = Some(addr),
            IpAddr::V6(_) => {}
        }
    }
    v6
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_usable_address() {
        let link_local = IpAddr::V6("fe80::1".parse::<Ipv6Addr>().unwrap());
        let global = IpAddr::V6("2001:db8::1".parse::<Ipv6Addr>().unwrap());
        let v4 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert_eq!(usable_address([link_local, global, v4].into_iter()), Some(v4));
        assert_eq!(usable_address([link_local, global].into_iter()), Some(global));
        assert_eq!(usable_address([link_local].into_iter()), None);
        assert_eq!(usable_address(std::iter::empty()), None);
    }
}
