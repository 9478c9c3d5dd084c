//! Device discovery over mDNS.
//!
//! Two interchangeable backends feed one [`DiscoveryNotifier`]:
//!
//! - [`AvahiBrowser`] polls the `avahi-browse` utility and parses its
//!   parsable output.
//! - [`NativeBrowser`] runs an in-process mDNS resolver that reports
//!   services from its own thread as they resolve.
//!
//! [`do_discovery`] picks a backend for the host and drives it for a bounded
//! time window, stopping early once devices appear.
//!
//! ```rust,no_run
//! use mbl::discovery::{do_discovery, DiscoveryConfig};
//!
//! # async fn example() -> Result<(), mbl::Error> {
//! let devices = do_discovery(|line| println!("{line}"), &DiscoveryConfig::default()).await?;
//! if devices.is_empty() {
//!     eprintln!("No devices found!");
//! }
//! # Ok(())
//! # }
//! ```

mod avahi;
mod native;
mod notifier;

pub use avahi::{AVAHI_SERVICE_TYPE, AvahiBrowser, BrowseRecord, parse_browse_output};
pub use native::NativeBrowser;
pub use notifier::{
    AddressFamily, DiscoveryNotifier, Listener, Notifier, ResolvedService, ServiceAddress,
    ServiceInfoSource, ServiceRecord, short_name,
};

use std::future::Future;
use std::io;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::process::Command;
use tokio::time::Instant;

use crate::device::Device;
use crate::error::Result;

/// Service type devices advertise SSH under.
pub const SSH_SERVICE_TYPE: &str = "_ssh._tcp.local.";

/// TXT property that marks a device as one of ours.
pub const VENDOR_MARKER: &[u8] = b"mblos";

/// Upper bound on how long discovery waits for a first device.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on probing the browsing utility.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Browsing utility preferred when present on the host.
pub const AVAHI_BROWSE: &str = "avahi-browse";

/// Discovery settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub service_type: String,
    pub vendor_marker: Vec<u8>,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub browse_program: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: SSH_SERVICE_TYPE.to_string(),
            vendor_marker: VENDOR_MARKER.to_vec(),
            timeout: DISCOVERY_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            browse_program: AVAHI_BROWSE.to_string(),
        }
    }
}

/// A source of service advertisements.
pub trait DiscoveryBackend: Send {
    /// Report what the backend knows to `notifier`.
    ///
    /// Polling backends scan once per call and give up at `deadline`. A scan
    /// cut short is not an error. Event-driven backends start on the first
    /// call and afterwards only surface background failures.
    fn discover_all(
        &mut self,
        notifier: &Arc<DiscoveryNotifier>,
        deadline: Instant,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Which backend a host supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Avahi,
    Native,
}

impl BackendKind {
    /// Decide from the result of trying to run the browsing utility.
    ///
    /// Only "not found" rules the utility out; any other outcome means it is
    /// installed.
    pub fn from_probe(probe: &io::Result<Output>) -> Self {
        match probe {
            Err(e) if e.kind() == io::ErrorKind::NotFound => BackendKind::Native,
            _ => BackendKind::Avahi,
        }
    }

    /// Probe the host for the browsing utility.
    ///
    /// A probe still running after `timeout` means the utility exists.
    pub async fn detect(program: &str, timeout: Duration) -> Self {
        let probe = Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let kind = match tokio::time::timeout(timeout, probe).await {
            Ok(probe) => Self::from_probe(&probe),
            Err(_) => BackendKind::Avahi,
        };
        debug!("Discovery backend: {:?}", kind);
        kind
    }
}

/// The backend selected for this host.
pub enum Backend {
    Avahi(AvahiBrowser),
    Native(NativeBrowser),
}

impl Backend {
    /// Pick the backend for this host.
    pub async fn select(config: &DiscoveryConfig) -> Result<Self> {
        let probe_timeout = config.timeout.min(PROBE_TIMEOUT);
        match BackendKind::detect(&config.browse_program, probe_timeout).await {
            BackendKind::Avahi => Ok(Backend::Avahi(AvahiBrowser::new(
                config.browse_program.clone(),
                &config.service_type,
            ))),
            BackendKind::Native => Ok(Backend::Native(NativeBrowser::new(&config.service_type)?)),
        }
    }
}

impl DiscoveryBackend for Backend {
    async fn discover_all(&mut self, notifier: &Arc<DiscoveryNotifier>, deadline: Instant) -> Result<()> {
        match self {
            Backend::Avahi(browser) => browser.discover_all(notifier, deadline).await,
            Backend::Native(browser) => browser.discover_all(notifier, deadline).await,
        }
    }
}

/// Drive `backend` until a device shows up or the timeout elapses.
///
/// Once the first device is seen, one more pass is made so that devices
/// announced together are reported together. No pass runs past the
/// deadline. An empty result is not an error.
pub async fn run_discovery<B: DiscoveryBackend>(
    backend: &mut B,
    notifier: &Arc<DiscoveryNotifier>,
    config: &DiscoveryConfig,
) -> Result<()> {
    let deadline = Instant::now() + config.timeout;

    loop {
        backend.discover_all(notifier, deadline).await?;

        if notifier.device_count() > 0 {
            tokio::time::sleep_until(deadline.min(Instant::now() + config.poll_interval)).await;
            backend.discover_all(notifier, deadline).await?;
            break;
        }

        if Instant::now() >= deadline {
            info!("No devices found within {:?}", config.timeout);
            break;
        }

        tokio::time::sleep_until(deadline.min(Instant::now() + config.poll_interval)).await;
    }

    Ok(())
}

/// Browse for devices for up to `config.timeout`.
///
/// `listener` receives one `"<hostname>: <address>"` line per new device.
/// Returns the devices found, in discovery order.
pub async fn do_discovery(
    listener: impl Fn(&str) + Send + Sync + 'static,
    config: &DiscoveryConfig,
) -> Result<Vec<Device>> {
    let notifier = Arc::new(DiscoveryNotifier::new(config.vendor_marker.clone()));
    notifier.add_listener(listener);

    let mut backend = Backend::select(config).await?;
    run_discovery(&mut backend, &notifier, config).await?;

    Ok(notifier.devices())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays one canned avahi output buffer per call.
    struct ScriptedBackend {
        browser: AvahiBrowser,
        scans: VecDeque<&'static [u8]>,
        calls: usize,
    }

    impl ScriptedBackend {
        fn new(scans: Vec<&'static [u8]>) -> Self {
            Self {
                browser: AvahiBrowser::new(AVAHI_BROWSE, SSH_SERVICE_TYPE),
                scans: scans.into(),
                calls: 0,
            }
        }
    }

    impl DiscoveryBackend for ScriptedBackend {
        async fn discover_all(&mut self, notifier: &Arc<DiscoveryNotifier>, _: Instant) -> Result<()> {
            self.calls += 1;
            let raw = self.scans.pop_front().unwrap_or(b"");
            self.browser.report(raw, notifier)
        }
    }

    fn fast_config() -> DiscoveryConfig {
        DiscoveryConfig {
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            ..DiscoveryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_stops_after_first_device_and_settle_pass() {
        let mut backend = ScriptedBackend::new(vec![
            b"",
            b"=;eth0;IPv4;a;_ssh._tcp;local;a.local;10.0.0.1;22;\"mblos\"",
            b"=;eth0;IPv4;b;_ssh._tcp;local;b.local;10.0.0.2;22;\"mblos\"",
            b"=;eth0;IPv4;c;_ssh._tcp;local;c.local;10.0.0.3;22;\"mblos\"",
        ]);
        let notifier = Arc::new(DiscoveryNotifier::new(VENDOR_MARKER.to_vec()));

        run_discovery(&mut backend, &notifier, &fast_config()).await.unwrap();

        assert_eq!(backend.calls, 3);
        let names: Vec<_> = notifier.devices().into_iter().map(|d| d.hostname).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_an_error() {
        let mut backend = ScriptedBackend::new(vec![]);
        let notifier = Arc::new(DiscoveryNotifier::new(VENDOR_MARKER.to_vec()));

        let started = std::time::Instant::now();
        run_discovery(&mut backend, &notifier, &fast_config()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(backend.calls > 1);
        assert_eq!(notifier.device_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        struct Failing;
        impl DiscoveryBackend for Failing {
            async fn discover_all(&mut self, _: &Arc<DiscoveryNotifier>, _: Instant) -> Result<()> {
                Err(crate::error::DiscoveryError::EventThread.into())
            }
        }

        let notifier = Arc::new(DiscoveryNotifier::new(VENDOR_MARKER.to_vec()));
        assert!(run_discovery(&mut Failing, &notifier, &fast_config()).await.is_err());
    }

    #[tokio::test]
    async fn test_listener_sees_end_to_end_record() {
        let mut backend = ScriptedBackend::new(vec![
            b"=;eth3;ipv6;mbed-linux-os-9999;mdns;local;mbed-linux-os-9999.local;fe80::d079:8191:9140:c56;22;mblos",
        ]);
        let notifier = Arc::new(DiscoveryNotifier::new(VENDOR_MARKER.to_vec()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        notifier.add_listener(move |line| sink.lock().unwrap().push(line.to_string()));

        run_discovery(&mut backend, &notifier, &fast_config()).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["mbed-linux-os-9999: fe80::d079:8191:9140:c56%eth3"]
        );
    }

    #[test]
    fn test_backend_kind_from_probe() {
        let missing: io::Result<Output> = Err(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(BackendKind::from_probe(&missing), BackendKind::Native);

        let denied: io::Result<Output> = Err(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(BackendKind::from_probe(&denied), BackendKind::Avahi);
    }

    #[tokio::test]
    async fn test_detect_missing_utility() {
        assert_eq!(
            BackendKind::detect("mbl-test-no-such-browser", Duration::from_secs(1)).await,
            BackendKind::Native
        );
    }

    /// Write an executable stand-in for the browsing utility.
    #[cfg(unix)]
    fn fake_browser(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-avahi-browse");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_scan_ends_with_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_browser(
            dir.path(),
            "if [ \"$1\" = --version ]; then echo 0.8; exit 0; fi\nexec sleep 30",
        );
        let config = DiscoveryConfig {
            browse_program: program,
            timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(10),
            ..DiscoveryConfig::default()
        };

        let started = std::time::Instant::now();
        let devices = tokio_test::assert_ok!(do_discovery(|_| {}, &config).await);

        assert!(devices.is_empty());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_probe_selects_browser() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_browser(dir.path(), "exec sleep 30");
        assert_eq!(
            BackendKind::detect(&program, Duration::from_millis(100)).await,
            BackendKind::Avahi
        );
    }
}
