//! SSDP discovery engine.
//!
//! A control point, not a device: the socket binds an ephemeral port and
//! never answers M-SEARCH queries. Binding UDP 1900 here would make the
//! kernel load-balance datagrams against any real UPnP server on the box and
//! lose replies at random.
//!
//! Announcements flow through [`DiscoveryCore`], which dedups repeated
//! (LOCATION, USN) pairs, fetches and parses description documents, and
//! registers validated devices. The socket loop is a thin shell around it so
//! the whole pipeline tests without a network.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};
use ureq::Agent;

use castwire::ssdp::{SSDP_MULTICAST_ADDR, SSDP_PORT};
use castwire::{SsdpMessage, build_msearch, parse_device_description, parse_ssdp_message};

use crate::config::DiscoveryConfig;
use crate::errors::ControlError;
use crate::model::{Device, DeviceId, DeviceLifecycleState};
use crate::profile::DeviceProfile;
use crate::registry::DeviceRegistry;
use crate::resilience::{CircuitBreakers, RetryPolicy, SingleFlight};

/// Fetches a description document by URL. The production implementation is
/// HTTP; tests script it.
pub trait DescriptionFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, ControlError>;
}

pub struct HttpDescriptionFetcher {
    agent: Agent,
}

impl HttpDescriptionFetcher {
    pub fn new(timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.into(),
        }
    }
}

impl DescriptionFetcher for HttpDescriptionFetcher {
    fn fetch(&self, url: &str) -> Result<String, ControlError> {
        let mut response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Timeout(_) => {
                ControlError::Timeout(format!("description fetch from {url} timed out"))
            }
            other => ControlError::Network(format!("description fetch from {url}: {other}")),
        })?;

        response
            .body_mut()
            .read_to_string()
            .map_err(|e| ControlError::Network(format!("reading description body: {e}")))
    }
}

/// Socket-independent announcement pipeline: dedup, fetch, parse, register.
pub struct DiscoveryCore {
    fetcher: Arc<dyn DescriptionFetcher>,
    registry: Arc<DeviceRegistry>,
    breakers: Arc<CircuitBreakers>,
    dedup_window: Duration,
    recent: Mutex<HashMap<(String, String), Instant>>,
    fetch_retry: RetryPolicy,
    /// Coalesces concurrent fetches of the same description URL; a burst of
    /// announcements for one device costs one HTTP round trip.
    fetch_flight: SingleFlight<String>,
}

impl DiscoveryCore {
    pub fn new(
        fetcher: Arc<dyn DescriptionFetcher>,
        registry: Arc<DeviceRegistry>,
        breakers: Arc<CircuitBreakers>,
        dedup_window: Duration,
    ) -> Self {
        Self {
            fetcher,
            registry,
            breakers,
            dedup_window,
            recent: Mutex::new(HashMap::new()),
            // Two retries after the initial attempt, then the candidate is
            // dropped without reaching the registry.
            fetch_retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(500),
            },
            fetch_flight: SingleFlight::new(),
        }
    }

    pub fn handle_message(&self, message: SsdpMessage) {
        match message {
            SsdpMessage::SearchResponse {
                usn,
                location,
                max_age,
                ..
            }
            | SsdpMessage::Alive {
                usn,
                location,
                max_age,
                ..
            } => {
                self.handle_announcement(&location, &usn, max_age);
            }
            SsdpMessage::ByeBye { usn, .. } => {
                self.registry.mark_lost_by_usn(&usn);
            }
        }
    }

    /// Process one alive announcement or search response.
    pub fn handle_announcement(&self, location: &str, usn: &str, max_age: u32) {
        if self.is_duplicate(location, usn) {
            trace!(location, "announcement absorbed by dedup window");
            return;
        }

        let Ok(id) = DeviceId::from_description_url(location) else {
            trace!(location, "unusable LOCATION URL, skipping");
            return;
        };

        let max_age = Duration::from_secs(u64::from(max_age));

        // A device the registry already knows just gets refreshed; the
        // breaker resets because discovery has re-confirmed it.
        if let Some(known) = self.registry.get(&id) {
            self.registry.touch(&id, max_age);
            self.breakers.reset(&id);
            if !known.lifecycle.is_active() {
                // Re-registration walks Lost/Error back to Discovered.
                self.register(&id, location, usn, max_age);
            }
            return;
        }

        self.register(&id, location, usn, max_age);
    }

    fn register(&self, id: &DeviceId, location: &str, usn: &str, max_age: Duration) {
        let xml = match self.fetch_flight.execute(location, || {
            self.fetch_retry
                .run("description fetch", || self.fetcher.fetch(location))
        }) {
            Ok(xml) => xml,
            Err(err) => {
                debug!(location, error = %err, "description fetch failed, dropping candidate");
                return;
            }
        };

        let description = match parse_device_description(&xml, location) {
            Ok(d) => d,
            Err(err) => {
                debug!(location, error = %err, "unparseable description, dropping candidate");
                return;
            }
        };

        let profile = DeviceProfile::detect(&description.manufacturer, &description.model_name);
        let now = Instant::now();
        let udn = if description.udn.is_empty() {
            usn.split("::").next().unwrap_or(usn).to_string()
        } else {
            description.udn.clone()
        };

        let device = Device {
            id: id.clone(),
            udn,
            friendly_name: description.friendly_name,
            manufacturer: description.manufacturer,
            model_name: description.model_name,
            description_url: location.to_string(),
            services: description
                .services
                .into_iter()
                .map(|s| crate::model::Service {
                    service_type: s.service_type,
                    service_id: s.service_id,
                    control_url: s.control_url,
                    event_sub_url: s.event_sub_url,
                })
                .collect(),
            profile,
            // Description fetched and parsed: the device arrives validated.
            lifecycle: DeviceLifecycleState::Validated,
            first_seen: now,
            last_seen: now,
            max_age,
        };

        self.breakers.reset(id);
        self.registry.add_or_update(device);
    }

    fn is_duplicate(&self, location: &str, usn: &str) -> bool {
        let key = (location.to_string(), usn.to_string());
        let now = Instant::now();
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());

        recent.retain(|_, seen| now.duration_since(*seen) <= self.dedup_window);

        match recent.get(&key) {
            Some(_) => true,
            None => {
                recent.insert(key, now);
                false
            }
        }
    }
}

/// Owns the SSDP socket and the search worker thread.
pub struct DiscoveryEngine {
    config: DiscoveryConfig,
    core: Arc<DiscoveryCore>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryEngine {
    pub fn new(config: DiscoveryConfig, core: Arc<DiscoveryCore>) -> Self {
        Self {
            config,
            core,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Start one search round: join the multicast group, send repeated
    /// M-SEARCH datagrams, listen until `timeout` or [`stop_search`].
    ///
    /// Socket setup failure is fatal and returned to the caller; everything
    /// after that is best effort.
    ///
    /// [`stop_search`]: DiscoveryEngine::stop_search
    pub fn start_search(&self, timeout: Duration) -> Result<(), ControlError> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("search already running");
            return Ok(());
        }

        let socket = match open_ssdp_socket() {
            Ok(s) => s,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(ControlError::Network(format!("SSDP socket setup: {e}")));
            }
        };

        let core = Arc::clone(&self.core);
        let running = Arc::clone(&self.running);
        let targets = self.config.search_targets.clone();
        let repeats = self.config.msearch_repeats.max(1);

        let handle = std::thread::Builder::new()
            .name("ssdp-search".to_string())
            .spawn(move || {
                search_loop(socket, core, running, targets, repeats, timeout);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                ControlError::Device(format!("spawning search thread: {e}"))
            })?;

        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Stop the current search. Idempotent; returns once the worker exits.
    pub fn stop_search(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }

    pub fn is_searching(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for DiscoveryEngine {
    fn drop(&mut self) {
        self.stop_search();
    }
}

fn open_ssdp_socket() -> std::io::Result<UdpSocket> {
    let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket2.set_reuse_address(true)?;

    let bind_addr: SocketAddr = "0.0.0.0:0"
        .parse()
        .expect("static socket address");
    socket2.bind(&bind_addr.into())?;

    let socket: UdpSocket = socket2.into();
    // Short read timeout so stop_search() is honored promptly.
    socket.set_read_timeout(Some(Duration::from_millis(500)))?;
    socket.set_multicast_loop_v4(true)?;

    let group = SSDP_MULTICAST_ADDR
        .parse()
        .expect("static multicast address");
    for ipv4 in castutils::local_ipv4_interfaces() {
        match socket.join_multicast_v4(&group, &ipv4) {
            Ok(()) => debug!(interface = %ipv4, "joined SSDP multicast group"),
            Err(e) => warn!(interface = %ipv4, error = %e, "failed to join multicast group"),
        }
    }

    Ok(socket)
}

fn search_loop(
    socket: UdpSocket,
    core: Arc<DiscoveryCore>,
    running: Arc<AtomicBool>,
    targets: Vec<String>,
    repeats: u32,
    timeout: Duration,
) {
    let deadline = Instant::now() + timeout;
    let mut sends_left = repeats;
    let mut next_send = Instant::now();
    let multicast: SocketAddr = format!("{SSDP_MULTICAST_ADDR}:{SSDP_PORT}")
        .parse()
        .expect("static multicast address");
    let mut buf = [0u8; 8192];

    info!(targets = ?targets, repeats, "SSDP search started");

    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        if sends_left > 0 && Instant::now() >= next_send {
            for st in &targets {
                let msg = build_msearch(st, 2);
                if let Err(e) = socket.send_to(msg.as_bytes(), multicast) {
                    warn!(error = %e, st, "M-SEARCH send failed");
                }
            }
            sends_left -= 1;
            // Repeats spaced with jitter so replies from many devices do not
            // arrive in lockstep.
            let jitter_ms = rand::rng().random_range(100..=300);
            next_send = Instant::now() + Duration::from_millis(jitter_ms);
        }

        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                let data = String::from_utf8_lossy(&buf[..n]);
                match parse_ssdp_message(&data) {
                    Ok(message) => {
                        trace!(%from, "SSDP message");
                        core.handle_message(message);
                    }
                    Err(err) => trace!(%from, error = %err, "skipping SSDP datagram"),
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => warn!(error = %e, "SSDP read error"),
        }
    }

    running.store(false, Ordering::SeqCst);
    info!("SSDP search finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::events::EngineEventBus;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedFetcher {
        calls: Arc<AtomicUsize>,
        fail_urls: Vec<String>,
    }

    impl ScriptedFetcher {
        fn new(fail_urls: &[&str]) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_urls: fail_urls.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn call_counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }
    }

    impl DescriptionFetcher for ScriptedFetcher {
        fn fetch(&self, url: &str) -> Result<String, ControlError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_urls.iter().any(|f| f == url) {
                return Err(ControlError::Parsing(format!("no description at {url}")));
            }
            Ok(format!(
                r#"<root><device>
                    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
                    <friendlyName>Renderer at {url}</friendlyName>
                    <manufacturer>Acme</manufacturer>
                    <modelName>X</modelName>
                    <UDN>uuid:{}</UDN>
                    <serviceList><service>
                        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
                        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
                        <controlURL>/avt</controlURL>
                    </service></serviceList>
                </device></root>"#,
                url.len()
            ))
        }
    }

    fn core_with(fetcher: ScriptedFetcher, dedup_ms: u64) -> (Arc<DiscoveryCore>, Arc<DeviceRegistry>) {
        let bus = EngineEventBus::new();
        let registry = DeviceRegistry::new(
            &RegistryConfig {
                max_devices: 16,
                notify_window_ms: 10,
                sweep_interval_secs: 10,
            },
            bus,
        );
        let core = Arc::new(DiscoveryCore::new(
            Arc::new(fetcher),
            Arc::clone(&registry),
            Arc::new(CircuitBreakers::new(5)),
            Duration::from_millis(dedup_ms),
        ));
        (core, registry)
    }

    #[test]
    fn failing_description_url_never_reaches_registry() {
        let (core, registry) = core_with(ScriptedFetcher::new(&["http://bad/d.xml"]), 500);

        core.handle_announcement("http://a/d.xml", "uuid:a", 1800);
        core.handle_announcement("http://b/d.xml", "uuid:b", 1800);
        core.handle_announcement("http://c/d.xml", "uuid:c", 1800);
        core.handle_announcement("http://bad/d.xml", "uuid:bad", 1800);

        let devices = registry.list();
        assert_eq!(devices.len(), 3);
        assert!(devices.iter().all(|d| d.has_av_transport()));
        registry.shutdown();
    }

    #[test]
    fn repeated_announcements_inside_window_are_absorbed() {
        let fetcher = ScriptedFetcher::new(&[]);
        let calls = fetcher.call_counter();
        let (core, registry) = core_with(fetcher, 500);

        for _ in 0..5 {
            core.handle_announcement("http://a/d.xml", "uuid:a", 1800);
        }

        assert_eq!(registry.list().len(), 1);
        // One fetch: the four retransmissions never hit the fetcher.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        registry.shutdown();
    }

    #[test]
    fn same_location_different_usn_is_not_a_duplicate() {
        let (core, registry) = core_with(ScriptedFetcher::new(&[]), 500);

        core.handle_announcement("http://a/d.xml", "uuid:a::rootdevice", 1800);
        core.handle_announcement("http://a/d.xml", "uuid:a::MediaRenderer", 1800);

        // Both pass dedup, but they are the same device by description URL.
        assert_eq!(registry.list().len(), 1);
        registry.shutdown();
    }

    #[test]
    fn byebye_routes_to_registry() {
        let (core, registry) = core_with(ScriptedFetcher::new(&[]), 500);

        core.handle_announcement("http://a/d.xml", "uuid:16", 1800);
        let udn = registry.list()[0].udn.clone();
        core.handle_message(SsdpMessage::ByeBye {
            usn: format!("{udn}::upnp:rootdevice"),
            nt: "upnp:rootdevice".to_string(),
        });

        assert!(registry.list().is_empty());
        assert_eq!(registry.list_all().len(), 1);
        registry.shutdown();
    }

    #[test]
    fn garbage_location_is_skipped() {
        let (core, registry) = core_with(ScriptedFetcher::new(&[]), 500);
        core.handle_announcement("not a url at all", "uuid:x", 1800);
        assert!(registry.list().is_empty());
        registry.shutdown();
    }
}
