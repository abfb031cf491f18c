//! Control sessions.
//!
//! A [`ControlSession`] binds one device to its AVTransport,
//! RenderingControl and ConnectionManager services. The registry enforces at
//! most one session per device.
//!
//! Control URL resolution follows a fallback chain because advertised
//! control URLs are wrong often enough to matter: a persisted known-good URL
//! is tried first, then the URL from the description document, then
//! vendor-profile paths. The first URL a device actually answers on is
//! persisted for next time. A SOAP fault counts as an answer: the endpoint
//! is right even when the action is refused.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};
use url::Url;

use castwire::build_didl_metadata;

use crate::avtransport::AvTransportClient;
use crate::config::ControlConfig;
use crate::connection_manager::{ConnectionManagerClient, ProtocolInfo};
use crate::errors::ControlError;
use crate::host::KvStore;
use crate::model::{
    AVTRANSPORT_SERVICE, CONNECTION_MANAGER_SERVICE, Device, DeviceId, PlaybackState,
    PositionInfo, RENDERING_CONTROL_SERVICE, TransportInfo,
};
use crate::registry::DeviceRegistry;
use crate::rendering_control::RenderingControlClient;
use crate::resilience::{CircuitBreakers, RetryPolicy};
use crate::soap_client::SoapTransport;
use crate::state::LifecycleEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UrlOrigin {
    /// From the host KV store; already confirmed in a previous run.
    KnownGood,
    /// Advertised in the description document.
    Described,
    /// Vendor-profile fallback path.
    Fallback,
}

struct CachedPosition {
    info: PositionInfo,
    at: Instant,
}

/// Last known playback state plus the cached position, under one lock. The
/// state outlives the cached value: invalidating the position (seek, new
/// URI) must not forget that the device is still playing.
struct PositionTracker {
    state: PlaybackState,
    cached: Option<CachedPosition>,
}

/// One authoritative control session on a device.
pub struct ControlSession {
    device_id: DeviceId,
    registry: Arc<DeviceRegistry>,
    kv: Arc<dyn KvStore>,
    breakers: Arc<CircuitBreakers>,
    retry: RetryPolicy,
    avt: AvTransportClient,
    rc: RenderingControlClient,
    cm: ConnectionManagerClient,
    resolved: Mutex<HashMap<String, String>>,
    volume_cache: Mutex<Option<(u8, Instant)>>,
    mute_cache: Mutex<Option<(bool, Instant)>>,
    position: Mutex<PositionTracker>,
    volume_ttl: Duration,
    position_ttl: Duration,
}

impl ControlSession {
    /// Open a session on a validated device. Fails when the device is
    /// unknown, has no AVTransport, or another session already holds it.
    pub fn open(
        device_id: DeviceId,
        registry: Arc<DeviceRegistry>,
        transport: Arc<dyn SoapTransport>,
        kv: Arc<dyn KvStore>,
        breakers: Arc<CircuitBreakers>,
        config: &ControlConfig,
    ) -> Result<Self, ControlError> {
        let device = registry
            .get(&device_id)
            .ok_or_else(|| ControlError::Device(format!("unknown device {device_id}")))?;

        if !device.has_av_transport() {
            return Err(ControlError::Device(format!(
                "{} has no AVTransport service",
                device.friendly_name
            )));
        }

        if !registry.claim_session(&device_id) {
            return Err(ControlError::Device(format!(
                "device {device_id} already has a control session"
            )));
        }

        registry.apply_lifecycle(&device_id, LifecycleEvent::SessionOpened);
        info!(renderer = device_id.as_str(), name = %device.friendly_name, "session opened");

        Ok(Self {
            device_id,
            registry,
            kv,
            breakers,
            retry: RetryPolicy::default(),
            avt: AvTransportClient::new(Arc::clone(&transport)),
            rc: RenderingControlClient::new(Arc::clone(&transport)),
            cm: ConnectionManagerClient::new(transport),
            resolved: Mutex::new(HashMap::new()),
            volume_cache: Mutex::new(None),
            mute_cache: Mutex::new(None),
            position: Mutex::new(PositionTracker {
                state: PlaybackState::Idle,
                cached: None,
            }),
            volume_ttl: Duration::from_millis(config.volume_cache_ms),
            position_ttl: Duration::from_millis(config.position_cache_ms),
        })
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn device(&self) -> Option<Device> {
        self.registry.get(&self.device_id)
    }

    // ----- AVTransport -----

    /// Load a URI. `metadata` is a raw DIDL-Lite document, or empty.
    pub fn set_av_transport_uri(&self, uri: &str, metadata: &str) -> Result<(), ControlError> {
        self.with_service(AVTRANSPORT_SERVICE, |url| {
            self.avt.set_av_transport_uri(url, uri, metadata)
        })?;
        self.invalidate_position();
        Ok(())
    }

    /// Queue the next URI for gapless handover.
    pub fn set_next_av_transport_uri(
        &self,
        uri: &str,
        metadata: &str,
    ) -> Result<(), ControlError> {
        self.with_service(AVTRANSPORT_SERVICE, |url| {
            self.avt.set_next_av_transport_uri(url, uri, metadata)
        })
    }

    /// DIDL-Lite for this device's vendor profile.
    pub fn build_metadata(&self, title: &str, uri: &str, mime: &str) -> String {
        let variant = self
            .device()
            .map(|d| d.profile.didl_variant())
            .unwrap_or(castwire::DidlVariant::Standard);
        build_didl_metadata(title, uri, mime, variant)
    }

    pub fn play(&self) -> Result<(), ControlError> {
        self.with_service(AVTRANSPORT_SERVICE, |url| self.avt.play(url, "1"))?;
        self.note_state(PlaybackState::Playing);
        Ok(())
    }

    pub fn pause(&self) -> Result<(), ControlError> {
        self.with_service(AVTRANSPORT_SERVICE, |url| self.avt.pause(url))?;
        self.note_state(PlaybackState::Paused);
        Ok(())
    }

    pub fn stop(&self) -> Result<(), ControlError> {
        self.with_service(AVTRANSPORT_SERVICE, |url| self.avt.stop(url))?;
        self.note_state(PlaybackState::Stopped);
        self.invalidate_position();
        Ok(())
    }

    pub fn seek(&self, position: Duration) -> Result<(), ControlError> {
        self.with_service(AVTRANSPORT_SERVICE, |url| self.avt.seek(url, position))?;
        self.invalidate_position();
        Ok(())
    }

    pub fn get_transport_info(&self) -> Result<TransportInfo, ControlError> {
        let info =
            self.with_service(AVTRANSPORT_SERVICE, |url| self.avt.get_transport_info(url))?;
        self.note_state(info.state);
        Ok(info)
    }

    /// Playback position, served from a short-lived cache. While the last
    /// known state is `Playing`, the cached value advances linearly with
    /// wall time so rapid UI polls see monotone progress without network
    /// traffic.
    pub fn get_position_info(&self) -> Result<PositionInfo, ControlError> {
        {
            let tracker = self.position.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = tracker.cached.as_ref() {
                let age = cached.at.elapsed();
                if age < self.position_ttl {
                    return Ok(interpolate(cached, tracker.state, age));
                }
            }
        }
        self.get_position_realtime()
    }

    /// Position straight from the device, bypassing the cache.
    pub fn get_position_realtime(&self) -> Result<PositionInfo, ControlError> {
        let info =
            self.with_service(AVTRANSPORT_SERVICE, |url| self.avt.get_position_info(url))?;
        let mut tracker = self.position.lock().unwrap_or_else(|e| e.into_inner());
        tracker.cached = Some(CachedPosition {
            info,
            at: Instant::now(),
        });
        Ok(info)
    }

    // ----- RenderingControl -----

    /// Volume, served from a short-lived cache.
    pub fn get_volume(&self) -> Result<u8, ControlError> {
        if let Some(volume) = fresh(&self.volume_cache, self.volume_ttl) {
            return Ok(volume);
        }
        self.get_volume_realtime()
    }

    /// Volume straight from the device, bypassing the cache.
    pub fn get_volume_realtime(&self) -> Result<u8, ControlError> {
        let volume =
            self.with_service(RENDERING_CONTROL_SERVICE, |url| self.rc.get_volume(url))?;
        seed(&self.volume_cache, volume);
        Ok(volume)
    }

    /// Set volume (0..=100; rejected before any I/O otherwise). A successful
    /// set seeds the read cache, so an immediate read-back costs nothing.
    pub fn set_volume(&self, volume: u8) -> Result<(), ControlError> {
        if volume > 100 {
            return Err(ControlError::InvalidParameter(format!(
                "volume {volume} out of range 0..=100"
            )));
        }
        self.with_service(RENDERING_CONTROL_SERVICE, |url| {
            self.rc.set_volume(url, volume)
        })?;
        seed(&self.volume_cache, volume);
        Ok(())
    }

    pub fn get_mute(&self) -> Result<bool, ControlError> {
        if let Some(muted) = fresh(&self.mute_cache, self.volume_ttl) {
            return Ok(muted);
        }
        let muted = self.with_service(RENDERING_CONTROL_SERVICE, |url| self.rc.get_mute(url))?;
        seed(&self.mute_cache, muted);
        Ok(muted)
    }

    pub fn set_mute(&self, mute: bool) -> Result<(), ControlError> {
        self.with_service(RENDERING_CONTROL_SERVICE, |url| {
            self.rc.set_mute(url, mute)
        })?;
        seed(&self.mute_cache, mute);
        Ok(())
    }

    // ----- ConnectionManager -----

    pub fn get_protocol_info(&self) -> Result<ProtocolInfo, ControlError> {
        self.with_service(CONNECTION_MANAGER_SERVICE, |url| {
            self.cm.get_protocol_info(url)
        })
    }

    // ----- internals -----

    fn note_state(&self, state: PlaybackState) {
        let mut tracker = self.position.lock().unwrap_or_else(|e| e.into_inner());
        let previous = tracker.state;
        if let Some(cached) = tracker.cached.as_mut() {
            // Re-anchor the interpolation base when playback starts or
            // stops, otherwise elapsed pause time would count as progress.
            let age = cached.at.elapsed();
            cached.info = interpolate(cached, previous, age);
            cached.at = Instant::now();
        }
        tracker.state = state;
    }

    fn invalidate_position(&self) {
        // The state survives: a seek mid-playback keeps the device Playing.
        self.position
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cached = None;
    }

    /// Run an action against a service, walking the control URL fallback
    /// chain. The first URL that answers is confirmed and persisted.
    fn with_service<T>(
        &self,
        service_type: &str,
        op: impl Fn(&str) -> Result<T, ControlError>,
    ) -> Result<T, ControlError> {
        self.breakers.check(&self.device_id)?;

        let candidates = self.candidates(service_type)?;
        let mut last_err =
            ControlError::Device(format!("no usable control URL for {service_type}"));

        for (candidate, origin) in candidates {
            match self.retry.run(service_type, || op(&candidate)) {
                Ok(value) => {
                    self.confirm(service_type, &candidate, origin);
                    self.breakers.record_success(&self.device_id);
                    self.registry
                        .apply_lifecycle(&self.device_id, LifecycleEvent::Heartbeat);
                    return Ok(value);
                }
                // A fault is a real answer from the right endpoint.
                Err(err @ ControlError::ProtocolFault { .. }) => {
                    self.confirm(service_type, &candidate, origin);
                    self.breakers.record_success(&self.device_id);
                    return Err(err);
                }
                Err(err @ ControlError::InvalidParameter(_)) => return Err(err),
                Err(err) => {
                    debug!(
                        renderer = self.device_id.as_str(),
                        url = candidate,
                        error = %err,
                        "control URL candidate failed"
                    );
                    self.reject(service_type, &candidate, origin);
                    last_err = err;
                }
            }
        }

        self.breakers.record_failure(&self.device_id);
        Err(last_err)
    }

    /// Candidate control URLs in resolution order: known-good, described,
    /// vendor fallbacks. Duplicates collapse to the earliest position.
    fn candidates(&self, service_type: &str) -> Result<Vec<(String, UrlOrigin)>, ControlError> {
        let device = self
            .registry
            .get(&self.device_id)
            .ok_or_else(|| ControlError::Device(format!("device {} gone", self.device_id)))?;

        let mut out: Vec<(String, UrlOrigin)> = Vec::new();
        let mut push = |url: String, origin: UrlOrigin, out: &mut Vec<(String, UrlOrigin)>| {
            if !url.is_empty() && !out.iter().any(|(u, _)| u == &url) {
                out.push((url, origin));
            }
        };

        if let Some(resolved) = self
            .resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(service_type)
        {
            push(resolved.clone(), UrlOrigin::KnownGood, &mut out);
        } else if let Some(persisted) = self.kv.get(&self.kv_key(service_type)) {
            push(persisted, UrlOrigin::KnownGood, &mut out);
        }

        if let Some(service) = device.service(service_type) {
            push(service.control_url.clone(), UrlOrigin::Described, &mut out);
        }

        if let Ok(base) = Url::parse(&device.description_url) {
            for path in device.profile.control_url_fallbacks(service_type) {
                if let Ok(url) = base.join(path) {
                    push(url.to_string(), UrlOrigin::Fallback, &mut out);
                }
            }
        }

        if out.is_empty() {
            return Err(ControlError::Device(format!(
                "{} exposes no {service_type} endpoint",
                device.friendly_name
            )));
        }
        Ok(out)
    }

    fn confirm(&self, service_type: &str, url: &str, origin: UrlOrigin) {
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(service_type.to_string(), url.to_string());
        if origin != UrlOrigin::KnownGood {
            debug!(
                renderer = self.device_id.as_str(),
                service = service_type,
                url,
                "control URL confirmed"
            );
            self.kv.put(&self.kv_key(service_type), url);
        }
    }

    fn reject(&self, service_type: &str, url: &str, origin: UrlOrigin) {
        let mut resolved = self.resolved.lock().unwrap_or_else(|e| e.into_inner());
        if resolved.get(service_type).map(String::as_str) == Some(url) {
            resolved.remove(service_type);
        }
        if origin == UrlOrigin::KnownGood {
            self.kv.remove(&self.kv_key(service_type));
        }
    }

    fn kv_key(&self, service_type: &str) -> String {
        format!("control-url/{}/{service_type}", self.device_id)
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.registry.release_session(&self.device_id);
    }
}

fn fresh<T: Copy>(cache: &Mutex<Option<(T, Instant)>>, ttl: Duration) -> Option<T> {
    cache
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
        .filter(|(_, at)| at.elapsed() < ttl)
        .map(|(value, _)| *value)
}

fn seed<T>(cache: &Mutex<Option<(T, Instant)>>, value: T) {
    *cache.lock().unwrap_or_else(|e| e.into_inner()) = Some((value, Instant::now()));
}

/// Advance a cached position by elapsed wall time while playing. The
/// estimate never runs past a known duration.
fn interpolate(cached: &CachedPosition, state: PlaybackState, age: Duration) -> PositionInfo {
    if state != PlaybackState::Playing {
        return cached.info;
    }
    let mut position = cached.info.position + age;
    if cached.info.duration > Duration::ZERO {
        position = position.min(cached.info.duration);
    }
    PositionInfo {
        position,
        duration: cached.info.duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::events::EngineEventBus;
    use crate::host::MemoryKvStore;
    use crate::model::Service;
    use crate::profile::DeviceProfile;
    use crate::soap_client::testing::{FakeTransport, fields};

    const DESC_URL: &str = "http://192.168.1.50:49152/desc.xml";

    fn test_device() -> Device {
        let now = Instant::now();
        Device {
            id: DeviceId::from_description_url(DESC_URL).unwrap(),
            udn: "uuid:test".into(),
            friendly_name: "Test Renderer".into(),
            manufacturer: "Acme".into(),
            model_name: "X".into(),
            description_url: DESC_URL.into(),
            services: vec![
                Service {
                    service_type: AVTRANSPORT_SERVICE.into(),
                    service_id: "urn:upnp-org:serviceId:AVTransport".into(),
                    control_url: "http://192.168.1.50:49152/avt".into(),
                    event_sub_url: String::new(),
                },
                Service {
                    service_type: RENDERING_CONTROL_SERVICE.into(),
                    service_id: "urn:upnp-org:serviceId:RenderingControl".into(),
                    control_url: "http://192.168.1.50:49152/rc".into(),
                    event_sub_url: String::new(),
                },
            ],
            profile: DeviceProfile::Generic,
            lifecycle: crate::model::DeviceLifecycleState::Validated,
            first_seen: now,
            last_seen: now,
            max_age: Duration::from_secs(1800),
        }
    }

    struct Fixture {
        registry: Arc<DeviceRegistry>,
        transport: Arc<FakeTransport>,
        kv: Arc<MemoryKvStore>,
        config: ControlConfig,
    }

    impl Fixture {
        fn new(transport: FakeTransport) -> Self {
            let bus = EngineEventBus::new();
            let registry = DeviceRegistry::new(
                &RegistryConfig {
                    max_devices: 8,
                    notify_window_ms: 10,
                    sweep_interval_secs: 10,
                },
                bus,
            );
            registry.add_or_update(test_device());
            Self {
                registry,
                transport: Arc::new(transport),
                kv: Arc::new(MemoryKvStore::default()),
                config: ControlConfig {
                    volume_cache_ms: 5_000,
                    position_cache_ms: 3_000,
                    ..ControlConfig::default()
                },
            }
        }

        fn open(&self) -> ControlSession {
            ControlSession::open(
                test_device().id,
                Arc::clone(&self.registry),
                self.transport.clone(),
                self.kv.clone(),
                Arc::new(CircuitBreakers::new(5)),
                &self.config,
            )
            .unwrap()
        }
    }

    fn volume_responder(
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<HashMap<String, String>, ControlError> {
        match action {
            "GetVolume" => Ok(fields(&[("CurrentVolume", "35")])),
            "SetVolume" => {
                let v = args.iter().find(|(k, _)| *k == "DesiredVolume").unwrap().1;
                assert!(v.parse::<u8>().unwrap() <= 100);
                Ok(fields(&[]))
            }
            "GetMute" => Ok(fields(&[("CurrentMute", "0")])),
            _ => Ok(fields(&[])),
        }
    }

    #[test]
    fn volume_reads_inside_window_skip_the_network() {
        let fixture = Fixture::new(FakeTransport::new(volume_responder));
        let session = fixture.open();

        session.set_volume(60).unwrap();
        let sets = fixture.transport.calls_for("SetVolume");
        assert_eq!(sets, 1);

        // Two reads inside the window: served from the cache seeded by the
        // successful set.
        assert_eq!(session.get_volume().unwrap(), 60);
        assert_eq!(session.get_volume().unwrap(), 60);
        assert_eq!(fixture.transport.calls_for("GetVolume"), 0);

        // Realtime always asks the device.
        assert_eq!(session.get_volume_realtime().unwrap(), 35);
        assert_eq!(fixture.transport.calls_for("GetVolume"), 1);
        fixture.registry.shutdown();
    }

    #[test]
    fn volume_out_of_range_fails_before_io() {
        let fixture = Fixture::new(FakeTransport::new(volume_responder));
        let session = fixture.open();

        let err = session.set_volume(150).unwrap_err();
        assert!(matches!(err, ControlError::InvalidParameter(_)));
        assert_eq!(fixture.transport.call_count(), 0);
        fixture.registry.shutdown();
    }

    #[test]
    fn second_session_on_same_device_is_refused() {
        let fixture = Fixture::new(FakeTransport::new(volume_responder));
        let _first = fixture.open();

        let second = ControlSession::open(
            test_device().id,
            Arc::clone(&fixture.registry),
            fixture.transport.clone(),
            fixture.kv.clone(),
            Arc::new(CircuitBreakers::new(5)),
            &fixture.config,
        );
        assert!(matches!(second, Err(ControlError::Device(_))));
        fixture.registry.shutdown();
    }

    #[test]
    fn dropping_a_session_frees_the_device() {
        let fixture = Fixture::new(FakeTransport::new(volume_responder));
        {
            let _session = fixture.open();
            assert!(fixture.registry.has_session(&test_device().id));
        }
        assert!(!fixture.registry.has_session(&test_device().id));
        fixture.registry.shutdown();
    }

    #[test]
    fn first_success_persists_the_control_url() {
        let fixture = Fixture::new(FakeTransport::new(volume_responder));
        let session = fixture.open();

        session.get_volume_realtime().unwrap();
        let key = format!(
            "control-url/{}/{}",
            test_device().id,
            RENDERING_CONTROL_SERVICE
        );
        assert_eq!(
            fixture.kv.get(&key).as_deref(),
            Some("http://192.168.1.50:49152/rc")
        );
        fixture.registry.shutdown();
    }

    /// Transport that refuses the advertised URL and answers on a vendor
    /// fallback path.
    struct UrlSelectiveTransport {
        good_url: String,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl SoapTransport for UrlSelectiveTransport {
        fn invoke(
            &self,
            control_url: &str,
            _service_type: &str,
            _action: &str,
            _args: &[(&str, &str)],
        ) -> Result<HashMap<String, String>, ControlError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if control_url == self.good_url {
                Ok(fields(&[]))
            } else {
                // Wrong endpoint: the device's web server answers 404 with
                // an HTML body, which surfaces as a parse error.
                Err(ControlError::Parsing(format!("not SOAP at {control_url}")))
            }
        }
    }

    #[test]
    fn advertised_url_failure_falls_back_and_persists_the_winner() {
        let bus = EngineEventBus::new();
        let registry = DeviceRegistry::new(
            &RegistryConfig {
                max_devices: 8,
                notify_window_ms: 10,
                sweep_interval_secs: 10,
            },
            bus,
        );
        let mut device = test_device();
        device.profile = DeviceProfile::SamsungTv;
        registry.add_or_update(device);

        let good_url = "http://192.168.1.50:49152/upnp/control/AVTransport1".to_string();
        let transport = Arc::new(UrlSelectiveTransport {
            good_url: good_url.clone(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let kv = Arc::new(MemoryKvStore::default());

        let session = ControlSession::open(
            test_device().id,
            Arc::clone(&registry),
            transport,
            kv.clone(),
            Arc::new(CircuitBreakers::new(5)),
            &ControlConfig::default(),
        )
        .unwrap();

        session.play().unwrap();

        // The winner (first fallback path) is persisted as known-good.
        let key = format!("control-url/{}/{}", test_device().id, AVTRANSPORT_SERVICE);
        assert_eq!(kv.get(&key).as_deref(), Some(good_url.as_str()));
        registry.shutdown();
    }

    #[test]
    fn persisted_known_good_url_is_tried_first() {
        let bus = EngineEventBus::new();
        let registry = DeviceRegistry::new(
            &RegistryConfig {
                max_devices: 8,
                notify_window_ms: 10,
                sweep_interval_secs: 10,
            },
            bus,
        );
        registry.add_or_update(test_device());

        let good_url = "http://192.168.1.50:49152/persisted/avt".to_string();
        let kv = Arc::new(MemoryKvStore::default());
        let key = format!("control-url/{}/{}", test_device().id, AVTRANSPORT_SERVICE);
        kv.put(&key, &good_url);

        let transport = Arc::new(UrlSelectiveTransport {
            good_url,
            calls: std::sync::atomic::AtomicUsize::new(0),
        });

        let session = ControlSession::open(
            test_device().id,
            Arc::clone(&registry),
            Arc::clone(&transport) as Arc<dyn SoapTransport>,
            kv,
            Arc::new(CircuitBreakers::new(5)),
            &ControlConfig::default(),
        )
        .unwrap();

        session.play().unwrap();
        // The persisted URL answered on the first try.
        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        registry.shutdown();
    }

    #[test]
    fn protocol_fault_confirms_url_but_surfaces_typed() {
        let fixture = Fixture::new(FakeTransport::new(|action, _| {
            if action == "Seek" {
                Err(ControlError::ProtocolFault {
                    code: Some(710),
                    description: "Seek mode not supported".into(),
                })
            } else {
                Ok(fields(&[]))
            }
        }));
        let session = fixture.open();

        let err = session.seek(Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, ControlError::ProtocolFault { code: Some(710), .. }));
        // The fault confirmed the endpoint: exactly one Seek went out, no
        // fallback probing, no retries.
        assert_eq!(fixture.transport.calls_for("Seek"), 1);

        let key = format!("control-url/{}/{}", test_device().id, AVTRANSPORT_SERVICE);
        assert!(fixture.kv.get(&key).is_some());
        fixture.registry.shutdown();
    }

    #[test]
    fn position_interpolates_while_playing() {
        let fixture = Fixture::new(FakeTransport::new(|action, _| match action {
            "GetPositionInfo" => Ok(fields(&[
                ("RelTime", "0:01:00"),
                ("TrackDuration", "0:03:00"),
            ])),
            _ => Ok(fields(&[])),
        }));
        let session = fixture.open();

        session.play().unwrap();
        let first = session.get_position_info().unwrap();
        assert_eq!(first.position, Duration::from_secs(60));
        assert_eq!(fixture.transport.calls_for("GetPositionInfo"), 1);

        std::thread::sleep(Duration::from_millis(60));
        let second = session.get_position_info().unwrap();
        // Cached, not refetched, and advanced by roughly the elapsed time.
        assert_eq!(fixture.transport.calls_for("GetPositionInfo"), 1);
        assert!(second.position > first.position);
        assert!(second.position < first.position + Duration::from_secs(1));

        // Realtime bypasses the cache.
        session.get_position_realtime().unwrap();
        assert_eq!(fixture.transport.calls_for("GetPositionInfo"), 2);
        fixture.registry.shutdown();
    }

    #[test]
    fn seek_keeps_the_playing_state_for_interpolation() {
        let fixture = Fixture::new(FakeTransport::new(|action, _| match action {
            "GetPositionInfo" => Ok(fields(&[
                ("RelTime", "0:02:00"),
                ("TrackDuration", "0:03:00"),
            ])),
            _ => Ok(fields(&[])),
        }));
        let session = fixture.open();

        session.play().unwrap();
        session.get_position_info().unwrap();
        // Seek drops the cached position but the device is still playing.
        session.seek(Duration::from_secs(120)).unwrap();

        let first = session.get_position_info().unwrap();
        assert_eq!(fixture.transport.calls_for("GetPositionInfo"), 2);
        std::thread::sleep(Duration::from_millis(60));
        let second = session.get_position_info().unwrap();
        assert_eq!(fixture.transport.calls_for("GetPositionInfo"), 2);
        assert!(second.position > first.position);
        fixture.registry.shutdown();
    }

    #[test]
    fn pause_freezes_an_interpolating_position() {
        let fixture = Fixture::new(FakeTransport::new(|action, _| match action {
            "GetPositionInfo" => Ok(fields(&[
                ("RelTime", "0:01:00"),
                ("TrackDuration", "0:03:00"),
            ])),
            _ => Ok(fields(&[])),
        }));
        let session = fixture.open();

        session.play().unwrap();
        let first = session.get_position_info().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        session.pause().unwrap();

        let at_pause = session.get_position_info().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let later = session.get_position_info().unwrap();

        // Progress up to the pause is kept, nothing accrues after it.
        assert!(at_pause.position >= first.position);
        assert_eq!(at_pause.position, later.position);
        assert_eq!(fixture.transport.calls_for("GetPositionInfo"), 1);
        fixture.registry.shutdown();
    }

    #[test]
    fn paused_position_does_not_advance() {
        let fixture = Fixture::new(FakeTransport::new(|action, _| match action {
            "GetPositionInfo" => Ok(fields(&[
                ("RelTime", "0:01:00"),
                ("TrackDuration", "0:03:00"),
            ])),
            _ => Ok(fields(&[])),
        }));
        let session = fixture.open();

        session.pause().unwrap();
        let first = session.get_position_info().unwrap();
        std::thread::sleep(Duration::from_millis(40));
        let second = session.get_position_info().unwrap();
        assert_eq!(first.position, second.position);
        fixture.registry.shutdown();
    }

    #[test]
    fn samsung_metadata_uses_dlna_variant() {
        let fixture = Fixture::new(FakeTransport::new(volume_responder));
        let session = fixture.open();
        // Generic profile: standard DIDL, no DLNA flags.
        let metadata = session.build_metadata("Song", "http://h/t.mp3", "audio/mpeg");
        assert!(metadata.contains("upnp:class"));
        assert!(!metadata.contains("DLNA.ORG_OP"));
        fixture.registry.shutdown();
    }
}
