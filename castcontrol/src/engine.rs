//! Engine facade.
//!
//! [`CastEngine`] owns the registry, the discovery engine, the caches and
//! the background workers, and is constructed explicitly with its host
//! capabilities injected. Nothing here is a global: two engines in one
//! process stay fully independent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use castcache::{CacheSizing, PinGuard, SharedLruCache};

use crate::config::EngineConfig;
use crate::control_point::ControlSession;
use crate::discovery::{
    DescriptionFetcher, DiscoveryCore, DiscoveryEngine, HttpDescriptionFetcher,
};
use crate::errors::ControlError;
use crate::events::EngineEventBus;
use crate::host::{AlwaysOnNetwork, FileSource, FsFileSource, KvStore, MemoryKvStore, NetworkInfo};
use crate::model::{Device, DeviceId, EngineEvent, PlaybackState};
use crate::registry::DeviceRegistry;
use crate::resilience::CircuitBreakers;
use crate::soap_client::{HttpSoapTransport, SoapTransport};
use crate::state::LifecycleEvent;

/// Host capabilities and transports, injectable for tests.
pub struct EngineDeps {
    pub file_source: Arc<dyn FileSource>,
    pub kv_store: Arc<dyn KvStore>,
    pub network: Arc<dyn NetworkInfo>,
    pub transport: Option<Arc<dyn SoapTransport>>,
    pub fetcher: Option<Arc<dyn DescriptionFetcher>>,
}

impl Default for EngineDeps {
    fn default() -> Self {
        Self {
            file_source: Arc::new(FsFileSource),
            kv_store: Arc::new(MemoryKvStore::default()),
            network: Arc::new(AlwaysOnNetwork),
            transport: None,
            fetcher: None,
        }
    }
}

struct SessionSlot {
    session: Arc<ControlSession>,
    /// Keeps the device's description payload cached while connected.
    _description_pin: Option<PinGuard<String, String>>,
    last_ok: Instant,
    last_state: Option<PlaybackState>,
    last_volume: Option<(u8, bool)>,
    ticks: u64,
}

pub struct CastEngine {
    config: EngineConfig,
    bus: EngineEventBus,
    registry: Arc<DeviceRegistry>,
    breakers: Arc<CircuitBreakers>,
    discovery: DiscoveryEngine,
    transport: Arc<dyn SoapTransport>,
    kv: Arc<dyn KvStore>,
    network: Arc<dyn NetworkInfo>,
    file_source: Arc<dyn FileSource>,
    description_cache: SharedLruCache<String, String>,
    sessions: Arc<Mutex<HashMap<DeviceId, SessionSlot>>>,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Description fetcher backed by the payload cache.
struct CachingFetcher {
    inner: Arc<dyn DescriptionFetcher>,
    cache: SharedLruCache<String, String>,
}

impl DescriptionFetcher for CachingFetcher {
    fn fetch(&self, url: &str) -> Result<String, ControlError> {
        let key = url.to_string();
        if let Some(xml) = self.cache.get(&key) {
            return Ok(xml);
        }
        let xml = self.inner.fetch(url)?;
        self.cache.insert(key, xml.clone());
        Ok(xml)
    }
}

impl CastEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_deps(config, EngineDeps::default())
    }

    pub fn with_deps(config: EngineConfig, deps: EngineDeps) -> Self {
        let bus = EngineEventBus::new();
        let registry = DeviceRegistry::new(&config.registry, bus.clone());
        let breakers = Arc::new(CircuitBreakers::new(config.control.circuit_failure_threshold));

        let sizing = CacheSizing::from_memory_tier(config.memory_tier.into());
        let description_cache: SharedLruCache<String, String> =
            SharedLruCache::new(sizing.payloads);

        let transport: Arc<dyn SoapTransport> = deps
            .transport
            .unwrap_or_else(|| Arc::new(HttpSoapTransport::new(config.action_timeout())));

        let raw_fetcher: Arc<dyn DescriptionFetcher> = deps
            .fetcher
            .unwrap_or_else(|| Arc::new(HttpDescriptionFetcher::new(config.action_timeout())));
        let fetcher: Arc<dyn DescriptionFetcher> = Arc::new(CachingFetcher {
            inner: raw_fetcher,
            cache: description_cache.clone(),
        });

        let core = Arc::new(DiscoveryCore::new(
            fetcher,
            Arc::clone(&registry),
            Arc::clone(&breakers),
            config.dedup_window(),
        ));
        let discovery = DiscoveryEngine::new(config.discovery.clone(), core);

        Self {
            config,
            bus,
            registry,
            breakers,
            discovery,
            transport,
            kv: deps.kv_store,
            network: deps.network,
            file_source: deps.file_source,
            description_cache,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Start the background workers: expiry sweeper and session poller.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("engine starting");

        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());

        {
            let registry = Arc::clone(&self.registry);
            let cache = self.description_cache.clone();
            let running = Arc::clone(&self.running);
            let interval = Duration::from_secs(self.config.registry.sweep_interval_secs);
            if let Ok(handle) = std::thread::Builder::new()
                .name("engine-sweep".to_string())
                .spawn(move || sweep_loop(registry, cache, running, interval))
            {
                workers.push(handle);
            }
        }

        {
            let sessions = Arc::clone(&self.sessions);
            let registry = Arc::clone(&self.registry);
            let bus = self.bus.clone();
            let running = Arc::clone(&self.running);
            let interval = Duration::from_secs(self.config.control.poll_interval_secs.max(1));
            let lost_timeout = self.config.lost_timeout();
            if let Ok(handle) = std::thread::Builder::new()
                .name("engine-poll".to_string())
                .spawn(move || poll_loop(sessions, registry, bus, running, interval, lost_timeout))
            {
                workers.push(handle);
            }
        }
    }

    /// Stop workers, the current search, and all sessions. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("engine stopping");
        self.discovery.stop_search();
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in workers {
            let _ = handle.join();
        }
        self.registry.shutdown();
    }

    /// Start an SSDP search round. Fails when the LAN is unavailable or the
    /// socket cannot be set up.
    pub fn search(&self) -> Result<(), ControlError> {
        if !self.network.lan_available() {
            return Err(ControlError::Network("LAN unavailable".into()));
        }
        let timeout = Duration::from_secs(self.config.discovery.search_timeout_secs);
        self.discovery.start_search(timeout)
    }

    pub fn stop_search(&self) {
        self.discovery.stop_search();
    }

    /// Active devices.
    pub fn devices(&self) -> Vec<Device> {
        self.registry.list()
    }

    /// All retained devices, lost and errored included.
    pub fn all_devices(&self) -> Vec<Device> {
        self.registry.list_all()
    }

    pub fn device(&self, id: &DeviceId) -> Option<Device> {
        self.registry.get(id)
    }

    pub fn forget_device(&self, id: &DeviceId) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        self.registry.remove(id)
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    /// Open the control session for a device.
    pub fn connect(&self, id: &DeviceId) -> Result<Arc<ControlSession>, ControlError> {
        let session = Arc::new(ControlSession::open(
            id.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.transport),
            Arc::clone(&self.kv),
            Arc::clone(&self.breakers),
            &self.config.control,
        )?);

        let device = self.registry.get(id);
        let pin = device
            .as_ref()
            .and_then(|d| self.description_cache.pin(&d.description_url));

        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).insert(
            id.clone(),
            SessionSlot {
                session: Arc::clone(&session),
                _description_pin: pin,
                last_ok: Instant::now(),
                last_state: None,
                last_volume: None,
                ticks: 0,
            },
        );

        self.bus.broadcast(EngineEvent::DeviceConnected { id: id.clone() });
        Ok(session)
    }

    /// Close the control session for a device, if any.
    pub fn disconnect(&self, id: &DeviceId) {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        if removed.is_some() {
            self.bus
                .broadcast(EngineEvent::DeviceDisconnected { id: id.clone() });
        }
    }

    pub fn session(&self, id: &DeviceId) -> Option<Arc<ControlSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|slot| Arc::clone(&slot.session))
    }

    /// The host file source, shared with the media server.
    pub fn file_source(&self) -> Arc<dyn FileSource> {
        Arc::clone(&self.file_source)
    }
}

impl Drop for CastEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sweep_loop(
    registry: Arc<DeviceRegistry>,
    cache: SharedLruCache<String, String>,
    running: Arc<AtomicBool>,
    interval: Duration,
) {
    // Grace on top of max-age so one dropped announcement does not expire a
    // healthy device.
    let grace = Duration::from_secs(5);
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(interval);
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let expired = registry.expire_stale(grace);
        if !expired.is_empty() {
            debug!(count = expired.len(), "devices expired by sweep");
        }
        cache.expire_older_than(Duration::from_secs(1800));
    }
}

/// Session poll loop: transport state every tick, position while playing,
/// volume and mute every third tick. Poll silence past the lost timeout
/// moves the device to lost and drops the session.
fn poll_loop(
    sessions: Arc<Mutex<HashMap<DeviceId, SessionSlot>>>,
    registry: Arc<DeviceRegistry>,
    bus: EngineEventBus,
    running: Arc<AtomicBool>,
    interval: Duration,
    lost_timeout: Duration,
) {
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(interval);
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let ids: Vec<DeviceId> = sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();

        for id in ids {
            let (session, ticks) = {
                let mut map = sessions.lock().unwrap_or_else(|e| e.into_inner());
                let Some(slot) = map.get_mut(&id) else { continue };
                slot.ticks += 1;
                (Arc::clone(&slot.session), slot.ticks)
            };

            match session.get_transport_info() {
                Ok(info) => {
                    let mut map = sessions.lock().unwrap_or_else(|e| e.into_inner());
                    let Some(slot) = map.get_mut(&id) else { continue };
                    slot.last_ok = Instant::now();
                    if slot.last_state != Some(info.state) {
                        slot.last_state = Some(info.state);
                        bus.broadcast(EngineEvent::PlaybackStateChanged {
                            id: id.clone(),
                            state: info.state,
                        });
                    }
                    drop(map);

                    if info.state == PlaybackState::Playing {
                        if let Ok(position) = session.get_position_realtime() {
                            bus.broadcast(EngineEvent::PositionChanged {
                                id: id.clone(),
                                info: position,
                            });
                        }
                    }

                    if ticks % 3 == 0 {
                        poll_volume(&sessions, &bus, &id, &session);
                    }
                }
                Err(err) => {
                    let lost = {
                        let map = sessions.lock().unwrap_or_else(|e| e.into_inner());
                        map.get(&id)
                            .map(|slot| slot.last_ok.elapsed() > lost_timeout)
                            .unwrap_or(false)
                    };
                    debug!(renderer = id.as_str(), error = %err, lost, "poll failed");

                    if lost {
                        warn!(renderer = id.as_str(), "device lost after poll silence");
                        registry.apply_lifecycle(&id, LifecycleEvent::Expired);
                        sessions
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .remove(&id);
                        bus.broadcast(EngineEvent::DeviceDisconnected { id: id.clone() });
                    } else if !err.is_transient() {
                        bus.broadcast(EngineEvent::Error {
                            id: Some(id.clone()),
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
    }
}

fn poll_volume(
    sessions: &Arc<Mutex<HashMap<DeviceId, SessionSlot>>>,
    bus: &EngineEventBus,
    id: &DeviceId,
    session: &ControlSession,
) {
    let volume = session.get_volume_realtime();
    let muted = session.get_mute();
    if let (Ok(volume), Ok(muted)) = (volume, muted) {
        let mut map = sessions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = map.get_mut(id) else { return };
        if slot.last_volume != Some((volume, muted)) {
            slot.last_volume = Some((volume, muted));
            bus.broadcast(EngineEvent::VolumeChanged {
                id: id.clone(),
                volume,
                muted,
            });
        }
    }
}
