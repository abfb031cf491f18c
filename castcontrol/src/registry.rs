//! Device registry.
//!
//! Owns every device the engine knows about, keyed by [`DeviceId`].
//! Mutations funnel through the lifecycle state machine, and listener
//! notifications go through a coalescing worker so a burst of SSDP traffic
//! becomes at most one list notification per window.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::events::EngineEventBus;
use crate::model::{Device, DeviceId, DeviceLifecycleState, EngineEvent};
use crate::state::{LifecycleEvent, transition};

struct RegistryInner {
    devices: HashMap<DeviceId, Device>,
    /// Devices with an open control session; at most one session per device,
    /// and sessions exempt their device from cap eviction.
    sessions: HashSet<DeviceId>,
    /// Devices touched since the last notification flush.
    pending_updates: HashSet<DeviceId>,
}

enum NotifyMsg {
    Dirty,
    Shutdown,
}

pub struct DeviceRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    bus: EngineEventBus,
    max_devices: usize,
    notify_tx: Sender<NotifyMsg>,
    notifier: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceRegistry {
    pub fn new(config: &RegistryConfig, bus: EngineEventBus) -> Arc<Self> {
        let inner = Arc::new(Mutex::new(RegistryInner {
            devices: HashMap::new(),
            sessions: HashSet::new(),
            pending_updates: HashSet::new(),
        }));

        let (notify_tx, notify_rx) = unbounded();
        let window = Duration::from_millis(config.notify_window_ms);

        let worker_inner = Arc::clone(&inner);
        let worker_bus = bus.clone();
        let notifier = std::thread::Builder::new()
            .name("registry-notify".to_string())
            .spawn(move || notifier_loop(notify_rx, worker_inner, worker_bus, window))
            .ok();

        if notifier.is_none() {
            warn!("could not spawn registry notifier thread, notifications disabled");
        }

        Arc::new(Self {
            inner,
            bus,
            max_devices: config.max_devices.max(1),
            notify_tx,
            notifier: Mutex::new(notifier),
        })
    }

    /// Insert or refresh a device. Returns true when the device was new.
    pub fn add_or_update(&self, device: Device) -> bool {
        let id = device.id.clone();
        let is_new = {
            let mut inner = self.lock();
            let is_new = match inner.devices.get_mut(&id) {
                Some(existing) => {
                    existing.friendly_name = device.friendly_name;
                    existing.manufacturer = device.manufacturer;
                    existing.model_name = device.model_name;
                    existing.services = device.services;
                    existing.profile = device.profile;
                    existing.last_seen = device.last_seen;
                    existing.max_age = device.max_age;
                    // A lost or errored device seen again re-enters the
                    // lifecycle through rediscovery.
                    if matches!(
                        existing.lifecycle,
                        DeviceLifecycleState::Lost | DeviceLifecycleState::Error
                    ) {
                        if let Ok(next) = transition(existing.lifecycle, LifecycleEvent::Advertised)
                        {
                            existing.lifecycle = next;
                        }
                    }
                    false
                }
                None => {
                    info!(
                        renderer = id.as_str(),
                        name = %device.friendly_name,
                        "new device registered"
                    );
                    inner.devices.insert(id.clone(), device);
                    true
                }
            };

            inner.pending_updates.insert(id.clone());
            self.enforce_cap(&mut inner);
            is_new
        };

        self.mark_dirty();
        is_new
    }

    pub fn get(&self, id: &DeviceId) -> Option<Device> {
        self.lock().devices.get(id).cloned()
    }

    /// Active devices only: lost, errored and removed devices are excluded.
    pub fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .lock()
            .devices
            .values()
            .filter(|d| d.lifecycle.is_active())
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Every retained device, whatever its state.
    pub fn list_all(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.lock().devices.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Forget a device entirely. `Removed` is terminal, so the entry is
    /// dropped rather than retained.
    pub fn remove(&self, id: &DeviceId) -> bool {
        let removed = {
            let mut inner = self.lock();
            inner.sessions.remove(id);
            inner.pending_updates.insert(id.clone());
            inner.devices.remove(id).is_some()
        };
        if removed {
            self.mark_dirty();
        }
        removed
    }

    /// Apply a lifecycle event through the state machine. Illegal
    /// transitions leave the device untouched and return the current state.
    pub fn apply_lifecycle(
        &self,
        id: &DeviceId,
        event: LifecycleEvent,
    ) -> Option<DeviceLifecycleState> {
        let result = {
            let mut inner = self.lock();
            let device = inner.devices.get_mut(id)?;
            match transition(device.lifecycle, event) {
                Ok(next) => {
                    let changed = next != device.lifecycle;
                    device.lifecycle = next;
                    if changed {
                        inner.pending_updates.insert(id.clone());
                    }
                    Some((next, changed))
                }
                Err(illegal) => {
                    debug!(renderer = id.as_str(), %illegal, "lifecycle event ignored");
                    Some((device.lifecycle, false))
                }
            }
        };

        let (state, changed) = result?;
        if changed {
            self.mark_dirty();
        }
        Some(state)
    }

    /// Refresh last-seen on SSDP traffic for an already known device.
    pub fn touch(&self, id: &DeviceId, max_age: Duration) {
        let mut inner = self.lock();
        if let Some(device) = inner.devices.get_mut(id) {
            device.last_seen = Instant::now();
            device.max_age = max_age;
        }
    }

    /// Handle an ssdp:byebye: the device said goodbye, mark it lost.
    pub fn mark_lost_by_usn(&self, usn: &str) {
        let id = {
            let inner = self.lock();
            inner
                .devices
                .values()
                .find(|d| !d.udn.is_empty() && usn.starts_with(&d.udn))
                .map(|d| d.id.clone())
        };
        if let Some(id) = id {
            info!(renderer = id.as_str(), "device announced byebye");
            self.apply_lifecycle(&id, LifecycleEvent::ByeBye);
        }
    }

    /// Move devices past their advertisement validity (plus `grace`) to
    /// lost. Returns the ids that expired.
    pub fn expire_stale(&self, grace: Duration) -> Vec<DeviceId> {
        let now = Instant::now();
        let expired: Vec<DeviceId> = {
            let inner = self.lock();
            inner
                .devices
                .values()
                .filter(|d| d.lifecycle.is_active())
                .filter(|d| now.duration_since(d.last_seen) > d.max_age + grace)
                .map(|d| d.id.clone())
                .collect()
        };

        for id in &expired {
            debug!(renderer = id.as_str(), "advertisement expired");
            self.apply_lifecycle(id, LifecycleEvent::Expired);
        }
        expired
    }

    /// Claim the single control session for a device. False when another
    /// session already holds it.
    pub fn claim_session(&self, id: &DeviceId) -> bool {
        let mut inner = self.lock();
        if !inner.devices.contains_key(id) {
            return false;
        }
        inner.sessions.insert(id.clone())
    }

    pub fn release_session(&self, id: &DeviceId) {
        self.lock().sessions.remove(id);
    }

    pub fn has_session(&self, id: &DeviceId) -> bool {
        self.lock().sessions.contains(id)
    }

    /// Stop the notification worker. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.notify_tx.send(NotifyMsg::Shutdown);
        if let Some(handle) = self.notifier.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mark_dirty(&self) {
        let _ = self.notify_tx.send(NotifyMsg::Dirty);
    }

    fn enforce_cap(&self, inner: &mut RegistryInner) {
        while inner.devices.len() > self.max_devices {
            // Least-recently-updated first; devices with open sessions are
            // exempt.
            let victim = inner
                .devices
                .values()
                .filter(|d| !inner.sessions.contains(&d.id))
                .min_by_key(|d| d.last_seen)
                .map(|d| d.id.clone());

            let Some(id) = victim else {
                warn!(
                    len = inner.devices.len(),
                    cap = self.max_devices,
                    "registry over cap but every device has a session"
                );
                return;
            };

            debug!(renderer = id.as_str(), "evicting least-recently-updated device");
            inner.devices.remove(&id);
            inner.pending_updates.insert(id);
        }
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Coalescing notification loop.
///
/// On the first dirty signal the worker sleeps out the window, drains any
/// further signals, then compares the active key set against the last
/// notified one. An add and remove of the same device inside one window
/// cancel out to zero list notifications.
fn notifier_loop(
    rx: Receiver<NotifyMsg>,
    inner: Arc<Mutex<RegistryInner>>,
    bus: EngineEventBus,
    window: Duration,
) {
    let mut last_notified: Vec<DeviceId> = Vec::new();

    loop {
        match rx.recv() {
            Ok(NotifyMsg::Dirty) => {}
            Ok(NotifyMsg::Shutdown) | Err(_) => break,
        }

        std::thread::sleep(window);

        let mut shutdown = false;
        while let Ok(msg) = rx.try_recv() {
            if matches!(msg, NotifyMsg::Shutdown) {
                shutdown = true;
            }
        }

        let (active_ids, updated) = {
            let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
            let mut ids: Vec<DeviceId> = inner
                .devices
                .values()
                .filter(|d| d.lifecycle.is_active())
                .map(|d| d.id.clone())
                .collect();
            ids.sort();
            let updated: Vec<DeviceId> = inner.pending_updates.drain().collect();
            (ids, updated)
        };

        if active_ids != last_notified {
            bus.broadcast(EngineEvent::DeviceListChanged {
                ids: active_ids.clone(),
            });
            last_notified = active_ids;
        }

        // One DeviceUpdated per device per window, only for devices that
        // still exist.
        for id in updated {
            if inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .devices
                .contains_key(&id)
            {
                bus.broadcast(EngineEvent::DeviceUpdated { id });
            }
        }

        if shutdown {
            break;
        }
    }
}
