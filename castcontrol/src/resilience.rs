//! Resilience primitives: retry with backoff, request coalescing, and
//! per-device circuit breaking.
//!
//! Consumer renderers drop packets, sleep their radios, and reboot without
//! notice. These wrappers keep that flakiness from reaching callers, while
//! making sure deliberate device answers (SOAP faults, parse failures) pass
//! through untouched on the first attempt.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::errors::ControlError;
use crate::model::DeviceId;

/// Exponential backoff with jitter, transient errors only.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// No retries: one attempt, transient or not.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Run `op`, retrying transient failures up to `max_attempts` total
    /// tries. Final and non-transient errors return immediately.
    pub fn run<T>(
        &self,
        label: &str,
        mut op: impl FnMut() -> Result<T, ControlError>,
    ) -> Result<T, ControlError> {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.base_delay;

        for attempt in 1..=attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    let jittered = jitter(delay);
                    debug!(
                        label,
                        attempt,
                        delay_ms = jittered.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    std::thread::sleep(jittered);
                    delay = (delay * 2).min(self.max_delay);
                }
                Err(err) => return Err(err),
            }
        }
        unreachable!("loop returns on the last attempt")
    }
}

/// Uniform jitter in [delay/2, delay*3/2].
fn jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis().max(1) as u64;
    let jittered = rand::rng().random_range(millis / 2..=millis + millis / 2);
    Duration::from_millis(jittered)
}

enum FlightSlot<T> {
    InFlight,
    Done(Result<T, ControlError>),
}

/// Coalesces concurrent identical requests: the first caller for a key does
/// the work, late joiners block and share the result.
pub struct SingleFlight<T: Clone> {
    slots: Mutex<HashMap<String, Arc<(Mutex<FlightSlot<T>>, Condvar)>>>,
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn execute(
        &self,
        key: &str,
        op: impl FnOnce() -> Result<T, ControlError>,
    ) -> Result<T, ControlError> {
        let (slot, leader) = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            match slots.get(key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let slot = Arc::new((Mutex::new(FlightSlot::InFlight), Condvar::new()));
                    slots.insert(key.to_string(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if leader {
            let result = op();
            {
                let (lock, cvar) = &*slot;
                let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
                *state = FlightSlot::Done(result.clone());
                cvar.notify_all();
            }
            self.slots
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(key);
            result
        } else {
            let (lock, cvar) = &*slot;
            let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
            loop {
                match &*state {
                    FlightSlot::Done(result) => return result.clone(),
                    FlightSlot::InFlight => {
                        state = cvar.wait(state).unwrap_or_else(|e| e.into_inner());
                    }
                }
            }
        }
    }
}

/// Per-device circuit breaker. Opens after `threshold` consecutive failures;
/// stays open until a discovery refresh confirms the device again.
pub struct CircuitBreakers {
    threshold: u32,
    failures: Mutex<HashMap<DeviceId, u32>>,
}

impl CircuitBreakers {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Err when the device's circuit is open.
    pub fn check(&self, id: &DeviceId) -> Result<(), ControlError> {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        match failures.get(id) {
            Some(&count) if count >= self.threshold => Err(ControlError::Device(format!(
                "circuit open for {id} after {count} consecutive failures"
            ))),
            _ => Ok(()),
        }
    }

    pub fn is_open(&self, id: &DeviceId) -> bool {
        self.check(id).is_err()
    }

    pub fn record_success(&self, id: &DeviceId) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    pub fn record_failure(&self, id: &DeviceId) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(id.clone()).or_insert(0);
        *count += 1;
        if *count == self.threshold {
            warn!(renderer = id.as_str(), failures = *count, "circuit opened");
        }
    }

    /// Called when discovery sees the device again.
    pub fn reset(&self, id: &DeviceId) {
        self.record_success(id);
    }
}
