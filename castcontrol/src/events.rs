//! Event fan-out.
//!
//! Subscribers get their own unbounded channel; a broadcast walks the list
//! and drops subscribers whose receiving end is gone. Dispatch happens from
//! the notification worker, never from the SSDP or poll threads, so a slow
//! listener cannot stall the network path.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::model::EngineEvent;

#[derive(Clone, Default)]
pub struct EngineEventBus {
    subscribers: Arc<Mutex<Vec<Sender<EngineEvent>>>>,
}

impl EngineEventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = unbounded::<EngineEvent>();
        {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subscribers.push(tx);
        }
        rx
    }

    pub(crate) fn broadcast(&self, event: EngineEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
