use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::ir::{BandStatus, CacheKey};

const EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEvent {
    pub key: CacheKey,
    pub status: BandStatus,
}

/// Transient verification state per band. Unknown keys are idle.
pub struct StatusBoard {
    states: Mutex<HashMap<CacheKey, BandStatus>>,
    events: broadcast::Sender<StatusEvent>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            states: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn get(&self, key: &CacheKey) -> BandStatus {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(key).copied().unwrap_or_default()
    }

    pub fn set(&self, key: &CacheKey, status: BandStatus) {
        {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            if states.get(key) == Some(&status) {
                return;
            }
            states.insert(key.clone(), status);
        }
        tracing::debug!(key = %key, status = status.as_str(), "band status");
        let _ = self.events.send(StatusEvent {
            key: key.clone(),
            status,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }
}
