use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;

use crate::ir::{CacheEntry, CacheKey, Risk};

const EVENT_CAPACITY: usize = 256;

/// Published after every committed write, once per key whose entry changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: CacheKey,
    pub entry: CacheEntry,
}

/// Text produced for one band, before no-change is decided.
#[derive(Clone, Debug)]
pub struct BandText {
    pub translation: String,
    pub reverse_translation: String,
    pub risk: Risk,
}

/// Neighbours of the band being written, as cache keys.
#[derive(Clone, Debug, Default)]
pub struct BandLinks {
    /// Less extreme neighbour the band is compared against.
    pub lower: Option<CacheKey>,
    /// More extreme bands whose flag follows this band's text.
    pub dependents: Vec<CacheKey>,
    pub is_base: bool,
}

#[derive(Clone, Debug)]
pub struct CacheWrite {
    pub entry: CacheEntry,
    /// Dependents whose no-change flag was cleared by this write.
    pub released: Vec<CacheKey>,
}

/// Process-lifetime store of band results. Never evicts.
///
/// A write replaces the entry and recomputes every affected no-change flag under
/// one lock, so readers never see a half-propagated state.
pub struct BandCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for BandCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BandCache {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
        map.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Stores `text` under `key` and propagates no-change to its neighbours.
    ///
    /// - The band is marked no-change when it equals `lower`, and then shows the
    ///   lower band's reverse translation.
    /// - Each cached dependent is re-flagged against the new text. A dependent
    ///   equal to a non-base band marks both.
    /// - A dependent never changes the flag of the band being written otherwise.
    pub fn write_band(&self, key: &CacheKey, text: BandText, links: &BandLinks) -> CacheWrite {
        let mut changed = Vec::new();
        let mut released = Vec::new();

        let entry = {
            let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());

            let mut entry = CacheEntry {
                translation: text.translation,
                reverse_translation: text.reverse_translation,
                no_change: false,
                risk: text.risk,
            };

            if let Some(lower) = links.lower.as_ref().and_then(|k| map.get(k)) {
                if lower.translation == entry.translation {
                    entry.no_change = true;
                    entry.reverse_translation = lower.reverse_translation.clone();
                }
            }

            for dep_key in &links.dependents {
                let Some(dep) = map.get_mut(dep_key) else {
                    continue;
                };
                let equal = dep.translation == entry.translation;
                if equal {
                    if !links.is_base {
                        entry.no_change = true;
                    }
                    if !dep.no_change || dep.reverse_translation != entry.reverse_translation {
                        dep.no_change = true;
                        dep.reverse_translation = entry.reverse_translation.clone();
                        changed.push((dep_key.clone(), dep.clone()));
                    }
                } else if dep.no_change {
                    dep.no_change = false;
                    changed.push((dep_key.clone(), dep.clone()));
                    released.push(dep_key.clone());
                }
            }

            map.insert(key.clone(), entry.clone());
            entry
        };

        // Receivers may lag or be absent; the write itself is already committed.
        let _ = self.events.send(CacheEvent {
            key: key.clone(),
            entry: entry.clone(),
        });
        for (key, entry) in changed {
            let _ = self.events.send(CacheEvent { key, entry });
        }

        CacheWrite { entry, released }
    }
}
