//! Per-project revision storage.
//!
//! A [`ProjectCache`] holds resolved entries and the in-flight fetch handles
//! that guard against duplicate upstream calls. Both maps live behind one
//! lock so a clear is atomic with respect to every lookup and check-and-set.
//! A clear only drops entries; at most one fetch per key is ever outstanding.

use std::collections::HashMap;
use std::sync::RwLock;

use futures::future::{BoxFuture, Shared};
use time::OffsetDateTime;

use super::keys::{CacheKey, RevisionData};
use super::lock::{rw_read, rw_write};
use super::resolver::FetchError;

const SOURCE: &str = "bootstrap::store";

/// Clear-generation counter; a fetch may only store into the generation it started in.
pub type Generation = u64;

/// Future shared by every caller waiting on the same fetch.
pub type SharedFetch = Shared<BoxFuture<'static, Result<RevisionData, FetchError>>>;

/// A resolved revision held in the cache.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: RevisionData,
    pub fetched_at: OffsetDateTime,
}

/// A pending fetch registered for one key.
struct Flight {
    id: u64,
    future: SharedFetch,
}

/// Outcome of [`ProjectCache::lookup_or_register`].
pub enum Lookup {
    /// Entry already cached.
    Hit(RevisionData),
    /// Another caller's fetch is in flight; await it.
    Joined(SharedFetch),
    /// The caller registered a new flight and must drive it.
    Started(SharedFetch),
}

#[derive(Default)]
struct Slots {
    generation: Generation,
    next_flight_id: u64,
    entries: HashMap<CacheKey, CacheEntry>,
    inflight: HashMap<CacheKey, Flight>,
}

/// In-memory revision cache for a single project.
#[derive(Default)]
pub struct ProjectCache {
    slots: RwLock<Slots>,
}

impl ProjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Option<RevisionData> {
        rw_read(&self.slots, SOURCE, "get")
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
    }

    /// Snapshot of a cached entry, including its fetch time.
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        rw_read(&self.slots, SOURCE, "entry").entries.get(key).cloned()
    }

    /// Current clear generation.
    pub fn generation(&self) -> Generation {
        rw_read(&self.slots, SOURCE, "generation").generation
    }

    /// Check the cache, join an in-flight fetch, or register a new one.
    ///
    /// `start` is only invoked when no entry and no flight exist for `key`; it
    /// receives the flight id and generation the new fetch must report back
    /// with in [`ProjectCache::complete`].
    pub fn lookup_or_register<F>(&self, key: &CacheKey, start: F) -> Lookup
    where
        F: FnOnce(u64, Generation) -> SharedFetch,
    {
        if let Some(value) = self.get(key) {
            return Lookup::Hit(value);
        }

        let mut slots = rw_write(&self.slots, SOURCE, "lookup_or_register");
        // Re-check under the write lock; a fetch may have landed meanwhile.
        if let Some(entry) = slots.entries.get(key) {
            return Lookup::Hit(entry.value.clone());
        }
        if let Some(flight) = slots.inflight.get(key) {
            return Lookup::Joined(flight.future.clone());
        }

        let id = slots.next_flight_id;
        slots.next_flight_id += 1;
        let generation = slots.generation;
        let future = start(id, generation);
        slots.inflight.insert(
            key.clone(),
            Flight {
                id,
                future: future.clone(),
            },
        );
        Lookup::Started(future)
    }

    /// Record the outcome of flight `flight_id` and release its guard.
    ///
    /// Successful values are stored only if no clear happened since the flight
    /// started. Returns true when the value was stored.
    pub fn complete(
        &self,
        key: &CacheKey,
        flight_id: u64,
        generation: Generation,
        outcome: &Result<RevisionData, FetchError>,
    ) -> bool {
        let mut slots = rw_write(&self.slots, SOURCE, "complete");

        if slots
            .inflight
            .get(key)
            .is_some_and(|flight| flight.id == flight_id)
        {
            slots.inflight.remove(key);
        }

        match outcome {
            Ok(value) if slots.generation == generation => {
                slots.entries.insert(
                    key.clone(),
                    CacheEntry {
                        key: key.clone(),
                        value: value.clone(),
                        fetched_at: OffsetDateTime::now_utc(),
                    },
                );
                true
            }
            _ => false,
        }
    }

    /// Drop every entry, returning how many were removed.
    ///
    /// In-flight guards survive the clear so later callers and redelivered
    /// prewarms join the running fetch instead of starting another. That fetch
    /// still answers its callers but will not write into the cleared cache.
    pub fn clear(&self) -> usize {
        let mut slots = rw_write(&self.slots, SOURCE, "clear");
        slots.generation += 1;
        let removed = slots.entries.len();
        slots.entries.clear();
        removed
    }

    /// Cached keys, in no particular order.
    pub fn keys(&self) -> Vec<CacheKey> {
        rw_read(&self.slots, SOURCE, "keys")
            .entries
            .keys()
            .cloned()
            .collect()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        rw_read(&self.slots, SOURCE, "is_in_flight")
            .inflight
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.slots, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
