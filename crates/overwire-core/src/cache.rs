//! Single-flight response cache.
//!
//! Keyed by the request target. A key holds either a finished response
//! snapshot or the shared completion of a request already in flight, never
//! both. Concurrent identical reads therefore produce one wire transmission
//! and fan out one resolution; a failed request evicts its key so a later
//! call retries.

use std::collections::HashMap;

use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::{CallError, ResponseEnvelope};

/// The shared completion of one logical request. Cloneable so any number of
/// concurrent callers can await a single network round trip.
pub type SharedCall = Shared<BoxFuture<'static, Result<ResponseEnvelope, CallError>>>;

/// What the cache holds for a key.
#[derive(Clone)]
pub enum CacheSlot {
    /// A finished response snapshot. Reads return an independent copy.
    Finished(ResponseEnvelope),
    /// The completion of a request currently in flight for this key.
    InFlight(SharedCall),
}

/// Response cache with single-flight semantics.
///
/// Safe for concurrent access, so an `Arc<ResponseCache>` may be shared
/// across multiple correlators; otherwise each correlator owns a private
/// default instance.
#[derive(Default)]
pub struct ResponseCache {
    slots: Mutex<HashMap<String, CacheSlot>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current slot for `key`, if any. Snapshots come back as independent
    /// deep copies, never aliases into the cache.
    pub fn get(&self, key: &str) -> Option<CacheSlot> {
        self.slots.lock().get(key).cloned()
    }

    /// Store a finished snapshot, replacing any in-flight handle.
    pub fn put(&self, key: &str, envelope: ResponseEnvelope) {
        self.slots
            .lock()
            .insert(key.to_string(), CacheSlot::Finished(envelope));
    }

    pub fn evict(&self, key: &str) {
        self.slots.lock().remove(key);
    }

    /// Atomically return the existing slot for `key`, or insert the
    /// in-flight completion produced by `start` and return that. This is
    /// the single-flight gate: under one lock acquisition, at most one
    /// caller ever starts a transmission for a key.
    pub fn get_or_start<F>(&self, key: &str, start: F) -> CacheSlot
    where
        F: FnOnce() -> SharedCall,
    {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(key) {
            return slot.clone();
        }
        let slot = CacheSlot::InFlight(start());
        slots.insert(key.to_string(), slot.clone());
        slot
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RequestId, RequestSpec};
    use futures::FutureExt;
    use serde_json::json;
    use std::collections::HashMap;

    fn envelope(payload: serde_json::Value) -> ResponseEnvelope {
        ResponseEnvelope {
            id: RequestId::generate(),
            payload,
            status: 200,
            headers: HashMap::new(),
            request: RequestSpec::get("/x"),
        }
    }

    #[test]
    fn snapshots_are_independent_copies() {
        let cache = ResponseCache::new();
        cache.put("/x", envelope(json!({"n": 1})));

        let Some(CacheSlot::Finished(mut copy)) = cache.get("/x") else {
            panic!("expected finished snapshot");
        };
        copy.payload["n"] = json!(2);

        let Some(CacheSlot::Finished(fresh)) = cache.get("/x") else {
            panic!("expected finished snapshot");
        };
        assert_eq!(fresh.payload["n"], json!(1));
    }

    #[test]
    fn put_replaces_in_flight_handle() {
        let cache = ResponseCache::new();
        let call: SharedCall = async { Ok(envelope(json!(1))) }.boxed().shared();
        cache.get_or_start("/x", || call);
        assert!(matches!(cache.get("/x"), Some(CacheSlot::InFlight(_))));

        cache.put("/x", envelope(json!(2)));
        assert!(matches!(cache.get("/x"), Some(CacheSlot::Finished(_))));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_or_start_runs_the_closure_at_most_once() {
        let cache = ResponseCache::new();
        let first: SharedCall = async { Ok(envelope(json!(1))) }.boxed().shared();
        cache.get_or_start("/x", || first);
        cache.get_or_start("/x", || panic!("second caller must reuse the in-flight handle"));
    }

    #[test]
    fn evict_removes_the_key() {
        let cache = ResponseCache::new();
        cache.put("/x", envelope(json!(1)));
        cache.evict("/x");
        assert!(cache.get("/x").is_none());
        assert!(cache.is_empty());
    }
}
