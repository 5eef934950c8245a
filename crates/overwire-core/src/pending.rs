//! The pending-request table.
//!
//! Maps request identifiers to in-flight state. Mutated from two logical
//! actors: the correlator (insert on send, take on resolve) and the sweeper
//! (take on expiry). Removal is ownership transfer: whichever actor takes
//! the entry first resolves it, the other observes absence and no-ops, so
//! no entry is ever resolved twice.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{RequestId, RequestSpec, ResponseEnvelope};

/// In-flight state for one dispatched request.
#[derive(Debug)]
pub struct PendingEntry {
    /// Fulfilled exactly once, by a matching inbound response or a sweep.
    pub completion: oneshot::Sender<ResponseEnvelope>,
    /// The original request description, echoed back on resolution.
    pub request: RequestSpec,
    /// Absolute deadline; `None` means this request never times out.
    pub deadline: Option<Instant>,
}

/// Identifier -> pending entry, owned exclusively by the correlator.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<RequestId, PendingEntry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: RequestId, entry: PendingEntry) {
        self.entries.lock().insert(id, entry);
    }

    /// Remove and return the entry for `id`. The first taker wins; a second
    /// take for the same identifier returns `None`.
    pub fn take(&self, id: &RequestId) -> Option<PendingEntry> {
        self.entries.lock().remove(id)
    }

    /// Identifiers whose deadline is set and has passed at `now`.
    pub fn expired(&self, now: Instant) -> Vec<RequestId> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, entry)| matches!(entry.deadline, Some(deadline) if deadline <= now))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove every entry, dropping the completions. Waiting callers
    /// observe the connection as lost.
    pub fn drain(&self) -> Vec<(RequestId, PendingEntry)> {
        self.entries.lock().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(deadline: Option<Instant>) -> (PendingEntry, oneshot::Receiver<ResponseEnvelope>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingEntry {
                completion: tx,
                request: RequestSpec::get("/x"),
                deadline,
            },
            rx,
        )
    }

    #[test]
    fn take_transfers_ownership_once() {
        let table = PendingTable::new();
        let id = RequestId::generate();
        let (pending, _rx) = entry(None);
        table.insert(id.clone(), pending);

        assert!(table.take(&id).is_some());
        assert!(table.take(&id).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn expired_selects_only_passed_deadlines() {
        let table = PendingTable::new();
        let now = Instant::now();

        let past = RequestId::generate();
        let future = RequestId::generate();
        let never = RequestId::generate();

        let (e, _rx1) = entry(Some(now - Duration::from_millis(1)));
        table.insert(past.clone(), e);
        let (e, _rx2) = entry(Some(now + Duration::from_secs(60)));
        table.insert(future, e);
        let (e, _rx3) = entry(None);
        table.insert(never, e);

        let expired = table.expired(now);
        assert_eq!(expired, vec![past]);
    }

    #[test]
    fn drain_empties_the_table() {
        let table = PendingTable::new();
        for _ in 0..3 {
            let (e, _rx) = entry(None);
            table.insert(RequestId::generate(), e);
        }
        assert_eq!(table.drain().len(), 3);
        assert!(table.is_empty());
    }
}
