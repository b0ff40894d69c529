use {
    crate::domain::{AuctionId, AuctionSnapshot},
    std::{
        collections::HashMap,
        sync::{Mutex, MutexGuard},
        time::Duration,
    },
};

/// Read-through cache of auction snapshots for one identity.
///
/// The ledger stays the source of truth. An entry is fresh for `ttl` after it
/// was fetched unless it got invalidated because the outcome of a write
/// became unknown.
#[derive(Debug)]
pub struct SnapshotCache {
    ttl: Duration,
    entries: Mutex<HashMap<AuctionId, Entry>>,
}

#[derive(Debug)]
struct Entry {
    snapshot: AuctionSnapshot,
    invalidated: bool,
}

/// A snapshot from the cache together with whether it may be used as is.
#[derive(Clone, Debug)]
pub struct Cached {
    pub snapshot: AuctionSnapshot,
    pub fresh: bool,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Default::default(),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<AuctionId, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, id: AuctionId) -> Option<Cached> {
        self.entries().get(&id).map(|entry| Cached {
            fresh: !entry.invalidated && entry.snapshot.is_fresh(self.ttl),
            snapshot: entry.snapshot.clone(),
        })
    }

    /// Stores a freshly fetched snapshot, keeping the facts of the previous
    /// one that can't revert. Returns what was stored.
    pub fn insert(&self, snapshot: AuctionSnapshot) -> AuctionSnapshot {
        let mut entries = self.entries();
        let snapshot = match entries.get(&snapshot.auction.id) {
            Some(previous) => snapshot.reconcile(&previous.snapshot),
            None => snapshot,
        };
        entries.insert(
            snapshot.auction.id,
            Entry {
                snapshot: snapshot.clone(),
                invalidated: false,
            },
        );
        snapshot
    }

    /// Records a fact learned from a confirmed write on the cached snapshot.
    pub fn update(&self, id: AuctionId, apply: impl FnOnce(&mut AuctionSnapshot)) {
        if let Some(entry) = self.entries().get_mut(&id) {
            apply(&mut entry.snapshot);
        }
    }

    /// Forces the next decision about the auction to reload it. Settled facts
    /// of the entry stay around for reconciliation.
    pub fn invalidate(&self, id: AuctionId) {
        if let Some(entry) = self.entries().get_mut(&id) {
            entry.invalidated = true;
        }
    }
}
