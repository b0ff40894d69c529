use {
    crate::domain::AuctionId,
    std::{
        collections::HashSet,
        sync::{Arc, Mutex},
    },
};

/// Auctions the connected identity currently submits a bid for.
#[derive(Debug, Default)]
pub struct InFlight {
    auctions: Mutex<HashSet<AuctionId>>,
}

impl InFlight {
    /// Marks the auction as in flight until the returned guard is dropped.
    /// `None` if it already is.
    pub fn try_acquire(self: &Arc<Self>, auction: AuctionId) -> Option<Guard> {
        let inserted = self
            .auctions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(auction);
        inserted.then(|| Guard {
            in_flight: Arc::clone(self),
            auction,
        })
    }
}

#[derive(Debug)]
pub struct Guard {
    in_flight: Arc<InFlight>,
    auction: AuctionId,
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.in_flight
            .auctions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.auction);
    }
}
