use {
    alloy::primitives::{Address, U256},
    std::{
        fmt::{self, Display, Formatter},
        time::{Duration, Instant},
    },
};

/// A unix timestamp denominated in seconds since epoch.
pub type Timestamp = u64;

/// Identifier the ledger assigns to an auction on creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AuctionId(pub u64);

impl Display for AuctionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AuctionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<AuctionId> for U256 {
    fn from(value: AuctionId) -> Self {
        U256::from(value.0)
    }
}

/// An auction record as stored on the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Auction {
    pub id: AuctionId,
    /// The null address means the ledger has no auction with this id.
    pub creator: Address,
    pub item_name: String,
    pub description: String,
    /// Denominated in the smallest monetary unit (wei).
    pub starting_price: U256,
    pub is_active: bool,
    pub results_revealed: bool,
    pub created_at: Timestamp,
    /// Exclusive: the auction accepts bids while `now < end_time`.
    pub end_time: Timestamp,
    pub bid_count: u64,
}

impl Auction {
    /// The ledger answers queries for unknown ids with a zeroed record.
    pub fn exists(&self) -> bool {
        !self.creator.is_zero()
    }

    pub fn has_ended(&self, now: Timestamp) -> bool {
        now >= self.end_time
    }

    /// Whether the auction belongs in the live auctions feed.
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.exists() && self.is_active && !self.results_revealed && !self.has_ended(now)
    }

    pub fn is_creator(&self, identity: Address) -> bool {
        self.creator == identity
    }

    /// Checks the record invariants the ledger is expected to uphold.
    pub fn validate(&self) -> Result<(), String> {
        if self.end_time <= self.created_at {
            return Err(format!(
                "end time {} is not after creation time {}",
                self.end_time, self.created_at
            ));
        }
        Ok(())
    }
}

/// The disclosed outcome of an auction. Only exists once the creator revealed
/// the results and never changes afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuctionResult {
    pub winner: Address,
    pub winning_bid: U256,
}

/// Parameters of an auction that is about to be created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAuction {
    pub item_name: String,
    pub description: String,
    pub starting_price: U256,
    pub duration: Duration,
}

/// Client-side lifecycle of an auction. Derived from the latest snapshot, the
/// ledger stays authoritative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuctionState {
    /// Never loaded.
    Unknown,
    /// Accepting bids and the connected identity has not bid yet.
    Open,
    /// Accepting bids but the connected identity already bid.
    BidPlaced,
    /// No longer accepting bids, results not revealed yet.
    Expired,
    /// Terminal.
    Revealed,
}

impl AuctionState {
    pub fn derive(auction: &Auction, has_bid: bool, now: Timestamp) -> Self {
        if auction.results_revealed {
            Self::Revealed
        } else if auction.has_ended(now) || !auction.is_active {
            // An auction the creator closed early counts as expired.
            Self::Expired
        } else if has_bid {
            Self::BidPlaced
        } else {
            Self::Open
        }
    }

    pub fn accepts_bids(self) -> bool {
        matches!(self, Self::Open | Self::BidPlaced)
    }
}

impl Display for AuctionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Open => "open",
            Self::BidPlaced => "bid placed",
            Self::Expired => "expired",
            Self::Revealed => "revealed",
        };
        f.write_str(name)
    }
}

/// Cached copy of an auction for one identity together with the time it was
/// fetched.
#[derive(Clone, Debug)]
pub struct AuctionSnapshot {
    pub auction: Auction,
    /// Whether the connected identity has bid. Always `false` without an
    /// identity.
    pub has_bid: bool,
    pub result: Option<AuctionResult>,
    pub fetched_at: Instant,
}

impl AuctionSnapshot {
    pub fn state(&self, now: Timestamp) -> AuctionState {
        AuctionState::derive(&self.auction, self.has_bid, now)
    }

    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.fetched_at.elapsed() < max_age
    }

    /// Whether the snapshot contains a fact that can never be undone on the
    /// ledger (a bid by the identity or revealed results).
    pub fn has_settled_facts(&self) -> bool {
        self.has_bid || self.auction.results_revealed
    }

    /// Carries facts that can never revert over from an older snapshot. A
    /// lagging node may still serve state from before our own bid, before
    /// the reveal or before the auction was ended.
    pub fn reconcile(mut self, previous: &AuctionSnapshot) -> Self {
        if previous.has_bid && !self.has_bid {
            tracing::debug!(auction = %self.auction.id, "node lags behind recorded bid");
            self.has_bid = true;
        }
        if previous.auction.results_revealed && !self.auction.results_revealed {
            tracing::warn!(
                auction = %self.auction.id,
                "node reports unrevealed results after reveal"
            );
            self.auction.results_revealed = true;
            if self.result.is_none() {
                self.result = previous.result;
            }
        }
        if !previous.auction.is_active {
            self.auction.is_active = false;
        }
        self
    }
}

/// Compact view of an auction used by the live auctions feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuctionSummary {
    pub id: AuctionId,
    pub item_name: String,
    pub description: String,
    pub starting_price: U256,
    pub end_time: Timestamp,
    pub bid_count: u64,
}

impl From<Auction> for AuctionSummary {
    fn from(auction: Auction) -> Self {
        Self {
            id: auction.id,
            item_name: auction.item_name,
            description: auction.description,
            starting_price: auction.starting_price,
            end_time: auction.end_time,
            bid_count: auction.bid_count,
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Auction {
    /// An open auction created a minute ago that ends in an hour.
    pub fn test(id: u64, creator: Address, now: Timestamp) -> Self {
        Self {
            id: AuctionId(id),
            creator,
            item_name: format!("item {id}"),
            description: "test auction".to_string(),
            starting_price: U256::from(100),
            is_active: true,
            results_revealed: false,
            created_at: now - 60,
            end_time: now + 3600,
            bid_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Timestamp = 1_700_000_000;

    fn creator() -> Address {
        Address::repeat_byte(0xc0)
    }

    #[test]
    fn derives_open_and_bid_placed() {
        let auction = Auction::test(1, creator(), NOW);
        assert_eq!(AuctionState::derive(&auction, false, NOW), AuctionState::Open);
        assert_eq!(
            AuctionState::derive(&auction, true, NOW),
            AuctionState::BidPlaced
        );
    }

    #[test]
    fn end_time_is_exclusive() {
        let auction = Auction::test(1, creator(), NOW);
        let end = auction.end_time;
        assert_eq!(
            AuctionState::derive(&auction, false, end - 1),
            AuctionState::Open
        );
        assert_eq!(
            AuctionState::derive(&auction, false, end),
            AuctionState::Expired
        );
        assert_eq!(
            AuctionState::derive(&auction, true, end),
            AuctionState::Expired
        );
    }

    #[test]
    fn inactive_auction_is_expired() {
        let auction = Auction {
            is_active: false,
            ..Auction::test(1, creator(), NOW)
        };
        assert_eq!(
            AuctionState::derive(&auction, false, NOW),
            AuctionState::Expired
        );
    }

    #[test]
    fn revealed_wins_over_everything() {
        let auction = Auction {
            results_revealed: true,
            ..Auction::test(1, creator(), NOW)
        };
        assert_eq!(
            AuctionState::derive(&auction, true, NOW),
            AuctionState::Revealed
        );
        assert!(!AuctionState::Revealed.accepts_bids());
    }

    #[test]
    fn null_creator_does_not_exist() {
        let auction = Auction::test(1, Address::ZERO, NOW);
        assert!(!auction.exists());
        assert!(!auction.is_live(NOW));
    }

    #[test]
    fn rejects_end_before_creation() {
        let auction = Auction {
            end_time: NOW - 60,
            ..Auction::test(1, creator(), NOW)
        };
        assert!(auction.validate().is_err());
        assert!(Auction::test(1, creator(), NOW).validate().is_ok());
    }

    #[test]
    fn reconcile_keeps_settled_facts() {
        let auction = Auction::test(1, creator(), NOW);
        let previous = AuctionSnapshot {
            auction: Auction {
                results_revealed: true,
                is_active: false,
                ..auction.clone()
            },
            has_bid: true,
            result: Some(AuctionResult {
                winner: Address::repeat_byte(1),
                winning_bid: U256::from(150),
            }),
            fetched_at: Instant::now(),
        };
        let lagging = AuctionSnapshot {
            auction,
            has_bid: false,
            result: None,
            fetched_at: Instant::now(),
        };

        let reconciled = lagging.reconcile(&previous);
        assert!(reconciled.has_bid);
        assert!(reconciled.auction.results_revealed);
        assert!(!reconciled.auction.is_active);
        assert_eq!(reconciled.result, previous.result);
    }
}
