//! Types describing auctions and bids as seen by the client. The ledger owns
//! all of this state, everything in here is a read-only copy of it.

pub mod auction;
pub mod bid;

pub use {
    auction::{
        Auction,
        AuctionId,
        AuctionResult,
        AuctionSnapshot,
        AuctionState,
        AuctionSummary,
        NewAuction,
        Timestamp,
    },
    bid::{EncryptedBid, MAX_QUANTIZED_BID, quantize},
};

/// Current wall clock time as a unix timestamp in seconds.
pub fn now() -> Timestamp {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
