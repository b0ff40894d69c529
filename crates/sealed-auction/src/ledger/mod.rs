//! Access to the remote auction ledger.
//!
//! The [`LedgerGateway`] trait is the only way the rest of the crate talks to
//! the chain which keeps the protocol logic testable with mocks.

pub mod alloy;

use {
    crate::domain::{Auction, AuctionId, AuctionResult, EncryptedBid, NewAuction},
    ::alloy::primitives::{Address, TxHash, U256},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum Error {
    /// The node could not be reached or failed to answer. Worth retrying for
    /// reads.
    #[error("node error: {0}")]
    Node(String),
    /// The call reached the contract but failed (revert, undecodable
    /// response). Retrying won't change the outcome.
    #[error("contract error: {0}")]
    Contract(String),
    /// The transaction was mined but reverted.
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
    /// The transaction was issued but waiting for it to be final failed. It
    /// may still succeed.
    #[error("finality of transaction {tx_hash} unknown: {reason}")]
    Finality { tx_hash: TxHash, reason: String },
}

impl Error {
    /// Whether repeating the same read could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Node(_))
    }
}

/// A transaction that was accepted by the node but is not final yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingWrite {
    pub tx_hash: TxHash,
}

/// Events of the auction contract found in a confirmed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    AuctionCreated {
        auction_id: AuctionId,
        creator: Address,
        item_name: String,
        end_time: u64,
    },
    BidPlaced {
        auction_id: AuctionId,
        bidder: Address,
    },
    ResultsRevealed {
        auction_id: AuctionId,
        winner: Address,
        winning_bid: U256,
    },
}

/// A final, successful transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    /// Only events emitted by the auction contract.
    pub events: Vec<LedgerEvent>,
}

impl Confirmation {
    /// The id assigned by an `AuctionCreated` event, if the transaction emitted
    /// one.
    pub fn created_auction(&self) -> Option<AuctionId> {
        self.events.iter().find_map(|event| match event {
            LedgerEvent::AuctionCreated { auction_id, .. } => Some(*auction_id),
            _ => None,
        })
    }
}

/// Reads from and writes to the auction ledger.
///
/// Writes are two-phase: the `create_auction`, `place_bid`, `reveal_results`
/// and `end_auction` calls return as soon as the node accepted the
/// transaction and [`LedgerGateway::await_finality`] waits until it is final.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Address of the auction contract. Encrypted bids are bound to it.
    fn contract_address(&self) -> Address;

    /// Chain the gateway is connected to.
    async fn chain_id(&self) -> Result<u64, Error>;

    /// Returns a record with a null creator for ids the ledger doesn't know.
    async fn get_auction(&self, id: AuctionId) -> Result<Auction, Error>;

    /// Ids of the auctions created by `user`, in ledger order.
    async fn get_user_auctions(&self, user: Address) -> Result<Vec<AuctionId>, Error>;

    /// Ids of the auctions `user` bid on, in ledger order.
    async fn get_user_bids(&self, user: Address) -> Result<Vec<AuctionId>, Error>;

    /// Number of auctions ever created. Never decreases.
    async fn auction_counter(&self) -> Result<u64, Error>;

    async fn has_bid(&self, id: AuctionId, bidder: Address) -> Result<bool, Error>;

    /// The disclosed results or `None` if they were not revealed yet.
    async fn get_results(&self, id: AuctionId) -> Result<Option<AuctionResult>, Error>;

    async fn create_auction(&self, auction: NewAuction) -> Result<PendingWrite, Error>;

    async fn place_bid(&self, id: AuctionId, bid: EncryptedBid) -> Result<PendingWrite, Error>;

    async fn reveal_results(
        &self,
        id: AuctionId,
        winner: Address,
        winning_bid: U256,
    ) -> Result<PendingWrite, Error>;

    async fn end_auction(&self, id: AuctionId) -> Result<PendingWrite, Error>;

    /// Waits until the transaction is final. Fails with [`Error::Reverted`]
    /// if it was mined but failed and with [`Error::Finality`] if the outcome
    /// could not be determined.
    async fn await_finality(&self, pending: PendingWrite) -> Result<Confirmation, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_created_auction_among_events() {
        let confirmation = Confirmation {
            tx_hash: TxHash::repeat_byte(1),
            block_number: Some(10),
            events: vec![
                LedgerEvent::BidPlaced {
                    auction_id: AuctionId(3),
                    bidder: Address::repeat_byte(2),
                },
                LedgerEvent::AuctionCreated {
                    auction_id: AuctionId(4),
                    creator: Address::repeat_byte(2),
                    item_name: "lamp".to_string(),
                    end_time: 1_700_000_000,
                },
            ],
        };
        assert_eq!(confirmation.created_auction(), Some(AuctionId(4)));

        let without_event = Confirmation {
            events: vec![],
            ..confirmation
        };
        assert_eq!(without_event.created_auction(), None);
    }

    #[test]
    fn only_node_errors_are_transient() {
        assert!(Error::Node("timeout".into()).is_transient());
        assert!(!Error::Contract("revert".into()).is_transient());
        assert!(!Error::Reverted(TxHash::ZERO).is_transient());
    }
}
