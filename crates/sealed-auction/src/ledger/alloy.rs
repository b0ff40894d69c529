//! [`LedgerGateway`] backed by the `SecretAuction` contract on an EVM chain.

use {
    super::{Confirmation, Error, LedgerEvent, LedgerGateway, PendingWrite},
    crate::domain::{Auction, AuctionId, AuctionResult, EncryptedBid, NewAuction},
    alloy::{
        network::ReceiptResponse,
        primitives::{Address, U256},
        providers::{PendingTransactionBuilder, Provider},
        rpc::types::Log,
        sol_types::SolEventInterface,
    },
    contracts::alloy::SecretAuction::{self, SecretAuction::SecretAuctionEvents},
    ethrpc::{AlloyProvider, alloy::errors::ContractErrorExt},
    std::time::Duration,
};

/// How long to wait for written transactions.
#[derive(Clone, Copy, Debug)]
pub struct Finality {
    /// Number of blocks on top of the inclusion block.
    pub confirmations: u64,
    pub timeout: Duration,
}

impl Default for Finality {
    fn default() -> Self {
        Self {
            confirmations: 1,
            timeout: Duration::from_secs(300),
        }
    }
}

pub struct AlloyLedger {
    provider: AlloyProvider,
    contract: SecretAuction::Instance,
    finality: Finality,
}

impl AlloyLedger {
    pub fn new(provider: AlloyProvider, address: Address, finality: Finality) -> Self {
        Self {
            contract: SecretAuction::Instance::new(address, provider.clone()),
            provider,
            finality,
        }
    }

    /// Decodes the events of the auction contract, logs of other contracts
    /// and unknown logs are skipped.
    fn decode_events(&self, logs: &[Log]) -> Vec<LedgerEvent> {
        logs.iter()
            .filter(|log| log.address() == *self.contract.address())
            .filter_map(|log| match SecretAuctionEvents::decode_log(&log.inner) {
                Ok(decoded) => into_ledger_event(decoded.data),
                Err(err) => {
                    tracing::debug!(?err, "skipping undecodable log");
                    None
                }
            })
            .collect()
    }
}

fn into_ledger_event(event: SecretAuctionEvents) -> Option<LedgerEvent> {
    let event = match event {
        SecretAuctionEvents::AuctionCreated(event) => LedgerEvent::AuctionCreated {
            auction_id: auction_id(event.auctionId).ok()?,
            creator: event.creator,
            item_name: event.itemName,
            end_time: to_u64(event.endTime, "endTime").ok()?,
        },
        SecretAuctionEvents::BidPlaced(event) => LedgerEvent::BidPlaced {
            auction_id: auction_id(event.auctionId).ok()?,
            bidder: event.bidder,
        },
        SecretAuctionEvents::ResultsRevealed(event) => LedgerEvent::ResultsRevealed {
            auction_id: auction_id(event.auctionId).ok()?,
            winner: event.winner,
            winning_bid: event.winningBid,
        },
    };
    Some(event)
}

fn contract_error(err: alloy::contract::Error) -> Error {
    if err.is_node_error() {
        Error::Node(err.to_string())
    } else {
        Error::Contract(err.to_string())
    }
}

fn to_u64(value: U256, field: &str) -> Result<u64, Error> {
    u64::try_from(value).map_err(|_| Error::Contract(format!("{field} {value} exceeds 64 bits")))
}

fn auction_id(value: U256) -> Result<AuctionId, Error> {
    to_u64(value, "auction id").map(AuctionId)
}

#[async_trait::async_trait]
impl LedgerGateway for AlloyLedger {
    fn contract_address(&self) -> Address {
        *self.contract.address()
    }

    async fn chain_id(&self) -> Result<u64, Error> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|err| Error::Node(err.to_string()))
    }

    async fn get_auction(&self, id: AuctionId) -> Result<Auction, Error> {
        let auction = self
            .contract
            .getAuction(id.into())
            .call()
            .await
            .map_err(contract_error)?;

        Ok(Auction {
            id,
            creator: auction.creator,
            item_name: auction.itemName,
            description: auction.description,
            starting_price: auction.startingPrice,
            is_active: auction.isActive,
            results_revealed: auction.resultsRevealed,
            created_at: to_u64(auction.createdAt, "createdAt")?,
            end_time: to_u64(auction.endTime, "endTime")?,
            bid_count: to_u64(auction.bidCount, "bidCount")?,
        })
    }

    async fn get_user_auctions(&self, user: Address) -> Result<Vec<AuctionId>, Error> {
        self.contract
            .getUserAuctions(user)
            .call()
            .await
            .map_err(contract_error)?
            .into_iter()
            .map(auction_id)
            .collect()
    }

    async fn get_user_bids(&self, user: Address) -> Result<Vec<AuctionId>, Error> {
        self.contract
            .getUserBids(user)
            .call()
            .await
            .map_err(contract_error)?
            .into_iter()
            .map(auction_id)
            .collect()
    }

    async fn auction_counter(&self) -> Result<u64, Error> {
        let counter = self
            .contract
            .auctionCounter()
            .call()
            .await
            .map_err(contract_error)?;
        to_u64(counter, "auctionCounter")
    }

    async fn has_bid(&self, id: AuctionId, bidder: Address) -> Result<bool, Error> {
        self.contract
            .hasBid(id.into(), bidder)
            .call()
            .await
            .map_err(contract_error)
    }

    async fn get_results(&self, id: AuctionId) -> Result<Option<AuctionResult>, Error> {
        let results = self
            .contract
            .getResults(id.into())
            .call()
            .await
            .map_err(contract_error)?;

        Ok(results.revealed.then_some(AuctionResult {
            winner: results.winner,
            winning_bid: results.winningBid,
        }))
    }

    async fn create_auction(&self, auction: NewAuction) -> Result<PendingWrite, Error> {
        let pending = self
            .contract
            .createAuction(
                auction.item_name,
                auction.description,
                auction.starting_price,
                U256::from(auction.duration.as_secs()),
            )
            .send()
            .await
            .map_err(contract_error)?;
        Ok(PendingWrite {
            tx_hash: *pending.tx_hash(),
        })
    }

    async fn place_bid(&self, id: AuctionId, bid: EncryptedBid) -> Result<PendingWrite, Error> {
        let pending = self
            .contract
            .placeBid(id.into(), bid.handle, bid.attestation)
            .send()
            .await
            .map_err(contract_error)?;
        Ok(PendingWrite {
            tx_hash: *pending.tx_hash(),
        })
    }

    async fn reveal_results(
        &self,
        id: AuctionId,
        winner: Address,
        winning_bid: U256,
    ) -> Result<PendingWrite, Error> {
        let pending = self
            .contract
            .revealResults(id.into(), winner, winning_bid)
            .send()
            .await
            .map_err(contract_error)?;
        Ok(PendingWrite {
            tx_hash: *pending.tx_hash(),
        })
    }

    async fn end_auction(&self, id: AuctionId) -> Result<PendingWrite, Error> {
        let pending = self
            .contract
            .endAuction(id.into())
            .send()
            .await
            .map_err(contract_error)?;
        Ok(PendingWrite {
            tx_hash: *pending.tx_hash(),
        })
    }

    async fn await_finality(&self, pending: PendingWrite) -> Result<Confirmation, Error> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), pending.tx_hash)
            .with_required_confirmations(self.finality.confirmations)
            .with_timeout(Some(self.finality.timeout))
            .get_receipt()
            .await
            .map_err(|err| Error::Finality {
                tx_hash: pending.tx_hash,
                reason: err.to_string(),
            })?;

        if !receipt.status() {
            return Err(Error::Reverted(receipt.transaction_hash()));
        }

        Ok(Confirmation {
            tx_hash: receipt.transaction_hash(),
            block_number: receipt.block_number(),
            events: self.decode_events(receipt.inner.logs()),
        })
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        alloy::{primitives::LogData, sol_types::SolEvent},
        contracts::alloy::SecretAuction::SecretAuction::AuctionCreated,
        ethrpc::alloy::errors::{testing_alloy_contract_error, testing_alloy_node_error},
    };

    #[test]
    fn classifies_contract_errors() {
        assert!(contract_error(testing_alloy_node_error()).is_transient());
        assert!(!contract_error(testing_alloy_contract_error()).is_transient());
    }

    #[test]
    fn rejects_values_wider_than_64_bits() {
        assert_eq!(to_u64(U256::from(42), "x").unwrap(), 42);
        assert!(matches!(
            to_u64(U256::from(u64::MAX) + U256::from(1), "x"),
            Err(Error::Contract(_))
        ));
    }

    #[test]
    fn converts_contract_events() {
        let created = AuctionCreated {
            auctionId: U256::from(9),
            creator: Address::repeat_byte(3),
            itemName: "vase".to_string(),
            endTime: U256::from(1_700_003_600u64),
        };
        let data: LogData = created.encode_log_data();
        let event = AuctionCreated::decode_log_data(&data).unwrap();

        assert_eq!(
            into_ledger_event(SecretAuctionEvents::AuctionCreated(event)),
            Some(LedgerEvent::AuctionCreated {
                auction_id: AuctionId(9),
                creator: Address::repeat_byte(3),
                item_name: "vase".to_string(),
                end_time: 1_700_003_600,
            })
        );
    }
}
