//! The auction protocol: validates what the connected identity may do with an
//! auction, drives the encrypt-then-submit handshake for bids and keeps the
//! cached auction state in line with the ledger.

mod cache;
mod error;
mod in_flight;

pub use error::Error;
use {
    self::{cache::SnapshotCache, in_flight::InFlight},
    crate::{
        domain::{
            self,
            AuctionId,
            AuctionResult,
            AuctionSnapshot,
            AuctionState,
            NewAuction,
            quantize,
        },
        encryption::{self, EncryptionService, EncryptionSession},
        ledger::{self, Confirmation, LedgerGateway, PendingWrite},
        registry::AuctionRegistry,
        retry,
    },
    alloy::primitives::{Address, TxHash, U256},
    observe::metrics,
    serde::Deserialize,
    std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    },
    tracing::instrument,
};

/// What to do when the ledger is on another chain than expected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkPolicy {
    /// Refuse to write.
    #[default]
    Enforce,
    /// Log a warning and write anyway.
    Warn,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub expected_chain_id: u64,
    pub network_policy: NetworkPolicy,
    /// Bid amounts are divided by this before they are encrypted.
    pub quantization_unit: U256,
    /// How long a loaded auction is used without asking the ledger again.
    pub cache_ttl: Duration,
    pub read_retry: retry::Policy,
    pub encryption: encryption::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            expected_chain_id: contracts::alloy::networks::SEPOLIA,
            network_policy: NetworkPolicy::default(),
            quantization_unit: U256::from(1_000_000_000_000_000u64),
            cache_ttl: Duration::from_secs(15),
            read_retry: retry::Policy::default(),
            encryption: encryption::Config::default(),
        }
    }
}

/// Result of a confirmed write on an existing auction.
#[derive(Clone, Debug)]
pub struct WriteOutcome {
    pub tx_hash: TxHash,
    /// The auction as reloaded after the write, or the cached copy with the
    /// written fact applied if reloading failed.
    pub snapshot: Option<AuctionSnapshot>,
    /// Set when the auction could not be reloaded after the write. The write
    /// itself succeeded.
    pub stale_warning: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreatedAuction {
    pub id: AuctionId,
    pub tx_hash: TxHash,
}

/// Everything that belongs to one connected identity. Replaced as a whole
/// when the identity changes.
struct IdentityScope {
    identity: Address,
    session: Arc<EncryptionSession>,
    cache: Arc<SnapshotCache>,
    in_flight: Arc<InFlight>,
}

pub struct AuctionOrchestrator {
    ledger: Arc<dyn LedgerGateway>,
    encryption: Arc<dyn EncryptionService>,
    registry: Arc<AuctionRegistry>,
    config: Config,
    scope: Mutex<Option<Arc<IdentityScope>>>,
    /// Snapshots loaded while no identity is connected.
    anonymous: Arc<SnapshotCache>,
}

impl AuctionOrchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        encryption: Arc<dyn EncryptionService>,
        registry: Arc<AuctionRegistry>,
        config: Config,
    ) -> Self {
        Self {
            anonymous: Arc::new(SnapshotCache::new(config.cache_ttl)),
            ledger,
            encryption,
            registry,
            config,
            scope: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<AuctionRegistry> {
        &self.registry
    }

    pub fn identity(&self) -> Option<Address> {
        self.scope().map(|scope| scope.identity)
    }

    fn scope(&self) -> Option<Arc<IdentityScope>> {
        self.scope
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn cache(&self) -> Arc<SnapshotCache> {
        self.scope()
            .map(|scope| Arc::clone(&scope.cache))
            .unwrap_or_else(|| Arc::clone(&self.anonymous))
    }

    fn new_session(&self) -> Arc<EncryptionSession> {
        Arc::new(EncryptionSession::new(
            Arc::clone(&self.encryption),
            self.config.encryption,
        ))
    }

    /// Acts on behalf of `identity` from now on. Connecting the identity that
    /// is already connected keeps all state.
    pub fn connect(&self, identity: Address) {
        let mut scope = self
            .scope
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if scope.as_ref().is_some_and(|scope| scope.identity == identity) {
            return;
        }
        *scope = Some(Arc::new(IdentityScope {
            identity,
            session: self.new_session(),
            cache: Arc::new(SnapshotCache::new(self.config.cache_ttl)),
            in_flight: Default::default(),
        }));
        self.registry.reset();
        tracing::info!(%identity, "connected identity");
    }

    /// Drops all state of the connected identity.
    pub fn disconnect(&self) {
        let previous = self
            .scope
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(previous) = previous {
            self.registry.reset();
            tracing::info!(identity = %previous.identity, "disconnected identity");
        }
    }

    /// Replaces the encryption session of the connected identity. The next
    /// bid performs a new handshake.
    pub fn teardown_session(&self) {
        let mut scope = self
            .scope
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(current) = scope.as_ref() {
            *scope = Some(Arc::new(IdentityScope {
                identity: current.identity,
                session: self.new_session(),
                cache: Arc::clone(&current.cache),
                in_flight: Arc::clone(&current.in_flight),
            }));
            tracing::debug!("tore down encryption session");
        }
    }

    /// State of the auction according to the cached snapshot. Never asks the
    /// ledger.
    pub fn auction_state(&self, id: AuctionId) -> AuctionState {
        self.cache()
            .get(id)
            .map(|cached| cached.snapshot.state(domain::now()))
            .unwrap_or(AuctionState::Unknown)
    }

    /// Fetches the auction from the ledger and updates the cache.
    #[instrument(skip_all, fields(auction = %id))]
    pub async fn load_auction(&self, id: AuctionId) -> Result<AuctionSnapshot, Error> {
        let scope = self.scope();
        match &scope {
            Some(scope) => self.reload(&scope.cache, Some(scope.identity), id).await,
            None => self.reload(&self.anonymous, None, id).await,
        }
    }

    async fn reload(
        &self,
        cache: &SnapshotCache,
        identity: Option<Address>,
        id: AuctionId,
    ) -> Result<AuctionSnapshot, Error> {
        let snapshot = self.fetch(identity, id).await?;
        Ok(cache.insert(snapshot))
    }

    async fn fetch(
        &self,
        identity: Option<Address>,
        id: AuctionId,
    ) -> Result<AuctionSnapshot, Error> {
        let retry = &self.config.read_retry;
        let auction = retry
            .run(
                "get auction",
                || self.ledger.get_auction(id),
                ledger::Error::is_transient,
            )
            .await
            .map_err(Error::read)?;
        if !auction.exists() {
            return Err(Error::NotFound(id));
        }
        if let Err(reason) = auction.validate() {
            tracing::warn!(%id, %reason, "ledger returned inconsistent auction");
        }

        let has_bid = match identity {
            Some(identity) => retry
                .run(
                    "has bid",
                    || self.ledger.has_bid(id, identity),
                    ledger::Error::is_transient,
                )
                .await
                .map_err(Error::read)?,
            None => false,
        };

        let result = if auction.results_revealed {
            retry
                .run(
                    "get results",
                    || self.ledger.get_results(id),
                    ledger::Error::is_transient,
                )
                .await
                .unwrap_or_else(|err| {
                    tracing::warn!(%id, ?err, "failed to fetch revealed results");
                    None
                })
        } else {
            None
        };

        Ok(AuctionSnapshot {
            auction,
            has_bid,
            result,
            fetched_at: Instant::now(),
        })
    }

    /// The snapshot a decision about the auction is based on: the cached one
    /// if it is fresh or if `trust_stale` accepts it, a reloaded one
    /// otherwise.
    async fn snapshot(
        &self,
        scope: &IdentityScope,
        id: AuctionId,
        trust_stale: impl Fn(&AuctionSnapshot) -> bool,
    ) -> Result<AuctionSnapshot, Error> {
        match scope.cache.get(id) {
            Some(cached) if cached.fresh || trust_stale(&cached.snapshot) => Ok(cached.snapshot),
            _ => self.reload(&scope.cache, Some(scope.identity), id).await,
        }
    }

    /// Places a sealed bid of `amount` (wei) on the auction.
    #[instrument(skip_all, fields(auction = %id))]
    pub async fn place_bid(&self, id: AuctionId, amount: U256) -> Result<WriteOutcome, Error> {
        let result = self.try_place_bid(id, amount).await;
        Metrics::bid(&result);
        result
    }

    async fn try_place_bid(&self, id: AuctionId, amount: U256) -> Result<WriteOutcome, Error> {
        let scope = self.scope().ok_or(Error::NotConnected)?;
        let _guard = scope
            .in_flight
            .try_acquire(id)
            .ok_or(Error::BidInProgress)?;

        // A bid or a reveal recorded earlier can't be undone, so a stale
        // snapshot showing either is good enough to refuse the bid.
        let snapshot = self
            .snapshot(&scope, id, AuctionSnapshot::has_settled_facts)
            .await?;
        if !snapshot.state(domain::now()).accepts_bids() {
            return Err(Error::AuctionClosed);
        }
        if snapshot.has_bid {
            return Err(Error::DuplicateBid);
        }
        let minimum = snapshot.auction.starting_price;
        if amount < minimum {
            return Err(Error::BidTooLow { minimum });
        }

        self.check_network().await?;
        let value = quantize(amount, self.config.quantization_unit);
        let bid = scope
            .session
            .encrypt(value, self.ledger.contract_address(), scope.identity)
            .await
            .inspect_err(|err| tracing::warn!(?err, "failed to encrypt bid"))?;

        let pending = self
            .ledger
            .place_bid(id, bid)
            .await
            .map_err(|err| submission_error(&scope.cache, Some(id), err))?;
        tracing::info!(tx_hash = %pending.tx_hash, "submitted bid");
        let confirmation = self.finalize(&scope.cache, Some(id), pending).await?;

        Ok(self
            .resync(&scope, id, confirmation, |snapshot| snapshot.has_bid = true)
            .await)
    }

    /// Discloses the winner. Only the creator may do this and only once the
    /// auction stopped accepting bids. Determining the winner happens
    /// elsewhere.
    #[instrument(skip_all, fields(auction = %id))]
    pub async fn reveal_results(
        &self,
        id: AuctionId,
        winner: Address,
        winning_bid: U256,
    ) -> Result<WriteOutcome, Error> {
        let scope = self.scope().ok_or(Error::NotConnected)?;
        let snapshot = self
            .snapshot(&scope, id, |snapshot| snapshot.auction.results_revealed)
            .await?;
        if !snapshot.auction.is_creator(scope.identity) {
            return Err(Error::Unauthorized);
        }
        match snapshot.state(domain::now()) {
            AuctionState::Expired => (),
            AuctionState::Revealed => return Err(Error::AlreadyRevealed),
            AuctionState::Unknown | AuctionState::Open | AuctionState::BidPlaced => {
                return Err(Error::NotExpired);
            }
        }

        self.check_network().await?;
        let pending = self
            .ledger
            .reveal_results(id, winner, winning_bid)
            .await
            .map_err(|err| submission_error(&scope.cache, Some(id), err))?;
        tracing::info!(tx_hash = %pending.tx_hash, %winner, "submitted results");
        let confirmation = self.finalize(&scope.cache, Some(id), pending).await?;

        Ok(self
            .resync(&scope, id, confirmation, |snapshot| {
                snapshot.auction.results_revealed = true;
                snapshot.auction.is_active = false;
                snapshot.result = Some(AuctionResult {
                    winner,
                    winning_bid,
                });
            })
            .await)
    }

    /// Stops the auction from accepting bids before its end time. Only the
    /// creator may do this.
    #[instrument(skip_all, fields(auction = %id))]
    pub async fn end_auction(&self, id: AuctionId) -> Result<WriteOutcome, Error> {
        let scope = self.scope().ok_or(Error::NotConnected)?;
        let snapshot = self
            .snapshot(&scope, id, |snapshot| snapshot.auction.results_revealed)
            .await?;
        if !snapshot.auction.is_creator(scope.identity) {
            return Err(Error::Unauthorized);
        }
        if !snapshot.state(domain::now()).accepts_bids() {
            return Err(Error::AuctionClosed);
        }

        self.check_network().await?;
        let pending = self
            .ledger
            .end_auction(id)
            .await
            .map_err(|err| submission_error(&scope.cache, Some(id), err))?;
        tracing::info!(tx_hash = %pending.tx_hash, "submitted end of auction");
        let confirmation = self.finalize(&scope.cache, Some(id), pending).await?;

        Ok(self
            .resync(&scope, id, confirmation, |snapshot| {
                snapshot.auction.is_active = false
            })
            .await)
    }

    /// Creates an auction owned by the connected identity.
    #[instrument(skip_all, fields(item = %auction.item_name))]
    pub async fn create_auction(&self, auction: NewAuction) -> Result<CreatedAuction, Error> {
        if auction.item_name.trim().is_empty() {
            return Err(Error::InvalidInput {
                field: "item_name",
                reason: "must not be empty".to_string(),
            });
        }
        if auction.starting_price.is_zero() {
            return Err(Error::InvalidInput {
                field: "starting_price",
                reason: "must be positive".to_string(),
            });
        }
        if auction.duration < Duration::from_secs(1) {
            return Err(Error::InvalidInput {
                field: "duration",
                reason: "must be at least one second".to_string(),
            });
        }
        let scope = self.scope().ok_or(Error::NotConnected)?;

        self.check_network().await?;
        let pending = self
            .ledger
            .create_auction(auction)
            .await
            .map_err(|err| submission_error(&scope.cache, None, err))?;
        tracing::info!(tx_hash = %pending.tx_hash, "submitted new auction");
        let confirmation = self.finalize(&scope.cache, None, pending).await?;

        let id = confirmation.created_auction().ok_or_else(|| {
            Error::ProtocolError(format!(
                "transaction {} emitted no AuctionCreated event",
                confirmation.tx_hash
            ))
        })?;
        tracing::info!(%id, "created auction");

        if let Err(err) = self.registry.refresh(Some(scope.identity)).await {
            tracing::warn!(?err, "failed to refresh registry after creating auction");
        }
        Ok(CreatedAuction {
            id,
            tx_hash: confirmation.tx_hash,
        })
    }

    /// Fails unless the ledger is on the expected chain or the policy allows
    /// writing anyway.
    async fn check_network(&self) -> Result<(), Error> {
        let expected = self.config.expected_chain_id;
        let actual = match self
            .config
            .read_retry
            .run(
                "chain id",
                || self.ledger.chain_id(),
                ledger::Error::is_transient,
            )
            .await
        {
            Ok(actual) if actual == expected => return Ok(()),
            Ok(actual) => Some(actual),
            Err(err) => {
                tracing::warn!(?err, "failed to read chain id");
                None
            }
        };

        let err = Error::WrongNetwork { expected, actual };
        match self.config.network_policy {
            NetworkPolicy::Enforce => Err(err),
            NetworkPolicy::Warn => {
                tracing::warn!(%err, "writing anyway");
                Ok(())
            }
        }
    }

    /// Waits for the write to be final. Writes are never repeated: when the
    /// outcome can't be determined the cached auction is invalidated so the
    /// next decision reloads it.
    async fn finalize(
        &self,
        cache: &SnapshotCache,
        id: Option<AuctionId>,
        pending: PendingWrite,
    ) -> Result<Confirmation, Error> {
        let result = self.ledger.await_finality(pending).await;
        if let (Err(_), Some(id)) = (&result, id) {
            cache.invalidate(id);
        }
        match result {
            Ok(confirmation) => {
                tracing::debug!(
                    tx_hash = %confirmation.tx_hash,
                    block = ?confirmation.block_number,
                    "transaction confirmed"
                );
                Ok(confirmation)
            }
            Err(ledger::Error::Reverted(tx_hash)) => {
                tracing::warn!(%tx_hash, "transaction reverted");
                Err(Error::TransactionReverted { tx_hash })
            }
            Err(err) => {
                tracing::warn!(tx_hash = %pending.tx_hash, ?err, "transaction outcome unknown");
                Err(Error::UnknownOutcome {
                    tx_hash: pending.tx_hash,
                })
            }
        }
    }

    /// Reloads the auction after a confirmed write. The fact the write
    /// established is recorded first so a lagging node can't hide it.
    async fn resync(
        &self,
        scope: &IdentityScope,
        id: AuctionId,
        confirmation: Confirmation,
        apply: impl FnOnce(&mut AuctionSnapshot),
    ) -> WriteOutcome {
        scope.cache.update(id, apply);
        match self.reload(&scope.cache, Some(scope.identity), id).await {
            Ok(snapshot) => WriteOutcome {
                tx_hash: confirmation.tx_hash,
                snapshot: Some(snapshot),
                stale_warning: None,
            },
            Err(err) => {
                tracing::warn!(?err, "failed to reload auction after confirmed write");
                WriteOutcome {
                    tx_hash: confirmation.tx_hash,
                    snapshot: scope.cache.get(id).map(|cached| cached.snapshot),
                    stale_warning: Some(format!(
                        "transaction {} is confirmed but auction {id} could not be reloaded: \
                         {err}",
                        confirmation.tx_hash
                    )),
                }
            }
        }
    }
}

/// Maps a write the node did not acknowledge. A node error may hide a
/// transaction that was broadcast anyway, so the auction gets reloaded
/// before the next decision about it.
fn submission_error(cache: &SnapshotCache, id: Option<AuctionId>, err: ledger::Error) -> Error {
    if !err.is_transient() {
        return Error::SubmissionFailed(err.to_string());
    }
    if let Some(id) = id {
        cache.invalidate(id);
    }
    tracing::warn!(?err, "transaction may have been broadcast");
    Error::SubmissionOutcomeUnknown(err.to_string())
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "orchestrator")]
struct Metrics {
    /// Bid submissions by result.
    #[metric(labels("result"))]
    bids: prometheus::IntCounterVec,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(metrics::get_storage_registry()).unwrap()
    }

    fn bid(result: &Result<WriteOutcome, Error>) {
        let label = match result {
            Ok(outcome) if outcome.stale_warning.is_some() => "success_stale",
            Ok(_) => "success",
            Err(Error::NotConnected | Error::BidInProgress) => "rejected",
            Err(
                Error::AuctionClosed
                | Error::DuplicateBid
                | Error::BidTooLow { .. }
                | Error::NotFound(_),
            ) => "precondition",
            Err(Error::WrongNetwork { .. }) => "wrong_network",
            Err(
                Error::EncryptionUnavailable(_)
                | Error::EncryptionInitFailed(_)
                | Error::EncryptionTimeout(_)
                | Error::EncryptionMalformed(_)
                | Error::EncryptionFailed(_),
            ) => "encryption",
            Err(Error::TransactionReverted { .. }) => "reverted",
            Err(Error::UnknownOutcome { .. } | Error::SubmissionOutcomeUnknown(_)) => {
                "unknown_outcome"
            }
            Err(_) => "error",
        };
        Self::get().bids.with_label_values(&[label]).inc();
    }
}
