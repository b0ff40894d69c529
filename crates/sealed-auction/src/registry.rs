//! The set of auctions relevant to the connected identity and the live
//! auctions feed, both rebuilt by polling the ledger.

use {
    crate::{
        domain::{AuctionId, AuctionSummary, Timestamp},
        ledger::{self, LedgerGateway},
        retry,
    },
    alloy::primitives::Address,
    arc_swap::ArcSwap,
    futures::future::join_all,
    observe::metrics,
    std::{
        collections::BTreeSet,
        sync::{
            Arc,
            Weak,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, Instant},
    },
    tokio::task::JoinHandle,
    tracing::Instrument,
};

#[derive(Clone, Debug)]
pub struct Config {
    /// How many of the newest auction ids a refresh scans on top of the
    /// identity's own auctions and bids.
    pub recent_scan: u64,
    /// How many of the newest auction ids the live feed looks at.
    pub live_scan: u64,
    /// Maximum number of auctions in the live feed.
    pub live_limit: usize,
    /// The live feed gives up after this many failed fetches in a row.
    pub max_consecutive_errors: usize,
    pub refresh_interval: Duration,
    /// Delay before the first periodic refresh.
    pub initial_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recent_scan: 20,
            live_scan: 100,
            live_limit: 20,
            max_consecutive_errors: 10,
            refresh_interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
        }
    }
}

/// A published refresh result.
#[derive(Debug, Default)]
struct View {
    epoch: u64,
    /// Sorted by descending id without duplicates.
    auctions: Vec<AuctionId>,
}

pub struct AuctionRegistry {
    ledger: Arc<dyn LedgerGateway>,
    config: Config,
    retry: retry::Policy,
    epoch: AtomicU64,
    known: ArcSwap<View>,
    live: ArcSwap<Vec<AuctionSummary>>,
}

impl AuctionRegistry {
    pub fn new(ledger: Arc<dyn LedgerGateway>, config: Config, retry: retry::Policy) -> Self {
        Self {
            ledger,
            config,
            retry,
            epoch: AtomicU64::new(0),
            known: Default::default(),
            live: Default::default(),
        }
    }

    /// Ids published by the last completed refresh, newest first.
    pub fn known_auctions(&self) -> Vec<AuctionId> {
        self.known.load().auctions.clone()
    }

    /// Result of the last computed live feed.
    pub fn latest_live_auctions(&self) -> Arc<Vec<AuctionSummary>> {
        self.live.load_full()
    }

    /// Forgets the published view. Refreshes that are still running were
    /// started for the previous identity and won't publish.
    pub fn reset(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.known.store(Arc::new(View {
            epoch,
            auctions: Vec::new(),
        }));
        tracing::debug!(epoch, "reset auction registry");
    }

    /// Rebuilds the set of relevant auctions and publishes it.
    ///
    /// Failing to fetch the identity's own auctions or bids fails the refresh
    /// and keeps the previous view. Failures while scanning recent auctions
    /// only drop the affected ids.
    pub async fn refresh(
        &self,
        identity: Option<Address>,
    ) -> Result<Vec<AuctionId>, ledger::Error> {
        self.refresh_in(self.epoch(), identity).await
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Refreshes on behalf of the identity `epoch` belongs to. Nothing gets
    /// published once the registry moved on to a later epoch.
    async fn refresh_in(
        &self,
        epoch: u64,
        identity: Option<Address>,
    ) -> Result<Vec<AuctionId>, ledger::Error> {
        let start = Instant::now();

        let (own, recent) = futures::join!(self.own_auctions(identity), self.recent_auctions());
        let own = own.inspect_err(|err| {
            tracing::warn!(?err, "failed to fetch auctions of identity");
            Metrics::refresh("error", start.elapsed());
        })?;

        let auctions: Vec<_> = own
            .into_iter()
            .chain(recent)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .rev()
            .collect();

        let previous = self.known.rcu(|current| {
            if current.epoch == epoch {
                Arc::new(View {
                    epoch,
                    auctions: auctions.clone(),
                })
            } else {
                Arc::clone(current)
            }
        });
        if previous.epoch == epoch {
            tracing::debug!(count = auctions.len(), "published auction registry");
            Metrics::refresh("success", start.elapsed());
        } else {
            tracing::debug!(epoch, "discarding refresh of previous identity");
            Metrics::refresh("discarded", start.elapsed());
        }
        Ok(auctions)
    }

    async fn own_auctions(
        &self,
        identity: Option<Address>,
    ) -> Result<Vec<AuctionId>, ledger::Error> {
        let Some(identity) = identity else {
            return Ok(Vec::new());
        };
        let (created, bids) = futures::try_join!(
            self.retry.run(
                "user auctions",
                || self.ledger.get_user_auctions(identity),
                ledger::Error::is_transient,
            ),
            self.retry.run(
                "user bids",
                || self.ledger.get_user_bids(identity),
                ledger::Error::is_transient,
            ),
        )?;
        Ok(created.into_iter().chain(bids).collect())
    }

    /// Existing auctions among the newest ids.
    async fn recent_auctions(&self) -> Vec<AuctionId> {
        let counter = match self
            .retry
            .run(
                "auction counter",
                || self.ledger.auction_counter(),
                ledger::Error::is_transient,
            )
            .await
        {
            Ok(counter) => counter,
            Err(err) => {
                tracing::warn!(?err, "failed to read auction counter, skipping scan");
                return Vec::new();
            }
        };

        let ids = counter.saturating_sub(self.config.recent_scan)..counter;
        let fetches = ids.map(AuctionId).map(|id| async move {
            match self.ledger.get_auction(id).await {
                Ok(auction) => auction.exists().then_some(id),
                Err(err) => {
                    tracing::debug!(%id, ?err, "failed to fetch recent auction");
                    Metrics::get().scan_failures.inc();
                    None
                }
            }
        });
        join_all(fetches).await.into_iter().flatten().collect()
    }

    /// Scans down from the newest auction for auctions that still accept
    /// bids and publishes the result.
    pub async fn live_auctions(&self, now: Timestamp) -> Arc<Vec<AuctionSummary>> {
        let counter = match self.ledger.auction_counter().await {
            Ok(counter) => counter,
            Err(err) => {
                tracing::warn!(?err, "failed to read auction counter, assuming full scan");
                self.config.live_scan
            }
        };

        let mut live = Vec::new();
        let mut consecutive_errors = 0;
        for id in (counter.saturating_sub(self.config.live_scan)..counter).rev() {
            match self.ledger.get_auction(AuctionId(id)).await {
                Ok(auction) => {
                    consecutive_errors = 0;
                    if auction.is_live(now) {
                        live.push(AuctionSummary::from(auction));
                        if live.len() >= self.config.live_limit {
                            break;
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!(%id, ?err, "failed to fetch auction for live feed");
                    Metrics::get().scan_failures.inc();
                    consecutive_errors += 1;
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        tracing::warn!(consecutive_errors, "giving up on live auctions scan");
                        break;
                    }
                }
            }
        }

        live.sort_by(|a, b| b.id.cmp(&a.id));
        let live = Arc::new(live);
        self.live.store(Arc::clone(&live));
        live
    }
}

/// Background task refreshing a registry and its live feed for one identity.
/// Stops when dropped, when [`PeriodicRefresh::stop`] is called, when the
/// registry is gone or when it was reset for another identity.
pub struct PeriodicRefresh {
    handle: JoinHandle<()>,
}

impl PeriodicRefresh {
    pub fn spawn(registry: &Arc<AuctionRegistry>, identity: Option<Address>) -> Self {
        let task = RefreshTask {
            interval: registry.config.refresh_interval,
            initial_delay: registry.config.initial_delay,
            epoch: registry.epoch(),
            registry: Arc::downgrade(registry),
            identity,
        };
        Self {
            handle: tokio::spawn(task.run().instrument(tracing::info_span!("registry_refresh"))),
        }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for PeriodicRefresh {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct RefreshTask {
    registry: Weak<AuctionRegistry>,
    /// Epoch of the registry the identity was connected in.
    epoch: u64,
    identity: Option<Address>,
    interval: Duration,
    initial_delay: Duration,
}

impl RefreshTask {
    async fn run(self) {
        tokio::time::sleep(self.initial_delay).await;
        while let Some(registry) = self.registry.upgrade() {
            if registry.epoch() != self.epoch {
                tracing::debug!(epoch = self.epoch, "identity changed, stopping refresh");
                break;
            }
            let start = Instant::now();
            // Errors are logged by the registry, the next round tries again.
            let _ = registry.refresh_in(self.epoch, self.identity).await;
            let live = registry.live_auctions(crate::domain::now()).await;
            tracing::debug!(live = live.len(), "refreshed auctions");
            drop(registry);
            tokio::time::sleep(self.interval.saturating_sub(start.elapsed())).await;
        }
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "registry")]
struct Metrics {
    /// Registry refreshes by result.
    #[metric(labels("result"))]
    refreshes: prometheus::HistogramVec,

    /// Individual auction fetches that failed while scanning.
    scan_failures: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(metrics::get_storage_registry()).unwrap()
    }

    fn refresh(result: &str, elapsed: Duration) {
        Self::get()
            .refreshes
            .with_label_values(&[result])
            .observe(elapsed.as_secs_f64())
    }
}
