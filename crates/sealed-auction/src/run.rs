use {
    crate::{
        arguments::{Arguments, Command},
        config::Configuration,
        domain::{self, AuctionId, AuctionSnapshot, AuctionSummary, NewAuction},
        encryption::relayer::Relayer,
        ledger::{LedgerGateway, alloy::AlloyLedger},
        orchestrator::{AuctionOrchestrator, WriteOutcome},
        registry::{AuctionRegistry, PeriodicRefresh},
    },
    alloy::{
        primitives::utils::format_ether,
        signers::local::PrivateKeySigner,
    },
    anyhow::{Context, Result},
    clap::Parser,
    std::sync::Arc,
};

pub async fn start(args: impl Iterator<Item = String>) {
    let args = Arguments::parse_from(args);
    let obs_config = observe::Config::new(
        args.log_filter.as_str(),
        Some(args.log_stderr_threshold),
        args.use_json_logs,
    );
    observe::tracing::initialize(&obs_config);
    observe::metrics::setup_registry(Some("sealed_auction".into()), None);
    tracing::info!("running sealed-auction with validated arguments:\n{}", args);

    if let Err(err) = run(args).await {
        tracing::error!(?err, "command failed");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

/// Assumes tracing and the metrics registry have already been set up.
pub async fn run(args: Arguments) -> Result<()> {
    let config = Configuration::from_path(&args.config)
        .await?
        .validate()
        .context("invalid configuration")?;

    let signer = args
        .private_key
        .as_deref()
        .map(str::parse::<PrivateKeySigner>)
        .transpose()
        .context("invalid private key")?;
    let identity = signer.as_ref().map(|signer| signer.address()).or(args.identity);
    let provider = match signer {
        Some(signer) => ethrpc::alloy::provider_with_signer(&args.node_url, Box::new(signer)),
        None => ethrpc::alloy::provider(&args.node_url),
    };

    let ledger: Arc<dyn LedgerGateway> = Arc::new(AlloyLedger::new(
        provider,
        config.contract,
        config.finality(),
    ));
    let relayer = Relayer::new(reqwest::Client::new(), config.relayer());
    let registry = Arc::new(AuctionRegistry::new(
        ledger.clone(),
        config.registry(),
        config.retry_policy(),
    ));
    let orchestrator =
        AuctionOrchestrator::new(ledger, Arc::new(relayer), registry, config.orchestrator());
    if let Some(identity) = identity {
        orchestrator.connect(identity);
    }

    execute(&orchestrator, args.command).await?;

    if args.print_metrics {
        println!(
            "{}",
            observe::metrics::encode(observe::metrics::get_registry())
        );
    }
    Ok(())
}

async fn execute(orchestrator: &AuctionOrchestrator, command: Command) -> Result<()> {
    match command {
        Command::Show { id } => {
            let snapshot = orchestrator.load_auction(AuctionId(id)).await?;
            print_snapshot(&snapshot);
        }
        Command::List => {
            let ids = orchestrator
                .registry()
                .refresh(orchestrator.identity())
                .await
                .context("failed to refresh auctions")?;
            for id in ids {
                match orchestrator.load_auction(id).await {
                    Ok(snapshot) => print_snapshot(&snapshot),
                    Err(err) => println!("auction {id}: {err}"),
                }
            }
        }
        Command::Live => {
            let live = orchestrator.registry().live_auctions(domain::now()).await;
            print_live(&live);
        }
        Command::Watch => watch(orchestrator).await,
        Command::Create {
            item_name,
            description,
            starting_price,
            duration,
        } => {
            let created = orchestrator
                .create_auction(NewAuction {
                    item_name,
                    description,
                    starting_price,
                    duration,
                })
                .await?;
            println!("created auction {} in {}", created.id, created.tx_hash);
        }
        Command::Bid { id, amount } => {
            let outcome = orchestrator.place_bid(AuctionId(id), amount).await?;
            print_outcome("placed bid", &outcome);
        }
        Command::Reveal {
            id,
            winner,
            winning_bid,
        } => {
            let outcome = orchestrator
                .reveal_results(AuctionId(id), winner, winning_bid)
                .await?;
            print_outcome("revealed results", &outcome);
        }
        Command::End { id } => {
            let outcome = orchestrator.end_auction(AuctionId(id)).await?;
            print_outcome("ended auction", &outcome);
        }
    }
    Ok(())
}

/// Refreshes in the background and prints every change of the live feed.
async fn watch(orchestrator: &AuctionOrchestrator) {
    let registry = orchestrator.registry();
    let refresh = PeriodicRefresh::spawn(registry, orchestrator.identity());
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    let mut shown = Arc::new(Vec::new());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let live = registry.latest_live_auctions();
                if live != shown {
                    print_live(&live);
                    shown = live;
                }
            }
        }
    }
    refresh.stop();
}

fn print_snapshot(snapshot: &AuctionSnapshot) {
    let auction = &snapshot.auction;
    println!(
        "auction {} \"{}\" by {}: {}, starting price {} ETH, {} bids, ends at {}",
        auction.id,
        auction.item_name,
        auction.creator,
        snapshot.state(domain::now()),
        format_ether(auction.starting_price),
        auction.bid_count,
        end_time(auction.end_time),
    );
    if let Some(result) = &snapshot.result {
        println!(
            "  won by {} with {} ETH",
            result.winner,
            format_ether(result.winning_bid)
        );
    }
}

fn print_live(live: &[AuctionSummary]) {
    if live.is_empty() {
        println!("no live auctions");
        return;
    }
    for auction in live {
        println!(
            "auction {} \"{}\": starting price {} ETH, {} bids, ends at {}",
            auction.id,
            auction.item_name,
            format_ether(auction.starting_price),
            auction.bid_count,
            end_time(auction.end_time),
        );
    }
}

fn print_outcome(action: &str, outcome: &WriteOutcome) {
    println!("{action} in {}", outcome.tx_hash);
    if let Some(warning) = &outcome.stale_warning {
        println!("warning: {warning}");
    }
    if let Some(snapshot) = &outcome.snapshot {
        print_snapshot(snapshot);
    }
}

fn end_time(timestamp: domain::Timestamp) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Ctrl-C sends SIGINT, service managers SIGTERM.
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(err), _) | (_, Err(err)) => {
                tracing::error!(?err, "failed to install signal handlers");
                return std::future::pending().await;
            }
        };
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("received CTRL+C, shutting down");
}
