use {
    alloy::primitives::{Address, U256},
    clap::{Parser, Subcommand},
    std::{fmt, path::PathBuf, time::Duration},
    tracing::Level,
    url::Url,
};

/// Client for sealed-bid auctions on an EVM ledger.
#[derive(Parser)]
#[command(version)]
pub struct Arguments {
    /// The Ethereum node URL to connect to.
    #[clap(long, env, default_value = "http://localhost:8545")]
    pub node_url: Url,

    /// Path to the TOML deployment configuration.
    #[clap(long, env, default_value = "sealed-auction.toml")]
    pub config: PathBuf,

    /// Hex encoded private key of the account issuing writes. Its address is
    /// the connected identity.
    #[clap(long, env)]
    pub private_key: Option<String>,

    /// Identity to read per-user state for when no private key is given.
    #[clap(long, env)]
    pub identity: Option<Address>,

    #[clap(long, env, default_value = "warn,sealed_auction=debug")]
    pub log_filter: String,

    #[clap(long, env, default_value = "error")]
    pub log_stderr_threshold: Level,

    #[clap(long, env)]
    pub use_json_logs: bool,

    /// Print all collected metrics once the command finished.
    #[clap(long, env)]
    pub print_metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load one auction and print it with its derived state.
    Show { id: u64 },
    /// Print the auctions relevant to the identity and the most recent ones.
    List,
    /// Print the auctions currently accepting bids.
    Live,
    /// Keep refreshing the registry and print the live feed until interrupted.
    Watch,
    /// Create a new auction owned by the connected identity.
    Create {
        #[clap(long)]
        item_name: String,
        #[clap(long, default_value = "")]
        description: String,
        /// Minimum bid in wei.
        #[clap(long)]
        starting_price: U256,
        /// How long the auction accepts bids, e.g. `1h` or `30m`.
        #[clap(long, value_parser = humantime::parse_duration)]
        duration: Duration,
    },
    /// Place a sealed bid.
    Bid {
        id: u64,
        /// Bid amount in wei.
        amount: U256,
    },
    /// Disclose the winner of an expired auction.
    Reveal {
        id: u64,
        #[clap(long)]
        winner: Address,
        #[clap(long)]
        winning_bid: U256,
    },
    /// Stop an auction before its end time.
    End { id: u64 },
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "node_url: SECRET")?;
        writeln!(f, "config: {}", self.config.display())?;
        let private_key = self.private_key.as_ref().map(|_| "SECRET");
        writeln!(f, "private_key: {private_key:?}")?;
        writeln!(f, "identity: {:?}", self.identity)?;
        writeln!(f, "log_filter: {}", self.log_filter)?;
        writeln!(f, "log_stderr_threshold: {}", self.log_stderr_threshold)?;
        writeln!(f, "use_json_logs: {}", self.use_json_logs)?;
        writeln!(f, "print_metrics: {}", self.print_metrics)?;
        writeln!(f, "command: {:?}", self.command)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_write_commands() {
        let args = Arguments::try_parse_from([
            "sealed-auction",
            "--private-key",
            "0x0123",
            "create",
            "--item-name",
            "lamp",
            "--starting-price",
            "1000",
            "--duration",
            "1h",
        ])
        .unwrap();

        match args.command {
            Command::Create {
                item_name,
                starting_price,
                duration,
                ..
            } => {
                assert_eq!(item_name, "lamp");
                assert_eq!(starting_price, U256::from(1000));
                assert_eq!(duration, Duration::from_secs(3600));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn hides_secrets() {
        let args = Arguments::try_parse_from([
            "sealed-auction",
            "--node-url",
            "https://node.example.com/api-key",
            "--private-key",
            "0x0123",
            "bid",
            "7",
            "1000000000000000000",
        ])
        .unwrap();

        let displayed = args.to_string();
        assert!(!displayed.contains("api-key"));
        assert!(!displayed.contains("0x0123"));
        assert!(displayed.contains("Bid { id: 7"));
    }
}
