//! Deployment parameters loaded from a TOML file.

use {
    crate::{
        encryption::{self, relayer},
        ledger::alloy::Finality,
        orchestrator::{self, NetworkPolicy},
        registry,
        retry,
    },
    alloy::primitives::{Address, U256},
    anyhow::{anyhow, ensure},
    serde::Deserialize,
    serde_with::{DisplayFromStr, serde_as},
    std::{path::Path, time::Duration},
    url::Url,
};

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Configuration {
    /// Address of the auction contract.
    pub contract: Address,

    /// Chain the contract is deployed on. Writes check the node against it.
    #[serde(default = "default_expected_chain_id")]
    pub expected_chain_id: u64,

    #[serde(default)]
    pub network_policy: NetworkPolicy,

    /// Wei per step of an encrypted bid. Bids are encrypted as 8-bit values
    /// so everything from 256 steps upwards encrypts to the same value.
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default = "default_bid_quantization_unit")]
    pub bid_quantization_unit: U256,

    #[serde(default)]
    pub encryption: Encryption,

    /// How long a loaded auction is trusted without asking the ledger again.
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    pub cache_ttl: Duration,

    /// Retries of failed reads on top of the first attempt.
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,

    /// Delay before the first retry, doubled for each following one.
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,

    #[serde(default)]
    pub finality: FinalityConfig,

    #[serde(default)]
    pub registry: Registry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Encryption {
    /// Base URL of the encryption relayer.
    pub url: Option<Url>,

    /// Allow a plain `http` relayer URL.
    #[serde(default)]
    pub allow_insecure: bool,

    /// Upper bound for encrypting one bid.
    #[serde(with = "humantime_serde", default = "default_encryption_timeout")]
    pub timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl Default for Encryption {
    fn default() -> Self {
        Self {
            url: None,
            allow_insecure: false,
            timeout: default_encryption_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FinalityConfig {
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    #[serde(with = "humantime_serde", default = "default_finality_timeout")]
    pub timeout: Duration,
}

impl Default for FinalityConfig {
    fn default() -> Self {
        Self {
            confirmations: default_confirmations(),
            timeout: default_finality_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Registry {
    #[serde(default = "default_recent_scan")]
    pub recent_scan: u64,

    #[serde(with = "humantime_serde", default = "default_refresh_interval")]
    pub refresh_interval: Duration,

    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    #[serde(default = "default_live_scan")]
    pub live_scan: u64,

    #[serde(default = "default_live_limit")]
    pub live_limit: usize,

    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            recent_scan: default_recent_scan(),
            refresh_interval: default_refresh_interval(),
            initial_delay: default_initial_delay(),
            live_scan: default_live_scan(),
            live_limit: default_live_limit(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

fn default_expected_chain_id() -> u64 {
    contracts::alloy::networks::SEPOLIA
}

fn default_bid_quantization_unit() -> U256 {
    U256::from(1_000_000_000_000_000u64)
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(15)
}

fn default_read_retries() -> u32 {
    2
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_encryption_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_confirmations() -> u64 {
    1
}

fn default_finality_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_recent_scan() -> u64 {
    20
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_live_scan() -> u64 {
    100
}

fn default_live_limit() -> usize {
    20
}

fn default_max_consecutive_errors() -> usize {
    10
}

impl Configuration {
    pub async fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        match toml::from_str(&tokio::fs::read_to_string(&path).await?) {
            Ok(self_) => Ok(self_),
            Err(err) if std::env::var("TOML_TRACE_ERROR").is_ok_and(|v| v == "1") => Err(anyhow!(
                "failed to parse TOML config at {}: {err:#?}",
                path.as_ref().display()
            )),
            Err(_) => Err(anyhow!(
                "failed to parse TOML config at: {}. Set TOML_TRACE_ERROR=1 to print parsing \
                 error.",
                path.as_ref().display()
            )),
        }
    }

    pub fn validate(self) -> anyhow::Result<Self> {
        ensure!(!self.contract.is_zero(), "contract address must not be null");
        ensure!(
            !self.bid_quantization_unit.is_zero(),
            "bid-quantization-unit must be positive"
        );
        ensure!(
            !self.encryption.timeout.is_zero(),
            "encryption timeout must be positive"
        );
        ensure!(
            !self.registry.refresh_interval.is_zero(),
            "registry refresh-interval must be positive"
        );
        ensure!(
            self.registry.live_limit > 0,
            "registry live-limit must be positive"
        );
        ensure!(
            self.registry.max_consecutive_errors > 0,
            "registry max-consecutive-errors must be positive"
        );
        Ok(self)
    }

    pub fn retry_policy(&self) -> retry::Policy {
        retry::Policy {
            retries: self.read_retries,
            delay: self.retry_delay,
        }
    }

    pub fn finality(&self) -> Finality {
        Finality {
            confirmations: self.finality.confirmations,
            timeout: self.finality.timeout,
        }
    }

    pub fn relayer(&self) -> relayer::Config {
        relayer::Config {
            url: self.encryption.url.clone(),
            allow_insecure: self.encryption.allow_insecure,
            request_timeout: self.encryption.request_timeout,
            chain_id: self.expected_chain_id,
        }
    }

    pub fn registry(&self) -> registry::Config {
        registry::Config {
            recent_scan: self.registry.recent_scan,
            live_scan: self.registry.live_scan,
            live_limit: self.registry.live_limit,
            max_consecutive_errors: self.registry.max_consecutive_errors,
            refresh_interval: self.registry.refresh_interval,
            initial_delay: self.registry.initial_delay,
        }
    }

    pub fn orchestrator(&self) -> orchestrator::Config {
        orchestrator::Config {
            expected_chain_id: self.expected_chain_id,
            network_policy: self.network_policy,
            quantization_unit: self.bid_quantization_unit,
            cache_ttl: self.cache_ttl,
            read_retry: self.retry_policy(),
            encryption: encryption::Config {
                timeout: self.encryption.timeout,
                retry: self.retry_policy(),
            },
        }
    }
}
