use {
    super::{EncryptedInput, EncryptionService, Error},
    crate::{domain::EncryptedBid, retry},
    alloy::primitives::Address,
    observe::metrics,
    std::{
        sync::Arc,
        time::{Duration, Instant},
    },
    tokio::sync::OnceCell,
};

#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Upper bound for a single encryption request.
    pub timeout: Duration,
    /// Retries of the handshake.
    pub retry: retry::Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: retry::Policy::default(),
        }
    }
}

/// A connection to the encryption service for one identity.
///
/// The handshake happens at most once per session no matter how many tasks
/// ask for it concurrently. A failed handshake leaves the session
/// uninitialized so the next caller tries again.
pub struct EncryptionSession {
    service: Arc<dyn EncryptionService>,
    initialized: OnceCell<()>,
    config: Config,
}

impl EncryptionSession {
    pub fn new(service: Arc<dyn EncryptionService>, config: Config) -> Self {
        Self {
            service,
            initialized: OnceCell::new(),
            config,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    pub async fn initialize(&self) -> Result<(), Error> {
        self.initialized
            .get_or_try_init(|| async {
                tracing::debug!("initializing encryption session");
                self.config
                    .retry
                    .run(
                        "encryption handshake",
                        || self.service.initialize(),
                        |err| err.is_transient(),
                    )
                    .await
                    .inspect_err(|err| tracing::warn!(?err, "encryption handshake failed"))
                    .map_err(Error::handshake)
            })
            .await?;
        Ok(())
    }

    /// Encrypts `value` for a bid of `bidder` on `contract`. Initializes the
    /// session first if needed.
    ///
    /// Only the request itself is subject to the timeout. When it fires the
    /// session stays initialized and can be used again right away.
    pub async fn encrypt(
        &self,
        value: u8,
        contract: Address,
        bidder: Address,
    ) -> Result<EncryptedBid, Error> {
        self.initialize().await?;

        let input = EncryptedInput::new(contract, bidder).add_u8(value);
        let start = Instant::now();
        let result = tokio::time::timeout(self.config.timeout, self.service.encrypt(input)).await;
        let response = match result {
            Err(_) => {
                Metrics::encryption("timeout", start.elapsed());
                return Err(Error::Timeout(self.config.timeout));
            }
            Ok(Err(err)) => {
                Metrics::encryption("error", start.elapsed());
                return Err(Error::request(err));
            }
            Ok(Ok(response)) => response,
        };

        let handle = response.handles.first().copied();
        let bid = match (handle, response.input_proof) {
            (None, _) => Err(Error::Malformed("no handles returned")),
            (_, None) => Err(Error::Malformed("no input proof returned")),
            (_, Some(proof)) if proof.is_empty() => Err(Error::Malformed("empty input proof")),
            (Some(handle), Some(attestation)) => Ok(EncryptedBid {
                handle,
                attestation,
            }),
        };
        Metrics::encryption(
            if bid.is_ok() { "success" } else { "malformed" },
            start.elapsed(),
        );
        bid
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "encryption")]
struct Metrics {
    /// Duration of encryption requests by result.
    #[metric(labels("result"), buckets(0.1, 0.5, 1, 2, 5, 10, 20, 30))]
    requests: prometheus::HistogramVec,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(metrics::get_storage_registry()).unwrap()
    }

    fn encryption(result: &str, elapsed: Duration) {
        Self::get()
            .requests
            .with_label_values(&[result])
            .observe(elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::encryption::{EncryptionResponse, MockEncryptionService, ServiceError},
        alloy::primitives::{B256, Bytes},
        mockall::predicate::eq,
    };

    fn response() -> EncryptionResponse {
        EncryptionResponse {
            handles: vec![B256::repeat_byte(0xab)],
            input_proof: Some(Bytes::from_static(&[1, 2, 3])),
        }
    }

    fn config() -> Config {
        Config {
            timeout: Duration::from_secs(30),
            retry: retry::Policy::none(),
        }
    }

    #[tokio::test]
    async fn initializes_once() {
        let mut service = MockEncryptionService::new();
        service.expect_initialize().times(1).returning(|| Ok(()));
        let session = EncryptionSession::new(Arc::new(service), config());

        session.initialize().await.unwrap();
        session.initialize().await.unwrap();
        assert!(session.is_initialized());
    }

    #[tokio::test]
    async fn concurrent_callers_share_the_handshake() {
        let mut service = MockEncryptionService::new();
        service.expect_initialize().times(1).returning(|| Ok(()));
        let session = EncryptionSession::new(Arc::new(service), config());

        let (a, b) = tokio::join!(session.initialize(), session.initialize());
        assert!(a.is_ok() && b.is_ok());
    }

    #[tokio::test]
    async fn failed_handshake_can_be_retried_later() {
        let mut service = MockEncryptionService::new();
        let mut seq = mockall::Sequence::new();
        service
            .expect_initialize()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(ServiceError::Handshake("connection reset".into())));
        service
            .expect_initialize()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        let session = EncryptionSession::new(Arc::new(service), config());

        assert!(matches!(
            session.initialize().await,
            Err(Error::InitFailed(_))
        ));
        assert!(!session.is_initialized());
        session.initialize().await.unwrap();
        assert!(session.is_initialized());
    }

    #[tokio::test]
    async fn binds_the_input_to_contract_and_bidder() {
        let contract = Address::repeat_byte(1);
        let bidder = Address::repeat_byte(2);
        let mut service = MockEncryptionService::new();
        service.expect_initialize().returning(|| Ok(()));
        service
            .expect_encrypt()
            .with(eq(EncryptedInput::new(contract, bidder).add_u8(42)))
            .times(1)
            .returning(|_| Ok(response()));
        let session = EncryptionSession::new(Arc::new(service), config());

        let bid = session.encrypt(42, contract, bidder).await.unwrap();
        assert_eq!(bid.handle, B256::repeat_byte(0xab));
        assert_eq!(bid.attestation, Bytes::from_static(&[1, 2, 3]));
    }

    #[tokio::test]
    async fn rejects_incomplete_responses() {
        let mut service = MockEncryptionService::new();
        service.expect_initialize().returning(|| Ok(()));
        let mut seq = mockall::Sequence::new();
        service
            .expect_encrypt()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(EncryptionResponse {
                    handles: vec![],
                    ..response()
                })
            });
        service
            .expect_encrypt()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(EncryptionResponse {
                    input_proof: None,
                    ..response()
                })
            });
        let session = EncryptionSession::new(Arc::new(service), config());

        for _ in 0..2 {
            assert!(matches!(
                session
                    .encrypt(1, Address::ZERO, Address::repeat_byte(2))
                    .await,
                Err(Error::Malformed(_))
            ));
        }
    }

    #[tokio::test]
    async fn unavailable_service_is_not_retried() {
        let mut service = MockEncryptionService::new();
        service
            .expect_initialize()
            .times(1)
            .returning(|| Err(ServiceError::Unavailable("insecure url".into())));
        let session = EncryptionSession::new(
            Arc::new(service),
            Config {
                retry: retry::Policy::default(),
                ..config()
            },
        );

        assert!(matches!(
            session.initialize().await,
            Err(Error::Unavailable(_))
        ));
    }
}
