//! Encryption of bids through a remote homomorphic encryption service.
//!
//! The service itself is consumed through the [`EncryptionService`] trait,
//! [`relayer::Relayer`] is the HTTP implementation. [`EncryptionSession`]
//! adds the lifecycle on top: a shared one-time handshake, timeouts and
//! validation of what the service returns.

pub mod relayer;
pub mod session;

pub use session::{Config, EncryptionSession};
use {
    alloy::primitives::{Address, B256, Bytes},
    std::time::Duration,
    thiserror::Error,
};

/// Plaintext input of an encryption request. The resulting ciphertexts are
/// only accepted by `contract` when submitted by `user`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedInput {
    pub contract: Address,
    pub user: Address,
    pub values: Vec<u8>,
}

impl EncryptedInput {
    pub fn new(contract: Address, user: Address) -> Self {
        Self {
            contract,
            user,
            values: Vec::new(),
        }
    }

    /// Adds an 8-bit unsigned value.
    pub fn add_u8(mut self, value: u8) -> Self {
        self.values.push(value);
        self
    }
}

/// What the service returns for an [`EncryptedInput`]: one handle per added
/// value and a proof covering all of them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncryptionResponse {
    pub handles: Vec<B256>,
    pub input_proof: Option<Bytes>,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service can't be used at all, e.g. because it is not configured.
    #[error("{0}")]
    Unavailable(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("{0}")]
    Request(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Unavailable(_))
    }
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait EncryptionService: Send + Sync {
    /// Performs the handshake (fetching public key material). Must succeed
    /// once before [`EncryptionService::encrypt`] is used.
    async fn initialize(&self) -> Result<(), ServiceError>;

    async fn encrypt(&self, input: EncryptedInput) -> Result<EncryptionResponse, ServiceError>;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("encryption unavailable: {0}")]
    Unavailable(String),
    #[error("encryption handshake failed: {0}")]
    InitFailed(String),
    #[error("encryption timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed encryption response: {0}")]
    Malformed(&'static str),
    #[error("encryption failed: {0}")]
    Failed(String),
}

impl Error {
    /// Maps a failed encryption request. Undecodable relayer responses
    /// usually mean the relayer is unreachable or overloaded.
    fn request(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(reason) => Self::Unavailable(reason),
            ServiceError::Handshake(reason) => Self::InitFailed(reason),
            ServiceError::Request(reason) if reason.contains("JSON") => {
                Self::Failed(format!("relayer connection issue ({reason})"))
            }
            ServiceError::Request(reason) => Self::Failed(reason),
        }
    }

    fn handshake(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(reason) => Self::Unavailable(reason),
            ServiceError::Handshake(reason) | ServiceError::Request(reason) => {
                Self::InitFailed(reason)
            }
        }
    }
}
