use {
    crate::{domain::AuctionId, encryption, ledger},
    alloy::primitives::{TxHash, U256},
    std::time::Duration,
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },
    #[error("no identity connected")]
    NotConnected,
    #[error("only the creator of the auction may do this")]
    Unauthorized,
    #[error("auction does not accept bids")]
    AuctionClosed,
    #[error("auction is still accepting bids")]
    NotExpired,
    #[error("results were already revealed")]
    AlreadyRevealed,
    #[error("a bid was already placed on this auction")]
    DuplicateBid,
    #[error("bid must be at least {minimum}")]
    BidTooLow { minimum: U256 },
    #[error("a bid for this auction is already being submitted")]
    BidInProgress,
    #[error("auction {0} not found")]
    NotFound(AuctionId),
    #[error("wrong network: expected chain {expected}, connected to {}", chain(.actual))]
    WrongNetwork { expected: u64, actual: Option<u64> },
    #[error("encryption unavailable: {0}")]
    EncryptionUnavailable(String),
    #[error("encryption handshake failed: {0}")]
    EncryptionInitFailed(String),
    #[error("encryption timed out after {0:?}")]
    EncryptionTimeout(Duration),
    #[error("malformed encryption response: {0}")]
    EncryptionMalformed(&'static str),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("failed to fetch from the ledger: {0}")]
    TransientFetchError(String),
    #[error("transaction was not accepted: {0}")]
    SubmissionFailed(String),
    #[error("transaction may have been sent, outcome unknown: {0}")]
    SubmissionOutcomeUnknown(String),
    #[error("transaction {tx_hash} reverted")]
    TransactionReverted { tx_hash: TxHash },
    #[error("outcome of transaction {tx_hash} is unknown")]
    UnknownOutcome { tx_hash: TxHash },
    #[error("unexpected ledger behavior: {0}")]
    ProtocolError(String),
}

fn chain(chain_id: &Option<u64>) -> String {
    match chain_id {
        Some(id) => format!("{id} ({})", contracts::alloy::networks::name(*id)),
        None => "an unknown chain".to_string(),
    }
}

impl Error {
    /// Whether simply repeating the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientFetchError(_)
                | Self::EncryptionUnavailable(_)
                | Self::EncryptionInitFailed(_)
                | Self::EncryptionTimeout(_)
                | Self::EncryptionMalformed(_)
                | Self::EncryptionFailed(_)
        )
    }

    /// Maps a failed read.
    pub(super) fn read(err: ledger::Error) -> Self {
        if err.is_transient() {
            Self::TransientFetchError(err.to_string())
        } else {
            Self::ProtocolError(err.to_string())
        }
    }
}

impl From<encryption::Error> for Error {
    fn from(err: encryption::Error) -> Self {
        match err {
            encryption::Error::Unavailable(reason) => Self::EncryptionUnavailable(reason),
            encryption::Error::InitFailed(reason) => Self::EncryptionInitFailed(reason),
            encryption::Error::Timeout(timeout) => Self::EncryptionTimeout(timeout),
            encryption::Error::Malformed(reason) => Self::EncryptionMalformed(reason),
            encryption::Error::Failed(reason) => Self::EncryptionFailed(reason),
        }
    }
}
