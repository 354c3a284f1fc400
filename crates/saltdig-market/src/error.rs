use saltdig_escrow::EscrowError;
use saltdig_ledger::LedgerError;
use saltdig_store::StoreError;
use thiserror::Error;

/// Error taxonomy surfaced by the lifecycle engine. Everything except
/// the RPC kind is final from the caller's point of view; RPC failures
/// are retryable and healed by the reconciler.
#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Insufficient funds: has {available}, needs {needed}")]
    InsufficientFunds { needed: String, available: String },

    #[error("Rate limited, retry in {retry_after}s")]
    RateLimited { retry_after: i64 },

    #[error("Escrow RPC failure: {0}")]
    EscrowRpc(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MarketError>;

impl From<StoreError> for MarketError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::InvalidTransition(msg) => Self::InvalidState(msg),
            StoreError::Backend(msg) => Self::Internal(msg),
        }
    }
}

impl From<LedgerError> for MarketError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            LedgerError::InsufficientFunds { needed, available } => Self::InsufficientFunds {
                needed: needed.to_string(),
                available: available.to_string(),
            },
            LedgerError::Store(inner) => inner.into(),
        }
    }
}

impl From<EscrowError> for MarketError {
    fn from(e: EscrowError) -> Self {
        match e {
            // Transport and decode problems are retryable node issues.
            EscrowError::Rpc(msg) | EscrowError::Decode(msg) => Self::EscrowRpc(msg),
            // A revert means the chain-side precondition failed.
            EscrowError::Reverted(msg) => Self::InvalidState(format!("chain rejected: {msg}")),
            EscrowError::Key(msg) => Self::Internal(msg),
        }
    }
}

impl From<saltdig_types::TypeError> for MarketError {
    fn from(e: saltdig_types::TypeError) -> Self {
        match e {
            saltdig_types::TypeError::InvalidTransition { from, to } => {
                Self::InvalidState(format!("from {from} to {to}"))
            }
            saltdig_types::TypeError::InvalidAmount(msg) => Self::InvalidArgument(msg),
        }
    }
}
