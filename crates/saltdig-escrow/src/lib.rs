//! Typed wrapper over the on-chain USDC escrow contract.
//!
//! The gateway owns no state: it translates between the market's types
//! and the contract's fixed ABI, enforces the RPC deadline, and keeps
//! ERC-20 allowances ahead of USDC-moving writes. The transport behind
//! it is a trait so tests and the reconciler run against an in-memory
//! chain.

pub mod abi;
pub mod gateway;
pub mod keys;
pub mod mock;
pub mod rpc;

pub use abi::{Address, B256};
pub use gateway::{ChainStatus, EscrowGateway, GatewayConfig, OnChainBounty};
pub use keys::{KeyCipher, SealedKeyCipher};
pub use mock::MockChain;
pub use rpc::{EscrowRpc, Signer, TxHash};

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EscrowError {
    /// RPC transport failure or timeout. Retryable; the reconciler is
    /// the healing path.
    #[error("Escrow RPC failure: {0}")]
    Rpc(String),

    /// Contract revert surfaced by the node.
    #[error("Contract rejected call: {0}")]
    Reverted(String),

    #[error("Malformed return data: {0}")]
    Decode(String),

    #[error("Signer key error: {0}")]
    Key(String),
}

pub type Result<T> = std::result::Result<T, EscrowError>;
