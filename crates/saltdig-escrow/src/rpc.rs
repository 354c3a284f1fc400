//! Chain transport behind a trait so the gateway, market, and
//! reconciler can run against a live node or the in-memory mock.

use crate::abi::Address;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use zeroize::Zeroizing;

/// `0x`-prefixed hash of a confirmed transaction.
pub type TxHash = String;

/// Signing identity for write calls: the address the platform has on
/// file for the agent plus the decrypted key material. The secret is
/// zeroized on drop and never printed.
pub struct Signer {
    pub address: Address,
    secret: Zeroizing<Vec<u8>>,
}

impl Signer {
    pub fn new(address: Address, secret: Vec<u8>) -> Self {
        Self {
            address,
            secret: Zeroizing::new(secret),
        }
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Raw chain access. `send` submits a signed transaction and resolves
/// only after one confirmation; both surface transport failures as the
/// retryable RPC error.
#[async_trait]
pub trait EscrowRpc: Send + Sync {
    /// Read-only `eth_call` against `to`.
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>>;

    /// Signed write to `to`; awaits one confirmation and returns the
    /// transaction hash.
    async fn send(&self, signer: &Signer, to: Address, data: Vec<u8>) -> Result<TxHash>;
}
