//! Payout rails: the Salt rail settles through the ledger, the USDC
//! rail records a deferred payout for the off-chain emulation of
//! multi-release amounts (the contract supports a single release per
//! bounty, exercised by the normal approve path).

use crate::error::{MarketError, Result};
use async_trait::async_trait;
use saltdig_ledger::Ledger;
use saltdig_store::Store;
use saltdig_types::{
    AgentId, Currency, DeferredPayout, Listing, SaltAmount, TransferKind, UsdcAmount,
};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub enum PayoutAmount {
    Salt(SaltAmount),
    Usdc(UsdcAmount),
}

#[derive(Debug, Clone)]
pub enum PayoutReceipt {
    /// Settled immediately on the internal ledger.
    Ledger { entry_id: String },
    /// Recorded for later settlement on the USDC rail.
    Deferred { payout_id: String },
}

/// Currency-specific settlement behind one seam.
#[async_trait]
pub trait PayoutRail: Send + Sync {
    async fn pay(
        &self,
        listing: &Listing,
        recipient: &AgentId,
        amount: PayoutAmount,
        kind: TransferKind,
        description: &str,
    ) -> Result<PayoutReceipt>;
}

/// System-to-agent issuance on the internal ledger. Callers hold the
/// enclosing store transaction.
pub struct SaltRail {
    ledger: Arc<Ledger>,
}

impl SaltRail {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl PayoutRail for SaltRail {
    async fn pay(
        &self,
        _listing: &Listing,
        recipient: &AgentId,
        amount: PayoutAmount,
        kind: TransferKind,
        description: &str,
    ) -> Result<PayoutReceipt> {
        let amount = match amount {
            PayoutAmount::Salt(a) => a,
            PayoutAmount::Usdc(_) => {
                return Err(MarketError::InvalidArgument(
                    "salt rail cannot settle a USDC amount".into(),
                ))
            }
        };
        let entry = self
            .ledger
            .transfer_within(None, Some(recipient.clone()), amount, kind, description)
            .await?;
        Ok(PayoutReceipt::Ledger { entry_id: entry.id })
    }
}

/// Deferred USDC settlement: the payout is made auditable now and
/// executed by an operator step outside the core.
pub struct UsdcRail {
    store: Arc<dyn Store>,
}

impl UsdcRail {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PayoutRail for UsdcRail {
    async fn pay(
        &self,
        listing: &Listing,
        recipient: &AgentId,
        amount: PayoutAmount,
        _kind: TransferKind,
        description: &str,
    ) -> Result<PayoutReceipt> {
        let amount = match amount {
            PayoutAmount::Usdc(a) => a,
            PayoutAmount::Salt(_) => {
                return Err(MarketError::InvalidArgument(
                    "usdc rail cannot settle a Salt amount".into(),
                ))
            }
        };
        let now = chrono::Utc::now();
        let seed = format!(
            "{}:{}:{}:{}",
            listing.id,
            recipient,
            description,
            now.timestamp_nanos_opt().unwrap_or(0)
        );
        let payout = DeferredPayout {
            id: format!(
                "payout_{}",
                hex::encode(&blake3::hash(seed.as_bytes()).as_bytes()[..12])
            ),
            listing_id: listing.id.clone(),
            recipient: recipient.clone(),
            amount,
            reason: description.to_string(),
            created_at: now,
        };
        let payout_id = payout.id.clone();
        self.store.record_deferred_payout(payout).await?;
        info!(
            listing_id = %listing.id,
            recipient = %recipient,
            amount = %amount,
            "USDC payout deferred for off-chain settlement"
        );
        Ok(PayoutReceipt::Deferred { payout_id })
    }
}

/// Dispatch by listing currency.
pub struct PayoutRails {
    salt: SaltRail,
    usdc: UsdcRail,
}

impl PayoutRails {
    pub fn new(ledger: Arc<Ledger>, store: Arc<dyn Store>) -> Self {
        Self {
            salt: SaltRail::new(ledger),
            usdc: UsdcRail::new(store),
        }
    }

    pub async fn pay(
        &self,
        listing: &Listing,
        recipient: &AgentId,
        amount: PayoutAmount,
        kind: TransferKind,
        description: &str,
    ) -> Result<PayoutReceipt> {
        match listing.currency {
            Currency::Salt => {
                self.salt
                    .pay(listing, recipient, amount, kind, description)
                    .await
            }
            Currency::Usdc => {
                self.usdc
                    .pay(listing, recipient, amount, kind, description)
                    .await
            }
        }
    }
}
