//! Double-entry Salt ledger.
//!
//! Balances are mutated only here. Every transfer runs inside a store
//! transaction: debit, credit, and the journal row commit together or
//! not at all. A `None` party is the system side; issuance and burn are
//! restricted to the kinds that name a controlled flow.

use saltdig_store::{Store, StoreError};
use saltdig_types::{AgentId, LedgerEntry, SaltAmount, TransferKind};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Upper bound for a single transfer, in Salt.
pub const MAX_TRANSFER: SaltAmount = SaltAmount::new(10_000);

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid transfer: {0}")]
    InvalidArgument(String),

    #[error("Insufficient funds: has {available}, needs {needed}")]
    InsufficientFunds {
        needed: SaltAmount,
        available: SaltAmount,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn balance(&self, agent: &AgentId) -> Result<SaltAmount> {
        Ok(self.store.get_balance(agent).await?)
    }

    /// Atomic Salt movement. `from = None` issues from the system,
    /// `to = None` moves into the system (escrow/burn).
    pub async fn transfer(
        &self,
        from: Option<AgentId>,
        to: Option<AgentId>,
        amount: SaltAmount,
        kind: TransferKind,
        description: impl Into<String>,
    ) -> Result<LedgerEntry> {
        self.validate(&from, &to, amount, kind)?;

        self.store.begin_transaction().await?;
        match self.transfer_inner(from, to, amount, kind, description.into()).await {
            Ok(entry) => {
                self.store.commit_transaction().await?;
                info!(
                    entry_id = %entry.id,
                    from = entry.from.as_ref().map(|a| a.as_str()).unwrap_or("system"),
                    to = entry.to.as_ref().map(|a| a.as_str()).unwrap_or("system"),
                    amount = entry.amount.units(),
                    kind = ?entry.kind,
                    "✅ Transfer committed"
                );
                Ok(entry)
            }
            Err(e) => {
                warn!(error = %e, "❌ Transfer rolled back");
                self.store.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    /// Transfer for callers that already hold an open store
    /// transaction (order accept, milestone approval, deposit freeze).
    /// Performs the same validation and balance movement but leaves
    /// commit/rollback to the enclosing scope.
    pub async fn transfer_within(
        &self,
        from: Option<AgentId>,
        to: Option<AgentId>,
        amount: SaltAmount,
        kind: TransferKind,
        description: impl Into<String>,
    ) -> Result<LedgerEntry> {
        self.validate(&from, &to, amount, kind)?;
        self.transfer_inner(from, to, amount, kind, description.into())
            .await
    }

    fn validate(
        &self,
        from: &Option<AgentId>,
        to: &Option<AgentId>,
        amount: SaltAmount,
        kind: TransferKind,
    ) -> Result<()> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidArgument(
                "amount must be positive".into(),
            ));
        }
        if amount > MAX_TRANSFER {
            return Err(LedgerError::InvalidArgument(format!(
                "amount {amount} exceeds the {MAX_TRANSFER} per-transfer cap"
            )));
        }
        match (from, to) {
            (None, None) => {
                return Err(LedgerError::InvalidArgument(
                    "transfer needs at least one non-system party".into(),
                ))
            }
            (Some(a), Some(b)) if a == b => {
                return Err(LedgerError::InvalidArgument(
                    "self-transfers are rejected".into(),
                ))
            }
            (None, Some(_)) if !kind.allows_issuance() => {
                return Err(LedgerError::InvalidArgument(format!(
                    "kind {kind:?} cannot issue from the system"
                )))
            }
            (Some(_), None) if !kind.allows_burn() => {
                return Err(LedgerError::InvalidArgument(format!(
                    "kind {kind:?} cannot move funds into the system"
                )))
            }
            _ => {}
        }
        Ok(())
    }

    async fn transfer_inner(
        &self,
        from: Option<AgentId>,
        to: Option<AgentId>,
        amount: SaltAmount,
        kind: TransferKind,
        description: String,
    ) -> Result<LedgerEntry> {
        if let Some(ref debtor) = from {
            let available = self.store.get_balance(debtor).await?;
            let remaining = available.checked_sub(amount).ok_or(
                LedgerError::InsufficientFunds {
                    needed: amount,
                    available,
                },
            )?;
            self.store.set_balance(debtor, remaining).await?;
        }

        if let Some(ref creditor) = to {
            let current = self.store.get_balance(creditor).await?;
            let updated = current.checked_add(amount).ok_or_else(|| {
                LedgerError::InvalidArgument(format!("balance overflow for {creditor}"))
            })?;
            self.store.set_balance(creditor, updated).await?;
        }

        let now = chrono::Utc::now();
        let entry = LedgerEntry {
            id: entry_id(&from, &to, amount, now.timestamp_nanos_opt().unwrap_or(0)),
            from,
            to,
            amount,
            kind,
            description,
            timestamp: now,
        };
        self.store.record_ledger_entry(entry.clone()).await?;
        Ok(entry)
    }

    /// Journal entries touching `agent`, newest first.
    pub async fn history(&self, agent: &AgentId, limit: usize) -> Result<Vec<LedgerEntry>> {
        Ok(self.store.ledger_history(agent, limit).await?)
    }

    /// Agents ordered by balance, richest first.
    pub async fn rich_list(&self, limit: usize) -> Result<Vec<(AgentId, SaltAmount)>> {
        Ok(self.store.rich_list(limit).await?)
    }

    /// Net Salt the system has issued minus what it absorbed. Equals
    /// the sum of agent balances when the journal is the only mutator.
    pub async fn system_delta(&self) -> Result<i128> {
        let entries = self.store.all_ledger_entries().await?;
        Ok(entries.iter().map(|e| e.supply_delta()).sum())
    }
}

fn entry_id(from: &Option<AgentId>, to: &Option<AgentId>, amount: SaltAmount, nanos: i64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(from.as_ref().map(|a| a.as_str()).unwrap_or("system").as_bytes());
    hasher.update(to.as_ref().map(|a| a.as_str()).unwrap_or("system").as_bytes());
    hasher.update(&amount.units().to_le_bytes());
    hasher.update(&nanos.to_le_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use saltdig_store::MemoryStore;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryStore::new()))
    }

    async fn fund(ledger: &Ledger, agent: &AgentId, amount: u64) {
        ledger
            .transfer(
                None,
                Some(agent.clone()),
                SaltAmount::new(amount),
                TransferKind::Issuance,
                "test funding",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transfer_moves_balance_and_journals() {
        let ledger = ledger();
        let a = AgentId::from_string("agent_a");
        let b = AgentId::from_string("agent_b");
        fund(&ledger, &a, 100).await;

        let entry = ledger
            .transfer(
                Some(a.clone()),
                Some(b.clone()),
                SaltAmount::new(30),
                TransferKind::Transfer,
                "payment",
            )
            .await
            .unwrap();

        assert_eq!(ledger.balance(&a).await.unwrap(), SaltAmount::new(70));
        assert_eq!(ledger.balance(&b).await.unwrap(), SaltAmount::new(30));
        assert_eq!(entry.amount, SaltAmount::new(30));

        let history = ledger.history(&a, 10).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn insufficient_funds_leaves_state_untouched() {
        let ledger = ledger();
        let a = AgentId::from_string("agent_a");
        let b = AgentId::from_string("agent_b");
        fund(&ledger, &a, 50).await;

        let result = ledger
            .transfer(
                Some(a.clone()),
                Some(b.clone()),
                SaltAmount::new(100),
                TransferKind::Transfer,
                "too much",
            )
            .await;
        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));

        assert_eq!(ledger.balance(&a).await.unwrap(), SaltAmount::new(50));
        assert_eq!(ledger.balance(&b).await.unwrap(), SaltAmount::ZERO);
        assert_eq!(ledger.history(&b, 10).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn rejects_zero_oversized_and_self_transfers() {
        let ledger = ledger();
        let a = AgentId::from_string("agent_a");
        fund(&ledger, &a, 100).await;

        for (from, to, amount) in [
            (Some(a.clone()), Some(a.clone()), 10u64),
            (Some(a.clone()), None, 0),
            (None, Some(a.clone()), 10_001),
        ] {
            let result = ledger
                .transfer(
                    from,
                    to,
                    SaltAmount::new(amount),
                    TransferKind::Issuance,
                    "bad",
                )
                .await;
            assert!(matches!(result, Err(LedgerError::InvalidArgument(_))));
        }
    }

    #[tokio::test]
    async fn issuance_and_burn_respect_kind_gates() {
        let ledger = ledger();
        let a = AgentId::from_string("agent_a");

        // Plain transfer cannot mint.
        let result = ledger
            .transfer(
                None,
                Some(a.clone()),
                SaltAmount::new(10),
                TransferKind::Transfer,
                "mint?",
            )
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidArgument(_))));

        fund(&ledger, &a, 100).await;

        // Escrow burn is allowed; prize kind is not a burn kind.
        assert!(ledger
            .transfer(
                Some(a.clone()),
                None,
                SaltAmount::new(10),
                TransferKind::OrderEscrow,
                "escrow",
            )
            .await
            .is_ok());
        assert!(ledger
            .transfer(
                Some(a.clone()),
                None,
                SaltAmount::new(10),
                TransferKind::CompetitionPrize,
                "bad burn",
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn system_delta_tracks_issuance_and_burn() {
        let ledger = ledger();
        let a = AgentId::from_string("agent_a");
        fund(&ledger, &a, 100).await;
        assert_eq!(ledger.system_delta().await.unwrap(), 100);

        ledger
            .transfer(
                Some(a.clone()),
                None,
                SaltAmount::new(40),
                TransferKind::SpecDeposit,
                "deposit",
            )
            .await
            .unwrap();
        assert_eq!(ledger.system_delta().await.unwrap(), 60);
        assert_eq!(ledger.balance(&a).await.unwrap(), SaltAmount::new(60));
    }
}
