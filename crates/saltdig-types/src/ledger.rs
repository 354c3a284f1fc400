use crate::amount::{SaltAmount, UsdcAmount};
use crate::ids::{AgentId, ListingId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Journal tag describing why Salt moved. Issuance (`from = None`) and
/// burn (`to = None`) are only legal for the kinds that name a
/// controlled system-side flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Transfer,
    OrderEscrow,
    ServicePayment,
    MilestonePayment,
    SpecDeposit,
    SpecReviewPayment,
    SpecFreezeCredit,
    CompetitionPrize,
    OfferSettlement,
    Issuance,
    Burn,
}

impl TransferKind {
    /// Kinds permitted to issue Salt from the system side.
    pub fn allows_issuance(&self) -> bool {
        matches!(
            self,
            Self::Issuance
                | Self::ServicePayment
                | Self::MilestonePayment
                | Self::SpecFreezeCredit
                | Self::CompetitionPrize
        )
    }

    /// Kinds permitted to move Salt into the system (escrow/burn).
    pub fn allows_burn(&self) -> bool {
        matches!(self, Self::Burn | Self::OrderEscrow | Self::SpecDeposit)
    }
}

/// One row of the double-entry journal. A `None` party is the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub from: Option<AgentId>,
    pub to: Option<AgentId>,
    pub amount: SaltAmount,
    pub kind: TransferKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn involves(&self, agent: &AgentId) -> bool {
        self.from.as_ref() == Some(agent) || self.to.as_ref() == Some(agent)
    }

    /// Net effect on the aggregate agent-held supply.
    pub fn supply_delta(&self) -> i128 {
        match (&self.from, &self.to) {
            (Some(_), Some(_)) => 0,
            (None, Some(_)) => self.amount.units() as i128,
            (Some(_), None) => -(self.amount.units() as i128),
            (None, None) => 0,
        }
    }
}

/// USDC rail operation recorded instead of executed: milestone and
/// competition releases on USDC listings are settled off-chain later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredPayout {
    pub id: String,
    pub listing_id: ListingId,
    pub recipient: AgentId,
    pub amount: UsdcAmount,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supply_delta_signs() {
        let base = LedgerEntry {
            id: "e1".into(),
            from: Some(AgentId::from_string("a")),
            to: Some(AgentId::from_string("b")),
            amount: SaltAmount::new(10),
            kind: TransferKind::Transfer,
            description: String::new(),
            timestamp: Utc::now(),
        };
        assert_eq!(base.supply_delta(), 0);

        let issuance = LedgerEntry {
            from: None,
            kind: TransferKind::MilestonePayment,
            ..base.clone()
        };
        assert_eq!(issuance.supply_delta(), 10);

        let burn = LedgerEntry {
            to: None,
            kind: TransferKind::OrderEscrow,
            ..base
        };
        assert_eq!(burn.supply_delta(), -10);
    }

    #[test]
    fn issuance_and_burn_kind_gates() {
        assert!(TransferKind::MilestonePayment.allows_issuance());
        assert!(TransferKind::SpecFreezeCredit.allows_issuance());
        assert!(!TransferKind::Transfer.allows_issuance());

        assert!(TransferKind::OrderEscrow.allows_burn());
        assert!(TransferKind::SpecDeposit.allows_burn());
        assert!(!TransferKind::CompetitionPrize.allows_burn());
    }
}
