use crate::amount::SaltAmount;
use crate::ids::{AgentId, ChangeOrderId, DepositId, ListingId};
use crate::lifecycle::LifecycleState;
use crate::listing::Currency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Active,
    Frozen,
    Consumed,
    Converted,
}

impl LifecycleState for DepositStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Consumed | Self::Converted)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use DepositStatus::*;
        matches!(
            (self, next),
            (Active, Frozen) | (Active, Consumed) | (Frozen, Converted)
        )
    }
}

/// Commitment funds locked by the poster during the clarify phase.
/// At most one active deposit exists per listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecDeposit {
    pub id: DepositId,
    pub listing_id: ListingId,
    /// Always the listing poster.
    pub depositor: AgentId,
    pub amount: SaltAmount,
    pub currency: Currency,
    /// Running total spent on reviews; never exceeds `amount`.
    pub consumed: SaltAmount,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
    pub frozen_at: Option<DateTime<Utc>>,
}

impl SpecDeposit {
    pub fn remaining(&self) -> SaltAmount {
        self.amount.saturating_sub(self.consumed)
    }
}

/// Closed set of deposit fields a mutator may touch.
#[derive(Debug, Clone, Default)]
pub struct DepositPatch {
    pub status: Option<DepositStatus>,
    pub consumed: Option<SaltAmount>,
    pub frozen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Deterministic result of propagating a scope change through the
/// listing's task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    /// The seed nodes themselves.
    pub changed: Vec<String>,
    /// Nodes one reverse-dependency hop from a seed.
    pub direct: Vec<String>,
    /// Nodes two or more hops out.
    pub transitive: Vec<String>,
    pub total: usize,
    /// `ceil(0.2 x sum of affected node costs)`.
    pub delta_cost: u64,
    pub risk: RiskLevel,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrderStatus {
    Pending,
    Approved,
    Rejected,
    Implemented,
}

impl LifecycleState for ChangeOrderStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Implemented)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use ChangeOrderStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Implemented)
        )
    }
}

/// Post-freeze scope change with a computed cost delta. Only valid
/// while the parent listing is frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOrder {
    pub id: ChangeOrderId,
    pub listing_id: ListingId,
    pub requester: AgentId,
    pub description: String,
    pub affected_nodes: Vec<String>,
    pub delta_cost: u64,
    pub delta_currency: Currency,
    pub risk: RiskLevel,
    pub status: ChangeOrderStatus,
    /// Delta escrow created by a later implementation step.
    pub escrow_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

/// Closed set of change-order fields a mutator may touch.
#[derive(Debug, Clone, Default)]
pub struct ChangeOrderPatch {
    pub status: Option<ChangeOrderStatus>,
    pub escrow_id: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}
