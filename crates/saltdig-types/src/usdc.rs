use crate::amount::UsdcAmount;
use crate::ids::{AgentId, EscrowRecordId, ListingId};
use crate::lifecycle::LifecycleState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Off-chain shadow of the on-chain bounty status. Must mirror the last
/// observed chain state; the reconciler corrects drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Created,
    Claimed,
    Submitted,
    Approved,
    AutoReleased,
    Disputed,
    Cancelled,
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Claimed => "claimed",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::AutoReleased => "auto_released",
            Self::Disputed => "disputed",
            Self::Cancelled => "cancelled",
        })
    }
}

impl LifecycleState for EscrowStatus {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::AutoReleased | Self::Disputed | Self::Cancelled
        )
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use EscrowStatus::*;
        match (self, next) {
            (Created, Claimed) => true,
            (Created, Cancelled) => true,
            (Claimed, Submitted) => true,
            (Submitted, Approved) => true,
            (Submitted, Disputed) => true,
            (Submitted, AutoReleased) => true,
            _ => false,
        }
    }
}

/// One-to-one mirror of an on-chain bounty, keyed by the keccak hash of
/// the listing id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsdcEscrowRecord {
    pub id: EscrowRecordId,
    pub listing_id: ListingId,
    /// `0x`-prefixed keccak256 of the listing id, matching the contract.
    pub bounty_hash: String,
    pub poster: AgentId,
    pub worker: Option<AgentId>,
    pub amount: UsdcAmount,
    /// 10% of `amount`, locked by the worker at claim time.
    pub worker_stake: UsdcAmount,
    pub status: EscrowStatus,
    /// Hash of the last confirmed transaction touching this bounty.
    pub last_tx_hash: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed set of escrow-record fields a mutator may touch.
#[derive(Debug, Clone, Default)]
pub struct EscrowRecordPatch {
    pub status: Option<EscrowStatus>,
    /// Chain-authoritative correction: bypasses the transition table.
    /// Only the reconciler sets this.
    pub force_status: Option<EscrowStatus>,
    pub worker: Option<AgentId>,
    pub last_tx_hash: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escrow_transition_table() {
        use EscrowStatus::*;

        assert!(Created.can_transition_to(&Claimed));
        assert!(Created.can_transition_to(&Cancelled));
        assert!(Claimed.can_transition_to(&Submitted));
        assert!(Submitted.can_transition_to(&Approved));
        assert!(Submitted.can_transition_to(&Disputed));
        assert!(Submitted.can_transition_to(&AutoReleased));

        // Claimed bounties can no longer be cancelled, and nothing
        // leaves a terminal state.
        assert!(!Claimed.can_transition_to(&Cancelled));
        assert!(!Created.can_transition_to(&Submitted));
        assert!(!Approved.can_transition_to(&Disputed));
        assert!(!AutoReleased.can_transition_to(&Approved));
        assert!(!Cancelled.can_transition_to(&Claimed));
    }

    #[test]
    fn terminal_states() {
        use EscrowStatus::*;
        for status in [Approved, AutoReleased, Disputed, Cancelled] {
            assert!(status.is_terminal());
        }
        for status in [Created, Claimed, Submitted] {
            assert!(!status.is_terminal());
        }
    }
}
