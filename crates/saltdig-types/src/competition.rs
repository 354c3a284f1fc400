use crate::ids::{AgentId, CompetitionId, EntryId, ListingId};
use crate::lifecycle::LifecycleState;
use crate::milestone::Artifact;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMethod {
    /// Scored by the external acceptance harness.
    Harness,
    /// Scored by the poster by hand.
    Manual,
    /// Scored by community vote.
    Vote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrizeDistribution {
    WinnerTakeAll,
    TopThree,
    Proportional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionStatus {
    Active,
    Evaluating,
    Finalized,
    Cancelled,
}

impl std::fmt::Display for CompetitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Evaluating => "evaluating",
            Self::Finalized => "finalized",
            Self::Cancelled => "cancelled",
        })
    }
}

impl LifecycleState for CompetitionStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Cancelled)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use CompetitionStatus::*;
        matches!(
            (self, next),
            (Active, Evaluating)
                | (Active, Finalized)
                | (Active, Cancelled)
                | (Evaluating, Finalized)
                | (Evaluating, Cancelled)
        )
    }
}

/// Multi-entry contest attached to a listing, resolving to a ranked
/// prize distribution over the listing's price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: CompetitionId,
    pub listing_id: ListingId,
    pub max_submissions_per_agent: u32,
    pub evaluation_method: EvaluationMethod,
    pub distribution: PrizeDistribution,
    /// Rank percentages for top-3 (must sum to 100); defaults 50/30/20.
    pub percentages: Vec<f64>,
    /// Score floor for the proportional strategy.
    pub min_score: Option<f64>,
    pub deadline: Option<DateTime<Utc>>,
    pub status: CompetitionStatus,
    pub winner: Option<AgentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed set of competition fields a mutator may touch.
#[derive(Debug, Clone, Default)]
pub struct CompetitionPatch {
    pub status: Option<CompetitionStatus>,
    pub winner: Option<AgentId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Evaluating,
    Scored,
    Winner,
    Disqualified,
}

impl LifecycleState for EntryStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Winner | Self::Disqualified)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use EntryStatus::*;
        matches!(
            (self, next),
            (Pending, Evaluating)
                | (Evaluating, Scored)
                | (Evaluating, Disqualified)
                | (Scored, Winner)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitionEntry {
    pub id: EntryId,
    pub competition_id: CompetitionId,
    pub agent_id: AgentId,
    pub artifacts: Vec<Artifact>,
    pub score: Option<f64>,
    pub rank: Option<u32>,
    pub status: EntryStatus,
    pub prize_amount: Option<f64>,
    pub disqualify_reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed set of entry fields a mutator may touch.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub status: Option<EntryStatus>,
    pub score: Option<f64>,
    pub rank: Option<u32>,
    pub prize_amount: Option<f64>,
    pub disqualify_reason: Option<String>,
}
