use crate::ids::{AgentId, ListingId, MilestoneId, SubmissionId};
use crate::lifecycle::LifecycleState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Submitted,
    Approved,
    Rejected,
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        })
    }
}

impl LifecycleState for MilestoneStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use MilestoneStatus::*;
        match (self, next) {
            (Pending, InProgress) => true,
            (InProgress, Submitted) => true,
            (Submitted, Approved) => true,
            // Rejection with feedback sends the work back to the
            // assignee rather than terminating the milestone.
            (Submitted, InProgress) => true,
            (Submitted, Rejected) => true,
            _ => false,
        }
    }
}

/// Weighted deliverable within a listing. Percentages over one listing
/// sum to 100 and the order indexes form a permutation of 0..n.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub listing_id: ListingId,
    pub title: String,
    pub description: String,
    /// Share of the listing price released on approval, in (0, 100].
    pub budget_percentage: f64,
    pub acceptance_criteria: String,
    pub order_index: u32,
    pub status: MilestoneStatus,
    pub assignee: Option<AgentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed set of milestone fields a mutator may touch.
#[derive(Debug, Clone, Default)]
pub struct MilestonePatch {
    pub status: Option<MilestoneStatus>,
    pub assignee: Option<AgentId>,
}

/// Deliverable reference attached to a submission or competition entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub description: String,
}

impl Artifact {
    pub fn is_complete(&self) -> bool {
        !self.kind.is_empty() && !self.url.is_empty() && !self.description.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl LifecycleState for SubmissionStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (SubmissionStatus::Pending, SubmissionStatus::Approved)
                | (SubmissionStatus::Pending, SubmissionStatus::Rejected)
        )
    }
}

/// At most one submission per milestone is in a non-terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneSubmission {
    pub id: SubmissionId,
    pub milestone_id: MilestoneId,
    pub agent_id: AgentId,
    pub artifacts: Vec<Artifact>,
    pub status: SubmissionStatus,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Closed set of submission fields a mutator may touch.
#[derive(Debug, Clone, Default)]
pub struct SubmissionPatch {
    pub status: Option<SubmissionStatus>,
    pub feedback: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestone_transition_table() {
        use MilestoneStatus::*;

        assert!(Pending.can_transition_to(&InProgress));
        assert!(InProgress.can_transition_to(&Submitted));
        assert!(Submitted.can_transition_to(&Approved));
        assert!(Submitted.can_transition_to(&InProgress));

        assert!(!Pending.can_transition_to(&Submitted));
        assert!(!Pending.can_transition_to(&Approved));
        assert!(!Approved.can_transition_to(&InProgress));
        assert!(!InProgress.can_transition_to(&Approved));
    }

    #[test]
    fn artifact_completeness() {
        let artifact = Artifact {
            kind: "repo".into(),
            url: "https://example.com/x".into(),
            description: "final build".into(),
        };
        assert!(artifact.is_complete());

        let missing_url = Artifact {
            url: String::new(),
            ..artifact
        };
        assert!(!missing_url.is_complete());
    }

    #[test]
    fn artifact_serde_uses_type_key() {
        let artifact = Artifact {
            kind: "doc".into(),
            url: "u".into(),
            description: "d".into(),
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["type"], "doc");
    }
}
