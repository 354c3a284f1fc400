use crate::ids::{AgentId, ListingId, OrderId};
use crate::lifecycle::LifecycleState;
use crate::listing::Currency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Delivered,
    Accepted,
    Disputed,
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Delivered => "delivered",
            Self::Accepted => "accepted",
            Self::Disputed => "disputed",
            Self::Cancelled => "cancelled",
        })
    }
}

impl LifecycleState for OrderStatus {
    fn is_terminal(&self) -> bool {
        // Dispute resolution is an operator concern; from the machine's
        // point of view a disputed order takes no further transitions.
        matches!(self, Self::Accepted | Self::Disputed | Self::Cancelled)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Pending, InProgress) => true,
            // Seller may deliver directly without an explicit start.
            (Pending, Delivered) => true,
            (InProgress, Delivered) => true,
            (Delivered, Accepted) => true,
            (Delivered, Disputed) => true,
            (InProgress, Disputed) => true,
            (Pending, Cancelled) => true,
            _ => false,
        }
    }
}

/// Buyer/seller pairing against a service-mode listing. At most one
/// non-terminal order exists per listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOrder {
    pub id: OrderId,
    pub listing_id: ListingId,
    pub buyer: AgentId,
    pub seller: AgentId,
    /// Listing price snapshot at order time.
    pub price: String,
    pub currency: Currency,
    pub status: OrderStatus,
    /// What the buyer asked for.
    pub request: String,
    /// Delivery artifact; required before the order can be delivered.
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Closed set of order fields a mutator may touch.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub response: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_transition_table() {
        use OrderStatus::*;

        assert!(Pending.can_transition_to(&InProgress));
        assert!(Pending.can_transition_to(&Delivered));
        assert!(InProgress.can_transition_to(&Delivered));
        assert!(Delivered.can_transition_to(&Accepted));
        assert!(Delivered.can_transition_to(&Disputed));
        assert!(InProgress.can_transition_to(&Disputed));
        assert!(Pending.can_transition_to(&Cancelled));

        // No skipping to accepted, no reopening.
        assert!(!Pending.can_transition_to(&Accepted));
        assert!(!InProgress.can_transition_to(&Accepted));
        assert!(!Accepted.can_transition_to(&Disputed));
        assert!(!Disputed.can_transition_to(&Delivered));
        assert!(!Cancelled.can_transition_to(&InProgress));
    }

    #[test]
    fn terminal_states() {
        use OrderStatus::*;
        for status in [Accepted, Disputed, Cancelled] {
            assert!(status.is_terminal());
        }
        for status in [Pending, InProgress, Delivered] {
            assert!(!status.is_terminal());
        }
    }
}
