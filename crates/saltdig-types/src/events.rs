use crate::ids::ListingId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events published on topic `market:<listing_id>` whenever a component
/// mutates a listing. The SSE layer maps the serde tag to the SSE event
/// name verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MarketEvent {
    /// New offer created against the listing.
    Offer {
        offer_id: String,
        agent_id: String,
        price: String,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },

    /// Offer accepted / rejected / countered by the poster.
    OfferResponse {
        offer_id: String,
        response: String,
        counter_price: Option<String>,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },

    /// Service order start / deliver / accept / dispute.
    OrderTransition {
        order_id: String,
        from: String,
        to: String,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },

    MilestoneTransition {
        milestone_id: String,
        from: String,
        to: String,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },

    /// Spec deposit created / consumed / frozen.
    SpecTransition {
        deposit_id: String,
        action: String,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },

    CompetitionTransition {
        competition_id: String,
        from: String,
        to: String,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },

    /// USDC escrow record advanced (user call or reconciler).
    EscrowTransition {
        record_id: String,
        from: String,
        to: String,
        tx_hash: Option<String>,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
}

impl MarketEvent {
    /// Event name used as the SSE `event:` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::OfferResponse { .. } => "offer_response",
            Self::OrderTransition { .. } => "order_transition",
            Self::MilestoneTransition { .. } => "milestone_transition",
            Self::SpecTransition { .. } => "spec_transition",
            Self::CompetitionTransition { .. } => "competition_transition",
            Self::EscrowTransition { .. } => "escrow_transition",
        }
    }
}

/// Topic carrying all events for one listing.
pub fn market_topic(listing_id: &ListingId) -> String {
    format!("market:{listing_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_tag() {
        let event = MarketEvent::OrderTransition {
            order_id: "order_1".into(),
            from: "pending".into(),
            to: "in_progress".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order_transition");
        assert_eq!(json["data"]["order_id"], "order_1");
        assert_eq!(event.event_type(), "order_transition");
    }

    #[test]
    fn topic_format() {
        let id = ListingId::from_string("listing_ab");
        assert_eq!(market_topic(&id), "market:listing_ab");
    }
}
