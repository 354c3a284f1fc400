use crate::graph::BountyGraph;
use crate::ids::{AgentId, ListingId, OfferId};
use crate::lifecycle::LifecycleState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settlement currency for a listing. Salt settles on the internal
/// ledger; USDC settles through the on-chain escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Salt,
    Usdc,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Salt => f.write_str("salt"),
            Currency::Usdc => f.write_str("usdc"),
        }
    }
}

/// A principal: API-keyed, Salt-balanced, optionally wallet-bound.
/// The Salt balance itself lives in the ledger tables and is mutated
/// only through ledger transfers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub display_name: String,
    /// Opaque bearer credential for the HTTP boundary.
    pub api_key: String,
    pub reputation: u64,
    /// EVM address, required before claiming USDC bounties.
    pub evm_address: Option<String>,
    /// AEAD-sealed signing key; the cipher lives outside the core.
    pub encrypted_signer_key: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// Closed set of agent fields a mutator may touch.
#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub display_name: Option<String>,
    pub reputation_delta: Option<i64>,
    pub evm_address: Option<String>,
    pub encrypted_signer_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingMode {
    Trade,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Clarifying,
    Frozen,
    Completed,
    Cancelled,
}

impl LifecycleState for ListingStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use ListingStatus::*;
        match (self, next) {
            // Spec deposit opens the clarify phase; freeze closes it.
            (Active, Clarifying) => true,
            (Clarifying, Frozen) => true,

            // Terminal payout completes from either working state.
            (Active, Completed) => true,
            (Frozen, Completed) => true,

            // Poster cancellation, gated elsewhere on worker commitment.
            (Active, Cancelled) => true,
            (Clarifying, Cancelled) => true,
            (Frozen, Cancelled) => true,

            _ => false,
        }
    }
}

/// A posted unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub poster: AgentId,
    pub title: String,
    pub description: String,
    pub currency: Currency,
    /// Decimal string: integer for Salt, up to six decimals for USDC.
    pub price: String,
    pub category: String,
    pub mode: ListingMode,
    pub status: ListingStatus,
    pub delivery_time: Option<String>,
    pub bounty_graph: Option<BountyGraph>,
    /// Accepted service orders settled against this listing.
    pub completed_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed set of listing fields a mutator may touch.
#[derive(Debug, Clone, Default)]
pub struct ListingPatch {
    pub status: Option<ListingStatus>,
    pub bounty_graph: Option<BountyGraph>,
    pub increment_completed_count: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Countered,
}

impl LifecycleState for OfferStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use OfferStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted) | (Pending, Rejected) | (Pending, Countered)
                | (Countered, Accepted)
                | (Countered, Rejected)
        )
    }
}

/// Advisory offer against a listing; binding only when accepted on a
/// Salt listing, which settles through the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOffer {
    pub id: OfferId,
    pub listing_id: ListingId,
    pub agent_id: AgentId,
    pub text: String,
    pub price: String,
    pub status: OfferStatus,
    /// Poster's counter price, set when the offer is countered.
    pub counter_price: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed set of offer fields a mutator may touch.
#[derive(Debug, Clone, Default)]
pub struct OfferPatch {
    pub status: Option<OfferStatus>,
    pub counter_price: Option<String>,
}
