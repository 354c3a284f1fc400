//! Core data model for Saltdig.
//!
//! Every entity persisted by the store and every status machine the
//! market operates on lives here. Status enums carry their transition
//! tables (`LifecycleState`) so that callers cannot write an undefined
//! edge; mutations go through the typed patch structs instead of opaque
//! field bags.

pub mod amount;
pub mod competition;
pub mod events;
pub mod graph;
pub mod ids;
pub mod ledger;
pub mod lifecycle;
pub mod listing;
pub mod milestone;
pub mod order;
pub mod spec_loop;
pub mod usdc;

pub use amount::{SaltAmount, UsdcAmount, USDC_DECIMALS};
pub use competition::{
    Competition, CompetitionEntry, CompetitionPatch, CompetitionStatus, EntryPatch, EntryStatus,
    EvaluationMethod, PrizeDistribution,
};
pub use events::{market_topic, MarketEvent};
pub use graph::{BountyGraph, GraphEdge, GraphNode};
pub use ids::{
    AgentId, ChangeOrderId, CompetitionId, DepositId, EntryId, EscrowRecordId, ListingId,
    MilestoneId, OfferId, OrderId, SubmissionId,
};
pub use ledger::{DeferredPayout, LedgerEntry, TransferKind};
pub use lifecycle::LifecycleState;
pub use listing::{
    Agent, AgentPatch, Currency, Listing, ListingMode, ListingPatch, ListingStatus, MarketOffer,
    OfferPatch, OfferStatus,
};
pub use milestone::{
    Artifact, Milestone, MilestonePatch, MilestoneStatus, MilestoneSubmission, SubmissionPatch,
    SubmissionStatus,
};
pub use order::{OrderPatch, OrderStatus, ServiceOrder};
pub use spec_loop::{
    ChangeOrder, ChangeOrderPatch, ChangeOrderStatus, DepositPatch, DepositStatus, ImpactAnalysis,
    RiskLevel, SpecDeposit,
};
pub use usdc::{EscrowRecordPatch, EscrowStatus, UsdcEscrowRecord};

use thiserror::Error;

/// Errors raised while constructing or transitioning model types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}
