//! Bounty lifecycle engine.
//!
//! Listings, service orders, USDC escrow shadows, milestones, the
//! spec-loop economics, and competitions, all over one injected
//! [`Store`](saltdig_store::Store), with payouts split across the Salt
//! and USDC rails and a periodic reconciler healing chain drift.

pub mod agent;
pub mod competition;
pub mod error;
pub mod listing;
pub mod milestone;
pub mod order;
pub mod rail;
pub mod reconciler;
pub mod spec_loop;
pub mod usdc;

pub use agent::AgentRegistry;
pub use competition::{
    CompetitionConfig, CompetitionController, EvaluationOutcome, Evaluator,
};
pub use error::{MarketError, Result};
pub use listing::{ListingManager, NewListing, OfferResponse};
pub use milestone::{MilestoneController, MilestoneProgress, MilestoneSpec};
pub use order::OrderManager;
pub use rail::{PayoutAmount, PayoutRail, PayoutRails, PayoutReceipt, SaltRail, UsdcRail};
pub use reconciler::{
    AutoReleaseReconciler, ReconcileFailure, ReconcileReport, ReconcilerConfig,
    AUTO_RELEASE_SECS,
};
pub use spec_loop::{calculate_change_impact, SpecLoopManager};
pub use usdc::UsdcCoordinator;
