//! Storage contract for Saltdig.
//!
//! Business code never issues SQL: every component talks to [`Store`],
//! which covers the lookups, uniqueness constraints, range queries, and
//! the transactional scope the state machines need. [`MemoryStore`] is
//! the reference implementation; a SQL-backed store is an external
//! concern that must satisfy the same contract.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use saltdig_types::{
    Agent, AgentId, AgentPatch, ChangeOrder, ChangeOrderId, ChangeOrderPatch, Competition,
    CompetitionEntry, CompetitionId, CompetitionPatch, DeferredPayout, DepositId, DepositPatch,
    EntryId, EntryPatch, EscrowRecordId, EscrowRecordPatch, EscrowStatus, LedgerEntry, Listing,
    ListingId, ListingPatch, MarketOffer, Milestone, MilestoneId, MilestonePatch,
    MilestoneSubmission, OfferId, OfferPatch, OrderId, OrderPatch, SaltAmount, ServiceOrder,
    SpecDeposit, SubmissionId, SubmissionPatch, UsdcEscrowRecord,
};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Union of the persistence operations the components rely on.
///
/// Compound operations (ledger transfer, order accept, milestone
/// approval, deposit freeze) wrap their reads and writes in
/// `begin_transaction` / `commit_transaction`; `rollback_transaction`
/// restores the pre-transaction state on any failure path.
#[async_trait]
pub trait Store: Send + Sync {
    // ---- transactional scope ----
    async fn begin_transaction(&self) -> Result<()>;
    async fn commit_transaction(&self) -> Result<()>;
    async fn rollback_transaction(&self) -> Result<()>;

    // ---- agents ----
    async fn insert_agent(&self, agent: Agent) -> Result<()>;
    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>>;
    async fn find_agent_by_api_key(&self, api_key: &str) -> Result<Option<Agent>>;
    async fn update_agent(&self, id: &AgentId, patch: AgentPatch) -> Result<Agent>;

    // ---- ledger ----
    async fn get_balance(&self, agent: &AgentId) -> Result<SaltAmount>;
    async fn set_balance(&self, agent: &AgentId, balance: SaltAmount) -> Result<()>;
    async fn record_ledger_entry(&self, entry: LedgerEntry) -> Result<()>;
    /// Entries touching `agent`, newest first.
    async fn ledger_history(&self, agent: &AgentId, limit: usize) -> Result<Vec<LedgerEntry>>;
    /// Balances ordered descending.
    async fn rich_list(&self, limit: usize) -> Result<Vec<(AgentId, SaltAmount)>>;
    /// Full journal, oldest first. Used by audits and conservation checks.
    async fn all_ledger_entries(&self) -> Result<Vec<LedgerEntry>>;

    // ---- listings ----
    async fn insert_listing(&self, listing: Listing) -> Result<()>;
    async fn get_listing(&self, id: &ListingId) -> Result<Option<Listing>>;
    async fn update_listing(&self, id: &ListingId, patch: ListingPatch) -> Result<Listing>;

    // ---- offers ----
    async fn insert_offer(&self, offer: MarketOffer) -> Result<()>;
    async fn get_offer(&self, id: &OfferId) -> Result<Option<MarketOffer>>;
    async fn update_offer(&self, id: &OfferId, patch: OfferPatch) -> Result<MarketOffer>;
    async fn offers_for_listing(&self, listing: &ListingId) -> Result<Vec<MarketOffer>>;

    // ---- service orders ----
    /// Rejects with `Conflict` while another non-terminal order exists
    /// for the same listing.
    async fn insert_order(&self, order: ServiceOrder) -> Result<()>;
    async fn get_order(&self, id: &OrderId) -> Result<Option<ServiceOrder>>;
    async fn active_order_for_listing(&self, listing: &ListingId)
        -> Result<Option<ServiceOrder>>;
    async fn update_order(&self, id: &OrderId, patch: OrderPatch) -> Result<ServiceOrder>;

    // ---- usdc escrow records ----
    /// One-to-one with the on-chain bounty; `Conflict` if the listing
    /// already has a record.
    async fn insert_escrow_record(&self, record: UsdcEscrowRecord) -> Result<()>;
    async fn get_escrow_record(&self, id: &EscrowRecordId) -> Result<Option<UsdcEscrowRecord>>;
    async fn escrow_record_for_listing(
        &self,
        listing: &ListingId,
    ) -> Result<Option<UsdcEscrowRecord>>;
    /// Reconciliation scan.
    async fn escrow_records_by_status(
        &self,
        status: EscrowStatus,
    ) -> Result<Vec<UsdcEscrowRecord>>;
    async fn update_escrow_record(
        &self,
        id: &EscrowRecordId,
        patch: EscrowRecordPatch,
    ) -> Result<UsdcEscrowRecord>;

    // ---- milestones ----
    /// Stores a whole plan atomically; `Conflict` if the listing
    /// already has one.
    async fn insert_milestone_plan(
        &self,
        listing: &ListingId,
        milestones: Vec<Milestone>,
    ) -> Result<()>;
    /// Plan ordered by `order_index`.
    async fn milestones_for_listing(&self, listing: &ListingId) -> Result<Vec<Milestone>>;
    async fn get_milestone(&self, id: &MilestoneId) -> Result<Option<Milestone>>;
    async fn update_milestone(&self, id: &MilestoneId, patch: MilestonePatch) -> Result<Milestone>;
    async fn insert_submission(&self, submission: MilestoneSubmission) -> Result<()>;
    async fn latest_submission(
        &self,
        milestone: &MilestoneId,
    ) -> Result<Option<MilestoneSubmission>>;
    async fn update_submission(
        &self,
        id: &SubmissionId,
        patch: SubmissionPatch,
    ) -> Result<MilestoneSubmission>;

    // ---- spec deposits ----
    /// `Conflict` while the listing has an active deposit.
    async fn insert_deposit(&self, deposit: SpecDeposit) -> Result<()>;
    async fn get_deposit(&self, id: &DepositId) -> Result<Option<SpecDeposit>>;
    async fn active_deposit_for_listing(&self, listing: &ListingId)
        -> Result<Option<SpecDeposit>>;
    async fn update_deposit(&self, id: &DepositId, patch: DepositPatch) -> Result<SpecDeposit>;

    // ---- change orders ----
    async fn insert_change_order(&self, order: ChangeOrder) -> Result<()>;
    async fn get_change_order(&self, id: &ChangeOrderId) -> Result<Option<ChangeOrder>>;
    async fn change_orders_for_listing(&self, listing: &ListingId) -> Result<Vec<ChangeOrder>>;
    async fn update_change_order(
        &self,
        id: &ChangeOrderId,
        patch: ChangeOrderPatch,
    ) -> Result<ChangeOrder>;

    // ---- competitions ----
    /// `Conflict` if the listing already has a competition.
    async fn insert_competition(&self, competition: Competition) -> Result<()>;
    async fn get_competition(&self, id: &CompetitionId) -> Result<Option<Competition>>;
    async fn competition_for_listing(&self, listing: &ListingId) -> Result<Option<Competition>>;
    async fn update_competition(
        &self,
        id: &CompetitionId,
        patch: CompetitionPatch,
    ) -> Result<Competition>;
    async fn insert_entry(&self, entry: CompetitionEntry) -> Result<()>;
    async fn get_entry(&self, id: &EntryId) -> Result<Option<CompetitionEntry>>;
    async fn entries_for_competition(
        &self,
        competition: &CompetitionId,
    ) -> Result<Vec<CompetitionEntry>>;
    async fn entry_count_for_agent(
        &self,
        competition: &CompetitionId,
        agent: &AgentId,
    ) -> Result<u32>;
    async fn update_entry(&self, id: &EntryId, patch: EntryPatch) -> Result<CompetitionEntry>;

    // ---- deferred payouts ----
    async fn record_deferred_payout(&self, payout: DeferredPayout) -> Result<()>;
    async fn deferred_payouts_for_listing(
        &self,
        listing: &ListingId,
    ) -> Result<Vec<DeferredPayout>>;
}
