//! In-memory reference store.
//!
//! Tables live in one state struct guarded by a tokio `RwLock`;
//! `begin_transaction` snapshots the whole state and
//! `rollback_transaction` restores it, giving every compound operation
//! the read -> decide -> write scope the contract requires.

use crate::{Result, Store, StoreError};
use async_trait::async_trait;
use saltdig_types::lifecycle;
use saltdig_types::{
    Agent, AgentId, AgentPatch, ChangeOrder, ChangeOrderId, ChangeOrderPatch, Competition,
    CompetitionEntry, CompetitionId, CompetitionPatch, DeferredPayout, DepositId, DepositPatch,
    DepositStatus, EntryId, EntryPatch, EscrowRecordId, EscrowRecordPatch, EscrowStatus,
    LedgerEntry, LifecycleState, Listing, ListingId, ListingPatch, MarketOffer, Milestone,
    MilestoneId, MilestonePatch, MilestoneSubmission, OfferId, OfferPatch, OrderId, OrderPatch,
    SaltAmount, ServiceOrder, SpecDeposit, SubmissionId, SubmissionPatch, UsdcEscrowRecord,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Default, Clone)]
struct State {
    agents: HashMap<AgentId, Agent>,
    balances: HashMap<AgentId, SaltAmount>,
    ledger: Vec<LedgerEntry>,
    listings: HashMap<ListingId, Listing>,
    offers: HashMap<OfferId, MarketOffer>,
    orders: HashMap<OrderId, ServiceOrder>,
    escrow_records: HashMap<EscrowRecordId, UsdcEscrowRecord>,
    milestones: HashMap<MilestoneId, Milestone>,
    submissions: Vec<MilestoneSubmission>,
    deposits: HashMap<DepositId, SpecDeposit>,
    change_orders: HashMap<ChangeOrderId, ChangeOrder>,
    competitions: HashMap<CompetitionId, Competition>,
    entries: HashMap<EntryId, CompetitionEntry>,
    deferred_payouts: Vec<DeferredPayout>,
}

pub struct MemoryStore {
    state: RwLock<State>,
    backup: RwLock<Option<State>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            backup: RwLock::new(None),
        }
    }
}

fn checked_transition<S: LifecycleState>(current: &mut S, next: S) -> Result<()> {
    lifecycle::transition(current, next).map_err(|e| StoreError::InvalidTransition(e.to_string()))
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin_transaction(&self) -> Result<()> {
        let state = self.state.read().await;
        let mut backup = self.backup.write().await;
        *backup = Some(state.clone());
        debug!(storage = "memory", "Transaction began (snapshot created)");
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        let mut backup = self.backup.write().await;
        if backup.take().is_some() {
            debug!(storage = "memory", "Transaction committed");
        }
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        let mut backup = self.backup.write().await;
        if let Some(snapshot) = backup.take() {
            let mut state = self.state.write().await;
            *state = snapshot;
            info!(storage = "memory", "Transaction rolled back");
        }
        Ok(())
    }

    // ---- agents ----

    async fn insert_agent(&self, agent: Agent) -> Result<()> {
        let mut state = self.state.write().await;
        if state.agents.contains_key(&agent.id) {
            return Err(StoreError::Conflict(format!("agent {}", agent.id)));
        }
        state.agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.state.read().await.agents.get(id).cloned())
    }

    async fn find_agent_by_api_key(&self, api_key: &str) -> Result<Option<Agent>> {
        let state = self.state.read().await;
        Ok(state
            .agents
            .values()
            .find(|a| a.api_key == api_key)
            .cloned())
    }

    async fn update_agent(&self, id: &AgentId, patch: AgentPatch) -> Result<Agent> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("agent {id}")))?;

        if let Some(name) = patch.display_name {
            agent.display_name = name;
        }
        if let Some(delta) = patch.reputation_delta {
            agent.reputation = agent.reputation.saturating_add_signed(delta);
        }
        if let Some(address) = patch.evm_address {
            agent.evm_address = Some(address);
        }
        if let Some(sealed) = patch.encrypted_signer_key {
            agent.encrypted_signer_key = Some(sealed);
        }
        Ok(agent.clone())
    }

    // ---- ledger ----

    async fn get_balance(&self, agent: &AgentId) -> Result<SaltAmount> {
        let state = self.state.read().await;
        Ok(state.balances.get(agent).copied().unwrap_or(SaltAmount::ZERO))
    }

    async fn set_balance(&self, agent: &AgentId, balance: SaltAmount) -> Result<()> {
        let mut state = self.state.write().await;
        if balance.is_zero() {
            state.balances.remove(agent);
        } else {
            state.balances.insert(agent.clone(), balance);
        }
        Ok(())
    }

    async fn record_ledger_entry(&self, entry: LedgerEntry) -> Result<()> {
        let mut state = self.state.write().await;
        state.ledger.push(entry);
        Ok(())
    }

    async fn ledger_history(&self, agent: &AgentId, limit: usize) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<LedgerEntry> = state
            .ledger
            .iter()
            .filter(|e| e.involves(agent))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn rich_list(&self, limit: usize) -> Result<Vec<(AgentId, SaltAmount)>> {
        let state = self.state.read().await;
        let mut balances: Vec<(AgentId, SaltAmount)> = state
            .balances
            .iter()
            .map(|(id, amount)| (id.clone(), *amount))
            .collect();
        balances.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        balances.truncate(limit);
        Ok(balances)
    }

    async fn all_ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.state.read().await.ledger.clone())
    }

    // ---- listings ----

    async fn insert_listing(&self, listing: Listing) -> Result<()> {
        let mut state = self.state.write().await;
        if state.listings.contains_key(&listing.id) {
            return Err(StoreError::Conflict(format!("listing {}", listing.id)));
        }
        state.listings.insert(listing.id.clone(), listing);
        Ok(())
    }

    async fn get_listing(&self, id: &ListingId) -> Result<Option<Listing>> {
        Ok(self.state.read().await.listings.get(id).cloned())
    }

    async fn update_listing(&self, id: &ListingId, patch: ListingPatch) -> Result<Listing> {
        let mut state = self.state.write().await;
        let listing = state
            .listings
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("listing {id}")))?;

        if let Some(status) = patch.status {
            checked_transition(&mut listing.status, status)?;
        }
        if let Some(graph) = patch.bounty_graph {
            listing.bounty_graph = Some(graph);
        }
        if patch.increment_completed_count {
            listing.completed_count += 1;
        }
        listing.updated_at = chrono::Utc::now();
        Ok(listing.clone())
    }

    // ---- offers ----

    async fn insert_offer(&self, offer: MarketOffer) -> Result<()> {
        let mut state = self.state.write().await;
        state.offers.insert(offer.id.clone(), offer);
        Ok(())
    }

    async fn get_offer(&self, id: &OfferId) -> Result<Option<MarketOffer>> {
        Ok(self.state.read().await.offers.get(id).cloned())
    }

    async fn update_offer(&self, id: &OfferId, patch: OfferPatch) -> Result<MarketOffer> {
        let mut state = self.state.write().await;
        let offer = state
            .offers
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("offer {id}")))?;

        if let Some(status) = patch.status {
            checked_transition(&mut offer.status, status)?;
        }
        if let Some(counter) = patch.counter_price {
            offer.counter_price = Some(counter);
        }
        offer.updated_at = chrono::Utc::now();
        Ok(offer.clone())
    }

    async fn offers_for_listing(&self, listing: &ListingId) -> Result<Vec<MarketOffer>> {
        let state = self.state.read().await;
        let mut offers: Vec<MarketOffer> = state
            .offers
            .values()
            .filter(|o| &o.listing_id == listing)
            .cloned()
            .collect();
        offers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(offers)
    }

    // ---- service orders ----

    async fn insert_order(&self, order: ServiceOrder) -> Result<()> {
        let mut state = self.state.write().await;
        let open = state
            .orders
            .values()
            .any(|o| o.listing_id == order.listing_id && !o.status.is_terminal());
        if open {
            return Err(StoreError::Conflict(format!(
                "listing {} already has an open order",
                order.listing_id
            )));
        }
        state.orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn get_order(&self, id: &OrderId) -> Result<Option<ServiceOrder>> {
        Ok(self.state.read().await.orders.get(id).cloned())
    }

    async fn active_order_for_listing(
        &self,
        listing: &ListingId,
    ) -> Result<Option<ServiceOrder>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| &o.listing_id == listing && !o.status.is_terminal())
            .cloned())
    }

    async fn update_order(&self, id: &OrderId, patch: OrderPatch) -> Result<ServiceOrder> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;

        if let Some(status) = patch.status {
            checked_transition(&mut order.status, status)?;
        }
        if let Some(response) = patch.response {
            order.response = Some(response);
        }
        if let Some(at) = patch.delivered_at {
            order.delivered_at = Some(at);
        }
        if let Some(at) = patch.completed_at {
            order.completed_at = Some(at);
        }
        Ok(order.clone())
    }

    // ---- usdc escrow records ----

    async fn insert_escrow_record(&self, record: UsdcEscrowRecord) -> Result<()> {
        let mut state = self.state.write().await;
        let exists = state
            .escrow_records
            .values()
            .any(|r| r.listing_id == record.listing_id);
        if exists {
            return Err(StoreError::Conflict(format!(
                "listing {} already has an escrow record",
                record.listing_id
            )));
        }
        state.escrow_records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_escrow_record(&self, id: &EscrowRecordId) -> Result<Option<UsdcEscrowRecord>> {
        Ok(self.state.read().await.escrow_records.get(id).cloned())
    }

    async fn escrow_record_for_listing(
        &self,
        listing: &ListingId,
    ) -> Result<Option<UsdcEscrowRecord>> {
        let state = self.state.read().await;
        Ok(state
            .escrow_records
            .values()
            .find(|r| &r.listing_id == listing)
            .cloned())
    }

    async fn escrow_records_by_status(
        &self,
        status: EscrowStatus,
    ) -> Result<Vec<UsdcEscrowRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<UsdcEscrowRecord> = state
            .escrow_records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn update_escrow_record(
        &self,
        id: &EscrowRecordId,
        patch: EscrowRecordPatch,
    ) -> Result<UsdcEscrowRecord> {
        let mut state = self.state.write().await;
        let record = state
            .escrow_records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("escrow record {id}")))?;

        if let Some(status) = patch.force_status {
            // Chain-authoritative correction from the reconciler.
            record.status = status;
        } else if let Some(status) = patch.status {
            checked_transition(&mut record.status, status)?;
        }
        if let Some(worker) = patch.worker {
            record.worker = Some(worker);
        }
        if let Some(tx_hash) = patch.last_tx_hash {
            record.last_tx_hash = Some(tx_hash);
        }
        if let Some(at) = patch.submitted_at {
            record.submitted_at = Some(at);
        }
        if let Some(at) = patch.completed_at {
            record.completed_at = Some(at);
        }
        record.updated_at = chrono::Utc::now();
        Ok(record.clone())
    }

    // ---- milestones ----

    async fn insert_milestone_plan(
        &self,
        listing: &ListingId,
        milestones: Vec<Milestone>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let exists = state
            .milestones
            .values()
            .any(|m| &m.listing_id == listing);
        if exists {
            return Err(StoreError::Conflict(format!(
                "listing {listing} already has a milestone plan"
            )));
        }
        for milestone in milestones {
            state.milestones.insert(milestone.id.clone(), milestone);
        }
        Ok(())
    }

    async fn milestones_for_listing(&self, listing: &ListingId) -> Result<Vec<Milestone>> {
        let state = self.state.read().await;
        let mut plan: Vec<Milestone> = state
            .milestones
            .values()
            .filter(|m| &m.listing_id == listing)
            .cloned()
            .collect();
        plan.sort_by_key(|m| m.order_index);
        Ok(plan)
    }

    async fn get_milestone(&self, id: &MilestoneId) -> Result<Option<Milestone>> {
        Ok(self.state.read().await.milestones.get(id).cloned())
    }

    async fn update_milestone(
        &self,
        id: &MilestoneId,
        patch: MilestonePatch,
    ) -> Result<Milestone> {
        let mut state = self.state.write().await;
        let milestone = state
            .milestones
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("milestone {id}")))?;

        if let Some(status) = patch.status {
            checked_transition(&mut milestone.status, status)?;
        }
        if let Some(assignee) = patch.assignee {
            milestone.assignee = Some(assignee);
        }
        milestone.updated_at = chrono::Utc::now();
        Ok(milestone.clone())
    }

    async fn insert_submission(&self, submission: MilestoneSubmission) -> Result<()> {
        let mut state = self.state.write().await;
        let open = state
            .submissions
            .iter()
            .any(|s| s.milestone_id == submission.milestone_id && !s.status.is_terminal());
        if open {
            return Err(StoreError::Conflict(format!(
                "milestone {} already has a pending submission",
                submission.milestone_id
            )));
        }
        state.submissions.push(submission);
        Ok(())
    }

    async fn latest_submission(
        &self,
        milestone: &MilestoneId,
    ) -> Result<Option<MilestoneSubmission>> {
        let state = self.state.read().await;
        Ok(state
            .submissions
            .iter()
            .filter(|s| &s.milestone_id == milestone)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn update_submission(
        &self,
        id: &SubmissionId,
        patch: SubmissionPatch,
    ) -> Result<MilestoneSubmission> {
        let mut state = self.state.write().await;
        let submission = state
            .submissions
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("submission {id}")))?;

        if let Some(status) = patch.status {
            checked_transition(&mut submission.status, status)?;
        }
        if let Some(feedback) = patch.feedback {
            submission.feedback = Some(feedback);
        }
        Ok(submission.clone())
    }

    // ---- spec deposits ----

    async fn insert_deposit(&self, deposit: SpecDeposit) -> Result<()> {
        let mut state = self.state.write().await;
        let active = state
            .deposits
            .values()
            .any(|d| d.listing_id == deposit.listing_id && d.status == DepositStatus::Active);
        if active {
            return Err(StoreError::Conflict(format!(
                "listing {} already has an active deposit",
                deposit.listing_id
            )));
        }
        state.deposits.insert(deposit.id.clone(), deposit);
        Ok(())
    }

    async fn get_deposit(&self, id: &DepositId) -> Result<Option<SpecDeposit>> {
        Ok(self.state.read().await.deposits.get(id).cloned())
    }

    async fn active_deposit_for_listing(
        &self,
        listing: &ListingId,
    ) -> Result<Option<SpecDeposit>> {
        let state = self.state.read().await;
        Ok(state
            .deposits
            .values()
            .find(|d| &d.listing_id == listing && d.status == DepositStatus::Active)
            .cloned())
    }

    async fn update_deposit(&self, id: &DepositId, patch: DepositPatch) -> Result<SpecDeposit> {
        let mut state = self.state.write().await;
        let deposit = state
            .deposits
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("deposit {id}")))?;

        if let Some(status) = patch.status {
            checked_transition(&mut deposit.status, status)?;
        }
        if let Some(consumed) = patch.consumed {
            deposit.consumed = consumed;
        }
        if let Some(at) = patch.frozen_at {
            deposit.frozen_at = Some(at);
        }
        Ok(deposit.clone())
    }

    // ---- change orders ----

    async fn insert_change_order(&self, order: ChangeOrder) -> Result<()> {
        let mut state = self.state.write().await;
        state.change_orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn get_change_order(&self, id: &ChangeOrderId) -> Result<Option<ChangeOrder>> {
        Ok(self.state.read().await.change_orders.get(id).cloned())
    }

    async fn change_orders_for_listing(&self, listing: &ListingId) -> Result<Vec<ChangeOrder>> {
        let state = self.state.read().await;
        let mut orders: Vec<ChangeOrder> = state
            .change_orders
            .values()
            .filter(|c| &c.listing_id == listing)
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orders)
    }

    async fn update_change_order(
        &self,
        id: &ChangeOrderId,
        patch: ChangeOrderPatch,
    ) -> Result<ChangeOrder> {
        let mut state = self.state.write().await;
        let order = state
            .change_orders
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("change order {id}")))?;

        if let Some(status) = patch.status {
            checked_transition(&mut order.status, status)?;
        }
        if let Some(escrow_id) = patch.escrow_id {
            order.escrow_id = Some(escrow_id);
        }
        if let Some(at) = patch.approved_at {
            order.approved_at = Some(at);
        }
        Ok(order.clone())
    }

    // ---- competitions ----

    async fn insert_competition(&self, competition: Competition) -> Result<()> {
        let mut state = self.state.write().await;
        let exists = state
            .competitions
            .values()
            .any(|c| c.listing_id == competition.listing_id);
        if exists {
            return Err(StoreError::Conflict(format!(
                "listing {} already has a competition",
                competition.listing_id
            )));
        }
        state
            .competitions
            .insert(competition.id.clone(), competition);
        Ok(())
    }

    async fn get_competition(&self, id: &CompetitionId) -> Result<Option<Competition>> {
        Ok(self.state.read().await.competitions.get(id).cloned())
    }

    async fn competition_for_listing(
        &self,
        listing: &ListingId,
    ) -> Result<Option<Competition>> {
        let state = self.state.read().await;
        Ok(state
            .competitions
            .values()
            .find(|c| &c.listing_id == listing)
            .cloned())
    }

    async fn update_competition(
        &self,
        id: &CompetitionId,
        patch: CompetitionPatch,
    ) -> Result<Competition> {
        let mut state = self.state.write().await;
        let competition = state
            .competitions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("competition {id}")))?;

        if let Some(status) = patch.status {
            checked_transition(&mut competition.status, status)?;
        }
        if let Some(winner) = patch.winner {
            competition.winner = Some(winner);
        }
        competition.updated_at = chrono::Utc::now();
        Ok(competition.clone())
    }

    async fn insert_entry(&self, entry: CompetitionEntry) -> Result<()> {
        let mut state = self.state.write().await;
        state.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn get_entry(&self, id: &EntryId) -> Result<Option<CompetitionEntry>> {
        Ok(self.state.read().await.entries.get(id).cloned())
    }

    async fn entries_for_competition(
        &self,
        competition: &CompetitionId,
    ) -> Result<Vec<CompetitionEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<CompetitionEntry> = state
            .entries
            .values()
            .filter(|e| &e.competition_id == competition)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(entries)
    }

    async fn entry_count_for_agent(
        &self,
        competition: &CompetitionId,
        agent: &AgentId,
    ) -> Result<u32> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .values()
            .filter(|e| &e.competition_id == competition && &e.agent_id == agent)
            .count() as u32)
    }

    async fn update_entry(&self, id: &EntryId, patch: EntryPatch) -> Result<CompetitionEntry> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("entry {id}")))?;

        if let Some(status) = patch.status {
            checked_transition(&mut entry.status, status)?;
        }
        if let Some(score) = patch.score {
            entry.score = Some(score);
        }
        if let Some(rank) = patch.rank {
            entry.rank = Some(rank);
        }
        if let Some(prize) = patch.prize_amount {
            entry.prize_amount = Some(prize);
        }
        if let Some(reason) = patch.disqualify_reason {
            entry.disqualify_reason = Some(reason);
        }
        entry.updated_at = chrono::Utc::now();
        Ok(entry.clone())
    }

    // ---- deferred payouts ----

    async fn record_deferred_payout(&self, payout: DeferredPayout) -> Result<()> {
        let mut state = self.state.write().await;
        state.deferred_payouts.push(payout);
        Ok(())
    }

    async fn deferred_payouts_for_listing(
        &self,
        listing: &ListingId,
    ) -> Result<Vec<DeferredPayout>> {
        let state = self.state.read().await;
        Ok(state
            .deferred_payouts
            .iter()
            .filter(|p| &p.listing_id == listing)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use saltdig_types::{Currency, ListingMode, ListingStatus, OrderStatus};

    fn listing(poster: &AgentId) -> Listing {
        Listing {
            id: ListingId::generate(),
            poster: poster.clone(),
            title: "port the codec".into(),
            description: "details".into(),
            currency: Currency::Salt,
            price: "100".into(),
            category: "engineering".into(),
            mode: ListingMode::Service,
            status: ListingStatus::Active,
            delivery_time: None,
            bounty_graph: None,
            completed_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn order(listing: &Listing, buyer: &AgentId) -> ServiceOrder {
        ServiceOrder {
            id: OrderId::generate(),
            listing_id: listing.id.clone(),
            buyer: buyer.clone(),
            seller: listing.poster.clone(),
            price: listing.price.clone(),
            currency: listing.currency,
            status: OrderStatus::Pending,
            request: "do X".into(),
            response: None,
            created_at: Utc::now(),
            delivered_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn balances_default_to_zero() {
        let store = MemoryStore::new();
        let agent = AgentId::generate();
        assert_eq!(store.get_balance(&agent).await.unwrap(), SaltAmount::ZERO);

        store
            .set_balance(&agent, SaltAmount::new(40))
            .await
            .unwrap();
        assert_eq!(store.get_balance(&agent).await.unwrap(), SaltAmount::new(40));
    }

    #[tokio::test]
    async fn rollback_restores_every_table() {
        let store = MemoryStore::new();
        let poster = AgentId::generate();
        let l = listing(&poster);
        store.insert_listing(l.clone()).await.unwrap();
        store
            .set_balance(&poster, SaltAmount::new(10))
            .await
            .unwrap();

        store.begin_transaction().await.unwrap();
        store
            .set_balance(&poster, SaltAmount::new(999))
            .await
            .unwrap();
        store
            .update_listing(
                &l.id,
                ListingPatch {
                    status: Some(ListingStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.rollback_transaction().await.unwrap();

        assert_eq!(store.get_balance(&poster).await.unwrap(), SaltAmount::new(10));
        let restored = store.get_listing(&l.id).await.unwrap().unwrap();
        assert_eq!(restored.status, ListingStatus::Active);
    }

    #[tokio::test]
    async fn update_rejects_undefined_transitions() {
        let store = MemoryStore::new();
        let poster = AgentId::generate();
        let l = listing(&poster);
        store.insert_listing(l.clone()).await.unwrap();

        let result = store
            .update_listing(
                &l.id,
                ListingPatch {
                    status: Some(ListingStatus::Frozen),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn one_open_order_per_listing() {
        let store = MemoryStore::new();
        let poster = AgentId::generate();
        let buyer = AgentId::generate();
        let l = listing(&poster);
        store.insert_listing(l.clone()).await.unwrap();

        store.insert_order(order(&l, &buyer)).await.unwrap();
        let second = store.insert_order(order(&l, &buyer)).await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn rich_list_orders_by_balance_desc() {
        let store = MemoryStore::new();
        let a = AgentId::from_string("agent_a");
        let b = AgentId::from_string("agent_b");
        let c = AgentId::from_string("agent_c");
        store.set_balance(&a, SaltAmount::new(10)).await.unwrap();
        store.set_balance(&b, SaltAmount::new(30)).await.unwrap();
        store.set_balance(&c, SaltAmount::new(20)).await.unwrap();

        let list = store.rich_list(2).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], (b, SaltAmount::new(30)));
        assert_eq!(list[1], (c, SaltAmount::new(20)));
    }

    #[tokio::test]
    async fn duplicate_competition_conflicts() {
        use saltdig_types::{
            Competition, CompetitionStatus, EvaluationMethod, PrizeDistribution,
        };
        let store = MemoryStore::new();
        let listing_id = ListingId::generate();

        let make = || Competition {
            id: CompetitionId::generate(),
            listing_id: listing_id.clone(),
            max_submissions_per_agent: 1,
            evaluation_method: EvaluationMethod::Manual,
            distribution: PrizeDistribution::WinnerTakeAll,
            percentages: vec![50.0, 30.0, 20.0],
            min_score: None,
            deadline: None,
            status: CompetitionStatus::Active,
            winner: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        store.insert_competition(make()).await.unwrap();
        assert!(matches!(
            store.insert_competition(make()).await,
            Err(StoreError::Conflict(_))
        ));
    }
}
