//! Spec-loop economics: commitment deposits over the clarify phase and
//! change orders priced by deterministic impact analysis over the
//! listing's task graph.

use crate::error::{MarketError, Result};
use chrono::Utc;
use saltdig_common::EventBus;
use saltdig_ledger::Ledger;
use saltdig_store::Store;
use saltdig_types::{
    market_topic, AgentId, BountyGraph, ChangeOrder, ChangeOrderId, ChangeOrderPatch,
    ChangeOrderStatus, Currency, DepositId, DepositPatch, DepositStatus, ImpactAnalysis,
    LedgerEntry, Listing, ListingId, ListingPatch, ListingStatus, MarketEvent, RiskLevel,
    SaltAmount, SpecDeposit, TransferKind,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::info;

/// Fraction of affected cost charged as the change-order delta.
const CHANGE_COST_FACTOR: f64 = 0.20;

pub struct SpecLoopManager {
    store: Arc<dyn Store>,
    ledger: Arc<Ledger>,
    bus: Arc<EventBus>,
}

impl SpecLoopManager {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<Ledger>, bus: Arc<EventBus>) -> Self {
        Self { store, ledger, bus }
    }

    async fn listing(&self, id: &ListingId) -> Result<Listing> {
        self.store
            .get_listing(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("listing {id}")))
    }

    fn emit_spec(&self, listing_id: &ListingId, deposit_id: &DepositId, action: &str) {
        self.bus.emit(
            &market_topic(listing_id),
            MarketEvent::SpecTransition {
                deposit_id: deposit_id.to_string(),
                action: action.to_string(),
                timestamp: Utc::now(),
            },
        );
    }

    /// Poster locks commitment funds and opens the clarify phase.
    pub async fn create_spec_deposit(
        &self,
        listing_id: &ListingId,
        caller: &AgentId,
        amount: SaltAmount,
        currency: Currency,
    ) -> Result<SpecDeposit> {
        let listing = self.listing(listing_id).await?;
        if &listing.poster != caller {
            return Err(MarketError::Forbidden(
                "only the poster may create a spec deposit".into(),
            ));
        }
        if !matches!(
            listing.status,
            ListingStatus::Active | ListingStatus::Clarifying
        ) {
            return Err(MarketError::InvalidState(format!(
                "listing is {:?}",
                listing.status
            )));
        }
        // A USDC deposit path needs a deposit-vault contract; only the
        // Salt rail is wired.
        if currency != Currency::Salt {
            return Err(MarketError::InvalidArgument(
                "spec deposits settle in Salt only".into(),
            ));
        }
        if amount.is_zero() {
            return Err(MarketError::InvalidArgument(
                "deposit amount must be positive".into(),
            ));
        }

        let deposit = SpecDeposit {
            id: DepositId::generate(),
            listing_id: listing_id.clone(),
            depositor: caller.clone(),
            amount,
            currency,
            consumed: SaltAmount::ZERO,
            status: DepositStatus::Active,
            created_at: Utc::now(),
            frozen_at: None,
        };

        self.store.begin_transaction().await?;
        let result: Result<()> = async {
            self.store.insert_deposit(deposit.clone()).await?;
            self.ledger
                .transfer_within(
                    Some(caller.clone()),
                    None,
                    amount,
                    TransferKind::SpecDeposit,
                    format!("spec deposit for listing {listing_id}"),
                )
                .await?;
            if listing.status == ListingStatus::Active {
                self.store
                    .update_listing(
                        listing_id,
                        ListingPatch {
                            status: Some(ListingStatus::Clarifying),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.store.commit_transaction().await?;
                self.emit_spec(listing_id, &deposit.id, "deposit_created");
                info!(listing_id = %listing_id, amount = %amount, "Spec deposit created");
                Ok(deposit)
            }
            Err(e) => {
                self.store.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    /// Spend part of the active deposit on review work. No balance
    /// moves (the funds already sit with the system); the journal row
    /// documents the consumption.
    pub async fn consume(
        &self,
        listing_id: &ListingId,
        reason: &str,
        amount: SaltAmount,
    ) -> Result<SpecDeposit> {
        let deposit = self
            .store
            .active_deposit_for_listing(listing_id)
            .await?
            .ok_or_else(|| {
                MarketError::InvalidState(format!("listing {listing_id} has no active deposit"))
            })?;
        if amount.is_zero() {
            return Err(MarketError::InvalidArgument(
                "consume amount must be positive".into(),
            ));
        }
        if amount > deposit.remaining() {
            return Err(MarketError::InvalidArgument(format!(
                "consume {amount} exceeds remaining {}",
                deposit.remaining()
            )));
        }

        let consumed = deposit.consumed.saturating_add(amount);
        let exhausted = consumed == deposit.amount;

        self.store.begin_transaction().await?;
        let result: Result<SpecDeposit> = async {
            let updated = self
                .store
                .update_deposit(
                    &deposit.id,
                    DepositPatch {
                        consumed: Some(consumed),
                        status: exhausted.then_some(DepositStatus::Consumed),
                        ..Default::default()
                    },
                )
                .await?;

            // System-internal journal marker: both parties are the
            // system, so the row carries no balance effect.
            let now = Utc::now();
            self.store
                .record_ledger_entry(LedgerEntry {
                    id: format!(
                        "consume_{}",
                        hex::encode(
                            &blake3::hash(
                                format!("{}:{}", deposit.id, now.timestamp_nanos_opt().unwrap_or(0))
                                    .as_bytes()
                            )
                            .as_bytes()[..12]
                        )
                    ),
                    from: None,
                    to: None,
                    amount,
                    kind: TransferKind::SpecReviewPayment,
                    description: reason.to_string(),
                    timestamp: now,
                })
                .await?;
            Ok(updated)
        }
        .await;

        match result {
            Ok(updated) => {
                self.store.commit_transaction().await?;
                self.emit_spec(listing_id, &deposit.id, "deposit_consumed");
                info!(
                    listing_id = %listing_id,
                    amount = %amount,
                    consumed = %consumed,
                    "Spec deposit consumed"
                );
                Ok(updated)
            }
            Err(e) => {
                self.store.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    /// Poster freezes the spec: the listing locks, and the unconsumed
    /// remainder returns to the depositor.
    pub async fn freeze(&self, listing_id: &ListingId, caller: &AgentId) -> Result<SpecDeposit> {
        let listing = self.listing(listing_id).await?;
        if &listing.poster != caller {
            return Err(MarketError::Forbidden("only the poster may freeze".into()));
        }
        if listing.status != ListingStatus::Clarifying {
            return Err(MarketError::InvalidState(format!(
                "listing is {:?}, not clarifying",
                listing.status
            )));
        }
        let deposit = self
            .store
            .active_deposit_for_listing(listing_id)
            .await?
            .ok_or_else(|| {
                MarketError::InvalidState(format!("listing {listing_id} has no active deposit"))
            })?;

        let refund = deposit.remaining();

        self.store.begin_transaction().await?;
        let result: Result<SpecDeposit> = async {
            let updated = self
                .store
                .update_deposit(
                    &deposit.id,
                    DepositPatch {
                        status: Some(DepositStatus::Frozen),
                        frozen_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
            self.store
                .update_listing(
                    listing_id,
                    ListingPatch {
                        status: Some(ListingStatus::Frozen),
                        ..Default::default()
                    },
                )
                .await?;
            if !refund.is_zero() {
                self.ledger
                    .transfer_within(
                        None,
                        Some(deposit.depositor.clone()),
                        refund,
                        TransferKind::SpecFreezeCredit,
                        format!("freeze refund for listing {listing_id}"),
                    )
                    .await?;
            }
            Ok(updated)
        }
        .await;

        match result {
            Ok(updated) => {
                self.store.commit_transaction().await?;
                self.emit_spec(listing_id, &deposit.id, "frozen");
                info!(
                    listing_id = %listing_id,
                    refund = %refund,
                    "🔄 Spec frozen, remainder refunded"
                );
                Ok(updated)
            }
            Err(e) => {
                self.store.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    /// File a change order against a frozen spec; the cost delta is the
    /// impact analysis over the stored graph.
    pub async fn create_change_order(
        &self,
        listing_id: &ListingId,
        requester: &AgentId,
        affected_nodes: Vec<String>,
        description: String,
    ) -> Result<(ChangeOrder, ImpactAnalysis)> {
        let listing = self.listing(listing_id).await?;
        if listing.status != ListingStatus::Frozen {
            return Err(MarketError::InvalidState(
                "change orders require a frozen listing".into(),
            ));
        }
        if affected_nodes.is_empty() {
            return Err(MarketError::InvalidArgument(
                "at least one affected node is required".into(),
            ));
        }

        let graph = listing.bounty_graph.clone().unwrap_or_default();
        let impact = calculate_change_impact(&graph, &affected_nodes);

        let order = ChangeOrder {
            id: ChangeOrderId::generate(),
            listing_id: listing_id.clone(),
            requester: requester.clone(),
            description,
            affected_nodes,
            delta_cost: impact.delta_cost,
            delta_currency: listing.currency,
            risk: impact.risk,
            status: ChangeOrderStatus::Pending,
            escrow_id: None,
            created_at: Utc::now(),
            approved_at: None,
        };
        self.store.insert_change_order(order.clone()).await?;

        info!(
            listing_id = %listing_id,
            change_order_id = %order.id,
            delta_cost = order.delta_cost,
            risk = ?order.risk,
            "Change order created"
        );
        Ok((order, impact))
    }

    /// Poster approves a pending change order. A second approval is a
    /// conflict; creating the delta escrow is a later step.
    pub async fn approve_change_order(
        &self,
        change_order_id: &ChangeOrderId,
        caller: &AgentId,
    ) -> Result<ChangeOrder> {
        let order = self
            .store
            .get_change_order(change_order_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("change order {change_order_id}")))?;
        let listing = self.listing(&order.listing_id).await?;
        if &listing.poster != caller {
            return Err(MarketError::Forbidden(
                "only the poster may approve change orders".into(),
            ));
        }
        if listing.status != ListingStatus::Frozen {
            return Err(MarketError::InvalidState(
                "listing is no longer frozen".into(),
            ));
        }
        match order.status {
            ChangeOrderStatus::Pending => {}
            ChangeOrderStatus::Approved => {
                return Err(MarketError::Conflict(
                    "change order is already approved".into(),
                ))
            }
            other => {
                return Err(MarketError::InvalidState(format!(
                    "change order is {other:?}"
                )))
            }
        }

        let updated = self
            .store
            .update_change_order(
                change_order_id,
                ChangeOrderPatch {
                    status: Some(ChangeOrderStatus::Approved),
                    approved_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        info!(change_order_id = %change_order_id, "Change order approved");
        Ok(updated)
    }

    /// Poster rejects a pending change order.
    pub async fn reject_change_order(
        &self,
        change_order_id: &ChangeOrderId,
        caller: &AgentId,
    ) -> Result<ChangeOrder> {
        let order = self
            .store
            .get_change_order(change_order_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("change order {change_order_id}")))?;
        let listing = self.listing(&order.listing_id).await?;
        if &listing.poster != caller {
            return Err(MarketError::Forbidden(
                "only the poster may reject change orders".into(),
            ));
        }
        if order.status != ChangeOrderStatus::Pending {
            return Err(MarketError::InvalidState(format!(
                "change order is {:?}",
                order.status
            )));
        }

        Ok(self
            .store
            .update_change_order(
                change_order_id,
                ChangeOrderPatch {
                    status: Some(ChangeOrderStatus::Rejected),
                    ..Default::default()
                },
            )
            .await?)
    }
}

/// Deterministic scope-change pricing over the task graph.
///
/// Reverse-dependency BFS from the seeds: depth 1 is direct impact,
/// depth 2+ transitive. The delta cost is 20% of the summed cost over
/// every affected node (missing costs count as zero), rounded up.
pub fn calculate_change_impact(graph: &BountyGraph, seeds: &[String]) -> ImpactAnalysis {
    let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in &graph.nodes {
        for dependency in &node.depends {
            reverse
                .entry(dependency.as_str())
                .or_default()
                .push(node.id.as_str());
        }
    }

    let mut changed: Vec<String> = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    for seed in seeds {
        if visited.insert(seed.clone()) {
            changed.push(seed.clone());
            queue.push_back((seed.clone(), 0));
        }
    }

    let mut direct: Vec<String> = Vec::new();
    let mut transitive: Vec<String> = Vec::new();
    while let Some((id, depth)) = queue.pop_front() {
        if let Some(dependents) = reverse.get(id.as_str()) {
            for dependent in dependents {
                if visited.insert((*dependent).to_string()) {
                    if depth == 0 {
                        direct.push((*dependent).to_string());
                    } else {
                        transitive.push((*dependent).to_string());
                    }
                    queue.push_back(((*dependent).to_string(), depth + 1));
                }
            }
        }
    }

    // Stable output regardless of map iteration order.
    changed.sort();
    direct.sort();
    transitive.sort();

    let affected_cost: f64 = changed
        .iter()
        .chain(direct.iter())
        .chain(transitive.iter())
        .map(|id| graph.node(id).and_then(|n| n.cost).unwrap_or(0.0))
        .sum();
    let delta_cost = (affected_cost * CHANGE_COST_FACTOR).ceil() as u64;

    let total = changed.len() + direct.len() + transitive.len();
    let risk = if total <= 2 {
        RiskLevel::Low
    } else if total <= 5 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    };

    let reasoning = format!(
        "{} changed, {} directly affected, {} transitively affected; {:.0}% of {} affected cost",
        changed.len(),
        direct.len(),
        transitive.len(),
        CHANGE_COST_FACTOR * 100.0,
        affected_cost
    );

    ImpactAnalysis {
        changed,
        direct,
        transitive,
        total,
        delta_cost,
        risk,
        reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saltdig_store::MemoryStore;
    use saltdig_types::{GraphNode, ListingMode};

    fn graph(nodes: Vec<(&str, Vec<&str>, f64)>) -> BountyGraph {
        BountyGraph {
            nodes: nodes
                .into_iter()
                .map(|(id, depends, cost)| GraphNode {
                    id: id.into(),
                    status: None,
                    depends: depends.into_iter().map(String::from).collect(),
                    cost: Some(cost),
                })
                .collect(),
            edges: vec![],
        }
    }

    /// The spec's reference DAG: a -> b -> c, a -> d.
    fn reference_graph() -> BountyGraph {
        graph(vec![
            ("a", vec![], 100.0),
            ("b", vec!["a"], 50.0),
            ("c", vec!["b"], 50.0),
            ("d", vec!["a"], 20.0),
        ])
    }

    #[test]
    fn impact_on_reference_graph() {
        let impact = calculate_change_impact(&reference_graph(), &["a".to_string()]);
        assert_eq!(impact.changed, vec!["a"]);
        assert_eq!(impact.direct, vec!["b", "d"]);
        assert_eq!(impact.transitive, vec!["c"]);
        assert_eq!(impact.total, 4);
        assert_eq!(impact.delta_cost, 44); // ceil(220 * 0.2)
        assert_eq!(impact.risk, RiskLevel::Medium);
    }

    #[test]
    fn impact_is_deterministic() {
        let a = calculate_change_impact(&reference_graph(), &["a".to_string()]);
        let b = calculate_change_impact(&reference_graph(), &["a".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn impact_monotone_in_seeds() {
        let g = reference_graph();
        let single = calculate_change_impact(&g, &["b".to_string()]);
        let pair = calculate_change_impact(&g, &["b".to_string(), "d".to_string()]);
        assert!(pair.total >= single.total);

        let both = calculate_change_impact(&g, &["a".to_string(), "b".to_string()]);
        let just_a = calculate_change_impact(&g, &["a".to_string()]);
        assert!(both.total >= just_a.total);
    }

    #[test]
    fn risk_levels_follow_total() {
        let g = graph(vec![
            ("root", vec![], 1.0),
            ("n1", vec!["root"], 1.0),
            ("n2", vec!["root"], 1.0),
            ("n3", vec!["root"], 1.0),
            ("n4", vec!["root"], 1.0),
            ("n5", vec!["root"], 1.0),
        ]);
        let leaf = calculate_change_impact(&g, &["n1".to_string()]);
        assert_eq!(leaf.risk, RiskLevel::Low);
        let root = calculate_change_impact(&g, &["root".to_string()]);
        assert_eq!(root.total, 6);
        assert_eq!(root.risk, RiskLevel::High);
    }

    #[test]
    fn unknown_seeds_count_with_zero_cost() {
        let impact = calculate_change_impact(&reference_graph(), &["ghost".to_string()]);
        assert_eq!(impact.changed, vec!["ghost"]);
        assert_eq!(impact.total, 1);
        assert_eq!(impact.delta_cost, 0);
        assert_eq!(impact.risk, RiskLevel::Low);
    }

    // ---- manager flows ----

    struct Fixture {
        specs: SpecLoopManager,
        ledger: Arc<Ledger>,
        store: Arc<dyn Store>,
        listing: Listing,
        poster: AgentId,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone()));
        let bus = Arc::new(EventBus::new());
        let specs = SpecLoopManager::new(store.clone(), ledger.clone(), bus);

        let poster = AgentId::generate();
        ledger
            .transfer(
                None,
                Some(poster.clone()),
                SaltAmount::new(1_000),
                TransferKind::Issuance,
                "seed",
            )
            .await
            .unwrap();

        let now = Utc::now();
        let listing = Listing {
            id: ListingId::generate(),
            poster: poster.clone(),
            title: "spec loop target".into(),
            description: String::new(),
            currency: Currency::Salt,
            price: "500".into(),
            category: "engineering".into(),
            mode: ListingMode::Trade,
            status: ListingStatus::Active,
            delivery_time: None,
            bounty_graph: Some(reference_graph()),
            completed_count: 0,
            created_at: now,
            updated_at: now,
        };
        store.insert_listing(listing.clone()).await.unwrap();

        Fixture {
            specs,
            ledger,
            store,
            listing,
            poster,
        }
    }

    #[tokio::test]
    async fn deposit_consume_freeze_credit_law() {
        let f = fixture().await;

        f.specs
            .create_spec_deposit(&f.listing.id, &f.poster, SaltAmount::new(500), Currency::Salt)
            .await
            .unwrap();
        assert_eq!(
            f.ledger.balance(&f.poster).await.unwrap(),
            SaltAmount::new(500)
        );
        let listing = f.store.get_listing(&f.listing.id).await.unwrap().unwrap();
        assert_eq!(listing.status, ListingStatus::Clarifying);

        f.specs
            .consume(&f.listing.id, "architecture review", SaltAmount::new(120))
            .await
            .unwrap();
        // Consumption moves no agent balance.
        assert_eq!(
            f.ledger.balance(&f.poster).await.unwrap(),
            SaltAmount::new(500)
        );

        let deposit = f.specs.freeze(&f.listing.id, &f.poster).await.unwrap();
        assert_eq!(deposit.status, DepositStatus::Frozen);
        assert!(deposit.frozen_at.is_some());
        assert_eq!(
            f.ledger.balance(&f.poster).await.unwrap(),
            SaltAmount::new(880)
        );
        let listing = f.store.get_listing(&f.listing.id).await.unwrap().unwrap();
        assert_eq!(listing.status, ListingStatus::Frozen);
    }

    #[tokio::test]
    async fn consume_cannot_exceed_remaining() {
        let f = fixture().await;
        f.specs
            .create_spec_deposit(&f.listing.id, &f.poster, SaltAmount::new(100), Currency::Salt)
            .await
            .unwrap();
        f.specs
            .consume(&f.listing.id, "review", SaltAmount::new(80))
            .await
            .unwrap();

        assert!(matches!(
            f.specs
                .consume(&f.listing.id, "review", SaltAmount::new(30))
                .await,
            Err(MarketError::InvalidArgument(_))
        ));

        // Exhausting exactly flips the deposit to consumed.
        let deposit = f
            .specs
            .consume(&f.listing.id, "review", SaltAmount::new(20))
            .await
            .unwrap();
        assert_eq!(deposit.status, DepositStatus::Consumed);
    }

    #[tokio::test]
    async fn usdc_deposits_are_rejected() {
        let f = fixture().await;
        assert!(matches!(
            f.specs
                .create_spec_deposit(
                    &f.listing.id,
                    &f.poster,
                    SaltAmount::new(100),
                    Currency::Usdc
                )
                .await,
            Err(MarketError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn one_active_deposit_per_listing() {
        let f = fixture().await;
        f.specs
            .create_spec_deposit(&f.listing.id, &f.poster, SaltAmount::new(100), Currency::Salt)
            .await
            .unwrap();
        assert!(matches!(
            f.specs
                .create_spec_deposit(
                    &f.listing.id,
                    &f.poster,
                    SaltAmount::new(100),
                    Currency::Salt
                )
                .await,
            Err(MarketError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn change_orders_require_frozen_listing() {
        let f = fixture().await;
        let result = f
            .specs
            .create_change_order(
                &f.listing.id,
                &f.poster,
                vec!["a".into()],
                "swap the parser".into(),
            )
            .await;
        assert!(matches!(result, Err(MarketError::InvalidState(_))));

        f.specs
            .create_spec_deposit(&f.listing.id, &f.poster, SaltAmount::new(100), Currency::Salt)
            .await
            .unwrap();
        f.specs.freeze(&f.listing.id, &f.poster).await.unwrap();

        let (order, impact) = f
            .specs
            .create_change_order(
                &f.listing.id,
                &f.poster,
                vec!["a".into()],
                "swap the parser".into(),
            )
            .await
            .unwrap();
        assert_eq!(order.delta_cost, 44);
        assert_eq!(impact.risk, RiskLevel::Medium);
        assert_eq!(order.status, ChangeOrderStatus::Pending);
    }

    #[tokio::test]
    async fn double_approval_is_a_conflict() {
        let f = fixture().await;
        f.specs
            .create_spec_deposit(&f.listing.id, &f.poster, SaltAmount::new(100), Currency::Salt)
            .await
            .unwrap();
        f.specs.freeze(&f.listing.id, &f.poster).await.unwrap();
        let (order, _) = f
            .specs
            .create_change_order(&f.listing.id, &f.poster, vec!["a".into()], "change".into())
            .await
            .unwrap();

        let approved = f
            .specs
            .approve_change_order(&order.id, &f.poster)
            .await
            .unwrap();
        assert_eq!(approved.status, ChangeOrderStatus::Approved);
        assert!(approved.approved_at.is_some());

        assert!(matches!(
            f.specs.approve_change_order(&order.id, &f.poster).await,
            Err(MarketError::Conflict(_))
        ));
    }
}
