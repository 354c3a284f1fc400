//! Milestone controller: plan validation, strict ordering, and
//! percentage-weighted partial releases against the listing price.

use crate::error::{MarketError, Result};
use crate::rail::{PayoutAmount, PayoutRails};
use chrono::Utc;
use saltdig_common::EventBus;
use saltdig_store::Store;
use saltdig_types::{
    market_topic, AgentId, Artifact, Currency, Listing, ListingId, ListingPatch, ListingStatus,
    MarketEvent, Milestone, MilestoneId, MilestonePatch, MilestoneStatus, MilestoneSubmission,
    SaltAmount, SubmissionId, SubmissionPatch, SubmissionStatus, TransferKind, UsdcAmount,
};
use std::sync::Arc;
use tracing::info;

/// Tolerance on the plan's percentage sum.
const BUDGET_SUM_EPSILON: f64 = 0.01;

/// Input for one milestone of a new plan.
#[derive(Debug, Clone)]
pub struct MilestoneSpec {
    pub title: String,
    pub description: String,
    pub budget_percentage: f64,
    pub acceptance_criteria: String,
}

/// Plan projection returned by `progress`.
#[derive(Debug, Clone)]
pub struct MilestoneProgress {
    pub total: usize,
    pub completed: usize,
    pub budget_released_percentage: f64,
    pub current_milestone: Option<Milestone>,
    pub milestones: Vec<Milestone>,
}

pub struct MilestoneController {
    store: Arc<dyn Store>,
    rails: Arc<PayoutRails>,
    bus: Arc<EventBus>,
}

impl MilestoneController {
    pub fn new(store: Arc<dyn Store>, rails: Arc<PayoutRails>, bus: Arc<EventBus>) -> Self {
        Self { store, rails, bus }
    }

    async fn listing(&self, id: &ListingId) -> Result<Listing> {
        self.store
            .get_listing(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("listing {id}")))
    }

    async fn milestone(&self, id: &MilestoneId) -> Result<Milestone> {
        self.store
            .get_milestone(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("milestone {id}")))
    }

    fn emit_transition(&self, milestone: &Milestone, from: MilestoneStatus, to: MilestoneStatus) {
        self.bus.emit(
            &market_topic(&milestone.listing_id),
            MarketEvent::MilestoneTransition {
                milestone_id: milestone.id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
                timestamp: Utc::now(),
            },
        );
    }

    /// Poster lays down the plan on a frozen listing. Percentages must
    /// each be in (0, 100] and sum to 100 within tolerance; the order
    /// index is the input position.
    pub async fn create_milestones(
        &self,
        listing_id: &ListingId,
        caller: &AgentId,
        specs: Vec<MilestoneSpec>,
    ) -> Result<Vec<Milestone>> {
        let listing = self.listing(listing_id).await?;
        if &listing.poster != caller {
            return Err(MarketError::Forbidden(
                "only the poster may create the plan".into(),
            ));
        }
        if listing.status != ListingStatus::Frozen {
            return Err(MarketError::InvalidState(
                "milestone plans require a frozen listing".into(),
            ));
        }
        if specs.is_empty() {
            return Err(MarketError::InvalidArgument("plan is empty".into()));
        }
        for spec in &specs {
            if spec.budget_percentage <= 0.0 || spec.budget_percentage > 100.0 {
                return Err(MarketError::InvalidArgument(format!(
                    "budget percentage {} out of (0, 100]",
                    spec.budget_percentage
                )));
            }
        }
        let sum: f64 = specs.iter().map(|s| s.budget_percentage).sum();
        if (sum - 100.0).abs() > BUDGET_SUM_EPSILON {
            return Err(MarketError::InvalidArgument(format!(
                "budget percentages sum to {sum}, expected 100"
            )));
        }

        let now = Utc::now();
        let milestones: Vec<Milestone> = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Milestone {
                id: MilestoneId::generate(),
                listing_id: listing_id.clone(),
                title: spec.title,
                description: spec.description,
                budget_percentage: spec.budget_percentage,
                acceptance_criteria: spec.acceptance_criteria,
                order_index: index as u32,
                status: MilestoneStatus::Pending,
                assignee: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        self.store
            .insert_milestone_plan(listing_id, milestones.clone())
            .await?;
        info!(
            listing_id = %listing_id,
            milestones = milestones.len(),
            "Milestone plan created"
        );
        Ok(milestones)
    }

    /// An agent starts a milestone; gated on every lower-indexed
    /// milestone being approved.
    pub async fn start(&self, milestone_id: &MilestoneId, agent: &AgentId) -> Result<Milestone> {
        let milestone = self.milestone(milestone_id).await?;
        if milestone.status != MilestoneStatus::Pending {
            return Err(MarketError::InvalidState(format!(
                "milestone is {:?}",
                milestone.status
            )));
        }

        let plan = self
            .store
            .milestones_for_listing(&milestone.listing_id)
            .await?;
        let blocked = plan.iter().any(|m| {
            m.order_index < milestone.order_index && m.status != MilestoneStatus::Approved
        });
        if blocked {
            return Err(MarketError::InvalidState(
                "earlier milestones are not yet approved".into(),
            ));
        }

        let updated = self
            .store
            .update_milestone(
                milestone_id,
                MilestonePatch {
                    status: Some(MilestoneStatus::InProgress),
                    assignee: Some(agent.clone()),
                },
            )
            .await?;
        self.emit_transition(&updated, MilestoneStatus::Pending, MilestoneStatus::InProgress);
        info!(milestone_id = %milestone_id, assignee = %agent, "Milestone started");
        Ok(updated)
    }

    /// Assignee submits work with at least one complete artifact.
    pub async fn submit(
        &self,
        milestone_id: &MilestoneId,
        agent: &AgentId,
        artifacts: Vec<Artifact>,
    ) -> Result<MilestoneSubmission> {
        let milestone = self.milestone(milestone_id).await?;
        if milestone.assignee.as_ref() != Some(agent) {
            return Err(MarketError::Forbidden("only the assignee may submit".into()));
        }
        if milestone.status != MilestoneStatus::InProgress {
            return Err(MarketError::InvalidState(format!(
                "milestone is {:?}, not in progress",
                milestone.status
            )));
        }
        if artifacts.is_empty() {
            return Err(MarketError::InvalidArgument(
                "at least one artifact is required".into(),
            ));
        }
        if let Some(incomplete) = artifacts.iter().find(|a| !a.is_complete()) {
            return Err(MarketError::InvalidArgument(format!(
                "artifact {:?} is missing type, url, or description",
                incomplete.url
            )));
        }

        self.store.begin_transaction().await?;
        let result: Result<MilestoneSubmission> = async {
            let updated = self
                .store
                .update_milestone(
                    milestone_id,
                    MilestonePatch {
                        status: Some(MilestoneStatus::Submitted),
                        ..Default::default()
                    },
                )
                .await?;

            let submission = MilestoneSubmission {
                id: SubmissionId::generate(),
                milestone_id: milestone_id.clone(),
                agent_id: agent.clone(),
                artifacts,
                status: SubmissionStatus::Pending,
                feedback: None,
                created_at: Utc::now(),
            };
            self.store.insert_submission(submission.clone()).await?;
            self.emit_transition(&updated, MilestoneStatus::InProgress, MilestoneStatus::Submitted);
            Ok(submission)
        }
        .await;

        match result {
            Ok(submission) => {
                self.store.commit_transaction().await?;
                info!(milestone_id = %milestone_id, "Milestone submitted");
                Ok(submission)
            }
            Err(e) => {
                self.store.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    /// Poster approves: releases the milestone's share of the listing
    /// price (Salt immediately, USDC deferred) and completes the
    /// listing when this was the last milestone.
    pub async fn approve(&self, milestone_id: &MilestoneId, caller: &AgentId) -> Result<Milestone> {
        let milestone = self.milestone(milestone_id).await?;
        let listing = self.listing(&milestone.listing_id).await?;
        if &listing.poster != caller {
            return Err(MarketError::Forbidden("only the poster may approve".into()));
        }
        if milestone.status != MilestoneStatus::Submitted {
            return Err(MarketError::InvalidState(format!(
                "milestone is {:?}, nothing to approve",
                milestone.status
            )));
        }
        let assignee = milestone.assignee.clone().ok_or_else(|| {
            MarketError::Internal(format!("milestone {milestone_id} has no assignee"))
        })?;

        self.store.begin_transaction().await?;
        let result: Result<Milestone> = async {
            let updated = self
                .store
                .update_milestone(
                    milestone_id,
                    MilestonePatch {
                        status: Some(MilestoneStatus::Approved),
                        ..Default::default()
                    },
                )
                .await?;

            if let Some(submission) = self.store.latest_submission(milestone_id).await? {
                if submission.status == SubmissionStatus::Pending {
                    self.store
                        .update_submission(
                            &submission.id,
                            SubmissionPatch {
                                status: Some(SubmissionStatus::Approved),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
            }

            let amount = release_amount(&listing, milestone.budget_percentage)?;
            self.rails
                .pay(
                    &listing,
                    &assignee,
                    amount,
                    TransferKind::MilestonePayment,
                    &format!("milestone {} of listing {}", milestone.order_index, listing.id),
                )
                .await?;

            // Completing the last milestone completes the listing.
            let plan = self
                .store
                .milestones_for_listing(&milestone.listing_id)
                .await?;
            let all_approved = plan.iter().all(|m| m.status == MilestoneStatus::Approved);
            if all_approved {
                self.store
                    .update_listing(
                        &milestone.listing_id,
                        ListingPatch {
                            status: Some(ListingStatus::Completed),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            Ok(updated)
        }
        .await;

        match result {
            Ok(updated) => {
                self.store.commit_transaction().await?;
                self.emit_transition(&updated, MilestoneStatus::Submitted, MilestoneStatus::Approved);
                info!(
                    milestone_id = %milestone_id,
                    percentage = milestone.budget_percentage,
                    "💰 Milestone approved and released"
                );
                Ok(updated)
            }
            Err(e) => {
                self.store.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    /// Poster rejects with feedback; work returns to the assignee.
    pub async fn reject(
        &self,
        milestone_id: &MilestoneId,
        caller: &AgentId,
        feedback: String,
    ) -> Result<Milestone> {
        let milestone = self.milestone(milestone_id).await?;
        let listing = self.listing(&milestone.listing_id).await?;
        if &listing.poster != caller {
            return Err(MarketError::Forbidden("only the poster may reject".into()));
        }
        if milestone.status != MilestoneStatus::Submitted {
            return Err(MarketError::InvalidState(format!(
                "milestone is {:?}, nothing to reject",
                milestone.status
            )));
        }
        if feedback.trim().is_empty() {
            return Err(MarketError::InvalidArgument(
                "rejection requires feedback".into(),
            ));
        }

        self.store.begin_transaction().await?;
        let result: Result<Milestone> = async {
            let updated = self
                .store
                .update_milestone(
                    milestone_id,
                    MilestonePatch {
                        status: Some(MilestoneStatus::InProgress),
                        ..Default::default()
                    },
                )
                .await?;
            if let Some(submission) = self.store.latest_submission(milestone_id).await? {
                if submission.status == SubmissionStatus::Pending {
                    self.store
                        .update_submission(
                            &submission.id,
                            SubmissionPatch {
                                status: Some(SubmissionStatus::Rejected),
                                feedback: Some(feedback.clone()),
                            },
                        )
                        .await?;
                }
            }
            Ok(updated)
        }
        .await;

        match result {
            Ok(updated) => {
                self.store.commit_transaction().await?;
                self.emit_transition(&updated, MilestoneStatus::Submitted, MilestoneStatus::InProgress);
                info!(milestone_id = %milestone_id, "Milestone rejected, returned to assignee");
                Ok(updated)
            }
            Err(e) => {
                self.store.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    pub async fn progress(&self, listing_id: &ListingId) -> Result<MilestoneProgress> {
        let milestones = self.store.milestones_for_listing(listing_id).await?;
        if milestones.is_empty() {
            return Err(MarketError::NotFound(format!(
                "listing {listing_id} has no milestone plan"
            )));
        }

        let completed = milestones
            .iter()
            .filter(|m| m.status == MilestoneStatus::Approved)
            .count();
        let budget_released_percentage: f64 = milestones
            .iter()
            .filter(|m| m.status == MilestoneStatus::Approved)
            .map(|m| m.budget_percentage)
            .sum();
        // First milestone still carrying work, in plan order.
        let current_milestone = milestones
            .iter()
            .find(|m| {
                matches!(
                    m.status,
                    MilestoneStatus::InProgress
                        | MilestoneStatus::Submitted
                        | MilestoneStatus::Pending
                )
            })
            .cloned();

        Ok(MilestoneProgress {
            total: milestones.len(),
            completed,
            budget_released_percentage,
            current_milestone,
            milestones,
        })
    }
}

/// Milestone release: listing price x percentage / 100, rounded to the
/// currency's base unit.
fn release_amount(listing: &Listing, percentage: f64) -> Result<PayoutAmount> {
    match listing.currency {
        Currency::Salt => {
            let price = SaltAmount::parse(&listing.price)?;
            let released = (price.units() as f64 * percentage / 100.0).round() as u64;
            Ok(PayoutAmount::Salt(SaltAmount::new(released)))
        }
        Currency::Usdc => {
            let price = UsdcAmount::parse(&listing.price)?;
            let released = (price.to_micros() as f64 * percentage / 100.0).round() as u64;
            Ok(PayoutAmount::Usdc(UsdcAmount::from_micros(released)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saltdig_ledger::Ledger;
    use saltdig_store::MemoryStore;
    use saltdig_types::ListingMode;

    struct Fixture {
        controller: MilestoneController,
        ledger: Arc<Ledger>,
        store: Arc<dyn Store>,
        listing: Listing,
        poster: AgentId,
        worker: AgentId,
    }

    async fn fixture(currency: Currency, price: &str) -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone()));
        let rails = Arc::new(PayoutRails::new(ledger.clone(), store.clone()));
        let bus = Arc::new(EventBus::new());
        let controller = MilestoneController::new(store.clone(), rails, bus);

        let poster = AgentId::generate();
        let worker = AgentId::generate();
        let now = Utc::now();
        let listing = Listing {
            id: ListingId::generate(),
            poster: poster.clone(),
            title: "build the pipeline".into(),
            description: String::new(),
            currency,
            price: price.into(),
            category: "engineering".into(),
            mode: ListingMode::Trade,
            status: ListingStatus::Frozen,
            delivery_time: None,
            bounty_graph: None,
            completed_count: 0,
            created_at: now,
            updated_at: now,
        };
        store.insert_listing(listing.clone()).await.unwrap();

        Fixture {
            controller,
            ledger,
            store,
            listing,
            poster,
            worker,
        }
    }

    fn spec(title: &str, pct: f64) -> MilestoneSpec {
        MilestoneSpec {
            title: title.into(),
            description: String::new(),
            budget_percentage: pct,
            acceptance_criteria: "works".into(),
        }
    }

    fn artifact() -> Artifact {
        Artifact {
            kind: "repo".into(),
            url: "https://example.com/pr/1".into(),
            description: "the change".into(),
        }
    }

    async fn run_to_submitted(f: &Fixture, milestone: &Milestone) {
        f.controller.start(&milestone.id, &f.worker).await.unwrap();
        f.controller
            .submit(&milestone.id, &f.worker, vec![artifact()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn plan_requires_percentages_summing_to_100() {
        let f = fixture(Currency::Salt, "1000").await;

        let bad = f
            .controller
            .create_milestones(
                &f.listing.id,
                &f.poster,
                vec![spec("a", 50.0), spec("b", 40.0)],
            )
            .await;
        assert!(matches!(bad, Err(MarketError::InvalidArgument(_))));

        let zero = f
            .controller
            .create_milestones(
                &f.listing.id,
                &f.poster,
                vec![spec("a", 0.0), spec("b", 100.0)],
            )
            .await;
        assert!(matches!(zero, Err(MarketError::InvalidArgument(_))));

        let plan = f
            .controller
            .create_milestones(
                &f.listing.id,
                &f.poster,
                vec![spec("a", 25.0), spec("b", 25.0), spec("c", 50.0)],
            )
            .await
            .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].order_index, 2);

        // Second plan conflicts.
        assert!(matches!(
            f.controller
                .create_milestones(&f.listing.id, &f.poster, vec![spec("x", 100.0)])
                .await,
            Err(MarketError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn out_of_order_start_is_rejected() {
        let f = fixture(Currency::Salt, "1000").await;
        let plan = f
            .controller
            .create_milestones(
                &f.listing.id,
                &f.poster,
                vec![spec("a", 25.0), spec("b", 25.0), spec("c", 50.0)],
            )
            .await
            .unwrap();

        let result = f.controller.start(&plan[2].id, &f.worker).await;
        assert!(matches!(result, Err(MarketError::InvalidState(_))));
    }

    #[tokio::test]
    async fn approvals_release_weighted_salt_and_complete_listing() {
        let f = fixture(Currency::Salt, "1000").await;
        let plan = f
            .controller
            .create_milestones(
                &f.listing.id,
                &f.poster,
                vec![spec("a", 25.0), spec("b", 25.0), spec("c", 50.0)],
            )
            .await
            .unwrap();

        for (milestone, expected_total) in plan.iter().zip([250u64, 500, 1000]) {
            run_to_submitted(&f, milestone).await;
            f.controller.approve(&milestone.id, &f.poster).await.unwrap();
            assert_eq!(
                f.ledger.balance(&f.worker).await.unwrap(),
                SaltAmount::new(expected_total)
            );
        }

        let listing = f.store.get_listing(&f.listing.id).await.unwrap().unwrap();
        assert_eq!(listing.status, ListingStatus::Completed);
    }

    #[tokio::test]
    async fn usdc_approval_defers_payout() {
        let f = fixture(Currency::Usdc, "600").await;
        let plan = f
            .controller
            .create_milestones(&f.listing.id, &f.poster, vec![spec("only", 100.0)])
            .await
            .unwrap();

        run_to_submitted(&f, &plan[0]).await;
        f.controller.approve(&plan[0].id, &f.poster).await.unwrap();

        let deferred = f
            .store
            .deferred_payouts_for_listing(&f.listing.id)
            .await
            .unwrap();
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].amount, UsdcAmount::parse("600").unwrap());
        assert_eq!(deferred[0].recipient, f.worker);
    }

    #[tokio::test]
    async fn reject_returns_work_with_feedback() {
        let f = fixture(Currency::Salt, "1000").await;
        let plan = f
            .controller
            .create_milestones(&f.listing.id, &f.poster, vec![spec("only", 100.0)])
            .await
            .unwrap();
        run_to_submitted(&f, &plan[0]).await;

        // Feedback is mandatory.
        assert!(matches!(
            f.controller
                .reject(&plan[0].id, &f.poster, "  ".into())
                .await,
            Err(MarketError::InvalidArgument(_))
        ));

        let rejected = f
            .controller
            .reject(&plan[0].id, &f.poster, "missing tests".into())
            .await
            .unwrap();
        assert_eq!(rejected.status, MilestoneStatus::InProgress);
        assert_eq!(rejected.assignee.as_ref(), Some(&f.worker));

        let submission = f
            .store
            .latest_submission(&plan[0].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.status, SubmissionStatus::Rejected);
        assert_eq!(submission.feedback.as_deref(), Some("missing tests"));

        // The assignee can resubmit.
        f.controller
            .submit(&plan[0].id, &f.worker, vec![artifact()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn progress_projection() {
        let f = fixture(Currency::Salt, "1000").await;
        let plan = f
            .controller
            .create_milestones(
                &f.listing.id,
                &f.poster,
                vec![spec("a", 30.0), spec("b", 70.0)],
            )
            .await
            .unwrap();

        run_to_submitted(&f, &plan[0]).await;
        f.controller.approve(&plan[0].id, &f.poster).await.unwrap();

        let progress = f.controller.progress(&f.listing.id).await.unwrap();
        assert_eq!(progress.total, 2);
        assert_eq!(progress.completed, 1);
        assert!((progress.budget_released_percentage - 30.0).abs() < 1e-9);
        assert_eq!(
            progress.current_milestone.as_ref().map(|m| m.order_index),
            Some(1)
        );
    }

    #[tokio::test]
    async fn submit_validates_artifacts() {
        let f = fixture(Currency::Salt, "1000").await;
        let plan = f
            .controller
            .create_milestones(&f.listing.id, &f.poster, vec![spec("only", 100.0)])
            .await
            .unwrap();
        f.controller.start(&plan[0].id, &f.worker).await.unwrap();

        assert!(matches!(
            f.controller.submit(&plan[0].id, &f.worker, vec![]).await,
            Err(MarketError::InvalidArgument(_))
        ));

        let incomplete = Artifact {
            kind: "repo".into(),
            url: String::new(),
            description: "d".into(),
        };
        assert!(matches!(
            f.controller
                .submit(&plan[0].id, &f.worker, vec![incomplete])
                .await,
            Err(MarketError::InvalidArgument(_))
        ));
    }
}
