//! Competition controller: entry admission, evaluation dispatch, and
//! ranked prize distribution over the listing price.

use crate::error::{MarketError, Result};
use crate::rail::{PayoutAmount, PayoutRails};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use saltdig_common::EventBus;
use saltdig_store::Store;
use saltdig_types::{
    market_topic, AgentId, Artifact, Competition, CompetitionEntry, CompetitionId,
    CompetitionPatch, CompetitionStatus, Currency, EntryId, EntryPatch, EntryStatus,
    EvaluationMethod, Listing, ListingId, ListingMode, MarketEvent, PrizeDistribution,
    SaltAmount, TransferKind, UsdcAmount,
};
use std::sync::Arc;
use tracing::{info, warn};

const PERCENTAGE_EPSILON: f64 = 0.01;
const DEFAULT_TOP3: [f64; 3] = [50.0, 30.0, 20.0];

/// Result of an external evaluation run (acceptance harness, manual
/// review, or vote tally).
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub success: bool,
    pub score: f64,
    pub details: String,
    pub feedback: Option<String>,
}

/// External scorer. The harness variant hands artifacts plus the
/// listing id to the sandbox; manual and vote variants are operator
/// callbacks with the same shape.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        listing_id: &ListingId,
        entry: &CompetitionEntry,
    ) -> std::result::Result<EvaluationOutcome, String>;
}

/// Configuration for a new competition; unset fields take defaults.
#[derive(Debug, Clone)]
pub struct CompetitionConfig {
    pub evaluation_method: EvaluationMethod,
    pub distribution: PrizeDistribution,
    pub max_submissions_per_agent: Option<u32>,
    pub percentages: Option<Vec<f64>>,
    pub min_score: Option<f64>,
    pub deadline: Option<DateTime<Utc>>,
}

pub struct CompetitionController {
    store: Arc<dyn Store>,
    rails: Arc<PayoutRails>,
    bus: Arc<EventBus>,
}

impl CompetitionController {
    pub fn new(store: Arc<dyn Store>, rails: Arc<PayoutRails>, bus: Arc<EventBus>) -> Self {
        Self { store, rails, bus }
    }

    async fn listing(&self, id: &ListingId) -> Result<Listing> {
        self.store
            .get_listing(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("listing {id}")))
    }

    async fn competition(&self, id: &CompetitionId) -> Result<Competition> {
        self.store
            .get_competition(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("competition {id}")))
    }

    fn emit_transition(&self, listing_id: &ListingId, competition: &Competition, from: &str) {
        self.bus.emit(
            &market_topic(listing_id),
            MarketEvent::CompetitionTransition {
                competition_id: competition.id.to_string(),
                from: from.to_string(),
                to: competition.status.to_string(),
                timestamp: Utc::now(),
            },
        );
    }

    /// Poster opens a competition on a bounty-style (non-service)
    /// listing; one competition per listing.
    pub async fn create_competition(
        &self,
        listing_id: &ListingId,
        caller: &AgentId,
        config: CompetitionConfig,
    ) -> Result<Competition> {
        let listing = self.listing(listing_id).await?;
        if &listing.poster != caller {
            return Err(MarketError::Forbidden(
                "only the poster may open a competition".into(),
            ));
        }
        if listing.mode != ListingMode::Trade {
            return Err(MarketError::InvalidArgument(
                "competitions attach to bounty listings, not services".into(),
            ));
        }

        let percentages = match (&config.distribution, config.percentages) {
            (PrizeDistribution::TopThree, Some(p)) => {
                let sum: f64 = p.iter().sum();
                if (sum - 100.0).abs() > PERCENTAGE_EPSILON {
                    return Err(MarketError::InvalidArgument(format!(
                        "top-3 percentages sum to {sum}, expected 100"
                    )));
                }
                p
            }
            (PrizeDistribution::TopThree, None) => DEFAULT_TOP3.to_vec(),
            (_, _) => DEFAULT_TOP3.to_vec(),
        };

        let now = Utc::now();
        let competition = Competition {
            id: CompetitionId::generate(),
            listing_id: listing_id.clone(),
            max_submissions_per_agent: config.max_submissions_per_agent.unwrap_or(1),
            evaluation_method: config.evaluation_method,
            distribution: config.distribution,
            percentages,
            min_score: config.min_score,
            deadline: config.deadline,
            status: CompetitionStatus::Active,
            winner: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_competition(competition.clone()).await?;

        info!(
            competition_id = %competition.id,
            listing_id = %listing_id,
            method = ?competition.evaluation_method,
            distribution = ?competition.distribution,
            "Competition created"
        );
        Ok(competition)
    }

    /// Admit an entry while the competition is open and the agent has
    /// quota left.
    pub async fn submit(
        &self,
        competition_id: &CompetitionId,
        agent: &AgentId,
        artifacts: Vec<Artifact>,
    ) -> Result<CompetitionEntry> {
        let competition = self.competition(competition_id).await?;
        if competition.status != CompetitionStatus::Active {
            return Err(MarketError::InvalidState(format!(
                "competition is {:?}",
                competition.status
            )));
        }
        if let Some(deadline) = competition.deadline {
            if Utc::now() > deadline {
                return Err(MarketError::InvalidState(
                    "competition deadline has passed".into(),
                ));
            }
        }
        let existing = self
            .store
            .entry_count_for_agent(competition_id, agent)
            .await?;
        if existing >= competition.max_submissions_per_agent {
            return Err(MarketError::InvalidState(format!(
                "agent already has {existing} of {} entries",
                competition.max_submissions_per_agent
            )));
        }
        if artifacts.is_empty() || artifacts.iter().any(|a| !a.is_complete()) {
            return Err(MarketError::InvalidArgument(
                "entries require complete artifacts".into(),
            ));
        }

        let now = Utc::now();
        let entry = CompetitionEntry {
            id: EntryId::generate(),
            competition_id: competition_id.clone(),
            agent_id: agent.clone(),
            artifacts,
            score: None,
            rank: None,
            status: EntryStatus::Pending,
            prize_amount: None,
            disqualify_reason: None,
            submitted_at: now,
            updated_at: now,
        };
        self.store.insert_entry(entry.clone()).await?;
        info!(entry_id = %entry.id, competition_id = %competition_id, "Entry admitted");
        Ok(entry)
    }

    /// Run the external evaluator over one entry. A thrown evaluation
    /// disqualifies the entry with the reason; a successful one stores
    /// the numeric score.
    pub async fn evaluate(
        &self,
        entry_id: &EntryId,
        evaluator: &dyn Evaluator,
    ) -> Result<CompetitionEntry> {
        let entry = self
            .store
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("entry {entry_id}")))?;
        if entry.status != EntryStatus::Pending {
            return Err(MarketError::InvalidState(format!(
                "entry is {:?}, not pending",
                entry.status
            )));
        }
        let competition = self.competition(&entry.competition_id).await?;

        let entry = self
            .store
            .update_entry(
                entry_id,
                EntryPatch {
                    status: Some(EntryStatus::Evaluating),
                    ..Default::default()
                },
            )
            .await?;
        if competition.status == CompetitionStatus::Active {
            let updated = self
                .store
                .update_competition(
                    &competition.id,
                    CompetitionPatch {
                        status: Some(CompetitionStatus::Evaluating),
                        ..Default::default()
                    },
                )
                .await?;
            self.emit_transition(&competition.listing_id, &updated, "active");
        }

        match evaluator.evaluate(&competition.listing_id, &entry).await {
            Ok(outcome) if outcome.success => {
                let scored = self
                    .store
                    .update_entry(
                        entry_id,
                        EntryPatch {
                            status: Some(EntryStatus::Scored),
                            score: Some(outcome.score),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(entry_id = %entry_id, score = outcome.score, "Entry scored");
                Ok(scored)
            }
            Ok(outcome) => {
                let disqualified = self
                    .store
                    .update_entry(
                        entry_id,
                        EntryPatch {
                            status: Some(EntryStatus::Disqualified),
                            disqualify_reason: Some(outcome.details),
                            ..Default::default()
                        },
                    )
                    .await?;
                warn!(entry_id = %entry_id, "Entry failed evaluation");
                Ok(disqualified)
            }
            Err(reason) => {
                let disqualified = self
                    .store
                    .update_entry(
                        entry_id,
                        EntryPatch {
                            status: Some(EntryStatus::Disqualified),
                            disqualify_reason: Some(reason.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                warn!(entry_id = %entry_id, reason = %reason, "Evaluator threw, entry disqualified");
                Ok(disqualified)
            }
        }
    }

    /// Rank scored entries, compute the prize map, settle Salt prizes
    /// on the ledger (USDC prizes are deferred), and close the
    /// competition.
    pub async fn finalize(
        &self,
        competition_id: &CompetitionId,
        caller: &AgentId,
    ) -> Result<Competition> {
        let competition = self.competition(competition_id).await?;
        let listing = self.listing(&competition.listing_id).await?;
        if &listing.poster != caller {
            return Err(MarketError::Forbidden(
                "only the poster may finalize".into(),
            ));
        }
        if competition.status == CompetitionStatus::Finalized {
            return Err(MarketError::Conflict("competition already finalized".into()));
        }
        if competition.status == CompetitionStatus::Cancelled {
            return Err(MarketError::InvalidState("competition is cancelled".into()));
        }

        let entries = self.store.entries_for_competition(competition_id).await?;
        let mut scored: Vec<CompetitionEntry> = entries
            .into_iter()
            .filter(|e| e.status == EntryStatus::Scored && e.score.is_some())
            .collect();
        if scored.is_empty() {
            return Err(MarketError::InvalidState(
                "finalize requires at least one scored entry".into(),
            ));
        }

        // Score descending, earlier submission wins ties.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.submitted_at.cmp(&b.submitted_at))
        });

        let total_prize = prize_pool(&listing)?;
        let prizes = compute_prizes(&competition, &scored, total_prize);

        let from_status = competition.status.to_string();
        let winner = scored[0].agent_id.clone();

        self.store.begin_transaction().await?;
        let result: Result<Competition> = async {
            for (index, entry) in scored.iter().enumerate() {
                let rank = index as u32 + 1;
                let prize = prizes.get(index).copied().unwrap_or(0.0);
                self.store
                    .update_entry(
                        &entry.id,
                        EntryPatch {
                            rank: Some(rank),
                            prize_amount: Some(prize),
                            status: (rank == 1).then_some(EntryStatus::Winner),
                            ..Default::default()
                        },
                    )
                    .await?;

                if prize > 0.0 {
                    let amount = match listing.currency {
                        Currency::Salt => PayoutAmount::Salt(SaltAmount::new(prize.round() as u64)),
                        Currency::Usdc => PayoutAmount::Usdc(UsdcAmount::from_micros(
                            (prize * 1_000_000.0).round() as u64,
                        )),
                    };
                    self.rails
                        .pay(
                            &listing,
                            &entry.agent_id,
                            amount,
                            TransferKind::CompetitionPrize,
                            &format!("rank {rank} prize in competition {competition_id}"),
                        )
                        .await?;
                }
            }

            let finalized = self
                .store
                .update_competition(
                    competition_id,
                    CompetitionPatch {
                        status: Some(CompetitionStatus::Finalized),
                        winner: Some(winner.clone()),
                    },
                )
                .await?;
            Ok(finalized)
        }
        .await;

        match result {
            Ok(finalized) => {
                self.store.commit_transaction().await?;
                self.emit_transition(&competition.listing_id, &finalized, &from_status);
                info!(
                    competition_id = %competition_id,
                    winner = %winner,
                    total_prize,
                    "Competition finalized"
                );
                Ok(finalized)
            }
            Err(e) => {
                self.store.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    pub async fn entries(&self, competition_id: &CompetitionId) -> Result<Vec<CompetitionEntry>> {
        Ok(self.store.entries_for_competition(competition_id).await?)
    }
}

/// Total prize: the listing's USDC amount, or the numeric Salt price.
fn prize_pool(listing: &Listing) -> Result<f64> {
    match listing.currency {
        Currency::Usdc => Ok(UsdcAmount::parse(&listing.price)?.to_decimal()),
        Currency::Salt => Ok(SaltAmount::parse(&listing.price)?.units() as f64),
    }
}

/// Prize per rank index over the sorted scored entries.
fn compute_prizes(
    competition: &Competition,
    ranked: &[CompetitionEntry],
    total: f64,
) -> Vec<f64> {
    match competition.distribution {
        PrizeDistribution::WinnerTakeAll => {
            let mut prizes = vec![0.0; ranked.len()];
            prizes[0] = total;
            prizes
        }
        PrizeDistribution::TopThree => ranked
            .iter()
            .enumerate()
            .map(|(index, _)| {
                competition
                    .percentages
                    .get(index)
                    .filter(|_| index < 3)
                    .map(|pct| total * pct / 100.0)
                    .unwrap_or(0.0)
            })
            .collect(),
        PrizeDistribution::Proportional => {
            let floor = competition.min_score.unwrap_or(0.0);
            let eligible_sum: f64 = ranked
                .iter()
                .filter_map(|e| e.score)
                .filter(|s| *s >= floor)
                .sum();
            ranked
                .iter()
                .map(|entry| match entry.score {
                    Some(score) if score >= floor && eligible_sum > 0.0 => {
                        total * score / eligible_sum
                    }
                    _ => 0.0,
                })
                .collect()
        }
    }
}
