//! USDC rail coordinator: keeps the off-chain escrow record a faithful
//! shadow of the on-chain bounty.
//!
//! Every operation performs the chain write first and applies the
//! record patch (new status + confirmed tx hash) only on success; a
//! failed RPC leaves the record at its previous status for the
//! reconciler to heal.

use crate::error::{MarketError, Result};
use chrono::Utc;
use saltdig_common::EventBus;
use saltdig_escrow::{EscrowGateway, Signer};
use saltdig_store::Store;
use saltdig_types::{
    market_topic, AgentId, Currency, EscrowRecordId, EscrowRecordPatch, EscrowStatus,
    ListingId, MarketEvent, UsdcAmount, UsdcEscrowRecord,
};
use std::sync::Arc;
use tracing::info;

pub struct UsdcCoordinator {
    store: Arc<dyn Store>,
    gateway: Arc<EscrowGateway>,
    bus: Arc<EventBus>,
}

impl UsdcCoordinator {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<EscrowGateway>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            gateway,
            bus,
        }
    }

    pub async fn record_for_listing(&self, listing_id: &ListingId) -> Result<UsdcEscrowRecord> {
        self.store
            .escrow_record_for_listing(listing_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("escrow record for {listing_id}")))
    }

    fn emit_transition(
        &self,
        listing_id: &ListingId,
        record_id: &EscrowRecordId,
        from: &str,
        to: EscrowStatus,
        tx_hash: Option<String>,
    ) {
        self.bus.emit(
            &market_topic(listing_id),
            MarketEvent::EscrowTransition {
                record_id: record_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
                tx_hash,
                timestamp: Utc::now(),
            },
        );
    }

    /// Poster locks the listing price on-chain and creates the shadow
    /// record.
    pub async fn create(
        &self,
        listing_id: &ListingId,
        caller: &AgentId,
        signer: &Signer,
        deadline: u64,
    ) -> Result<UsdcEscrowRecord> {
        let listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("listing {listing_id}")))?;
        if listing.currency != Currency::Usdc {
            return Err(MarketError::InvalidArgument(
                "listing is not USDC-denominated".into(),
            ));
        }
        if &listing.poster != caller {
            return Err(MarketError::Forbidden(
                "only the poster may create the escrow".into(),
            ));
        }
        if self
            .store
            .escrow_record_for_listing(listing_id)
            .await?
            .is_some()
        {
            return Err(MarketError::Conflict(format!(
                "listing {listing_id} already has an escrow"
            )));
        }

        let amount = UsdcAmount::parse(&listing.price)?;
        let hash = EscrowGateway::compute_bounty_hash(listing_id.as_str());

        let tx_hash = self
            .gateway
            .create_bounty(signer, listing_id.as_str(), amount, deadline)
            .await?;

        let now = Utc::now();
        let record = UsdcEscrowRecord {
            id: EscrowRecordId::generate(),
            listing_id: listing_id.clone(),
            bounty_hash: hash.to_string(),
            poster: caller.clone(),
            worker: None,
            amount,
            worker_stake: amount.worker_stake(),
            status: EscrowStatus::Created,
            last_tx_hash: Some(tx_hash.clone()),
            submitted_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_escrow_record(record.clone()).await?;

        self.emit_transition(
            listing_id,
            &record.id,
            "none",
            EscrowStatus::Created,
            Some(tx_hash),
        );
        info!(listing_id = %listing_id, amount = %amount, "🔒 USDC escrow created");
        Ok(record)
    }

    /// Non-poster worker claims, locking the 10% stake on-chain.
    pub async fn claim(
        &self,
        listing_id: &ListingId,
        caller: &AgentId,
        signer: &Signer,
    ) -> Result<UsdcEscrowRecord> {
        let record = self.record_for_listing(listing_id).await?;
        if record.status != EscrowStatus::Created {
            return Err(MarketError::InvalidState(format!(
                "escrow is {:?}, not open for claims",
                record.status
            )));
        }
        if caller == &record.poster {
            return Err(MarketError::Forbidden("poster cannot claim".into()));
        }

        let hash = EscrowGateway::compute_bounty_hash(listing_id.as_str());
        let tx_hash = self.gateway.claim_bounty(signer, hash).await?;

        let updated = self
            .store
            .update_escrow_record(
                &record.id,
                EscrowRecordPatch {
                    status: Some(EscrowStatus::Claimed),
                    worker: Some(caller.clone()),
                    last_tx_hash: Some(tx_hash.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.emit_transition(
            listing_id,
            &record.id,
            "created",
            EscrowStatus::Claimed,
            Some(tx_hash),
        );
        info!(listing_id = %listing_id, worker = %caller, "USDC bounty claimed");
        Ok(updated)
    }

    /// Worker submits the work; starts the auto-release clock.
    pub async fn submit(
        &self,
        listing_id: &ListingId,
        caller: &AgentId,
        signer: &Signer,
    ) -> Result<UsdcEscrowRecord> {
        let record = self.record_for_listing(listing_id).await?;
        if record.status != EscrowStatus::Claimed {
            return Err(MarketError::InvalidState(format!(
                "escrow is {:?}, nothing to submit",
                record.status
            )));
        }
        if record.worker.as_ref() != Some(caller) {
            return Err(MarketError::Forbidden("only the worker may submit".into()));
        }

        let hash = EscrowGateway::compute_bounty_hash(listing_id.as_str());
        let tx_hash = self.gateway.submit_bounty(signer, hash).await?;

        let updated = self
            .store
            .update_escrow_record(
                &record.id,
                EscrowRecordPatch {
                    status: Some(EscrowStatus::Submitted),
                    submitted_at: Some(Utc::now()),
                    last_tx_hash: Some(tx_hash.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.emit_transition(
            listing_id,
            &record.id,
            "claimed",
            EscrowStatus::Submitted,
            Some(tx_hash),
        );
        info!(listing_id = %listing_id, "USDC work submitted");
        Ok(updated)
    }

    /// Poster approves and releases the payout on-chain.
    pub async fn approve(
        &self,
        listing_id: &ListingId,
        caller: &AgentId,
        signer: &Signer,
    ) -> Result<UsdcEscrowRecord> {
        let record = self.record_for_listing(listing_id).await?;
        if record.status != EscrowStatus::Submitted {
            return Err(MarketError::InvalidState(format!(
                "escrow is {:?}, nothing to approve",
                record.status
            )));
        }
        if caller != &record.poster {
            return Err(MarketError::Forbidden("only the poster may approve".into()));
        }

        let hash = EscrowGateway::compute_bounty_hash(listing_id.as_str());
        let tx_hash = self.gateway.approve_bounty(signer, hash).await?;

        let updated = self
            .store
            .update_escrow_record(
                &record.id,
                EscrowRecordPatch {
                    status: Some(EscrowStatus::Approved),
                    completed_at: Some(Utc::now()),
                    last_tx_hash: Some(tx_hash.clone()),
                    ..Default::default()
                },
            )
            .await?;

        // Reputation accrues to registered workers on approved work.
        if let Some(worker) = &record.worker {
            if self.store.get_agent(worker).await?.is_some() {
                self.store
                    .update_agent(
                        worker,
                        saltdig_types::AgentPatch {
                            reputation_delta: Some(1),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }

        self.emit_transition(
            listing_id,
            &record.id,
            "submitted",
            EscrowStatus::Approved,
            Some(tx_hash),
        );
        info!(listing_id = %listing_id, "USDC bounty approved");
        Ok(updated)
    }

    /// Poster or worker raises a dispute on submitted work.
    pub async fn dispute(
        &self,
        listing_id: &ListingId,
        caller: &AgentId,
        signer: &Signer,
    ) -> Result<UsdcEscrowRecord> {
        let record = self.record_for_listing(listing_id).await?;
        if record.status != EscrowStatus::Submitted {
            return Err(MarketError::InvalidState(format!(
                "escrow is {:?}, nothing to dispute",
                record.status
            )));
        }
        let is_party = caller == &record.poster || record.worker.as_ref() == Some(caller);
        if !is_party {
            return Err(MarketError::Forbidden(
                "only the poster or worker may dispute".into(),
            ));
        }

        let hash = EscrowGateway::compute_bounty_hash(listing_id.as_str());
        let tx_hash = self.gateway.dispute_bounty(signer, hash).await?;

        let updated = self
            .store
            .update_escrow_record(
                &record.id,
                EscrowRecordPatch {
                    status: Some(EscrowStatus::Disputed),
                    last_tx_hash: Some(tx_hash.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.emit_transition(
            listing_id,
            &record.id,
            "submitted",
            EscrowStatus::Disputed,
            Some(tx_hash),
        );
        info!(listing_id = %listing_id, by = %caller, "USDC bounty disputed");
        Ok(updated)
    }

    /// Poster cancels an unclaimed bounty and reclaims the funds.
    pub async fn cancel(
        &self,
        listing_id: &ListingId,
        caller: &AgentId,
        signer: &Signer,
    ) -> Result<UsdcEscrowRecord> {
        let record = self.record_for_listing(listing_id).await?;
        if record.status != EscrowStatus::Created {
            return Err(MarketError::InvalidState(format!(
                "escrow is {:?}, only open bounties cancel",
                record.status
            )));
        }
        if caller != &record.poster {
            return Err(MarketError::Forbidden("only the poster may cancel".into()));
        }

        let hash = EscrowGateway::compute_bounty_hash(listing_id.as_str());
        let tx_hash = self.gateway.cancel_bounty(signer, hash).await?;

        let updated = self
            .store
            .update_escrow_record(
                &record.id,
                EscrowRecordPatch {
                    status: Some(EscrowStatus::Cancelled),
                    last_tx_hash: Some(tx_hash.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.emit_transition(
            listing_id,
            &record.id,
            "created",
            EscrowStatus::Cancelled,
            Some(tx_hash),
        );
        info!(listing_id = %listing_id, "USDC bounty cancelled");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saltdig_escrow::{Address, GatewayConfig, MockChain};
    use saltdig_ledger::Ledger;
    use saltdig_store::MemoryStore;
    use saltdig_types::{Listing, ListingMode, ListingStatus};

    const ESCROW: Address = Address([0xEE; 20]);
    const TOKEN: Address = Address([0xDD; 20]);

    struct Fixture {
        usdc: UsdcCoordinator,
        chain: Arc<MockChain>,
        store: Arc<dyn Store>,
        listing: Listing,
        poster: AgentId,
        worker: AgentId,
        poster_signer: Signer,
        worker_signer: Signer,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let _ledger = Arc::new(Ledger::new(store.clone()));
        let bus = Arc::new(EventBus::new());
        let chain = Arc::new(MockChain::new(ESCROW, TOKEN));
        let gateway = Arc::new(EscrowGateway::new(
            chain.clone(),
            GatewayConfig::new(ESCROW, TOKEN),
        ));
        let usdc = UsdcCoordinator::new(store.clone(), gateway, bus);

        let poster = AgentId::generate();
        let worker = AgentId::generate();
        let now = Utc::now();
        let listing = Listing {
            id: ListingId::generate(),
            poster: poster.clone(),
            title: "fix the indexer".into(),
            description: String::new(),
            currency: Currency::Usdc,
            price: "250".into(),
            category: "engineering".into(),
            mode: ListingMode::Trade,
            status: ListingStatus::Active,
            delivery_time: None,
            bounty_graph: None,
            completed_count: 0,
            created_at: now,
            updated_at: now,
        };
        store.insert_listing(listing.clone()).await.unwrap();

        Fixture {
            usdc,
            chain,
            store,
            listing,
            poster,
            worker,
            poster_signer: Signer::new(Address([1; 20]), vec![1; 32]),
            worker_signer: Signer::new(Address([2; 20]), vec![2; 32]),
        }
    }

    #[tokio::test]
    async fn create_claim_submit_approve_mirrors_chain() {
        let f = fixture().await;

        let record = f
            .usdc
            .create(&f.listing.id, &f.poster, &f.poster_signer, 0)
            .await
            .unwrap();
        assert_eq!(record.status, EscrowStatus::Created);
        assert_eq!(record.amount, UsdcAmount::parse("250").unwrap());
        assert_eq!(record.worker_stake, UsdcAmount::parse("25").unwrap());
        assert!(record.last_tx_hash.is_some());

        let record = f
            .usdc
            .claim(&f.listing.id, &f.worker, &f.worker_signer)
            .await
            .unwrap();
        assert_eq!(record.status, EscrowStatus::Claimed);
        assert_eq!(record.worker.as_ref(), Some(&f.worker));

        let record = f
            .usdc
            .submit(&f.listing.id, &f.worker, &f.worker_signer)
            .await
            .unwrap();
        assert_eq!(record.status, EscrowStatus::Submitted);
        assert!(record.submitted_at.is_some());

        let record = f
            .usdc
            .approve(&f.listing.id, &f.poster, &f.poster_signer)
            .await
            .unwrap();
        assert_eq!(record.status, EscrowStatus::Approved);
        assert!(record.completed_at.is_some());

        // Shadow matches chain.
        let hash = EscrowGateway::compute_bounty_hash(f.listing.id.as_str());
        assert_eq!(f.chain.bounty(hash).unwrap().status, 3);
    }

    #[tokio::test]
    async fn rpc_failure_leaves_record_at_previous_status() {
        let f = fixture().await;
        f.usdc
            .create(&f.listing.id, &f.poster, &f.poster_signer, 0)
            .await
            .unwrap();

        f.chain.fail_next("node down");
        let result = f
            .usdc
            .claim(&f.listing.id, &f.worker, &f.worker_signer)
            .await;
        assert!(matches!(result, Err(MarketError::EscrowRpc(_))));

        let record = f
            .store
            .escrow_record_for_listing(&f.listing.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, EscrowStatus::Created);
        assert_eq!(record.worker, None);
    }

    #[tokio::test]
    async fn role_gates() {
        let f = fixture().await;

        // Non-poster cannot create.
        assert!(matches!(
            f.usdc
                .create(&f.listing.id, &f.worker, &f.worker_signer, 0)
                .await,
            Err(MarketError::Forbidden(_))
        ));

        f.usdc
            .create(&f.listing.id, &f.poster, &f.poster_signer, 0)
            .await
            .unwrap();

        // Poster cannot claim their own bounty.
        assert!(matches!(
            f.usdc
                .claim(&f.listing.id, &f.poster, &f.poster_signer)
                .await,
            Err(MarketError::Forbidden(_))
        ));

        f.usdc
            .claim(&f.listing.id, &f.worker, &f.worker_signer)
            .await
            .unwrap();

        // Only the worker submits; only the poster approves.
        assert!(matches!(
            f.usdc
                .submit(&f.listing.id, &f.poster, &f.poster_signer)
                .await,
            Err(MarketError::Forbidden(_))
        ));
        f.usdc
            .submit(&f.listing.id, &f.worker, &f.worker_signer)
            .await
            .unwrap();
        assert!(matches!(
            f.usdc
                .approve(&f.listing.id, &f.worker, &f.worker_signer)
                .await,
            Err(MarketError::Forbidden(_))
        ));

        // A stranger cannot dispute.
        let stranger = AgentId::generate();
        let stranger_signer = Signer::new(Address([9; 20]), vec![9; 32]);
        assert!(matches!(
            f.usdc
                .dispute(&f.listing.id, &stranger, &stranger_signer)
                .await,
            Err(MarketError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn cancel_only_while_open() {
        let f = fixture().await;
        f.usdc
            .create(&f.listing.id, &f.poster, &f.poster_signer, 0)
            .await
            .unwrap();
        f.usdc
            .claim(&f.listing.id, &f.worker, &f.worker_signer)
            .await
            .unwrap();

        let result = f
            .usdc
            .cancel(&f.listing.id, &f.poster, &f.poster_signer)
            .await;
        assert!(matches!(result, Err(MarketError::InvalidState(_))));
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let f = fixture().await;
        f.usdc
            .create(&f.listing.id, &f.poster, &f.poster_signer, 0)
            .await
            .unwrap();
        assert!(matches!(
            f.usdc
                .create(&f.listing.id, &f.poster, &f.poster_signer, 0)
                .await,
            Err(MarketError::Conflict(_))
        ));
    }
}
