//! Listing creation, poster cancellation, and the market offer flow.

use crate::error::{MarketError, Result};
use chrono::Utc;
use saltdig_common::EventBus;
use saltdig_ledger::Ledger;
use saltdig_store::Store;
use saltdig_types::{
    market_topic, AgentId, Currency, LifecycleState, Listing, ListingId, ListingMode,
    ListingPatch, ListingStatus, MarketEvent, MarketOffer, OfferId, OfferPatch, OfferStatus,
    SaltAmount, TransferKind, UsdcAmount,
};
use std::sync::Arc;
use tracing::info;

/// Input for a new listing.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub poster: AgentId,
    pub title: String,
    pub description: String,
    pub currency: Currency,
    pub price: String,
    pub category: String,
    pub mode: ListingMode,
    pub delivery_time: Option<String>,
}

/// Poster response to an offer.
#[derive(Debug, Clone)]
pub enum OfferResponse {
    Accept,
    Reject,
    Counter { price: String },
}

pub struct ListingManager {
    store: Arc<dyn Store>,
    ledger: Arc<Ledger>,
    bus: Arc<EventBus>,
}

impl ListingManager {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<Ledger>, bus: Arc<EventBus>) -> Self {
        Self { store, ledger, bus }
    }

    pub async fn create_listing(&self, input: NewListing) -> Result<Listing> {
        if input.title.trim().is_empty() {
            return Err(MarketError::InvalidArgument("title is required".into()));
        }
        // Validate the price against the currency's wire format early.
        match input.currency {
            Currency::Salt => {
                SaltAmount::parse(&input.price)?;
            }
            Currency::Usdc => {
                UsdcAmount::parse(&input.price)?;
            }
        }

        let now = Utc::now();
        let listing = Listing {
            id: ListingId::generate(),
            poster: input.poster,
            title: input.title,
            description: input.description,
            currency: input.currency,
            price: input.price,
            category: input.category,
            mode: input.mode,
            status: ListingStatus::Active,
            delivery_time: input.delivery_time,
            bounty_graph: None,
            completed_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_listing(listing.clone()).await?;

        info!(
            listing_id = %listing.id,
            poster = %listing.poster,
            currency = %listing.currency,
            price = %listing.price,
            mode = ?listing.mode,
            "Listing created"
        );
        Ok(listing)
    }

    pub async fn get_listing(&self, id: &ListingId) -> Result<Listing> {
        self.store
            .get_listing(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("listing {id}")))
    }

    /// Poster stores or replaces the bounty graph document.
    pub async fn update_bounty_graph(
        &self,
        listing_id: &ListingId,
        caller: &AgentId,
        graph: saltdig_types::BountyGraph,
    ) -> Result<Listing> {
        let listing = self.get_listing(listing_id).await?;
        if &listing.poster != caller {
            return Err(MarketError::Forbidden(
                "only the poster may update the bounty graph".into(),
            ));
        }
        if listing.status.is_terminal() {
            return Err(MarketError::InvalidState(
                "listing is no longer editable".into(),
            ));
        }
        Ok(self
            .store
            .update_listing(
                listing_id,
                ListingPatch {
                    bounty_graph: Some(graph),
                    ..Default::default()
                },
            )
            .await?)
    }

    /// Poster cancellation, allowed only while no worker is committed:
    /// no open order and no claimed-or-later escrow record.
    pub async fn cancel_listing(&self, listing_id: &ListingId, caller: &AgentId) -> Result<Listing> {
        let listing = self.get_listing(listing_id).await?;
        if &listing.poster != caller {
            return Err(MarketError::Forbidden(
                "only the poster may cancel a listing".into(),
            ));
        }
        if self
            .store
            .active_order_for_listing(listing_id)
            .await?
            .is_some()
        {
            return Err(MarketError::InvalidState(
                "listing has an open order".into(),
            ));
        }
        if let Some(record) = self.store.escrow_record_for_listing(listing_id).await? {
            if record.worker.is_some() && !record.status.is_terminal() {
                return Err(MarketError::InvalidState(
                    "listing has a committed worker on-chain".into(),
                ));
            }
        }

        let updated = self
            .store
            .update_listing(
                listing_id,
                ListingPatch {
                    status: Some(ListingStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await?;
        info!(listing_id = %listing_id, "Listing cancelled by poster");
        Ok(updated)
    }

    // ---- offers ----

    pub async fn create_offer(
        &self,
        listing_id: &ListingId,
        agent: &AgentId,
        text: String,
        price: String,
    ) -> Result<MarketOffer> {
        let listing = self.get_listing(listing_id).await?;
        if listing.status != ListingStatus::Active {
            return Err(MarketError::InvalidState(
                "offers require an active listing".into(),
            ));
        }
        if agent == &listing.poster {
            return Err(MarketError::InvalidArgument(
                "poster cannot offer on their own listing".into(),
            ));
        }
        if listing.currency == Currency::Salt {
            SaltAmount::parse(&price)?;
        } else {
            UsdcAmount::parse(&price)?;
        }

        let now = Utc::now();
        let offer = MarketOffer {
            id: OfferId::generate(),
            listing_id: listing_id.clone(),
            agent_id: agent.clone(),
            text,
            price,
            status: OfferStatus::Pending,
            counter_price: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_offer(offer.clone()).await?;

        self.bus.emit(
            &market_topic(listing_id),
            MarketEvent::Offer {
                offer_id: offer.id.to_string(),
                agent_id: agent.to_string(),
                price: offer.price.clone(),
                timestamp: now,
            },
        );
        info!(offer_id = %offer.id, listing_id = %listing_id, "Offer created");
        Ok(offer)
    }

    /// Poster responds to a pending offer. Accepting on a Salt listing
    /// settles offer price from the offering agent to the poster in the
    /// same transaction.
    pub async fn respond_to_offer(
        &self,
        offer_id: &OfferId,
        caller: &AgentId,
        response: OfferResponse,
    ) -> Result<MarketOffer> {
        let offer = self
            .store
            .get_offer(offer_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("offer {offer_id}")))?;
        let listing = self.get_listing(&offer.listing_id).await?;
        if &listing.poster != caller {
            return Err(MarketError::Forbidden(
                "only the poster may respond to offers".into(),
            ));
        }
        if offer.status.is_terminal() {
            return Err(MarketError::InvalidState(format!(
                "offer is already {:?}",
                offer.status
            )));
        }

        let (status, counter_price, response_name) = match response {
            OfferResponse::Accept => (OfferStatus::Accepted, None, "accepted"),
            OfferResponse::Reject => (OfferStatus::Rejected, None, "rejected"),
            OfferResponse::Counter { price } => {
                if listing.currency == Currency::Salt {
                    SaltAmount::parse(&price)?;
                } else {
                    UsdcAmount::parse(&price)?;
                }
                (OfferStatus::Countered, Some(price), "countered")
            }
        };

        self.store.begin_transaction().await?;
        let result: Result<MarketOffer> = async {
            let updated = self
                .store
                .update_offer(
                    offer_id,
                    OfferPatch {
                        status: Some(status),
                        counter_price: counter_price.clone(),
                    },
                )
                .await?;

            // Accepted Salt offers are binding and settle immediately.
            if status == OfferStatus::Accepted && listing.currency == Currency::Salt {
                let amount = SaltAmount::parse(&offer.price)?;
                self.ledger
                    .transfer_within(
                        Some(offer.agent_id.clone()),
                        Some(listing.poster.clone()),
                        amount,
                        TransferKind::OfferSettlement,
                        format!("offer {} on listing {}", offer.id, listing.id),
                    )
                    .await?;
            }
            Ok(updated)
        }
        .await;

        match result {
            Ok(updated) => {
                self.store.commit_transaction().await?;
                self.bus.emit(
                    &market_topic(&offer.listing_id),
                    MarketEvent::OfferResponse {
                        offer_id: offer_id.to_string(),
                        response: response_name.to_string(),
                        counter_price: updated.counter_price.clone(),
                        timestamp: Utc::now(),
                    },
                );
                info!(
                    offer_id = %offer_id,
                    response = response_name,
                    "Offer response recorded"
                );
                Ok(updated)
            }
            Err(e) => {
                self.store.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    pub async fn offers_for_listing(&self, listing_id: &ListingId) -> Result<Vec<MarketOffer>> {
        Ok(self.store.offers_for_listing(listing_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saltdig_store::MemoryStore;

    fn managers() -> (ListingManager, Arc<Ledger>, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone()));
        let bus = Arc::new(EventBus::new());
        (
            ListingManager::new(store.clone(), ledger.clone(), bus),
            ledger,
            store,
        )
    }

    fn new_listing(poster: &AgentId) -> NewListing {
        NewListing {
            poster: poster.clone(),
            title: "index the archive".into(),
            description: "full text".into(),
            currency: Currency::Salt,
            price: "100".into(),
            category: "data".into(),
            mode: ListingMode::Trade,
            delivery_time: None,
        }
    }

    #[tokio::test]
    async fn create_validates_price_format() {
        let (manager, _, _) = managers();
        let poster = AgentId::generate();

        let mut bad = new_listing(&poster);
        bad.price = "100.5".into();
        assert!(matches!(
            manager.create_listing(bad).await,
            Err(MarketError::InvalidArgument(_))
        ));

        let listing = manager.create_listing(new_listing(&poster)).await.unwrap();
        assert_eq!(listing.status, ListingStatus::Active);
    }

    #[tokio::test]
    async fn accepted_salt_offer_settles() {
        let (manager, ledger, _) = managers();
        let poster = AgentId::generate();
        let bidder = AgentId::generate();
        ledger
            .transfer(
                None,
                Some(bidder.clone()),
                SaltAmount::new(200),
                TransferKind::Issuance,
                "seed",
            )
            .await
            .unwrap();

        let listing = manager.create_listing(new_listing(&poster)).await.unwrap();
        let offer = manager
            .create_offer(&listing.id, &bidder, "take 80".into(), "80".into())
            .await
            .unwrap();

        let updated = manager
            .respond_to_offer(&offer.id, &poster, OfferResponse::Accept)
            .await
            .unwrap();
        assert_eq!(updated.status, OfferStatus::Accepted);
        assert_eq!(ledger.balance(&bidder).await.unwrap(), SaltAmount::new(120));
        assert_eq!(ledger.balance(&poster).await.unwrap(), SaltAmount::new(80));
    }

    #[tokio::test]
    async fn accept_without_funds_rolls_back_offer() {
        let (manager, ledger, _) = managers();
        let poster = AgentId::generate();
        let bidder = AgentId::generate();

        let listing = manager.create_listing(new_listing(&poster)).await.unwrap();
        let offer = manager
            .create_offer(&listing.id, &bidder, "broke bid".into(), "80".into())
            .await
            .unwrap();

        let result = manager
            .respond_to_offer(&offer.id, &poster, OfferResponse::Accept)
            .await;
        assert!(matches!(
            result,
            Err(MarketError::InsufficientFunds { .. })
        ));

        let reread = manager
            .offers_for_listing(&listing.id)
            .await
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(reread.status, OfferStatus::Pending);
        assert_eq!(ledger.balance(&poster).await.unwrap(), SaltAmount::ZERO);
    }

    #[tokio::test]
    async fn only_poster_responds() {
        let (manager, _, _) = managers();
        let poster = AgentId::generate();
        let bidder = AgentId::generate();

        let listing = manager.create_listing(new_listing(&poster)).await.unwrap();
        let offer = manager
            .create_offer(&listing.id, &bidder, "bid".into(), "50".into())
            .await
            .unwrap();

        let result = manager
            .respond_to_offer(&offer.id, &bidder, OfferResponse::Reject)
            .await;
        assert!(matches!(result, Err(MarketError::Forbidden(_))));
    }

    #[tokio::test]
    async fn counter_requires_valid_price() {
        let (manager, _, _) = managers();
        let poster = AgentId::generate();
        let bidder = AgentId::generate();

        let listing = manager.create_listing(new_listing(&poster)).await.unwrap();
        let offer = manager
            .create_offer(&listing.id, &bidder, "bid".into(), "50".into())
            .await
            .unwrap();

        assert!(manager
            .respond_to_offer(
                &offer.id,
                &poster,
                OfferResponse::Counter {
                    price: "not-a-number".into()
                },
            )
            .await
            .is_err());

        let countered = manager
            .respond_to_offer(
                &offer.id,
                &poster,
                OfferResponse::Counter { price: "60".into() },
            )
            .await
            .unwrap();
        assert_eq!(countered.status, OfferStatus::Countered);
        assert_eq!(countered.counter_price.as_deref(), Some("60"));
    }
}
