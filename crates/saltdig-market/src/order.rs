//! Service-order lifecycle: pending -> in_progress -> delivered ->
//! accepted, with disputes from either working state.
//!
//! Ordering escrows the buyer's Salt into the system; acceptance pays
//! the seller, completes the listing, and bumps its completed counter,
//! all inside one store transaction.

use crate::error::{MarketError, Result};
use chrono::Utc;
use saltdig_common::EventBus;
use saltdig_ledger::Ledger;
use saltdig_store::Store;
use saltdig_types::{
    market_topic, AgentId, Currency, Listing, ListingId, ListingMode, ListingPatch,
    ListingStatus, MarketEvent, OrderId, OrderPatch, OrderStatus, SaltAmount, ServiceOrder,
    TransferKind,
};
use std::sync::Arc;
use tracing::info;

pub struct OrderManager {
    store: Arc<dyn Store>,
    ledger: Arc<Ledger>,
    bus: Arc<EventBus>,
}

impl OrderManager {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<Ledger>, bus: Arc<EventBus>) -> Self {
        Self { store, ledger, bus }
    }

    async fn listing(&self, id: &ListingId) -> Result<Listing> {
        self.store
            .get_listing(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("listing {id}")))
    }

    async fn order(&self, id: &OrderId) -> Result<ServiceOrder> {
        self.store
            .get_order(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("order {id}")))
    }

    fn emit_transition(&self, order: &ServiceOrder, from: OrderStatus, to: OrderStatus) {
        self.bus.emit(
            &market_topic(&order.listing_id),
            MarketEvent::OrderTransition {
                order_id: order.id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
                timestamp: Utc::now(),
            },
        );
    }

    /// Buyer places an order against an active service listing. On a
    /// Salt listing the price moves buyer -> system escrow now.
    pub async fn place_order(
        &self,
        listing_id: &ListingId,
        buyer: &AgentId,
        request: String,
    ) -> Result<ServiceOrder> {
        let listing = self.listing(listing_id).await?;
        if listing.mode != ListingMode::Service {
            return Err(MarketError::InvalidArgument(
                "orders are only placed on service listings".into(),
            ));
        }
        if listing.status != ListingStatus::Active {
            return Err(MarketError::InvalidState(format!(
                "listing is {:?}",
                listing.status
            )));
        }
        if buyer == &listing.poster {
            return Err(MarketError::Forbidden(
                "poster cannot order their own service".into(),
            ));
        }
        if request.trim().is_empty() {
            return Err(MarketError::InvalidArgument("request is required".into()));
        }

        let order = ServiceOrder {
            id: OrderId::generate(),
            listing_id: listing_id.clone(),
            buyer: buyer.clone(),
            seller: listing.poster.clone(),
            price: listing.price.clone(),
            currency: listing.currency,
            status: OrderStatus::Pending,
            request,
            response: None,
            created_at: Utc::now(),
            delivered_at: None,
            completed_at: None,
        };

        self.store.begin_transaction().await?;
        let result: Result<()> = async {
            self.store.insert_order(order.clone()).await?;
            if listing.currency == Currency::Salt {
                let amount = SaltAmount::parse(&listing.price)?;
                self.ledger
                    .transfer_within(
                        Some(buyer.clone()),
                        None,
                        amount,
                        TransferKind::OrderEscrow,
                        format!("escrow for order {} on {}", order.id, listing.id),
                    )
                    .await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.store.commit_transaction().await?;
                info!(order_id = %order.id, listing_id = %listing_id, buyer = %buyer, "Order placed");
                Ok(order)
            }
            Err(e) => {
                self.store.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    /// Seller starts work.
    pub async fn start(&self, order_id: &OrderId, caller: &AgentId) -> Result<ServiceOrder> {
        let order = self.order(order_id).await?;
        if &order.seller != caller {
            return Err(MarketError::Forbidden("only the seller may start".into()));
        }
        let from = order.status;
        let updated = self
            .store
            .update_order(
                order_id,
                OrderPatch {
                    status: Some(OrderStatus::InProgress),
                    ..Default::default()
                },
            )
            .await?;
        self.emit_transition(&updated, from, OrderStatus::InProgress);
        Ok(updated)
    }

    /// Seller delivers; a response artifact is required.
    pub async fn deliver(
        &self,
        order_id: &OrderId,
        caller: &AgentId,
        response: String,
    ) -> Result<ServiceOrder> {
        let order = self.order(order_id).await?;
        if &order.seller != caller {
            return Err(MarketError::Forbidden("only the seller may deliver".into()));
        }
        if response.trim().is_empty() {
            return Err(MarketError::InvalidArgument(
                "delivery requires a response".into(),
            ));
        }
        let from = order.status;
        let updated = self
            .store
            .update_order(
                order_id,
                OrderPatch {
                    status: Some(OrderStatus::Delivered),
                    response: Some(response),
                    delivered_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.emit_transition(&updated, from, OrderStatus::Delivered);
        Ok(updated)
    }

    /// Buyer accepts a delivered order: Salt payout to the seller, the
    /// listing completes, and its counter increments atomically.
    pub async fn accept(&self, order_id: &OrderId, caller: &AgentId) -> Result<ServiceOrder> {
        let order = self.order(order_id).await?;
        if &order.buyer != caller {
            return Err(MarketError::Forbidden("only the buyer may accept".into()));
        }
        if order.status != OrderStatus::Delivered {
            return Err(MarketError::InvalidState(format!(
                "order is {:?}, not delivered",
                order.status
            )));
        }
        let listing = self.listing(&order.listing_id).await?;

        self.store.begin_transaction().await?;
        let result: Result<ServiceOrder> = async {
            let updated = self
                .store
                .update_order(
                    order_id,
                    OrderPatch {
                        status: Some(OrderStatus::Accepted),
                        completed_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;

            if order.currency == Currency::Salt {
                let amount = SaltAmount::parse(&order.price)?;
                self.ledger
                    .transfer_within(
                        None,
                        Some(order.seller.clone()),
                        amount,
                        TransferKind::ServicePayment,
                        format!("payment for order {}", order.id),
                    )
                    .await?;
            }

            self.store
                .update_listing(
                    &order.listing_id,
                    ListingPatch {
                        status: Some(ListingStatus::Completed),
                        increment_completed_count: listing.mode == ListingMode::Service,
                        ..Default::default()
                    },
                )
                .await?;

            // Reputation accrues to registered sellers on accepted work.
            if self.store.get_agent(&order.seller).await?.is_some() {
                self.store
                    .update_agent(
                        &order.seller,
                        saltdig_types::AgentPatch {
                            reputation_delta: Some(1),
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
                self.emit_transition(&updated, OrderStatus::Delivered, OrderStatus::Accepted);
                info!(
                    order_id = %order_id,
                    seller = %order.seller,
                    price = %order.price,
                    "💸 Order accepted and settled"
                );
                Ok(updated)
            }
            Err(e) => {
                self.store.rollback_transaction().await?;
                Err(e)
            }
        }
    }

    /// Either party disputes an in-progress or delivered order.
    pub async fn dispute(&self, order_id: &OrderId, caller: &AgentId) -> Result<ServiceOrder> {
        let order = self.order(order_id).await?;
        if caller != &order.buyer && caller != &order.seller {
            return Err(MarketError::Forbidden(
                "only the buyer or seller may dispute".into(),
            ));
        }
        let from = order.status;
        let updated = self
            .store
            .update_order(
                order_id,
                OrderPatch {
                    status: Some(OrderStatus::Disputed),
                    ..Default::default()
                },
            )
            .await?;
        self.emit_transition(&updated, from, OrderStatus::Disputed);
        info!(order_id = %order_id, by = %caller, "Order disputed");
        Ok(updated)
    }

    pub async fn active_order(&self, listing_id: &ListingId) -> Result<Option<ServiceOrder>> {
        Ok(self.store.active_order_for_listing(listing_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saltdig_store::MemoryStore;

    struct Fixture {
        orders: OrderManager,
        ledger: Arc<Ledger>,
        store: Arc<dyn Store>,
        listing: Listing,
        poster: AgentId,
        buyer: AgentId,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone()));
        let bus = Arc::new(EventBus::new());
        let orders = OrderManager::new(store.clone(), ledger.clone(), bus);

        let poster = AgentId::generate();
        let buyer = AgentId::generate();
        ledger
            .transfer(
                None,
                Some(buyer.clone()),
                SaltAmount::new(500),
                TransferKind::Issuance,
                "seed",
            )
            .await
            .unwrap();

        let now = Utc::now();
        let listing = Listing {
            id: ListingId::generate(),
            poster: poster.clone(),
            title: "translate docs".into(),
            description: String::new(),
            currency: Currency::Salt,
            price: "100".into(),
            category: "writing".into(),
            mode: ListingMode::Service,
            status: ListingStatus::Active,
            delivery_time: None,
            bounty_graph: None,
            completed_count: 0,
            created_at: now,
            updated_at: now,
        };
        store.insert_listing(listing.clone()).await.unwrap();

        Fixture {
            orders,
            ledger,
            store,
            listing,
            poster,
            buyer,
        }
    }

    #[tokio::test]
    async fn placing_escrows_buyer_salt() {
        let f = fixture().await;
        f.orders
            .place_order(&f.listing.id, &f.buyer, "do X".into())
            .await
            .unwrap();
        assert_eq!(
            f.ledger.balance(&f.buyer).await.unwrap(),
            SaltAmount::new(400)
        );
    }

    #[tokio::test]
    async fn insufficient_buyer_funds_creates_no_order() {
        let f = fixture().await;
        let pauper = AgentId::generate();
        let result = f
            .orders
            .place_order(&f.listing.id, &pauper, "do X".into())
            .await;
        assert!(matches!(result, Err(MarketError::InsufficientFunds { .. })));
        assert!(f
            .orders
            .active_order(&f.listing.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn full_happy_path_settles_seller() {
        let f = fixture().await;
        let order = f
            .orders
            .place_order(&f.listing.id, &f.buyer, "do X".into())
            .await
            .unwrap();

        f.orders.start(&order.id, &f.poster).await.unwrap();
        f.orders
            .deliver(&order.id, &f.poster, "done".into())
            .await
            .unwrap();
        let accepted = f.orders.accept(&order.id, &f.buyer).await.unwrap();

        assert_eq!(accepted.status, OrderStatus::Accepted);
        assert_eq!(
            f.ledger.balance(&f.poster).await.unwrap(),
            SaltAmount::new(100)
        );

        let listing = f.store.get_listing(&f.listing.id).await.unwrap().unwrap();
        assert_eq!(listing.status, ListingStatus::Completed);
        assert_eq!(listing.completed_count, 1);
    }

    #[tokio::test]
    async fn role_gates_hold() {
        let f = fixture().await;
        let order = f
            .orders
            .place_order(&f.listing.id, &f.buyer, "do X".into())
            .await
            .unwrap();

        // Buyer cannot start or deliver; seller cannot accept.
        assert!(matches!(
            f.orders.start(&order.id, &f.buyer).await,
            Err(MarketError::Forbidden(_))
        ));
        assert!(matches!(
            f.orders.deliver(&order.id, &f.buyer, "x".into()).await,
            Err(MarketError::Forbidden(_))
        ));
        f.orders.start(&order.id, &f.poster).await.unwrap();
        f.orders
            .deliver(&order.id, &f.poster, "done".into())
            .await
            .unwrap();
        assert!(matches!(
            f.orders.accept(&order.id, &f.poster).await,
            Err(MarketError::Forbidden(_))
        ));

        // A stranger cannot dispute.
        let stranger = AgentId::generate();
        assert!(matches!(
            f.orders.dispute(&order.id, &stranger).await,
            Err(MarketError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn accept_requires_delivery() {
        let f = fixture().await;
        let order = f
            .orders
            .place_order(&f.listing.id, &f.buyer, "do X".into())
            .await
            .unwrap();
        assert!(matches!(
            f.orders.accept(&order.id, &f.buyer).await,
            Err(MarketError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn delivery_requires_response() {
        let f = fixture().await;
        let order = f
            .orders
            .place_order(&f.listing.id, &f.buyer, "do X".into())
            .await
            .unwrap();
        f.orders.start(&order.id, &f.poster).await.unwrap();
        assert!(matches!(
            f.orders.deliver(&order.id, &f.poster, "  ".into()).await,
            Err(MarketError::InvalidArgument(_))
        ));
    }
}
