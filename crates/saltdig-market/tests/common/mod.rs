//! Shared scaffolding for the scenario tests: a full market wired over
//! the in-memory store and the mock chain.
#![allow(dead_code)]

use chrono::Utc;
use saltdig_common::EventBus;
use saltdig_escrow::{
    Address, EscrowGateway, GatewayConfig, MockChain, SealedKeyCipher, Signer,
};
use saltdig_ledger::Ledger;
use saltdig_market::{
    AgentRegistry, AutoReleaseReconciler, CompetitionController, ListingManager,
    MilestoneController, OrderManager, PayoutRails, ReconcilerConfig, SpecLoopManager,
    UsdcCoordinator,
};
use saltdig_store::{MemoryStore, Store};
use saltdig_types::{
    AgentId, Currency, Listing, ListingId, ListingMode, ListingStatus, SaltAmount, TransferKind,
};
use std::sync::Arc;

pub const ESCROW_ADDRESS: Address = Address([0xEE; 20]);
pub const TOKEN_ADDRESS: Address = Address([0xDD; 20]);

pub struct World {
    pub store: Arc<dyn Store>,
    pub ledger: Arc<Ledger>,
    pub bus: Arc<EventBus>,
    pub chain: Arc<MockChain>,
    pub gateway: Arc<EscrowGateway>,
    pub listings: ListingManager,
    pub orders: OrderManager,
    pub usdc: UsdcCoordinator,
    pub milestones: MilestoneController,
    pub specs: SpecLoopManager,
    pub competitions: CompetitionController,
    pub agents: AgentRegistry,
}

impl World {
    pub fn new() -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone()));
        let bus = Arc::new(EventBus::new());
        let chain = Arc::new(MockChain::new(ESCROW_ADDRESS, TOKEN_ADDRESS));
        let gateway = Arc::new(EscrowGateway::new(
            chain.clone(),
            GatewayConfig::new(ESCROW_ADDRESS, TOKEN_ADDRESS),
        ));
        let rails = Arc::new(PayoutRails::new(ledger.clone(), store.clone()));

        Self {
            listings: ListingManager::new(store.clone(), ledger.clone(), bus.clone()),
            orders: OrderManager::new(store.clone(), ledger.clone(), bus.clone()),
            usdc: UsdcCoordinator::new(store.clone(), gateway.clone(), bus.clone()),
            milestones: MilestoneController::new(store.clone(), rails.clone(), bus.clone()),
            specs: SpecLoopManager::new(store.clone(), ledger.clone(), bus.clone()),
            competitions: CompetitionController::new(store.clone(), rails, bus.clone()),
            agents: AgentRegistry::new(store.clone(), Arc::new(SealedKeyCipher::new([9u8; 32]))),
            store,
            ledger,
            bus,
            chain,
            gateway,
        }
    }

    pub fn reconciler(&self, config: ReconcilerConfig) -> AutoReleaseReconciler {
        AutoReleaseReconciler::new(
            self.store.clone(),
            self.gateway.clone(),
            platform_signer(),
            self.bus.clone(),
            config,
        )
    }

    pub async fn fund(&self, agent: &AgentId, amount: u64) {
        self.ledger
            .transfer(
                None,
                Some(agent.clone()),
                SaltAmount::new(amount),
                TransferKind::Issuance,
                "test funding",
            )
            .await
            .unwrap();
    }

    pub async fn insert_listing(
        &self,
        poster: &AgentId,
        currency: Currency,
        price: &str,
        mode: ListingMode,
        status: ListingStatus,
    ) -> Listing {
        let now = Utc::now();
        let listing = Listing {
            id: ListingId::generate(),
            poster: poster.clone(),
            title: "scenario listing".into(),
            description: String::new(),
            currency,
            price: price.into(),
            category: "test".into(),
            mode,
            status,
            delivery_time: None,
            bounty_graph: None,
            completed_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_listing(listing.clone()).await.unwrap();
        listing
    }
}

pub fn signer(byte: u8) -> Signer {
    Signer::new(Address([byte; 20]), vec![byte; 32])
}

pub fn platform_signer() -> Signer {
    signer(0xAB)
}
