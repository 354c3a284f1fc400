//! Wiring: one store, one bus, one gateway, shared by the HTTP
//! handlers and the reconciler.

use crate::config::{NodeConfig, Secrets};
use anyhow::{Context, Result};
use saltdig_common::{EventBus, RateLimiter};
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
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct SaltdigNode {
    pub config: NodeConfig,
    pub secrets: Secrets,
    pub store: Arc<dyn Store>,
    pub ledger: Arc<Ledger>,
    pub bus: Arc<EventBus>,
    pub rate_limiter: Arc<RateLimiter>,
    pub gateway: Arc<EscrowGateway>,
    pub agents: Arc<AgentRegistry>,
    pub listings: Arc<ListingManager>,
    pub orders: Arc<OrderManager>,
    pub usdc: Arc<UsdcCoordinator>,
    pub milestones: Arc<MilestoneController>,
    pub specs: Arc<SpecLoopManager>,
    pub competitions: Arc<CompetitionController>,
    pub reconciler: Arc<AutoReleaseReconciler>,
}

impl SaltdigNode {
    pub fn build(config: NodeConfig, secrets: Secrets) -> Result<Arc<Self>> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone()));
        let bus = Arc::new(EventBus::new());
        let rate_limiter = Arc::new(RateLimiter::new());

        let escrow_address = parse_address_or_default(
            &config.escrow.contract_address,
            Address([0xEE; 20]),
            "escrow contract",
        )?;
        let token_address = parse_address_or_default(
            &config.escrow.usdc_token_address,
            Address([0xDD; 20]),
            "usdc token",
        )?;

        // The JSON-RPC transport is an external integration behind the
        // same trait; the in-process chain backs hermetic and dev runs.
        if config.escrow.transport != "mock" {
            warn!(
                transport = %config.escrow.transport,
                "Unknown escrow transport, falling back to mock"
            );
        }
        let rpc = Arc::new(MockChain::new(escrow_address, token_address));
        let gateway = Arc::new(EscrowGateway::new(
            rpc,
            GatewayConfig::new(escrow_address, token_address),
        ));

        let cipher = match secrets.hosted_encryption_key.as_deref() {
            Some(hex_key) => Arc::new(
                SealedKeyCipher::from_hex_key(hex_key)
                    .context("HOSTED_ENCRYPTION_KEY is not a 32-byte hex key")?,
            ),
            None => {
                warn!("HOSTED_ENCRYPTION_KEY unset; using an ephemeral dev key");
                Arc::new(SealedKeyCipher::new([0u8; 32]))
            }
        };

        let rails = Arc::new(PayoutRails::new(ledger.clone(), store.clone()));
        let reconciler = Arc::new(AutoReleaseReconciler::new(
            store.clone(),
            gateway.clone(),
            platform_signer(&secrets),
            bus.clone(),
            ReconcilerConfig {
                auto_release_secs: config.reconciler.auto_release_secs,
            },
        ));

        Ok(Arc::new(Self {
            agents: Arc::new(AgentRegistry::new(store.clone(), cipher)),
            listings: Arc::new(ListingManager::new(
                store.clone(),
                ledger.clone(),
                bus.clone(),
            )),
            orders: Arc::new(OrderManager::new(store.clone(), ledger.clone(), bus.clone())),
            usdc: Arc::new(UsdcCoordinator::new(
                store.clone(),
                gateway.clone(),
                bus.clone(),
            )),
            milestones: Arc::new(MilestoneController::new(
                store.clone(),
                rails.clone(),
                bus.clone(),
            )),
            specs: Arc::new(SpecLoopManager::new(
                store.clone(),
                ledger.clone(),
                bus.clone(),
            )),
            competitions: Arc::new(CompetitionController::new(store.clone(), rails, bus.clone())),
            reconciler,
            config,
            secrets,
            store,
            ledger,
            bus,
            rate_limiter,
            gateway,
        }))
    }

    /// Periodic reconciliation until shutdown flips. A pass in flight
    /// stops at the next bounty boundary, never mid-call.
    pub async fn run_reconcile_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let cancel = self.reconciler.cancellation_handle();
        let mut cancel_watch = shutdown.clone();
        tokio::spawn(async move {
            let _ = cancel_watch.changed().await;
            cancel.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.reconciler.interval_secs));
        info!(
            interval_secs = self.config.reconciler.interval_secs,
            "Reconcile loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reconciler.run_once().await {
                        Ok(report) => {
                            if !report.failures.is_empty() {
                                warn!(
                                    failures = report.failures.len(),
                                    "Reconcile pass finished with failures"
                                );
                            }
                        }
                        Err(e) => error!(error = %e, "Reconcile pass could not scan the store"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Reconcile loop stopping");
                    break;
                }
            }
        }
    }
}

fn parse_address_or_default(raw: &str, fallback: Address, what: &str) -> Result<Address> {
    if raw.trim().is_empty() {
        warn!(what, "No address configured, using dev default");
        return Ok(fallback);
    }
    Address::from_hex(raw).with_context(|| format!("invalid {what} address: {raw}"))
}

fn platform_signer(secrets: &Secrets) -> Signer {
    let secret = secrets
        .platform_wallet_key
        .as_deref()
        .and_then(|k| hex::decode(k.trim().strip_prefix("0x").unwrap_or(k.trim())).ok())
        .unwrap_or_else(|| vec![0xAB; 32]);
    Signer::new(Address([0xAB; 20]), secret)
}
