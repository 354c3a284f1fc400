//! Auto-release reconciler: the single self-healing path between the
//! shadow records and the chain.
//!
//! Scans submitted records, corrects drift against the authoritative
//! on-chain status, and releases bounties whose 72-hour window has
//! elapsed. Per-bounty failures are collected and never abort the
//! batch.

use crate::error::Result;
use chrono::Utc;
use saltdig_common::EventBus;
use saltdig_escrow::{B256, ChainStatus, EscrowGateway, Signer};
use saltdig_store::Store;
use saltdig_types::{
    market_topic, EscrowRecordPatch, EscrowStatus, MarketEvent, UsdcEscrowRecord,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Default auto-release window: 72 hours.
pub const AUTO_RELEASE_SECS: u64 = 259_200;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub auto_release_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            auto_release_secs: AUTO_RELEASE_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileFailure {
    pub record_id: String,
    pub listing_id: String,
    pub error: String,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub released: usize,
    pub corrected: usize,
    pub skipped: usize,
    pub failures: Vec<ReconcileFailure>,
}

pub struct AutoReleaseReconciler {
    store: Arc<dyn Store>,
    gateway: Arc<EscrowGateway>,
    /// Platform wallet; auto-release is permissionless on-chain.
    signer: Signer,
    bus: Arc<EventBus>,
    config: ReconcilerConfig,
    /// Cancellation takes effect between bounties, never mid-call.
    cancelled: Arc<AtomicBool>,
}

impl AutoReleaseReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<EscrowGateway>,
        signer: Signer,
        bus: Arc<EventBus>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            signer,
            bus,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag a runner can set from another task to stop the batch at
    /// the next bounty boundary.
    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// One pass over all submitted records, judged against `now_unix`.
    pub async fn run_once_at(&self, now_unix: u64) -> Result<ReconcileReport> {
        let records = self
            .store
            .escrow_records_by_status(EscrowStatus::Submitted)
            .await?;

        let mut report = ReconcileReport {
            scanned: records.len(),
            ..Default::default()
        };

        for record in records {
            if self.cancelled.load(Ordering::SeqCst) {
                info!("Reconciliation cancelled between bounties");
                break;
            }
            match self.reconcile_one(&record, now_unix).await {
                Ok(Outcome::Released) => report.released += 1,
                Ok(Outcome::Corrected) => report.corrected += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(
                        record_id = %record.id,
                        listing_id = %record.listing_id,
                        error = %e,
                        "Reconciliation failed for bounty, continuing"
                    );
                    report.failures.push(ReconcileFailure {
                        record_id: record.id.to_string(),
                        listing_id: record.listing_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            scanned = report.scanned,
            released = report.released,
            corrected = report.corrected,
            skipped = report.skipped,
            failures = report.failures.len(),
            "Reconciliation pass complete"
        );
        Ok(report)
    }

    /// One pass judged against the wall clock.
    pub async fn run_once(&self) -> Result<ReconcileReport> {
        self.run_once_at(Utc::now().timestamp().max(0) as u64).await
    }

    async fn reconcile_one(&self, record: &UsdcEscrowRecord, now_unix: u64) -> Result<Outcome> {
        let hash = B256::from_hex(&record.bounty_hash)
            .unwrap_or_else(|_| EscrowGateway::compute_bounty_hash(record.listing_id.as_str()));
        let bounty = self.gateway.get_bounty(hash).await?;

        // The chain is authoritative for USDC state: anything other
        // than Submitted means this process missed a transition.
        if bounty.status != ChainStatus::Submitted {
            let corrected = shadow_status(bounty.status);
            self.store
                .update_escrow_record(
                    &record.id,
                    EscrowRecordPatch {
                        force_status: Some(corrected),
                        completed_at: matches!(
                            corrected,
                            EscrowStatus::Approved | EscrowStatus::AutoReleased
                        )
                        .then(Utc::now),
                        ..Default::default()
                    },
                )
                .await?;
            self.emit(record, corrected, None);
            warn!(
                record_id = %record.id,
                chain_status = bounty.status_label,
                "Drift corrected from chain"
            );
            return Ok(Outcome::Corrected);
        }

        if now_unix < bounty.submitted_at + self.config.auto_release_secs {
            return Ok(Outcome::Skipped);
        }

        let tx_hash = self.gateway.auto_release(&self.signer, hash).await?;
        self.store
            .update_escrow_record(
                &record.id,
                EscrowRecordPatch {
                    status: Some(EscrowStatus::AutoReleased),
                    last_tx_hash: Some(tx_hash.clone()),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.emit(record, EscrowStatus::AutoReleased, Some(tx_hash));
        info!(
            record_id = %record.id,
            listing_id = %record.listing_id,
            "✅ Bounty auto-released"
        );
        Ok(Outcome::Released)
    }

    fn emit(&self, record: &UsdcEscrowRecord, to: EscrowStatus, tx_hash: Option<String>) {
        self.bus.emit(
            &market_topic(&record.listing_id),
            MarketEvent::EscrowTransition {
                record_id: record.id.to_string(),
                from: "submitted".to_string(),
                to: to.to_string(),
                tx_hash,
                timestamp: Utc::now(),
            },
        );
    }
}

enum Outcome {
    Released,
    Corrected,
    Skipped,
}

fn shadow_status(status: ChainStatus) -> EscrowStatus {
    match status {
        ChainStatus::Open => EscrowStatus::Created,
        ChainStatus::Claimed => EscrowStatus::Claimed,
        ChainStatus::Submitted => EscrowStatus::Submitted,
        ChainStatus::Approved => EscrowStatus::Approved,
        ChainStatus::Disputed => EscrowStatus::Disputed,
        ChainStatus::Cancelled => EscrowStatus::Cancelled,
        ChainStatus::AutoReleased => EscrowStatus::AutoReleased,
    }
}

// Behavior is covered end-to-end in tests/reconciler_tests.rs, which
// drives the full create/claim/submit flow against the mock chain.
