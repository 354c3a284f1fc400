//! Typed read/write surface over the escrow contract.
//!
//! Pure translator: no state beyond configuration. Every RPC is bounded
//! by the configured deadline; timeouts and transport errors surface as
//! the retryable RPC failure and leave healing to the reconciler.

use crate::abi::{self, Address, B256};
use crate::rpc::{EscrowRpc, Signer, TxHash};
use crate::{EscrowError, Result};
use saltdig_types::UsdcAmount;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Wire-order status enum of the escrow contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChainStatus {
    Open = 0,
    Claimed = 1,
    Submitted = 2,
    Approved = 3,
    Disputed = 4,
    Cancelled = 5,
    AutoReleased = 6,
}

impl ChainStatus {
    pub fn from_wire(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Open,
            1 => Self::Claimed,
            2 => Self::Submitted,
            3 => Self::Approved,
            4 => Self::Disputed,
            5 => Self::Cancelled,
            6 => Self::AutoReleased,
            other => {
                return Err(EscrowError::Decode(format!(
                    "unknown on-chain status {other}"
                )))
            }
        })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Claimed => "Claimed",
            Self::Submitted => "Submitted",
            Self::Approved => "Approved",
            Self::Disputed => "Disputed",
            Self::Cancelled => "Cancelled",
            Self::AutoReleased => "AutoReleased",
        }
    }
}

/// Typed view of one on-chain bounty.
#[derive(Debug, Clone)]
pub struct OnChainBounty {
    pub poster: Address,
    pub worker: Option<Address>,
    pub amount: UsdcAmount,
    pub worker_stake: UsdcAmount,
    pub deadline: u64,
    pub submitted_at: u64,
    pub status: ChainStatus,
    pub status_label: &'static str,
    pub bounty_id: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub escrow_address: Address,
    /// The escrow ABI does not expose its token, so the USDC address is
    /// configuration.
    pub usdc_token_address: Address,
    pub rpc_deadline: Duration,
}

impl GatewayConfig {
    pub fn new(escrow_address: Address, usdc_token_address: Address) -> Self {
        Self {
            escrow_address,
            usdc_token_address,
            rpc_deadline: Duration::from_secs(30),
        }
    }
}

pub struct EscrowGateway {
    rpc: Arc<dyn EscrowRpc>,
    config: GatewayConfig,
}

impl EscrowGateway {
    pub fn new(rpc: Arc<dyn EscrowRpc>, config: GatewayConfig) -> Self {
        Self { rpc, config }
    }

    /// keccak-256 over the UTF-8 listing id; byte-for-byte identical to
    /// the contract's `computeHash`.
    pub fn compute_bounty_hash(listing_id: &str) -> B256 {
        B256(abi::keccak256(listing_id.as_bytes()))
    }

    async fn bounded<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.config.rpc_deadline, future)
            .await
            .map_err(|_| {
                EscrowError::Rpc(format!(
                    "RPC deadline of {:?} exceeded",
                    self.config.rpc_deadline
                ))
            })?
    }

    async fn view(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        self.bounded(self.rpc.call(self.config.escrow_address, data))
            .await
    }

    async fn write(&self, signer: &Signer, data: Vec<u8>) -> Result<TxHash> {
        self.bounded(self.rpc.send(signer, self.config.escrow_address, data))
            .await
    }

    // ---- reads ----

    pub async fn get_bounty(&self, hash: B256) -> Result<OnChainBounty> {
        let data = self
            .view(abi::encode_hash_call("bounties(bytes32)", hash))
            .await?;
        let raw = abi::decode_bounty(&data)?;
        let status = ChainStatus::from_wire(raw.status)?;
        Ok(OnChainBounty {
            poster: raw.poster,
            worker: (!raw.worker.is_zero()).then_some(raw.worker),
            amount: UsdcAmount::from_micros(raw.amount),
            worker_stake: UsdcAmount::from_micros(raw.worker_stake),
            deadline: raw.deadline,
            submitted_at: raw.submitted_at,
            status,
            status_label: status.label(),
            bounty_id: raw.bounty_id,
        })
    }

    /// `computeHash` as the contract evaluates it. Used by audits to
    /// check the local hash stays byte-identical.
    pub async fn compute_hash_on_chain(&self, listing_id: &str) -> Result<B256> {
        let mut data = abi::encode_view_call("computeHash(string)");
        data.extend_from_slice(&abi::encode_u64_return(32));
        let bytes = listing_id.as_bytes();
        data.extend_from_slice(&abi::encode_u64_return(bytes.len() as u64));
        data.extend_from_slice(bytes);
        let padding = (32 - bytes.len() % 32) % 32;
        data.extend_from_slice(&vec![0u8; padding]);

        let ret = self.view(data).await?;
        let word: [u8; 32] = ret
            .get(..32)
            .and_then(|w| w.try_into().ok())
            .ok_or_else(|| EscrowError::Decode("computeHash returned no word".into()))?;
        Ok(B256(word))
    }

    pub async fn platform_fee_bps(&self) -> Result<u64> {
        let data = self.view(abi::encode_view_call("platformFeeBps()")).await?;
        abi::decode_u64(&data, 0)
    }

    pub async fn worker_stake_bps(&self) -> Result<u64> {
        let data = self.view(abi::encode_view_call("workerStakeBps()")).await?;
        abi::decode_u64(&data, 0)
    }

    pub async fn auto_release_seconds(&self) -> Result<u64> {
        let data = self
            .view(abi::encode_view_call("autoReleaseSeconds()"))
            .await?;
        abi::decode_u64(&data, 0)
    }

    // ---- writes ----

    /// Raise the signer -> escrow USDC allowance to max unless it
    /// already covers `required`.
    async fn ensure_allowance(&self, signer: &Signer, required: UsdcAmount) -> Result<()> {
        let data = abi::encode_allowance(signer.address, self.config.escrow_address);
        let current = self
            .bounded(self.rpc.call(self.config.usdc_token_address, data))
            .await?;

        if abi::uint_return_at_least(&current, required.to_micros())? {
            debug!(signer = %signer.address, "Allowance already sufficient");
            return Ok(());
        }

        info!(
            signer = %signer.address,
            required = %required,
            "Raising USDC allowance to max"
        );
        let approve = abi::encode_approve_max(self.config.escrow_address);
        self.bounded(
            self.rpc
                .send(signer, self.config.usdc_token_address, approve),
        )
        .await?;
        Ok(())
    }

    pub async fn create_bounty(
        &self,
        signer: &Signer,
        listing_id: &str,
        amount: UsdcAmount,
        deadline: u64,
    ) -> Result<TxHash> {
        self.ensure_allowance(signer, amount).await?;
        let tx = self
            .write(
                signer,
                abi::encode_create_bounty(listing_id, amount.to_micros(), deadline),
            )
            .await?;
        info!(listing_id, amount = %amount, tx = %tx, "Bounty created on-chain");
        Ok(tx)
    }

    pub async fn claim_bounty(&self, signer: &Signer, hash: B256) -> Result<TxHash> {
        // The claim locks the worker stake, so the allowance must cover
        // it first.
        let bounty = self.get_bounty(hash).await?;
        self.ensure_allowance(signer, bounty.worker_stake).await?;
        let tx = self
            .write(signer, abi::encode_hash_call("claimBounty(bytes32)", hash))
            .await?;
        info!(hash = %hash, tx = %tx, "Bounty claimed on-chain");
        Ok(tx)
    }

    pub async fn submit_bounty(&self, signer: &Signer, hash: B256) -> Result<TxHash> {
        let tx = self
            .write(signer, abi::encode_hash_call("submitBounty(bytes32)", hash))
            .await?;
        info!(hash = %hash, tx = %tx, "Work submitted on-chain");
        Ok(tx)
    }

    pub async fn approve_bounty(&self, signer: &Signer, hash: B256) -> Result<TxHash> {
        let tx = self
            .write(signer, abi::encode_hash_call("approveBounty(bytes32)", hash))
            .await?;
        info!(hash = %hash, tx = %tx, "Bounty approved on-chain");
        Ok(tx)
    }

    pub async fn dispute_bounty(&self, signer: &Signer, hash: B256) -> Result<TxHash> {
        let tx = self
            .write(signer, abi::encode_hash_call("disputeBounty(bytes32)", hash))
            .await?;
        info!(hash = %hash, tx = %tx, "Bounty disputed on-chain");
        Ok(tx)
    }

    pub async fn cancel_bounty(&self, signer: &Signer, hash: B256) -> Result<TxHash> {
        let tx = self
            .write(signer, abi::encode_hash_call("cancelBounty(bytes32)", hash))
            .await?;
        info!(hash = %hash, tx = %tx, "Bounty cancelled on-chain");
        Ok(tx)
    }

    pub async fn auto_release(&self, signer: &Signer, hash: B256) -> Result<TxHash> {
        let tx = self
            .write(signer, abi::encode_hash_call("autoRelease(bytes32)", hash))
            .await?;
        info!(hash = %hash, tx = %tx, "Bounty auto-released on-chain");
        Ok(tx)
    }
}
