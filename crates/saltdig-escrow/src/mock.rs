//! In-memory escrow contract used by tests and hermetic runs.
//!
//! Speaks the same calldata as the live contract and enforces the same
//! status machine, allowance checks included, so the gateway and the
//! reconciler exercise their real code paths against it.

use crate::abi::{
    self, decode_u64, encode_bounty, encode_u64_return, keccak256, selector, Address, B256,
    RawBounty,
};
use crate::rpc::{EscrowRpc, Signer, TxHash};
use crate::{EscrowError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

const STATUS_OPEN: u8 = 0;
const STATUS_CLAIMED: u8 = 1;
const STATUS_SUBMITTED: u8 = 2;
const STATUS_APPROVED: u8 = 3;
const STATUS_DISPUTED: u8 = 4;
const STATUS_CANCELLED: u8 = 5;
const STATUS_AUTO_RELEASED: u8 = 6;

pub struct MockChain {
    escrow: Address,
    token: Address,
    bounties: Mutex<HashMap<[u8; 32], RawBounty>>,
    /// owner -> spender allowance, saturating at u64::MAX for "max".
    allowances: Mutex<HashMap<(Address, Address), u64>>,
    now: AtomicU64,
    tx_counter: AtomicU64,
    auto_release_seconds: u64,
    platform_fee_bps: u64,
    worker_stake_bps: u64,
    /// One-shot injected transport failure.
    fail_next: Mutex<Option<String>>,
}

impl MockChain {
    pub fn new(escrow: Address, token: Address) -> Self {
        Self {
            escrow,
            token,
            bounties: Mutex::new(HashMap::new()),
            allowances: Mutex::new(HashMap::new()),
            now: AtomicU64::new(1_700_000_000),
            tx_counter: AtomicU64::new(0),
            auto_release_seconds: 259_200,
            platform_fee_bps: 500,
            worker_stake_bps: 1_000,
            fail_next: Mutex::new(None),
        }
    }

    pub fn set_now(&self, unix: u64) {
        self.now.store(unix, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    /// Queue a transport failure for the next call or send.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock().unwrap() = Some(message.into());
    }

    pub fn bounty(&self, hash: B256) -> Option<RawBounty> {
        self.bounties.lock().unwrap().get(&hash.0).cloned()
    }

    /// Out-of-band status override, for drift scenarios where the chain
    /// moved without this process observing it.
    pub fn override_status(&self, hash: B256, status: u8) {
        if let Some(bounty) = self.bounties.lock().unwrap().get_mut(&hash.0) {
            bounty.status = status;
        }
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> u64 {
        *self
            .allowances
            .lock()
            .unwrap()
            .get(&(owner, spender))
            .unwrap_or(&0)
    }

    fn take_injected_failure(&self) -> Option<String> {
        self.fail_next.lock().unwrap().take()
    }

    fn next_tx_hash(&self) -> TxHash {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let digest = blake3::hash(&n.to_le_bytes());
        format!("0x{}", hex::encode(digest.as_bytes()))
    }

    fn revert(reason: &str) -> EscrowError {
        EscrowError::Reverted(reason.to_string())
    }

    fn decode_string_arg(data: &[u8]) -> Result<String> {
        let offset = decode_u64(data, 0)? as usize;
        let len = decode_u64(data, offset / 32)? as usize;
        let start = offset + 32;
        let bytes = data
            .get(start..start + len)
            .ok_or_else(|| EscrowError::Decode("string argument truncated".into()))?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| EscrowError::Decode("string argument is not UTF-8".into()))
    }

    fn hash_arg(data: &[u8]) -> Result<[u8; 32]> {
        data.get(..32)
            .and_then(|w| <[u8; 32]>::try_from(w).ok())
            .ok_or_else(|| EscrowError::Decode("missing bytes32 argument".into()))
    }
}

#[async_trait]
impl EscrowRpc for MockChain {
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>> {
        if let Some(message) = self.take_injected_failure() {
            return Err(EscrowError::Rpc(message));
        }
        let (sel, args) = data.split_at(4);

        if to == self.token {
            if sel == selector("allowance(address,address)") {
                let owner = abi::decode_address(args, 0)?;
                let spender = abi::decode_address(args, 1)?;
                return Ok(encode_u64_return(self.allowance(owner, spender)));
            }
            return Err(Self::revert("unknown token call"));
        }

        if sel == selector("bounties(bytes32)") {
            let hash = Self::hash_arg(args)?;
            let bounties = self.bounties.lock().unwrap();
            let bounty = bounties.get(&hash).cloned().unwrap_or(RawBounty {
                poster: Address::default(),
                worker: Address::default(),
                amount: 0,
                worker_stake: 0,
                deadline: 0,
                submitted_at: 0,
                status: STATUS_OPEN,
                bounty_id: String::new(),
            });
            return Ok(encode_bounty(&bounty));
        }
        if sel == selector("computeHash(string)") {
            let id = Self::decode_string_arg(args)?;
            return Ok(keccak256(id.as_bytes()).to_vec());
        }
        if sel == selector("platformFeeBps()") {
            return Ok(encode_u64_return(self.platform_fee_bps));
        }
        if sel == selector("workerStakeBps()") {
            return Ok(encode_u64_return(self.worker_stake_bps));
        }
        if sel == selector("autoReleaseSeconds()") {
            return Ok(encode_u64_return(self.auto_release_seconds));
        }

        Err(Self::revert("unknown view call"))
    }

    async fn send(&self, signer: &Signer, to: Address, data: Vec<u8>) -> Result<TxHash> {
        if let Some(message) = self.take_injected_failure() {
            return Err(EscrowError::Rpc(message));
        }
        let (sel, args) = data.split_at(4);

        if to == self.token {
            if sel == selector("approve(address,uint256)") {
                let spender = abi::decode_address(args, 0)?;
                self.allowances
                    .lock()
                    .unwrap()
                    .insert((signer.address, spender), u64::MAX);
                return Ok(self.next_tx_hash());
            }
            return Err(Self::revert("unknown token write"));
        }

        let mut bounties = self.bounties.lock().unwrap();

        if sel == selector("createBounty(string,uint256,uint256)") {
            let bounty_id = Self::decode_string_arg(args)?;
            let amount = decode_u64(args, 1)?;
            let deadline = decode_u64(args, 2)?;
            let hash = keccak256(bounty_id.as_bytes());

            if bounties.contains_key(&hash) {
                return Err(Self::revert("bounty exists"));
            }
            if self.allowance(signer.address, self.escrow) < amount {
                return Err(Self::revert("insufficient allowance"));
            }
            bounties.insert(
                hash,
                RawBounty {
                    poster: signer.address,
                    worker: Address::default(),
                    amount,
                    worker_stake: amount * self.worker_stake_bps / 10_000,
                    deadline,
                    submitted_at: 0,
                    status: STATUS_OPEN,
                    bounty_id,
                },
            );
            debug!(hash = %B256(hash), "Mock bounty created");
            return Ok(self.next_tx_hash());
        }

        let hash = Self::hash_arg(args)?;
        let bounty = bounties
            .get_mut(&hash)
            .ok_or_else(|| Self::revert("unknown bounty"))?;

        if sel == selector("claimBounty(bytes32)") {
            if bounty.status != STATUS_OPEN {
                return Err(Self::revert("not open"));
            }
            if signer.address == bounty.poster {
                return Err(Self::revert("poster cannot claim"));
            }
            if self.allowance(signer.address, self.escrow) < bounty.worker_stake {
                return Err(Self::revert("insufficient stake allowance"));
            }
            bounty.worker = signer.address;
            bounty.status = STATUS_CLAIMED;
        } else if sel == selector("submitBounty(bytes32)") {
            if bounty.status != STATUS_CLAIMED || signer.address != bounty.worker {
                return Err(Self::revert("not claimable worker"));
            }
            bounty.submitted_at = self.now();
            bounty.status = STATUS_SUBMITTED;
        } else if sel == selector("approveBounty(bytes32)") {
            if bounty.status != STATUS_SUBMITTED || signer.address != bounty.poster {
                return Err(Self::revert("not approvable"));
            }
            bounty.status = STATUS_APPROVED;
        } else if sel == selector("disputeBounty(bytes32)") {
            if bounty.status != STATUS_SUBMITTED
                || (signer.address != bounty.poster && signer.address != bounty.worker)
            {
                return Err(Self::revert("not disputable"));
            }
            bounty.status = STATUS_DISPUTED;
        } else if sel == selector("cancelBounty(bytes32)") {
            if bounty.status != STATUS_OPEN || signer.address != bounty.poster {
                return Err(Self::revert("not cancellable"));
            }
            bounty.status = STATUS_CANCELLED;
        } else if sel == selector("autoRelease(bytes32)") {
            if bounty.status != STATUS_SUBMITTED {
                return Err(Self::revert("not submitted"));
            }
            if self.now() < bounty.submitted_at + self.auto_release_seconds {
                return Err(Self::revert("auto-release window not reached"));
            }
            bounty.status = STATUS_AUTO_RELEASED;
        } else {
            return Err(Self::revert("unknown write"));
        }

        Ok(self.next_tx_hash())
    }
}
