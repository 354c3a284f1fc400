//! Minimal ABI codec for the fixed escrow function set.
//!
//! Only the shapes the contract actually uses are implemented: static
//! `bytes32`/`uint256`/`address` words, one dynamic `string` argument,
//! and the `bounties` tuple return. Selectors are the first four bytes
//! of keccak-256 over the canonical signature.

use crate::{EscrowError, Result};
use sha3::{Digest, Keccak256};
use std::fmt;

const WORD: usize = 32;

/// 20-byte EVM address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_hex(s: &str) -> Result<Self> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|_| EscrowError::Decode(format!("invalid address hex: {s}")))?;
        let array: [u8; 20] = bytes
            .try_into()
            .map_err(|_| EscrowError::Decode(format!("address must be 20 bytes: {s}")))?;
        Ok(Self(array))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// 32-byte word (bounty hashes, tx hashes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct B256(pub [u8; 32]);

impl B256 {
    pub fn from_hex(s: &str) -> Result<Self> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|_| EscrowError::Decode(format!("invalid hash hex: {s}")))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| EscrowError::Decode(format!("hash must be 32 bytes: {s}")))?;
        Ok(Self(array))
    }
}

impl fmt::Display for B256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// First four bytes of keccak-256 over the canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

fn word_u64(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

fn word_address(address: Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 20..].copy_from_slice(&address.0);
    word
}

/// The maximum uint256, used to raise allowances once.
pub fn max_uint_word() -> [u8; WORD] {
    [0xFF; WORD]
}

// ---- escrow calldata ----

/// `createBounty(string bountyId, uint256 amount, uint256 deadline)`
pub fn encode_create_bounty(bounty_id: &str, amount: u64, deadline: u64) -> Vec<u8> {
    let mut data = selector("createBounty(string,uint256,uint256)").to_vec();
    // Head: offset to the string tail, then the two static words.
    data.extend_from_slice(&word_u64((3 * WORD) as u64));
    data.extend_from_slice(&word_u64(amount));
    data.extend_from_slice(&word_u64(deadline));
    // Tail: length-prefixed, zero-padded string bytes.
    let bytes = bounty_id.as_bytes();
    data.extend_from_slice(&word_u64(bytes.len() as u64));
    data.extend_from_slice(bytes);
    let padding = (WORD - bytes.len() % WORD) % WORD;
    data.extend_from_slice(&vec![0u8; padding]);
    data
}

/// The `fn(bytes32)` family: claim, submit, approve, dispute, cancel,
/// autoRelease, and the `bounties` view.
pub fn encode_hash_call(signature: &str, hash: B256) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&hash.0);
    data
}

/// Zero-argument uint views: platformFeeBps / workerStakeBps /
/// autoReleaseSeconds.
pub fn encode_view_call(signature: &str) -> Vec<u8> {
    selector(signature).to_vec()
}

// ---- ERC-20 calldata ----

/// `allowance(address owner, address spender)`
pub fn encode_allowance(owner: Address, spender: Address) -> Vec<u8> {
    let mut data = selector("allowance(address,address)").to_vec();
    data.extend_from_slice(&word_address(owner));
    data.extend_from_slice(&word_address(spender));
    data
}

/// `approve(address spender, uint256 amount)` with amount = max uint.
pub fn encode_approve_max(spender: Address) -> Vec<u8> {
    let mut data = selector("approve(address,uint256)").to_vec();
    data.extend_from_slice(&word_address(spender));
    data.extend_from_slice(&max_uint_word());
    data
}

// ---- return decoding ----

fn read_word(data: &[u8], index: usize) -> Result<&[u8]> {
    let start = index * WORD;
    data.get(start..start + WORD)
        .ok_or_else(|| EscrowError::Decode(format!("return data truncated at word {index}")))
}

/// Decode a uint word into u64, rejecting values that overflow.
pub fn decode_u64(data: &[u8], index: usize) -> Result<u64> {
    let word = read_word(data, index)?;
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(EscrowError::Decode(format!(
            "uint at word {index} exceeds u64"
        )));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[WORD - 8..]);
    Ok(u64::from_be_bytes(bytes))
}

pub fn decode_address(data: &[u8], index: usize) -> Result<Address> {
    let word = read_word(data, index)?;
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[WORD - 20..]);
    Ok(Address(bytes))
}

fn decode_string_at(data: &[u8], offset: usize) -> Result<String> {
    let len = decode_u64(data, offset / WORD)? as usize;
    let start = offset + WORD;
    let bytes = data
        .get(start..start + len)
        .ok_or_else(|| EscrowError::Decode("string tail truncated".into()))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| EscrowError::Decode("string is not valid UTF-8".into()))
}

/// Raw `bounties(bytes32)` tuple, before the gateway types it.
#[derive(Debug, Clone)]
pub struct RawBounty {
    pub poster: Address,
    pub worker: Address,
    pub amount: u64,
    pub worker_stake: u64,
    pub deadline: u64,
    pub submitted_at: u64,
    pub status: u8,
    pub bounty_id: String,
}

pub fn decode_bounty(data: &[u8]) -> Result<RawBounty> {
    let status = decode_u64(data, 6)?;
    let string_offset = decode_u64(data, 7)? as usize;
    Ok(RawBounty {
        poster: decode_address(data, 0)?,
        worker: decode_address(data, 1)?,
        amount: decode_u64(data, 2)?,
        worker_stake: decode_u64(data, 3)?,
        deadline: decode_u64(data, 4)?,
        submitted_at: decode_u64(data, 5)?,
        status: u8::try_from(status)
            .map_err(|_| EscrowError::Decode(format!("status {status} out of range")))?,
        bounty_id: decode_string_at(data, string_offset)?,
    })
}

/// Encode the `bounties` tuple; the mock chain answers reads with this.
pub fn encode_bounty(bounty: &RawBounty) -> Vec<u8> {
    let mut data = Vec::with_capacity(10 * WORD);
    data.extend_from_slice(&word_address(bounty.poster));
    data.extend_from_slice(&word_address(bounty.worker));
    data.extend_from_slice(&word_u64(bounty.amount));
    data.extend_from_slice(&word_u64(bounty.worker_stake));
    data.extend_from_slice(&word_u64(bounty.deadline));
    data.extend_from_slice(&word_u64(bounty.submitted_at));
    data.extend_from_slice(&word_u64(bounty.status as u64));
    data.extend_from_slice(&word_u64((8 * WORD) as u64));
    let bytes = bounty.bounty_id.as_bytes();
    data.extend_from_slice(&word_u64(bytes.len() as u64));
    data.extend_from_slice(bytes);
    let padding = (WORD - bytes.len() % WORD) % WORD;
    data.extend_from_slice(&vec![0u8; padding]);
    data
}

/// Encode a single uint return word.
pub fn encode_u64_return(value: u64) -> Vec<u8> {
    word_u64(value).to_vec()
}

/// Whether a uint return word represents at least `amount`. Handles
/// max-uint allowances without a big-int type.
pub fn uint_return_at_least(data: &[u8], amount: u64) -> Result<bool> {
    let word = read_word(data, 0)?;
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Ok(true);
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[WORD - 8..]);
    Ok(u64::from_be_bytes(bytes) >= amount)
}
