use crate::TypeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of decimals the on-chain USDC token uses.
pub const USDC_DECIMALS: u32 = 6;
const USDC_BASE_UNIT: u64 = 1_000_000; // 10^6

/// Whole-unit Salt amount. Salt has no fractional representation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SaltAmount(u64);

impl SaltAmount {
    pub const ZERO: Self = Self(0);

    pub const fn new(units: u64) -> Self {
        Self(units)
    }

    pub const fn units(&self) -> u64 {
        self.0
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a listing price string. Salt prices are non-negative integers.
    pub fn parse(price: &str) -> Result<Self, TypeError> {
        price
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| TypeError::InvalidAmount(format!("not an integer Salt amount: {price}")))
    }
}

impl fmt::Display for SaltAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} SALT", self.0)
    }
}

/// USDC amount in micro units (six decimals), matching the token wire format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct UsdcAmount(u64);

impl UsdcAmount {
    pub const ZERO: Self = Self(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn to_micros(&self) -> u64 {
        self.0
    }

    pub fn to_decimal(&self) -> f64 {
        self.0 as f64 / USDC_BASE_UNIT as f64
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Worker stake at the contract's 10% (1000 bps) rate.
    pub fn worker_stake(&self) -> Self {
        Self(self.0 / 10)
    }

    /// Parse a decimal price string with up to six fractional digits.
    pub fn parse(price: &str) -> Result<Self, TypeError> {
        let s = price.trim();
        let invalid = || TypeError::InvalidAmount(format!("not a USDC amount: {price}"));

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if frac.len() > USDC_DECIMALS as usize {
            return Err(invalid());
        }

        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let frac_micros: u64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<6}");
            padded.parse().map_err(|_| invalid())?
        };

        whole
            .checked_mul(USDC_BASE_UNIT)
            .and_then(|w| w.checked_add(frac_micros))
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for UsdcAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} USDC", self.to_decimal())
    }
}
