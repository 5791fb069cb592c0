//! Decimal arithmetic at per-asset scale.
//!
//! The coordinator never works in raw integer base units across assets —
//! scales differ (8 for most UTXO chains, 18 for most ERC-20s, 6 for USDC).
//! `AssetAmount` wraps `rust_decimal::Decimal` and centralizes the one
//! rounding rule the spec mandates: floor, always, at the asset's scale.

use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetAmount(pub Decimal);

impl AssetAmount {
    pub const ZERO: AssetAmount = AssetAmount(Decimal::ZERO);

    pub fn from_decimal(d: Decimal) -> Self {
        Self(d)
    }

    /// Parses a decimal string (as used by `CommissionRequirement`'s
    /// `usdFixed`/`nativeFixed`/`erc20FixedFee` fields).
    pub fn from_str_exact(s: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Self(Decimal::from_str_exact(s)?))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Floors to `scale` decimal places. This is the only rounding mode the
    /// coordinator ever applies — never round-half-up, never ceiling.
    pub fn floor_to_scale(&self, scale: u32) -> Self {
        Self(self.0.round_dp_with_strategy(scale, RoundingStrategy::ToZero))
    }

    /// `floor(self * bps / 10_000)` at `scale` decimal places — the
    /// commission formula for `PERCENT_BPS` mode.
    pub fn bps_of(&self, bps: u32, scale: u32) -> Self {
        let bps_dec = Decimal::from(bps);
        let ten_thousand = Decimal::from(10_000u32);
        let raw = self.0 * bps_dec / ten_thousand;
        Self(raw).floor_to_scale(scale)
    }

    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }
}

impl Add for AssetAmount {
    type Output = AssetAmount;
    fn add(self, rhs: Self) -> Self::Output {
        AssetAmount(self.0 + rhs.0)
    }
}

impl Sub for AssetAmount {
    type Output = AssetAmount;
    fn sub(self, rhs: Self) -> Self::Output {
        AssetAmount(self.0 - rhs.0)
    }
}

impl fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetAmount({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amt(s: &str) -> AssetAmount {
        AssetAmount::from_str_exact(s).unwrap()
    }

    #[test]
    fn commission_floors_never_rounds_up() {
        // 10.03 ALPHA * 30 bps / 10_000 = 0.03009, floored at 8dp = 0.03009000
        let r_trade = amt("10.03");
        let comm = r_trade.bps_of(30, 8);
        assert_eq!(comm, amt("0.03009000"));
    }

    #[test]
    fn floor_truncates_toward_zero_not_nearest() {
        let v = amt("1.23456789");
        assert_eq!(v.floor_to_scale(4), amt("1.2345"));
    }

    #[test]
    fn example_one_required_deposits() {
        // Happy ALPHA<->USDC scenario from the testable-properties section:
        // side A 10 ALPHA, bps=30, no erc20FixedFee -> required 10.03 ALPHA.
        let trade = amt("10");
        let comm = trade.bps_of(30, 8);
        let required = trade.checked_add(&comm).unwrap();
        assert_eq!(required, amt("10.030000"));
    }

    #[test]
    fn usdc_example_with_fixed_fee() {
        // side B 50 USDC, bps=30, erc20FixedFee=0.001 -> required 50.151
        let trade = amt("50");
        let bps_part = trade.bps_of(30, 6);
        let fixed = amt("0.001");
        let comm = bps_part.checked_add(&fixed).unwrap();
        let required = trade.checked_add(&comm).unwrap();
        assert_eq!(required, amt("50.151000"));
    }
}
