use crate::decimal::AssetAmount;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum CommissionMode {
    PercentBps,
    FixedUsdNative,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum CommissionCurrency {
    Asset,
    Native,
}

/// Provenance of a frozen price used to convert a USD-fixed commission into
/// native currency at countdown start.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct OracleSnapshot {
    pub pair: String,
    pub price: String,
    pub as_of: crate::types::Timestamp,
    pub source: String,
}

/// Per-side commission policy, frozen at COLLECTION entry (invariant I3) and
/// never modified after. `#[serde(default)]` on every field added after v0
/// keeps old persisted rows decodable.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct CommissionRequirement {
    pub mode: CommissionMode,
    pub currency: CommissionCurrency,

    #[serde(default)]
    pub percent_bps: Option<u32>,

    #[serde(default)]
    pub erc20_fixed_fee: Option<String>,

    #[serde(default)]
    pub usd_fixed: Option<String>,

    #[serde(default)]
    pub native_fixed: Option<String>,

    #[serde(default)]
    pub oracle_snapshot: Option<OracleSnapshot>,

    /// Always true: commissions are paid from surplus over the trade
    /// amount, never deducted from it (invariant I7). Kept as an explicit
    /// field (rather than an assumed constant) so a persisted row is
    /// self-describing.
    #[serde(default = "always_true")]
    pub covered_by_surplus: bool,
}

fn always_true() -> bool {
    true
}

impl CommissionRequirement {
    /// `R_comm` per §4.2: `floor(R_trade * bps / 10_000) + erc20FixedFee`
    /// for PERCENT_BPS, or the frozen `nativeFixed` for FIXED_USD_NATIVE.
    pub fn required_commission(
        &self,
        trade_amount: AssetAmount,
        scale: u32,
    ) -> Result<AssetAmount, String> {
        match self.mode {
            CommissionMode::PercentBps => {
                let bps = self
                    .percent_bps
                    .ok_or_else(|| "percent_bps missing for PERCENT_BPS mode".to_string())?;
                let bps_part = trade_amount.bps_of(bps, scale);
                let fixed = match &self.erc20_fixed_fee {
                    Some(s) => AssetAmount::from_str_exact(s).map_err(|e| e.to_string())?,
                    None => AssetAmount::ZERO,
                };
                bps_part
                    .checked_add(&fixed)
                    .ok_or_else(|| "commission overflow".to_string())
            }
            CommissionMode::FixedUsdNative => {
                let s = self
                    .native_fixed
                    .as_ref()
                    .ok_or_else(|| "native_fixed missing for FIXED_USD_NATIVE mode".to_string())?;
                AssetAmount::from_str_exact(s).map_err(|e| e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_bps_with_fixed_fee() {
        let req = CommissionRequirement {
            mode: CommissionMode::PercentBps,
            currency: CommissionCurrency::Asset,
            percent_bps: Some(30),
            erc20_fixed_fee: Some("0.001".to_string()),
            usd_fixed: None,
            native_fixed: None,
            oracle_snapshot: None,
            covered_by_surplus: true,
        };
        let r_comm = req
            .required_commission(AssetAmount::from_str_exact("50").unwrap(), 6)
            .unwrap();
        assert_eq!(r_comm, AssetAmount::from_str_exact("0.151000").unwrap());
    }

    #[test]
    fn fixed_usd_native_uses_frozen_amount() {
        let req = CommissionRequirement {
            mode: CommissionMode::FixedUsdNative,
            currency: CommissionCurrency::Native,
            percent_bps: None,
            erc20_fixed_fee: None,
            usd_fixed: Some("5.00".to_string()),
            native_fixed: Some("0.002".to_string()),
            oracle_snapshot: None,
            covered_by_surplus: true,
        };
        let r_comm = req
            .required_commission(AssetAmount::from_str_exact("10").unwrap(), 8)
            .unwrap();
        assert_eq!(r_comm, AssetAmount::from_str_exact("0.002").unwrap());
    }
}
