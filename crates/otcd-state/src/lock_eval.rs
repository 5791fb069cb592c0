//! Pure lock-evaluation logic (§4.2). No persistence or I/O here — the
//! engine is responsible for fetching eligible deposits and persisting the
//! resulting lock timestamps; this module only computes booleans from
//! already-filtered inputs, in the style of the teacher's validate-before-
//! mutate arms in `StateEngine::apply_action`.

use otcd_core::{AssetAmount, CommissionCurrency, CommissionRequirement, EscrowDeposit, OtcError, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockEvaluation {
    pub trade_locked: bool,
    pub commission_locked: bool,
}

/// Sum of eligible deposit amounts — §4.2's `E_trade`/`E_comm`.
pub fn sum_eligible(
    deposits: &[EscrowDeposit],
    collect_confirms: u64,
    expires_at: Timestamp,
) -> AssetAmount {
    deposits
        .iter()
        .filter(|d| d.is_eligible(collect_confirms, expires_at))
        .fold(AssetAmount::ZERO, |acc, d| acc + d.amount)
}

/// Evaluates both locks for one side.
///
/// `trade_deposits` are eligible deposits in the trade asset; `comm_deposits`
/// are eligible deposits in the commission currency (pass the same slice
/// twice when `currency == Asset`, since then they're the same pool).
pub fn evaluate(
    trade_amount: AssetAmount,
    commission: &CommissionRequirement,
    scale: u32,
    e_trade: AssetAmount,
    e_comm: AssetAmount,
) -> Result<LockEvaluation, OtcError> {
    let r_comm = commission
        .required_commission(trade_amount, scale)
        .map_err(OtcError::CommissionPlanIncomplete)?;

    match commission.currency {
        CommissionCurrency::Asset => {
            let required = trade_amount
                .checked_add(&r_comm)
                .ok_or_else(|| OtcError::Other("lock requirement overflow".to_string()))?;
            let locked = e_trade >= required;
            Ok(LockEvaluation {
                trade_locked: locked,
                commission_locked: locked,
            })
        }
        CommissionCurrency::Native => {
            let trade_locked = e_trade >= trade_amount;
            let commission_locked = e_comm >= r_comm;
            Ok(LockEvaluation {
                trade_locked,
                commission_locked,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otcd_core::{CommissionMode, OracleSnapshot};

    fn bps_asset_commission(bps: u32) -> CommissionRequirement {
        CommissionRequirement {
            mode: CommissionMode::PercentBps,
            currency: CommissionCurrency::Asset,
            percent_bps: Some(bps),
            erc20_fixed_fee: None,
            usd_fixed: None,
            native_fixed: None,
            oracle_snapshot: None::<OracleSnapshot>,
            covered_by_surplus: true,
        }
    }

    #[test]
    fn asset_currency_locks_trade_and_commission_together() {
        let commission = bps_asset_commission(30);
        let trade = AssetAmount::from_str_exact("10").unwrap();
        // required = 10 + 0.03 = 10.03
        let below = AssetAmount::from_str_exact("10.02").unwrap();
        let eval = evaluate(trade, &commission, 8, below, below).unwrap();
        assert!(!eval.trade_locked);
        assert!(!eval.commission_locked);

        let at_threshold = AssetAmount::from_str_exact("10.03").unwrap();
        let eval = evaluate(trade, &commission, 8, at_threshold, at_threshold).unwrap();
        assert!(eval.trade_locked);
        assert!(eval.commission_locked);
    }

    #[test]
    fn native_currency_locks_independently() {
        let commission = CommissionRequirement {
            mode: CommissionMode::FixedUsdNative,
            currency: CommissionCurrency::Native,
            percent_bps: None,
            erc20_fixed_fee: None,
            usd_fixed: Some("5.00".into()),
            native_fixed: Some("0.002".into()),
            oracle_snapshot: None,
            covered_by_surplus: true,
        };
        let trade = AssetAmount::from_str_exact("10").unwrap();
        let e_trade = AssetAmount::from_str_exact("10").unwrap();
        let e_comm_short = AssetAmount::from_str_exact("0.001").unwrap();
        let eval = evaluate(trade, &commission, 8, e_trade, e_comm_short).unwrap();
        assert!(eval.trade_locked);
        assert!(!eval.commission_locked);

        let e_comm_ok = AssetAmount::from_str_exact("0.002").unwrap();
        let eval = evaluate(trade, &commission, 8, e_trade, e_comm_ok).unwrap();
        assert!(eval.trade_locked);
        assert!(eval.commission_locked);
    }
}
