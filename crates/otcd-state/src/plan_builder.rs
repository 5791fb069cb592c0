//! Transfer-plan construction (§4.3 "Plan"). Emits a `Vec` of new rows to
//! be committed atomically by the caller inside one transaction.

use otcd_chain::ChainAdapter;
use otcd_core::{
    AssetAmount, AssetCode, AssetRegistry, ChainConfig, ChainFamily, ChainId, CommissionCurrency,
    Deal, EscrowDeposit, OtcError, Phase, Purpose, QueueItem, QueueStatus, Side, Timestamp,
};
use std::collections::HashMap;

/// §9 "Cross-chain address format guard": every destination is checked
/// against the chain's own address grammar before its `QueueItem` is
/// persisted, not deferred to submission time.
fn check_address(adapter: &dyn ChainAdapter, chain: &ChainId, address: &str) -> Result<(), OtcError> {
    if adapter.validate_address(address) {
        Ok(())
    } else {
        Err(OtcError::AddressFormatIncompatible {
            chain: chain.to_string(),
            address: address.to_string(),
        })
    }
}

/// One side's plan, built independently of the other (§4.3 "for each side
/// independently"). `deal` is taken `&mut` because `seq` allocation
/// (`Deal::next_seq_for`) mutates the deal's per-source counters in place;
/// the caller persists the deal alongside the returned items in the same
/// transaction. `operator_address` is resolved by the caller from
/// `ChainAdapter::operator_address()` — this module stays pure and does not
/// talk to adapters.
pub fn build_side_plan(
    deal: &mut Deal,
    side: Side,
    deposits: &[EscrowDeposit],
    registry: &AssetRegistry,
    chain_config: Option<&ChainConfig>,
    operator_address: &str,
    adapter: &dyn ChainAdapter,
    now: Timestamp,
) -> Result<Vec<QueueItem>, OtcError> {
    let this = deal.side(side).clone();
    let other = deal.side(side.other()).clone();

    let escrow = this
        .escrow
        .clone()
        .ok_or_else(|| OtcError::InvariantViolation(format!("side {:?} has no escrow", side)))?;
    let recipient = other
        .party
        .recipient_address
        .clone()
        .ok_or_else(|| OtcError::PartyDetailsIncomplete(format!("{:?}", side.other())))?;
    let payback = this
        .party
        .payback_address
        .clone()
        .ok_or_else(|| OtcError::PartyDetailsIncomplete(format!("{:?}", side)))?;
    let commission = this
        .commission_plan
        .clone()
        .ok_or_else(|| OtcError::CommissionPlanIncomplete("commission_plan missing".to_string()))?;

    let trade_scale = registry.decimals(&this.asset);
    let r_trade = this.amount;
    let r_comm = commission
        .required_commission(r_trade, trade_scale)
        .map_err(OtcError::CommissionPlanIncomplete)?;

    // Broker path (§9 Open Question decision): a single on-chain call
    // replaces the three phased items for this side.
    if let Some(cfg) = chain_config {
        if let Some(broker) = &cfg.broker_contract {
            check_address(adapter, &this.chain, &broker.contract_address)?;
            let seq = deal.next_seq_for(&escrow.address);
            return Ok(vec![QueueItem {
                id: format!("{}-{:?}-broker", deal.id, side),
                deal_id: deal.id,
                chain: this.chain.clone(),
                source_address: escrow.address.clone(),
                destination_address: broker.contract_address.clone(),
                asset: this.asset.clone(),
                amount: r_trade,
                purpose: Purpose::BrokerSwap,
                phase: Some(Phase::Swap),
                seq,
                status: QueueStatus::Pending,
                submitted_tx: Default::default(),
                recovery: Default::default(),
                created_at: now,
                last_error: None,
            }]);
        }
    }

    // Phased plan (default).
    let mut items = Vec::new();
    let mut spent: HashMap<AssetCode, AssetAmount> = HashMap::new();

    // 1. SWAP_PAYOUT — phase 1, exact trade amount to the counterparty.
    if !r_trade.is_zero() {
        check_address(adapter, &this.chain, &recipient)?;
        let seq = deal.next_seq_for(&escrow.address);
        items.push(QueueItem {
            id: format!("{}-{:?}-payout", deal.id, side),
            deal_id: deal.id,
            chain: this.chain.clone(),
            source_address: escrow.address.clone(),
            destination_address: recipient,
            asset: this.asset.clone(),
            amount: r_trade,
            purpose: Purpose::SwapPayout,
            phase: Some(Phase::Swap),
            seq,
            status: QueueStatus::Pending,
            submitted_tx: Default::default(),
            recovery: Default::default(),
            created_at: now,
            last_error: None,
        });
        let entry = spent.entry(this.asset.clone()).or_insert(AssetAmount::ZERO);
        *entry = *entry + r_trade;
    }

    // 2. OP_COMMISSION — phase 2, to the chain's operator address.
    let comm_asset = match commission.currency {
        CommissionCurrency::Asset => this.asset.clone(),
        CommissionCurrency::Native => registry
            .native_asset_for_chain(&this.chain)
            .ok_or_else(|| {
                OtcError::CommissionPlanIncomplete(
                    "no native asset registered for chain".to_string(),
                )
            })?,
    };
    if !r_comm.is_zero() {
        check_address(adapter, &this.chain, operator_address)?;
        let seq = deal.next_seq_for(&escrow.address);
        items.push(QueueItem {
            id: format!("{}-{:?}-commission", deal.id, side),
            deal_id: deal.id,
            chain: this.chain.clone(),
            source_address: escrow.address.clone(),
            destination_address: operator_address.to_string(),
            asset: comm_asset.clone(),
            amount: r_comm,
            purpose: Purpose::OpCommission,
            phase: Some(Phase::Commission),
            seq,
            status: QueueStatus::Pending,
            submitted_tx: Default::default(),
            recovery: Default::default(),
            created_at: now,
            last_error: None,
        });
        let entry = spent.entry(comm_asset).or_insert(AssetAmount::ZERO);
        *entry = *entry + r_comm;
    }

    // 3. SURPLUS_REFUND — phase 3, one item per asset held in excess of
    // what items 1-2 spend, computed from confirmed deposits (not raw
    // on-chain balance — invariant I7 / §4.3's explicit instruction).
    let mut held: HashMap<AssetCode, AssetAmount> = HashMap::new();
    for dep in deposits {
        let entry = held.entry(dep.asset.clone()).or_insert(AssetAmount::ZERO);
        *entry = *entry + dep.amount;
    }
    let mut assets: Vec<AssetCode> = held.keys().cloned().collect();
    assets.sort();
    for asset in assets {
        let held_amount = held.get(&asset).copied().unwrap_or(AssetAmount::ZERO);
        let spent_amount = spent.get(&asset).copied().unwrap_or(AssetAmount::ZERO);
        let surplus = held_amount
            .checked_sub(&spent_amount)
            .unwrap_or(AssetAmount::ZERO);
        if surplus.is_zero() || surplus.is_negative() {
            continue;
        }
        check_address(adapter, &this.chain, &payback)?;
        let seq = deal.next_seq_for(&escrow.address);
        items.push(QueueItem {
            id: format!("{}-{:?}-surplus-{}", deal.id, side, asset),
            deal_id: deal.id,
            chain: this.chain.clone(),
            source_address: escrow.address.clone(),
            destination_address: payback.clone(),
            asset,
            amount: surplus,
            purpose: Purpose::SurplusRefund,
            phase: Some(Phase::Refund),
            seq,
            status: QueueStatus::Pending,
            submitted_tx: Default::default(),
            recovery: Default::default(),
            created_at: now,
            last_error: None,
        });
    }

    Ok(items)
}

/// Builds the `TIMEOUT_REFUND` items for a side on expiry (§4.1
/// COLLECTION/WAITING -> REVERTED), one per confirmed deposit. Rejects
/// (invariant I6) if any non-terminal payout/commission/broker item
/// already exists for the source — callers must check this themselves
/// inside the enqueue transaction; this function only builds the items.
pub fn build_timeout_refund_plan(
    deal: &mut Deal,
    side: Side,
    deposits: &[EscrowDeposit],
    adapter: &dyn ChainAdapter,
    now: Timestamp,
) -> Result<Vec<QueueItem>, OtcError> {
    let this = deal.side(side).clone();
    let escrow = this
        .escrow
        .clone()
        .ok_or_else(|| OtcError::InvariantViolation(format!("side {:?} has no escrow", side)))?;
    let payback = this
        .party
        .payback_address
        .clone()
        .ok_or_else(|| OtcError::PartyDetailsIncomplete(format!("{:?}", side)))?;
    check_address(adapter, &this.chain, &payback)?;

    let mut items = Vec::new();
    for dep in deposits {
        let seq = deal.next_seq_for(&escrow.address);
        items.push(QueueItem {
            id: format!("{}-{:?}-timeout-{}", deal.id, side, dep.txid),
            deal_id: deal.id,
            chain: this.chain.clone(),
            source_address: escrow.address.clone(),
            destination_address: payback.clone(),
            asset: dep.asset.clone(),
            amount: dep.amount,
            purpose: Purpose::TimeoutRefund,
            phase: None,
            seq,
            status: QueueStatus::Pending,
            submitted_tx: Default::default(),
            recovery: Default::default(),
            created_at: now,
            last_error: None,
        });
    }
    Ok(items)
}

/// Builds the late-deposit refund item (§4.1 CLOSED -> CLOSED) for a single
/// newly observed deposit.
pub fn build_late_deposit_refund(
    deal: &mut Deal,
    side: Side,
    deposit: &EscrowDeposit,
    adapter: &dyn ChainAdapter,
    now: Timestamp,
) -> Result<QueueItem, OtcError> {
    let this = deal.side(side).clone();
    let escrow = this
        .escrow
        .clone()
        .ok_or_else(|| OtcError::InvariantViolation(format!("side {:?} has no escrow", side)))?;
    let payback = this
        .party
        .payback_address
        .clone()
        .ok_or_else(|| OtcError::PartyDetailsIncomplete(format!("{:?}", side)))?;
    check_address(adapter, &this.chain, &payback)?;
    let seq = deal.next_seq_for(&escrow.address);
    Ok(QueueItem {
        id: format!("{}-{:?}-late-{}", deal.id, side, deposit.txid),
        deal_id: deal.id,
        chain: this.chain.clone(),
        source_address: escrow.address.clone(),
        destination_address: payback,
        asset: deposit.asset.clone(),
        amount: deposit.amount,
        purpose: Purpose::SurplusRefund,
        phase: None,
        seq,
        status: QueueStatus::Pending,
        submitted_tx: Default::default(),
        recovery: Default::default(),
        created_at: now,
        last_error: None,
    })
}

/// Builds the `GAS_REFUND_TO_TANK` sweep-back item for a side once its
/// settlement items have all completed (§4.3 "Gas funding (EVM only)").
/// UTXO escrows have no separate gas concept and never receive one;
/// account-family escrows only get one if a tank address is configured
/// and `native_balance` is still positive after settlement.
pub fn build_gas_refund_plan(
    deal: &mut Deal,
    side: Side,
    registry: &AssetRegistry,
    chain_config: Option<&ChainConfig>,
    adapter: &dyn ChainAdapter,
    native_balance: AssetAmount,
    now: Timestamp,
) -> Result<Option<QueueItem>, OtcError> {
    if adapter.family() != ChainFamily::Account {
        return Ok(None);
    }
    let Some(tank_address) = chain_config.and_then(|cfg| cfg.gas_tank_address.as_ref()) else {
        return Ok(None);
    };
    if native_balance.is_zero() || native_balance.is_negative() {
        return Ok(None);
    }

    let this = deal.side(side).clone();
    let escrow = this
        .escrow
        .clone()
        .ok_or_else(|| OtcError::InvariantViolation(format!("side {:?} has no escrow", side)))?;
    check_address(adapter, &this.chain, tank_address)?;
    let asset = registry
        .native_asset_for_chain(&this.chain)
        .ok_or_else(|| OtcError::InvariantViolation(format!("no native asset for chain {}", this.chain)))?;
    let seq = deal.next_seq_for(&escrow.address);
    Ok(Some(QueueItem {
        id: format!("{}-{:?}-gas-refund", deal.id, side),
        deal_id: deal.id,
        chain: this.chain.clone(),
        source_address: escrow.address.clone(),
        destination_address: tank_address.clone(),
        asset,
        amount: native_balance,
        purpose: Purpose::GasRefundToTank,
        phase: None,
        seq,
        status: QueueStatus::Pending,
        submitted_tx: Default::default(),
        recovery: Default::default(),
        created_at: now,
        last_error: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use otcd_chain::MockAdapter;
    use otcd_core::{
        ChainId as CId, CommissionMode, CommissionRequirement, DealId, DealSide, PartyDetails,
        PersonalLinkToken, Stage,
    };

    fn registry() -> AssetRegistry {
        let mut r = AssetRegistry::new();
        r.register(
            AssetCode::new("ALPHA"),
            otcd_core::asset::AssetInfo {
                chain: CId::new("alpha-utxo"),
                family: otcd_core::ChainFamily::Utxo,
                decimals: 8,
                min_sendable_unit: rust_decimal::Decimal::new(1, 8),
                native: true,
            },
        );
        r.register(
            AssetCode::new("USDC"),
            otcd_core::asset::AssetInfo {
                chain: CId::new("evm-l1"),
                family: otcd_core::ChainFamily::Account,
                decimals: 6,
                min_sendable_unit: rust_decimal::Decimal::new(1, 6),
                native: false,
            },
        );
        r
    }

    fn side_with(
        chain: &str,
        asset: &str,
        amount: &str,
        escrow_addr: &str,
        payback: &str,
        recipient: &str,
        bps: u32,
        erc20_fixed: Option<&str>,
    ) -> DealSide {
        DealSide {
            chain: CId::new(chain),
            asset: AssetCode::new(asset),
            amount: AssetAmount::from_str_exact(amount).unwrap(),
            party: PartyDetails {
                payback_address: Some(payback.to_string()),
                recipient_address: Some(recipient.to_string()),
                email: None,
            },
            escrow: Some(otcd_core::EscrowRef {
                chain: CId::new(chain),
                address: escrow_addr.to_string(),
                hd_path: format!("m/escrow/{}", escrow_addr),
            }),
            commission_plan: Some(CommissionRequirement {
                mode: CommissionMode::PercentBps,
                currency: CommissionCurrency::Asset,
                percent_bps: Some(bps),
                erc20_fixed_fee: erc20_fixed.map(|s| s.to_string()),
                usd_fixed: None,
                native_fixed: None,
                oracle_snapshot: None,
                covered_by_surplus: true,
            }),
            trade_locked_at: Some(10),
            commission_locked_at: Some(10),
        }
    }

    fn deal_for_example_one() -> Deal {
        Deal {
            id: DealId::new_random(),
            stage: Stage::Waiting,
            side_a: side_with(
                "alpha-utxo",
                "ALPHA",
                "10",
                "utxo1escrowA",
                "utxo1paybackA",
                "utxo1recipientB",
                30,
                None,
            ),
            side_b: side_with(
                "evm-l1",
                "USDC",
                "50",
                "0xescrowB",
                "0xpaybackB",
                "0xrecipientA",
                30,
                Some("0.001"),
            ),
            timeout_secs: 3600,
            expires_at: None,
            token_a: PersonalLinkToken::new_random(),
            token_b: PersonalLinkToken::new_random(),
            created_at: 0,
            closed_at: None,
            next_seq: Default::default(),
        }
    }

    fn deposit_for(
        deal: &Deal,
        side: Side,
        asset: &str,
        amount: &str,
        escrow: &str,
    ) -> EscrowDeposit {
        EscrowDeposit {
            deal_id: deal.id,
            side,
            txid: format!("tx-{:?}", side),
            output_index: Some(0),
            chain: deal.side(side).chain.clone(),
            escrow_address: escrow.to_string(),
            asset: AssetCode::new(asset),
            amount: AssetAmount::from_str_exact(amount).unwrap(),
            block_height: 1,
            block_time: 0,
            confirmations: 10,
            missed_polls: 0,
            refunded: false,
        }
    }

    #[test]
    fn happy_path_payout_commission_no_surplus() {
        let reg = registry();
        let mut deal = deal_for_example_one();
        let deposits = vec![deposit_for(&deal, Side::A, "ALPHA", "10.03", "utxo1escrowA")];
        let adapter = MockAdapter::new_utxo("alpha-utxo");
        let items = build_side_plan(
            &mut deal,
            Side::A,
            &deposits,
            &reg,
            None,
            "utxo1operator",
            &adapter,
            100,
        )
        .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].purpose, Purpose::SwapPayout);
        assert_eq!(items[0].amount, AssetAmount::from_str_exact("10").unwrap());
        assert_eq!(items[0].destination_address, "utxo1recipientB");

        assert_eq!(items[1].purpose, Purpose::OpCommission);
        assert_eq!(
            items[1].amount,
            AssetAmount::from_str_exact("0.03000000").unwrap()
        );
        assert_eq!(items[1].destination_address, "utxo1operator");
    }

    #[test]
    fn surplus_over_requirement_is_refunded() {
        let reg = registry();
        let mut deal = deal_for_example_one();
        // Deposited slightly more than required (10.03 + 0.5 extra).
        let deposits = vec![deposit_for(&deal, Side::A, "ALPHA", "10.53", "utxo1escrowA")];
        let adapter = MockAdapter::new_utxo("alpha-utxo");
        let items = build_side_plan(
            &mut deal,
            Side::A,
            &deposits,
            &reg,
            None,
            "utxo1operator",
            &adapter,
            100,
        )
        .unwrap();

        let surplus_item = items
            .iter()
            .find(|i| i.purpose == Purpose::SurplusRefund)
            .expect("surplus item present");
        assert_eq!(
            surplus_item.amount,
            AssetAmount::from_str_exact("0.50000000").unwrap()
        );
        assert_eq!(surplus_item.destination_address, "utxo1paybackA");
    }

    #[test]
    fn seq_is_monotonic_across_phases_for_one_source() {
        let reg = registry();
        let mut deal = deal_for_example_one();
        let deposits = vec![deposit_for(&deal, Side::A, "ALPHA", "10.53", "utxo1escrowA")];
        let adapter = MockAdapter::new_utxo("alpha-utxo");
        let items = build_side_plan(
            &mut deal,
            Side::A,
            &deposits,
            &reg,
            None,
            "utxo1operator",
            &adapter,
            100,
        )
        .unwrap();
        let seqs: Vec<u64> = items.iter().map(|i| i.seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort();
        assert_eq!(seqs, sorted);
        assert_eq!(seqs[0], 1);
    }
}
