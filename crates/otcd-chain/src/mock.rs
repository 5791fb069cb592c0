//! Deterministic in-memory adapters used by engine tests and by
//! `otcd-node --demo`. No network I/O; state lives in a `Mutex`-guarded
//! map exactly as small as the test needs, in the teacher's hand-cranked
//! fixture style rather than a property-testing framework.

use crate::adapter::{
    ChainAdapter, ConfirmationStatus, DepositRecord, EscrowHandle, FeeIntent, SendResult, UsdQuote,
};
use async_trait::async_trait;
use otcd_core::{AssetAmount, AssetCode, ChainFamily, ChainId, DealId, OracleSnapshot, OtcError, Side};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

struct MockState {
    deposits: HashMap<String, Vec<DepositRecord>>,
    tx_status: HashMap<String, ConfirmationStatus>,
    native_balances: HashMap<String, AssetAmount>,
}

impl MockState {
    fn new() -> Self {
        Self {
            deposits: HashMap::new(),
            tx_status: HashMap::new(),
            native_balances: HashMap::new(),
        }
    }
}

pub struct MockAdapter {
    chain_id: ChainId,
    family: ChainFamily,
    collect_confirms: u64,
    required_confirms: u64,
    operator_address: String,
    state: Mutex<MockState>,
    send_counter: AtomicU64,
    address_prefix: &'static str,
}

impl MockAdapter {
    pub fn new_utxo(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: ChainId::new(chain_id),
            family: ChainFamily::Utxo,
            collect_confirms: 6,
            required_confirms: 6,
            operator_address: "utxo1operator0000000000000000000000".to_string(),
            state: Mutex::new(MockState::new()),
            send_counter: AtomicU64::new(0),
            address_prefix: "utxo1",
        }
    }

    pub fn new_account(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: ChainId::new(chain_id),
            family: ChainFamily::Account,
            collect_confirms: 3,
            required_confirms: 3,
            operator_address: "0x000000000000000000000000000000000000ff".to_string(),
            state: Mutex::new(MockState::new()),
            send_counter: AtomicU64::new(0),
            address_prefix: "0x",
        }
    }

    /// Test/demo helper: injects a deposit as if observed on chain.
    pub fn push_deposit(&self, address: &str, record: DepositRecord) {
        self.state
            .lock()
            .unwrap()
            .deposits
            .entry(address.to_string())
            .or_default()
            .push(record);
    }

    /// Test/demo helper: removes all deposits at an address matching a
    /// txid, simulating a reorg.
    pub fn drop_deposit(&self, address: &str, txid: &str) {
        if let Some(list) = self.state.lock().unwrap().deposits.get_mut(address) {
            list.retain(|d| d.txid != txid);
        }
    }

    /// Test/demo helper: sets the confirmation count (or marks unknown) for
    /// a previously sent transaction.
    pub fn set_tx_status(&self, txid: &str, status: ConfirmationStatus) {
        self.state
            .lock()
            .unwrap()
            .tx_status
            .insert(txid.to_string(), status);
    }

    /// Test/demo helper: sets an address's tracked native balance directly,
    /// bypassing `ensure_fee_budget`'s top-up path.
    pub fn set_native_balance(&self, address: &str, amount: AssetAmount) {
        self.state
            .lock()
            .unwrap()
            .native_balances
            .insert(address.to_string(), amount);
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    fn family(&self) -> ChainFamily {
        self.family
    }

    fn validate_address(&self, address: &str) -> bool {
        address.starts_with(self.address_prefix)
    }

    fn generate_escrow(&self, _asset: &AssetCode, deal_id: DealId, side: Side) -> EscrowHandle {
        let hd_path = format!("m/84'/otc/{}/{}", deal_id.to_hex(), side);
        let mut hasher = blake3::Hasher::new();
        hasher.update(deal_id.as_bytes());
        hasher.update(side.to_string().as_bytes());
        hasher.update(self.chain_id.as_str().as_bytes());
        let digest = hasher.finalize();
        let address = format!("{}{}", self.address_prefix, hex::encode(&digest.as_bytes()[..16]));
        EscrowHandle { address, hd_path }
    }

    async fn list_confirmed_deposits(
        &self,
        _asset: &AssetCode,
        address: &str,
        min_conf: u64,
        since: Option<i64>,
    ) -> Result<Vec<DepositRecord>, OtcError> {
        let state = self.state.lock().unwrap();
        let deposits = state
            .deposits
            .get(address)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|d| d.confirms >= min_conf)
            .filter(|d| since.map(|s| d.block_time >= s).unwrap_or(true))
            .collect();
        Ok(deposits)
    }

    async fn send(
        &self,
        _asset: &AssetCode,
        from_escrow: &str,
        to_address: &str,
        amount: AssetAmount,
    ) -> Result<SendResult, OtcError> {
        if !self.validate_address(to_address) {
            return Err(OtcError::AddressFormatIncompatible {
                chain: self.chain_id.as_str().to_string(),
                address: to_address.to_string(),
            });
        }
        let n = self.send_counter.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(from_escrow.as_bytes());
        hasher.update(to_address.as_bytes());
        hasher.update(amount.to_string().as_bytes());
        hasher.update(&n.to_le_bytes());
        let txid = hex::encode(hasher.finalize().as_bytes());

        {
            let mut state = self.state.lock().unwrap();
            state
                .tx_status
                .insert(txid.clone(), ConfirmationStatus::Confirmed(0));
            if let Some(balance) = state.native_balances.get_mut(from_escrow) {
                let remainder = balance.checked_sub(&amount).unwrap_or(AssetAmount::ZERO);
                *balance = if remainder.is_negative() { AssetAmount::ZERO } else { remainder };
            }
        }

        let (nonce, utxo_inputs) = match self.family {
            ChainFamily::Account => (Some(n), Vec::new()),
            ChainFamily::Utxo => (None, vec![format!("{}:0", txid)]),
        };

        Ok(SendResult {
            txid,
            submitted_at: 0,
            nonce,
            utxo_inputs,
        })
    }

    async fn get_tx_confirmations(&self, txid: &str) -> Result<ConfirmationStatus, OtcError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tx_status
            .get(txid)
            .copied()
            .unwrap_or(ConfirmationStatus::Unknown))
    }

    async fn ensure_fee_budget(
        &self,
        from_escrow: &str,
        _asset: &AssetCode,
        intent: FeeIntent,
        min_native: AssetAmount,
    ) -> Result<(), OtcError> {
        if self.family != ChainFamily::Account {
            return Ok(());
        }
        if let FeeIntent::Payout = intent {
            let mut state = self.state.lock().unwrap();
            let balance = state
                .native_balances
                .entry(from_escrow.to_string())
                .or_insert(AssetAmount::ZERO);
            if *balance < min_native {
                *balance = min_native;
            }
        }
        Ok(())
    }

    async fn native_balance(&self, address: &str) -> Result<AssetAmount, OtcError> {
        if self.family != ChainFamily::Account {
            return Ok(AssetAmount::ZERO);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .native_balances
            .get(address)
            .copied()
            .unwrap_or(AssetAmount::ZERO))
    }

    async fn quote_native_for_usd(&self, usd: AssetAmount) -> Result<UsdQuote, OtcError> {
        Ok(UsdQuote {
            native_amount: usd,
            snapshot: OracleSnapshot {
                pair: "NATIVE/USD".to_string(),
                price: "1.00".to_string(),
                as_of: 0,
                source: "mock".to_string(),
            },
        })
    }

    fn operator_address(&self) -> String {
        self.operator_address.clone()
    }

    fn collect_confirms(&self) -> u64 {
        self.collect_confirms
    }

    fn required_confirms(&self) -> u64 {
        self.required_confirms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escrow_generation_is_deterministic() {
        let adapter = MockAdapter::new_utxo("alpha-utxo");
        let deal = DealId::new_random();
        let h1 = adapter.generate_escrow(&AssetCode::new("ALPHA"), deal, Side::A);
        let h2 = adapter.generate_escrow(&AssetCode::new("ALPHA"), deal, Side::A);
        assert_eq!(h1.address, h2.address);
        assert_eq!(h1.hd_path, h2.hd_path);

        let h3 = adapter.generate_escrow(&AssetCode::new("ALPHA"), deal, Side::B);
        assert_ne!(h1.address, h3.address);
    }

    #[tokio::test]
    async fn send_to_wrong_chain_address_rejected() {
        let adapter = MockAdapter::new_utxo("alpha-utxo");
        let result = adapter
            .send(
                &AssetCode::new("ALPHA"),
                "utxo1escrow",
                "0xnotautxoaddress",
                AssetAmount::from_str_exact("1").unwrap(),
            )
            .await;
        assert!(matches!(
            result,
            Err(OtcError::AddressFormatIncompatible { .. })
        ));
    }

    #[tokio::test]
    async fn deposits_filtered_by_min_confirmations() {
        let adapter = MockAdapter::new_utxo("alpha-utxo");
        adapter.push_deposit(
            "utxo1escrow",
            DepositRecord {
                txid: "tx1".into(),
                output_index: Some(0),
                amount: AssetAmount::from_str_exact("1").unwrap(),
                block_height: 10,
                block_time: 1000,
                confirms: 2,
            },
        );
        let deposits = adapter
            .list_confirmed_deposits(&AssetCode::new("ALPHA"), "utxo1escrow", 6, None)
            .await
            .unwrap();
        assert!(deposits.is_empty());

        adapter.set_tx_status("tx1", ConfirmationStatus::Confirmed(6));
        adapter.push_deposit(
            "utxo1escrow",
            DepositRecord {
                txid: "tx2".into(),
                output_index: Some(0),
                amount: AssetAmount::from_str_exact("1").unwrap(),
                block_height: 11,
                block_time: 1001,
                confirms: 6,
            },
        );
        let deposits = adapter
            .list_confirmed_deposits(&AssetCode::new("ALPHA"), "utxo1escrow", 6, None)
            .await
            .unwrap();
        assert_eq!(deposits.len(), 1);
        assert_eq!(deposits[0].txid, "tx2");
    }
}
