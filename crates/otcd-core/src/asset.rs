//! Static per-asset registry: decimal scale, minimum sendable unit, and
//! which chain family it lives on.

use crate::chain::{ChainFamily, ChainId};
use crate::decimal::AssetAmount;
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
pub struct AssetCode(pub String);

impl AssetCode {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for AssetCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct AssetInfo {
    pub chain: ChainId,
    pub family: ChainFamily,
    pub decimals: u32,
    pub min_sendable_unit: Decimal,
    pub native: bool,
}

/// Process-wide asset table. Populated at startup from node config (see
/// `otcd-node`); tests populate it implicitly through `AssetRegistry::new`
/// instances instead of mutating global state.
pub struct AssetRegistry {
    assets: HashMap<AssetCode, AssetInfo>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self {
            assets: HashMap::new(),
        }
    }

    pub fn register(&mut self, code: AssetCode, info: AssetInfo) {
        self.assets.insert(code, info);
    }

    pub fn get(&self, code: &AssetCode) -> Option<&AssetInfo> {
        self.assets.get(code)
    }

    pub fn decimals(&self, code: &AssetCode) -> u32 {
        self.get(code).map(|a| a.decimals).unwrap_or(8)
    }

    pub fn floor(&self, code: &AssetCode, amount: AssetAmount) -> AssetAmount {
        amount.floor_to_scale(self.decimals(code))
    }

    /// The native asset of a chain (e.g. ETH on `evm-l1`), used when a
    /// commission's currency is `NATIVE` rather than the trade asset.
    pub fn native_asset_for_chain(&self, chain: &crate::chain::ChainId) -> Option<AssetCode> {
        self.assets
            .iter()
            .find(|(_, info)| &info.chain == chain && info.native)
            .map(|(code, _)| code.clone())
    }
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A default registry covering the end-to-end test scenarios' assets
/// (ALPHA on a UTXO chain, USDC on an EVM chain). Node deployments load
/// their own table from config; this is a convenience for tests and for
/// `otcd-node --demo` bootstrapping.
pub static DEMO_REGISTRY: Lazy<AssetRegistry> = Lazy::new(|| {
    let mut r = AssetRegistry::new();
    r.register(
        AssetCode::new("ALPHA"),
        AssetInfo {
            chain: ChainId::new("alpha-utxo"),
            family: ChainFamily::Utxo,
            decimals: 8,
            min_sendable_unit: Decimal::new(1, 8),
            native: true,
        },
    );
    r.register(
        AssetCode::new("USDC"),
        AssetInfo {
            chain: ChainId::new("evm-l1"),
            family: ChainFamily::Account,
            decimals: 6,
            min_sendable_unit: Decimal::new(1, 6),
            native: false,
        },
    );
    r.register(
        AssetCode::new("ETH"),
        AssetInfo {
            chain: ChainId::new("evm-l1"),
            family: ChainFamily::Account,
            decimals: 18,
            min_sendable_unit: Decimal::new(1, 18),
            native: true,
        },
    );
    r
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_registry_has_expected_scales() {
        assert_eq!(DEMO_REGISTRY.decimals(&AssetCode::new("ALPHA")), 8);
        assert_eq!(DEMO_REGISTRY.decimals(&AssetCode::new("USDC")), 6);
    }

    #[test]
    fn unknown_asset_defaults_to_eight_decimals() {
        assert_eq!(DEMO_REGISTRY.decimals(&AssetCode::new("NOPE")), 8);
    }
}
