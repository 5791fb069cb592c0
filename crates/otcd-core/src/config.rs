use serde::{Deserialize, Serialize};

/// Per-chain configuration the plan builder and queue processor consult.
/// Loaded from the node's JSON config file; not part of persisted deal
/// state.
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct ChainConfig {
    /// §9 Open Question: whether an off-chain phased queue plan or a
    /// single on-chain broker-contract call applies for a side is decided
    /// here, explicitly, rather than inferred — broker items are emitted
    /// for a side iff its chain has this configured.
    pub broker_contract: Option<BrokerContractConfig>,

    /// Optional "tank" wallet used to top up gas for EVM escrows that hold
    /// ERC-20 tokens but insufficient native currency (§4.3 "Gas funding").
    pub gas_tank_address: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct BrokerContractConfig {
    pub contract_address: String,
    pub fee_recipient: String,
}
