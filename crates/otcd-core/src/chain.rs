use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad transaction-model family a chain belongs to. Determines whether the
/// queue processor applies phase ordering (UTXO) or per-sender nonce
/// serialization (Account).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum ChainFamily {
    Utxo,
    Account,
}

/// Identifies one supported chain. Kept as a plain interned string rather
/// than a closed enum: new chains are added by config, not by a code change,
/// which the chain-adapter registry (`otcd-chain::registry`) resolves at
/// startup.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub String);

impl ChainId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({})", self.0)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
