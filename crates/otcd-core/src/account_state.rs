use crate::chain::ChainId;
use crate::types::Nonce;
use serde::{Deserialize, Serialize};

/// Keyed by `(chain, address)`. Tracks `lastUsedNonce` for account-based
/// chains and opaque UTXO-selection state for UTXO chains.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct AccountState {
    pub chain: ChainId,
    pub address: String,
    pub last_used_nonce: Option<Nonce>,

    /// Opaque UTXO-selection cursor (e.g. a serialized set of spent
    /// outpoints this worker has already committed to spending). The
    /// engine never interprets this, only round-trips it through the
    /// chain adapter.
    #[serde(default)]
    pub utxo_selection_state: Vec<u8>,
}

impl AccountState {
    pub fn new(chain: ChainId, address: String) -> Self {
        Self {
            chain,
            address,
            last_used_nonce: None,
            utxo_selection_state: Vec::new(),
        }
    }

    /// Reads and increments the nonce in one step. Must be called inside
    /// the same persistence transaction that transitions the queue item to
    /// SUBMITTING (§9 "Nonce management races") — spacing the read and the
    /// queue-item write in wall-clock time is not sufficient.
    pub fn next_nonce(&mut self) -> Nonce {
        let next = self.last_used_nonce.map(|n| n + 1).unwrap_or(0);
        self.last_used_nonce = Some(next);
        next
    }

    /// Rolls back to `nonce - 1` iff `nonce` is indeed the most recently
    /// issued one (i.e. no later nonce has since been used). Used when a
    /// submitted transaction disappears from chain with no successor.
    pub fn rollback_if_latest(&mut self, nonce: Nonce) -> bool {
        if self.last_used_nonce == Some(nonce) {
            self.last_used_nonce = if nonce == 0 { None } else { Some(nonce - 1) };
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_increments_from_none() {
        let mut acc = AccountState::new(ChainId::new("evm-l1"), "0xabc".into());
        assert_eq!(acc.next_nonce(), 0);
        assert_eq!(acc.next_nonce(), 1);
        assert_eq!(acc.last_used_nonce, Some(1));
    }

    #[test]
    fn rollback_only_if_no_later_nonce_used() {
        let mut acc = AccountState::new(ChainId::new("evm-l1"), "0xabc".into());
        acc.next_nonce(); // 0
        acc.next_nonce(); // 1
        assert!(!acc.rollback_if_latest(0)); // 1 is the latest, not 0
        assert!(acc.rollback_if_latest(1));
        assert_eq!(acc.last_used_nonce, Some(0));
    }
}
