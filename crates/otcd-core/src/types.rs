use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Monotonic per-source sequence number for queue items.
pub type Seq = u64;

/// Account nonce for account-based chains.
pub type Nonce = u64;

// ── DealId ───────────────────────────────────────────────────────────────────

/// 16-byte deal identifier, generated at deal creation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DealId(pub [u8; 16]);

impl DealId {
    pub fn new_random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(b: [u8; 16]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes[..16]);
        Ok(Self(arr))
    }
}

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DealId({}…)", &self.to_hex()[..8])
    }
}

// ── PersonalLinkToken ────────────────────────────────────────────────────────

/// Opaque per-party bearer token authorizing `fillDetails`/`cancel` calls.
/// Not a signature scheme — it only gates the RPC boundary (§6 of the spec
/// this workspace implements treats full auth as an external collaborator).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalLinkToken(pub [u8; 16]);

impl PersonalLinkToken {
    pub fn new_random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes[..16]);
        Ok(Self(arr))
    }
}

impl fmt::Debug for PersonalLinkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PersonalLinkToken({}…)", &self.to_hex()[..4])
    }
}

// ── TxRef ────────────────────────────────────────────────────────────────────

/// On-chain transaction identifier. Chains differ on shape (EVM: 0x-hex hash,
/// UTXO: hex txid) so this stays a plain owned string rather than a fixed-size
/// newtype.
pub type TxId = String;

/// Party side of a deal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => write!(f, "A"),
            Side::B => write!(f, "B"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deal_id_hex_roundtrip() {
        let id = DealId::new_random();
        let hex = id.to_hex();
        let back = DealId::from_hex(&hex).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn side_other_is_involution() {
        assert_eq!(Side::A.other(), Side::B);
        assert_eq!(Side::B.other(), Side::A);
        assert_eq!(Side::A.other().other(), Side::A);
    }
}
