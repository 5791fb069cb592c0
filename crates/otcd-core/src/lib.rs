pub mod account_state;
pub mod asset;
pub mod chain;
pub mod commission;
pub mod config;
pub mod constants;
pub mod deal;
pub mod decimal;
pub mod deposit;
pub mod error;
pub mod lease;
pub mod queue;
pub mod types;

pub use account_state::AccountState;
pub use asset::{AssetCode, AssetInfo, AssetRegistry};
pub use chain::{ChainFamily, ChainId};
pub use commission::{CommissionCurrency, CommissionMode, CommissionRequirement, OracleSnapshot};
pub use config::{BrokerContractConfig, ChainConfig};
pub use deal::{Deal, DealEvent, DealSide, EscrowRef, PartyDetails, Stage};
pub use decimal::AssetAmount;
pub use deposit::EscrowDeposit;
pub use error::OtcError;
pub use lease::Lease;
pub use queue::{Phase, Purpose, QueueItem, QueueStatus, RecoveryInfo, SubmittedTx};
pub use types::{DealId, Nonce, PersonalLinkToken, Seq, Side, Timestamp, TxId};
