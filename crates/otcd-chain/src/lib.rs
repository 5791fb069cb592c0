pub mod adapter;
pub mod mock;
pub mod registry;

pub use adapter::{
    ChainAdapter, ConfirmationStatus, DepositRecord, EscrowHandle, FeeIntent, SendResult, UsdQuote,
};
pub use mock::MockAdapter;
pub use registry::AdapterRegistry;
