pub mod bridge_queue;
pub mod withdrawal_queue;

pub use bridge_queue::{BridgeError, BridgeQueue};
pub use withdrawal_queue::{SettlementError, WithdrawalQueue};
