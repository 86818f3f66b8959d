pub mod c32;
pub mod ethereum;
pub mod stacks;
pub mod stacks_tx;

use alloy::primitives::B256;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::lifecycle::FailureKind;

pub use ethereum::EthereumGateway;
pub use stacks::StacksClient;

/// Identifier the gateway contract assigns to a deposit.
pub type OnChainDepositId = B256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Transport or node failure. For submissions the outcome is unknown.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Refused before anything was broadcast, e.g. a failed gas estimate or
    /// nonce lookup. Safe to retry.
    #[error("submission rejected: {0}")]
    Rejected(String),

    /// Included on chain but failed.
    #[error("transaction {tx} reverted: {reason}")]
    Reverted { tx: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid chain configuration: {0}")]
    Config(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::Rpc(_) | ChainError::Rejected(_) | ChainError::NotFound(_)
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        if self.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
    pub tx_hash: String,
    pub block_number: u64,
    pub deposit_id: OnChainDepositId,
    pub user_address: String,
    pub destination_address: String,
    pub amount: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayAction {
    MarkBridged,
    AdminRelease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakingAction {
    Stake,
    Unstake,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Unknown to the node or not yet confirmed.
    Pending,
    Success,
    Failed(String),
}

/// Flags the gateway keeps per deposit, used to reconcile interrupted work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayDepositState {
    pub bridged: bool,
    pub released: bool,
}

/// Chain holding the deposit gateway.
#[async_trait]
pub trait SourceChain: Send + Sync {
    async fn current_height(&self) -> Result<u64, ChainError>;

    /// Deposit events in `[from_block, to_block]`, both inclusive. Logs that
    /// cannot be decoded are left out; only transport failures are errors.
    async fn query_deposit_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<DepositEvent>, ChainError>;

    /// Live deposit events. The stream ends or yields an error when the
    /// subscription drops; callers resubscribe. A `Decode` error only skips
    /// that event.
    async fn subscribe_deposits(
        &self,
    ) -> Result<BoxStream<'static, Result<DepositEvent, ChainError>>, ChainError>;

    /// Reads the gateway's deposit id from the receipt of the deposit tx.
    async fn deposit_id_from_receipt(&self, tx_hash: &str)
        -> Result<OnChainDepositId, ChainError>;

    /// Submits and waits for inclusion. Returns the transaction hash.
    async fn submit(
        &self,
        action: GatewayAction,
        deposit_id: OnChainDepositId,
    ) -> Result<String, ChainError>;

    async fn gateway_state(
        &self,
        deposit_id: OnChainDepositId,
    ) -> Result<GatewayDepositState, ChainError>;
}

/// Chain where deposits are put to work.
#[async_trait]
pub trait DestinationChain: Send + Sync {
    /// Broadcasts the staking call. Returns the transaction id as soon as the
    /// node accepts it; confirmation is observed via [`Self::transaction_status`].
    async fn submit(
        &self,
        action: StakingAction,
        amount: i64,
        address: &str,
    ) -> Result<String, ChainError>;

    async fn transaction_status(&self, tx_id: &str) -> Result<TxStatus, ChainError>;
}
