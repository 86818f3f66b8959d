#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::BoxStream;
use mockall::mock;
use std::sync::Arc;
use stackyield_sequencer::chain::c32::{StacksAddress, TESTNET_SINGLESIG};
use stackyield_sequencer::chain::{
    ChainError, DepositEvent, DestinationChain, GatewayAction, GatewayDepositState,
    OnChainDepositId, SourceChain, StakingAction, TxStatus,
};
use stackyield_sequencer::config::{
    AppConfig, DatabaseConfig, EthereumConfig, FeeConfig, IngestorConfig, JobsConfig,
    LoggingConfig, ServerConfig, StacksConfig,
};
use stackyield_sequencer::db::{
    Deposit, DepositUpdate, MemoryStore, NewDeposit, StateStore, Withdrawal,
};
use stackyield_sequencer::lifecycle::{DepositStatus, FeeSchedule};

mock! {
    pub Source {}

    #[async_trait]
    impl SourceChain for Source {
        async fn current_height(&self) -> Result<u64, ChainError>;
        async fn query_deposit_events(
            &self,
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<DepositEvent>, ChainError>;
        async fn subscribe_deposits(
            &self,
        ) -> Result<BoxStream<'static, Result<DepositEvent, ChainError>>, ChainError>;
        async fn deposit_id_from_receipt(&self, tx_hash: &str) -> Result<OnChainDepositId, ChainError>;
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
}

mock! {
    pub Destination {}

    #[async_trait]
    impl DestinationChain for Destination {
        async fn submit(
            &self,
            action: StakingAction,
            amount: i64,
            address: &str,
        ) -> Result<String, ChainError>;
        async fn transaction_status(&self, tx_id: &str) -> Result<TxStatus, ChainError>;
    }
}

pub const USER: &str = "0x00000000000000000000000000000000000000aa";

// Helper function to create test config
pub fn create_test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        database: DatabaseConfig { max_connections: 5 },
        ethereum: EthereumConfig {
            chain_id: 11155111, // Sepolia testnet
            gateway_address: "0x0000000000000000000000000000000000000001".to_string(),
        },
        stacks: StacksConfig {
            api_url: "http://localhost:3999".to_string(),
            network: "testnet".to_string(),
            contract_address: stacks_address(0x11),
            contract_name: "stacking-pool".to_string(),
            stake_function: "stack-for-user".to_string(),
            unstake_function: "withdraw".to_string(),
            sender_address: stacks_address(0x33),
            fee_micro_stx: 5_000,
        },
        fees: FeeConfig::default(),
        ingestor: IngestorConfig::default(),
        jobs: JobsConfig::default(),
        logging: LoggingConfig::default(),
    }
}

/// Testnet single-sig address with every hash byte set to `fill`.
pub fn stacks_address(fill: u8) -> String {
    StacksAddress::new(TESTNET_SINGLESIG, [fill; 20])
        .expect("valid version")
        .to_string()
}

pub fn on_chain_id(n: u8) -> OnChainDepositId {
    OnChainDepositId::with_last_byte(n)
}

pub fn deposit_event(tx_hash: &str, block_number: u64, amount: u128) -> DepositEvent {
    DepositEvent {
        tx_hash: tx_hash.to_string(),
        block_number,
        deposit_id: on_chain_id(block_number as u8),
        user_address: USER.to_string(),
        destination_address: stacks_address(0x22),
        amount,
    }
}

pub fn new_deposit(tx_hash: &str, gross: i64) -> NewDeposit {
    NewDeposit {
        source_tx_hash: tx_hash.to_string(),
        source_block: 10,
        user_address: USER.to_string(),
        destination_address: stacks_address(0x22),
        amounts: FeeSchedule::default().split(gross).expect("positive amount"),
    }
}

pub async fn seed_received(store: &MemoryStore, tx_hash: &str) -> Deposit {
    store
        .create_deposit(new_deposit(tx_hash, 1_000_000))
        .await
        .expect("seed deposit")
}

pub async fn seed_stacked(store: &MemoryStore, tx_hash: &str) -> Deposit {
    let deposit = seed_received(store, tx_hash).await;
    store
        .update_deposit(
            deposit.id,
            DepositStatus::Received,
            DepositUpdate::stake_submitted("0xstake"),
        )
        .await
        .expect("record stake");
    store
        .update_deposit(
            deposit.id,
            DepositStatus::Received,
            DepositUpdate::stacked(Utc::now()),
        )
        .await
        .expect("mark stacked")
}

/// A STACKED deposit with a PENDING withdrawal whose unstake tx is `tx_id`.
pub async fn seed_pending_withdrawal(
    store: &MemoryStore,
    tx_hash: &str,
    tx_id: &str,
) -> (Deposit, Withdrawal) {
    let deposit = seed_stacked(store, tx_hash).await;
    let withdrawal = store
        .create_withdrawal(deposit.id, DepositStatus::Stacked, tx_id)
        .await
        .expect("seed withdrawal");
    let deposit = store
        .find_deposit(deposit.id)
        .await
        .expect("read deposit")
        .expect("deposit exists");
    (deposit, withdrawal)
}

pub async fn deposit(store: &MemoryStore, id: uuid::Uuid) -> Deposit {
    store
        .find_deposit(id)
        .await
        .expect("read deposit")
        .expect("deposit exists")
}

pub async fn withdrawal(store: &MemoryStore, id: uuid::Uuid) -> Withdrawal {
    store
        .withdrawals()
        .await
        .into_iter()
        .find(|w| w.id == id)
        .expect("withdrawal exists")
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}
