use std::str::FromStr;
use std::time::Duration;

use alloy::{
    network::{EthereumWallet, ReceiptResponse},
    primitives::{Address, B256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{Filter, Log},
    signers::local::PrivateKeySigner,
    sol,
    sol_types::SolEvent,
};
use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::chain::{
    ChainError, DepositEvent, GatewayAction, GatewayDepositState, OnChainDepositId, SourceChain,
};
use crate::config::EthereumConfig;

sol! {
    #[sol(rpc)]
    #[derive(Debug, PartialEq)]
    contract DepositGateway {
        event DepositReceived(
            bytes32 indexed depositId,
            address indexed user,
            uint256 amount,
            bytes stacksAddress
        );

        function markDepositBridged(bytes32 depositId) external;
        function adminWithdraw(bytes32 depositId) external;
        function depositFlags(bytes32 depositId) external view returns (bool bridged, bool withdrawn);
    }
}

const MAX_RETRIES: usize = 5;
const INITIAL_BACKOFF_MS: u64 = 500;

fn rpc_err(e: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc(e.to_string())
}

/// Turns a raw gateway log into a [`DepositEvent`].
pub fn decode_deposit_log(log: &Log) -> Result<DepositEvent, ChainError> {
    let decoded = log
        .log_decode::<DepositGateway::DepositReceived>()
        .map_err(|e| ChainError::Decode(e.to_string()))?;
    let event: &DepositGateway::DepositReceived = decoded.data();

    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| ChainError::Decode("log without transaction hash".into()))?;
    let block_number = log
        .block_number
        .ok_or_else(|| ChainError::Decode("log without block number".into()))?;
    let amount = u128::try_from(event.amount)
        .map_err(|_| ChainError::Decode(format!("amount {} does not fit u128", event.amount)))?;
    let destination_address = String::from_utf8(event.stacksAddress.to_vec())
        .map_err(|e| ChainError::Decode(format!("stacks address is not utf-8: {e}")))?;

    Ok(DepositEvent {
        tx_hash: tx_hash.to_string(),
        block_number,
        deposit_id: event.depositId,
        user_address: event.user.to_string(),
        destination_address,
        amount,
    })
}

/// Decodes a batch of gateway logs. Logs that are not well-formed deposits
/// are logged and skipped; only the transport can fail a query.
pub fn decode_deposit_logs(logs: &[Log]) -> Vec<DepositEvent> {
    logs.iter().filter_map(decode_or_skip).collect()
}

fn decode_or_skip(log: &Log) -> Option<DepositEvent> {
    match decode_deposit_log(log) {
        Ok(event) => Some(event),
        Err(e) => {
            error!(
                tx_hash = ?log.transaction_hash,
                block = ?log.block_number,
                error = %e,
                "Skipping undecodable deposit log"
            );
            None
        }
    }
}

/// Gateway contract on Ethereum, signing admin calls with a local key.
pub struct EthereumGateway {
    provider: DynProvider,
    gateway: Address,
}

impl EthereumGateway {
    pub async fn connect(config: &EthereumConfig) -> Result<Self, ChainError> {
        let rpc_url = config
            .get_rpc_url()
            .map_err(|e| ChainError::Config(e.to_string()))?;
        let private_key = config
            .get_private_key()
            .map_err(|e| ChainError::Config(e.to_string()))?;
        Self::connect_with(&rpc_url, &config.gateway_address, &private_key).await
    }

    pub async fn connect_with(
        rpc_url: &str,
        gateway_address: &str,
        private_key: &str,
    ) -> Result<Self, ChainError> {
        let gateway = Address::from_str(gateway_address)
            .map_err(|e| ChainError::Config(format!("gateway address: {e}")))?;
        let signer = PrivateKeySigner::from_str(private_key)
            .map_err(|e| ChainError::Config(format!("ethereum private key: {e}")))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect(rpc_url)
            .await
            .map_err(rpc_err)?
            .erased();

        Ok(Self { provider, gateway })
    }

    fn deposit_filter(&self) -> Filter {
        Filter::new()
            .address(self.gateway)
            .event(DepositGateway::DepositReceived::SIGNATURE)
    }
}

#[async_trait]
impl SourceChain for EthereumGateway {
    async fn current_height(&self) -> Result<u64, ChainError> {
        self.provider.get_block_number().await.map_err(rpc_err)
    }

    async fn query_deposit_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<DepositEvent>, ChainError> {
        let filter = self
            .deposit_filter()
            .from_block(from_block)
            .to_block(to_block);

        let mut retries = 0;
        let mut backoff = INITIAL_BACKOFF_MS;

        let logs = loop {
            match self.provider.get_logs(&filter).await {
                Ok(logs) => break logs,
                Err(e) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        warn!(error = %e, "Max retries reached while fetching logs");
                        return Err(rpc_err(e));
                    }
                    warn!(
                        error = %e,
                        attempt = retries,
                        backoff_ms = backoff,
                        "Failed to fetch deposit logs, retrying"
                    );
                    sleep(Duration::from_millis(backoff)).await;
                    backoff *= 2;
                }
            }
        };

        debug!(from_block, to_block, count = logs.len(), "Fetched deposit logs");
        Ok(decode_deposit_logs(&logs))
    }

    async fn subscribe_deposits(
        &self,
    ) -> Result<BoxStream<'static, Result<DepositEvent, ChainError>>, ChainError> {
        let poller = self
            .provider
            .watch_logs(&self.deposit_filter())
            .await
            .map_err(rpc_err)?;

        let events = poller
            .into_stream()
            .flat_map(stream::iter)
            .filter_map(|log| future::ready(decode_or_skip(&log).map(Ok::<_, ChainError>)));
        Ok(events.boxed())
    }

    async fn deposit_id_from_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<OnChainDepositId, ChainError> {
        let hash = B256::from_str(tx_hash)
            .map_err(|e| ChainError::Decode(format!("tx hash {tx_hash}: {e}")))?;
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(rpc_err)?
            .ok_or_else(|| ChainError::NotFound(format!("receipt for {tx_hash}")))?;

        receipt
            .inner
            .logs()
            .iter()
            .filter(|log| log.address() == self.gateway)
            .find_map(|log| log.log_decode::<DepositGateway::DepositReceived>().ok())
            .map(|decoded| decoded.data().depositId)
            .ok_or_else(|| ChainError::NotFound(format!("DepositReceived in {tx_hash}")))
    }

    async fn submit(
        &self,
        action: GatewayAction,
        deposit_id: OnChainDepositId,
    ) -> Result<String, ChainError> {
        let contract = DepositGateway::new(self.gateway, self.provider.clone());
        let sent = match action {
            GatewayAction::MarkBridged => contract.markDepositBridged(deposit_id).send().await,
            GatewayAction::AdminRelease => contract.adminWithdraw(deposit_id).send().await,
        };

        let pending = sent.map_err(|e| {
            let message = e.to_string();
            // reverts surface during gas estimation, before anything is broadcast
            if message.to_lowercase().contains("revert") {
                ChainError::Rejected(message)
            } else {
                ChainError::Rpc(message)
            }
        })?;

        let receipt = pending.get_receipt().await.map_err(rpc_err)?;
        let tx_hash = receipt.transaction_hash.to_string();
        if !receipt.status() {
            return Err(ChainError::Reverted {
                tx: tx_hash,
                reason: format!("{action:?} for deposit {deposit_id}"),
            });
        }

        info!(?action, %deposit_id, %tx_hash, "Gateway transaction confirmed");
        Ok(tx_hash)
    }

    async fn gateway_state(
        &self,
        deposit_id: OnChainDepositId,
    ) -> Result<GatewayDepositState, ChainError> {
        let contract = DepositGateway::new(self.gateway, self.provider.clone());
        let flags = contract
            .depositFlags(deposit_id)
            .call()
            .await
            .map_err(rpc_err)?;
        Ok(GatewayDepositState {
            bridged: flags.bridged,
            released: flags.withdrawn,
        })
    }
}
