use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::c32::StacksAddress;
use crate::chain::stacks_tx::{
    parse_private_key, ClarityValue, ContractCall, PostConditionMode, SignedTransaction,
    StacksNetwork, UnsignedContractCall,
};
use crate::chain::{ChainError, DestinationChain, StakingAction, TxStatus};
use crate::config::StacksConfig;

#[derive(Debug, Deserialize)]
struct NonceResponse {
    possible_next_nonce: u64,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    nonce: u64,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    stacks_tip_height: u64,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    tx_status: String,
}

#[derive(Debug, Deserialize)]
struct BroadcastRejection {
    error: String,
    reason: Option<String>,
}

/// Stacks node client that signs staking-pool contract calls locally and
/// broadcasts them through the node's HTTP API.
pub struct StacksClient {
    http: Client,
    api_url: String,
    network: StacksNetwork,
    contract_address: StacksAddress,
    contract_name: String,
    stake_function: String,
    unstake_function: String,
    sender: StacksAddress,
    signing_key: SigningKey,
    fee: u64,
}

impl StacksClient {
    pub fn new(config: &StacksConfig) -> Result<Self, ChainError> {
        let key = config
            .get_private_key()
            .map_err(|e| ChainError::Config(e.to_string()))?;
        Self::with_private_key(config, &key)
    }

    pub fn with_private_key(config: &StacksConfig, private_key: &str) -> Result<Self, ChainError> {
        let network: StacksNetwork = config.network.parse().map_err(ChainError::Config)?;
        let contract_address: StacksAddress = config
            .contract_address
            .parse()
            .map_err(|e| ChainError::Config(format!("stacks.contract_address: {e}")))?;
        let sender: StacksAddress = config
            .sender_address
            .parse()
            .map_err(|e| ChainError::Config(format!("stacks.sender_address: {e}")))?;
        if sender.version != network.address_version() {
            return Err(ChainError::Config(format!(
                "sender {} is not a {:?} address",
                config.sender_address, network
            )));
        }
        let signing_key =
            parse_private_key(private_key).map_err(|e| ChainError::Config(e.to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChainError::Config(e.to_string()))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            network,
            contract_address,
            contract_name: config.contract_name.clone(),
            stake_function: config.stake_function.clone(),
            unstake_function: config.unstake_function.clone(),
            sender,
            signing_key,
            fee: config.fee_micro_stx,
        })
    }

    pub async fn tip_height(&self) -> Result<u64, ChainError> {
        let info: InfoResponse = self
            .http
            .get(format!("{}/v2/info", self.api_url))
            .send()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .error_for_status()
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        Ok(info.stacks_tip_height)
    }

    /// Next nonce for the sender, counting transactions already in the
    /// mempool. Nodes without the extended API only report the confirmed one.
    async fn next_nonce(&self) -> Result<u64, ChainError> {
        let url = format!("{}/extended/v1/address/{}/nonces", self.api_url, self.sender);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ChainError::Rejected(format!("nonce lookup failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return self.confirmed_nonce().await;
        }
        if !response.status().is_success() {
            return Err(ChainError::Rejected(format!(
                "nonce lookup failed with status {}",
                response.status()
            )));
        }
        let nonces: NonceResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Rejected(format!("nonce lookup returned bad json: {e}")))?;
        Ok(nonces.possible_next_nonce)
    }

    async fn confirmed_nonce(&self) -> Result<u64, ChainError> {
        let url = format!("{}/v2/accounts/{}?proof=0", self.api_url, self.sender);
        let account: AccountResponse = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ChainError::Rejected(format!("account lookup failed: {e}")))?
            .json()
            .await
            .map_err(|e| ChainError::Rejected(format!("account lookup returned bad json: {e}")))?;
        Ok(account.nonce)
    }

    fn build_call(
        &self,
        action: StakingAction,
        amount: i64,
        address: &str,
        nonce: u64,
    ) -> Result<SignedTransaction, ChainError> {
        let amount = u128::try_from(amount)
            .map_err(|_| ChainError::Rejected(format!("negative amount {amount}")))?;
        let user: StacksAddress = address
            .parse()
            .map_err(|e| ChainError::Rejected(format!("destination address {address}: {e}")))?;
        let function_name = match action {
            StakingAction::Stake => &self.stake_function,
            StakingAction::Unstake => &self.unstake_function,
        };

        let call = UnsignedContractCall {
            network: self.network,
            sender: self.sender,
            nonce,
            fee: self.fee,
            post_condition_mode: PostConditionMode::Deny,
            call: ContractCall {
                contract_address: self.contract_address,
                contract_name: self.contract_name.clone(),
                function_name: function_name.clone(),
                args: vec![ClarityValue::Principal(user), ClarityValue::UInt(amount)],
            },
        };
        call.sign(&self.signing_key)
            .map_err(|e| ChainError::Rejected(e.to_string()))
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<String, ChainError> {
        let response = self
            .http
            .post(format!("{}/v2/transactions", self.api_url))
            .header("Content-Type", "application/octet-stream")
            .body(tx.bytes.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ChainError::Rejected(e.to_string())
                } else {
                    // the node may have accepted it before the connection dropped
                    ChainError::Rpc(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_client_error() {
            let rejection: Option<BroadcastRejection> = response.json().await.ok();
            let reason = rejection
                .map(|r| match r.reason {
                    Some(reason) => format!("{}: {}", r.error, reason),
                    None => r.error,
                })
                .unwrap_or_else(|| status.to_string());
            return Err(ChainError::Rejected(reason));
        }
        if !status.is_success() {
            return Err(ChainError::Rpc(format!("broadcast returned {status}")));
        }

        let txid: String = response
            .json()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        let txid = txid.trim_start_matches("0x").to_string();
        if txid != tx.txid {
            warn!(node_txid = %txid, local_txid = %tx.txid, "Node reported a different txid");
        }
        Ok(format!("0x{txid}"))
    }
}

fn map_tx_status(status: &str) -> TxStatus {
    match status {
        "success" => TxStatus::Success,
        "pending" => TxStatus::Pending,
        s if s.starts_with("abort_") || s.starts_with("dropped_") => TxStatus::Failed(s.to_string()),
        other => {
            warn!(tx_status = other, "Unrecognized Stacks tx status, treating as pending");
            TxStatus::Pending
        }
    }
}

#[async_trait]
impl DestinationChain for StacksClient {
    async fn submit(
        &self,
        action: StakingAction,
        amount: i64,
        address: &str,
    ) -> Result<String, ChainError> {
        let nonce = self.next_nonce().await?;
        let tx = self.build_call(action, amount, address, nonce)?;
        debug!(?action, nonce, local_txid = %tx.txid, "Broadcasting Stacks contract call");
        let txid = self.broadcast(&tx).await?;
        info!(?action, %txid, amount, address, "Stacks contract call accepted");
        Ok(txid)
    }

    async fn transaction_status(&self, tx_id: &str) -> Result<TxStatus, ChainError> {
        let response = self
            .http
            .get(format!("{}/extended/v1/tx/{}", self.api_url, tx_id))
            .send()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(TxStatus::Pending);
        }
        let tx: TxResponse = response
            .error_for_status()
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        Ok(map_tx_status(&tx.tx_status))
    }
}
