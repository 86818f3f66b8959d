use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainError, DestinationChain, GatewayAction, SourceChain, StakingAction};
use crate::db::{Deposit, DepositUpdate, StateStore, StoreError};
use crate::lifecycle::{DepositStatus, ItemOutcome, TickReport};
use crate::scheduler::Job;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl BridgeError {
    pub fn into_outcome(self) -> ItemOutcome {
        let kind = match &self {
            BridgeError::Chain(e) => e.failure_kind(),
            BridgeError::Store(e) => e.failure_kind(),
        };
        ItemOutcome::Failed {
            kind,
            message: self.to_string(),
        }
    }
}

/// Moves RECEIVED deposits into the staking contract and flags them as
/// bridged on the gateway.
pub struct BridgeQueue {
    store: Arc<dyn StateStore>,
    source: Arc<dyn SourceChain>,
    destination: Arc<dyn DestinationChain>,
}

impl BridgeQueue {
    pub fn new(
        store: Arc<dyn StateStore>,
        source: Arc<dyn SourceChain>,
        destination: Arc<dyn DestinationChain>,
    ) -> Self {
        Self {
            store,
            source,
            destination,
        }
    }

    /// Works through every RECEIVED deposit, oldest first, one at a time.
    /// A failing deposit is reported and the rest still run.
    pub async fn process_received_deposits(&self) -> Result<TickReport, StoreError> {
        let deposits = self.store.list_deposits(DepositStatus::Received).await?;
        let mut report = TickReport::default();

        for deposit in deposits {
            let outcome = match self.bridge_deposit(&deposit).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(deposit_id = %deposit.id, error = %e, "Failed to bridge deposit");
                    e.into_outcome()
                }
            };
            report.record(deposit.id, outcome);
        }

        Ok(report)
    }

    async fn bridge_deposit(&self, deposit: &Deposit) -> Result<ItemOutcome, BridgeError> {
        match (&deposit.stake_tx_id, deposit.bridge_attempted_at) {
            (Some(stake_tx), _) => {
                debug!(deposit_id = %deposit.id, %stake_tx, "Stake already submitted, resuming");
            }
            (None, Some(attempted_at)) => {
                warn!(
                    deposit_id = %deposit.id,
                    %attempted_at,
                    "Earlier stake attempt left no transaction id, skipping until reconciled"
                );
                return Ok(ItemOutcome::NeedsReconciliation(format!(
                    "stake attempted at {attempted_at} without a recorded transaction"
                )));
            }
            (None, None) => self.stake(deposit).await?,
        }

        let on_chain_id = self
            .source
            .deposit_id_from_receipt(&deposit.source_tx_hash)
            .await?;

        let state = self.source.gateway_state(on_chain_id).await?;
        if state.bridged {
            debug!(deposit_id = %deposit.id, %on_chain_id, "Gateway already marks deposit bridged");
        } else {
            self.source
                .submit(GatewayAction::MarkBridged, on_chain_id)
                .await?;
        }

        self.store
            .update_deposit(
                deposit.id,
                DepositStatus::Received,
                DepositUpdate::stacked(Utc::now()),
            )
            .await
            .inspect_err(|e| {
                error!(
                    deposit_id = %deposit.id,
                    %on_chain_id,
                    error = %e,
                    "Deposit is bridged on chain but could not be marked STACKED"
                )
            })?;

        info!(deposit_id = %deposit.id, net = deposit.net_amount, "Deposit stacked");
        Ok(ItemOutcome::Advanced)
    }

    /// Claims the deposit, submits the stake and records its transaction id.
    async fn stake(&self, deposit: &Deposit) -> Result<(), BridgeError> {
        self.store
            .update_deposit(
                deposit.id,
                DepositStatus::Received,
                DepositUpdate::claim_bridge(Utc::now()),
            )
            .await?;

        let stake_tx = match self
            .destination
            .submit(
                StakingAction::Stake,
                deposit.net_amount,
                &deposit.destination_address,
            )
            .await
        {
            Ok(tx) => tx,
            Err(e @ ChainError::Rejected(_)) => {
                // nothing was broadcast, release the claim for the next tick
                if let Err(clear_err) = self
                    .store
                    .update_deposit(
                        deposit.id,
                        DepositStatus::Received,
                        DepositUpdate::clear_bridge_claim(),
                    )
                    .await
                {
                    error!(deposit_id = %deposit.id, error = %clear_err, "Failed to release bridge claim");
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        self.store
            .update_deposit(
                deposit.id,
                DepositStatus::Received,
                DepositUpdate::stake_submitted(&stake_tx),
            )
            .await
            .inspect_err(|e| {
                error!(
                    deposit_id = %deposit.id,
                    %stake_tx,
                    error = %e,
                    "Stake submitted but its transaction id could not be recorded"
                )
            })?;

        info!(deposit_id = %deposit.id, %stake_tx, "Stake submitted");
        Ok(())
    }
}

#[async_trait]
impl Job for BridgeQueue {
    fn name(&self) -> &'static str {
        "bridge_scheduler"
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let report = self.process_received_deposits().await?;
        if !report.is_empty() {
            info!(
                advanced = report.advanced(),
                failed = report.failed(),
                needs_reconciliation = report.needs_reconciliation(),
                "Completed bridge cycle"
            );
        }
        Ok(())
    }
}
