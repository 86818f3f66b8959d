use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainError, DestinationChain, GatewayAction, SourceChain, TxStatus};
use crate::db::{PairUpdate, StateStore, StoreError, WithdrawalUpdate, WithdrawalWithDeposit};
use crate::lifecycle::{FailureKind, ItemOutcome, TickReport, WithdrawalStatus};
use crate::scheduler::Job;

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SettlementError {
    pub fn into_outcome(self) -> ItemOutcome {
        let kind = match &self {
            SettlementError::Chain(e) => e.failure_kind(),
            SettlementError::Store(e) => e.failure_kind(),
        };
        ItemOutcome::Failed {
            kind,
            message: self.to_string(),
        }
    }
}

/// Settles PENDING withdrawals once their unstake transaction resolves on
/// the destination chain.
pub struct WithdrawalQueue {
    store: Arc<dyn StateStore>,
    source: Arc<dyn SourceChain>,
    destination: Arc<dyn DestinationChain>,
}

impl WithdrawalQueue {
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

    /// Outcomes per withdrawal:
    /// - still pending: `Unchanged`
    /// - destination success: funds released on the gateway (unless the
    ///   gateway already shows them released), then withdrawal COMPLETED and
    ///   deposit WITHDRAWN together (`Advanced`)
    /// - destination failure: withdrawal FAILED, deposit left in
    ///   WITHDRAW_REQUESTED for an operator (`Failed` / permanent)
    pub async fn process_pending_withdrawals(&self) -> Result<TickReport, StoreError> {
        let pending = self.store.list_withdrawals(WithdrawalStatus::Pending).await?;
        let mut report = TickReport::default();

        for item in pending {
            let id = item.withdrawal.id;
            let outcome = match self.settle(&item).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(withdrawal_id = %id, error = %e, "Failed to settle withdrawal");
                    e.into_outcome()
                }
            };
            report.record(id, outcome);
        }

        Ok(report)
    }

    async fn settle(&self, item: &WithdrawalWithDeposit) -> Result<ItemOutcome, SettlementError> {
        let WithdrawalWithDeposit {
            withdrawal,
            deposit,
        } = item;

        if let Some(attempted_at) = withdrawal.release_attempted_at {
            warn!(
                withdrawal_id = %withdrawal.id,
                %attempted_at,
                "Earlier release attempt has no recorded outcome, skipping until reconciled"
            );
            return Ok(ItemOutcome::NeedsReconciliation(format!(
                "release attempted at {attempted_at} without a recorded completion"
            )));
        }

        match self
            .destination
            .transaction_status(&withdrawal.destination_tx_id)
            .await?
        {
            TxStatus::Pending => {
                debug!(
                    withdrawal_id = %withdrawal.id,
                    tx_id = %withdrawal.destination_tx_id,
                    "Unstake transaction not confirmed yet"
                );
                Ok(ItemOutcome::Unchanged)
            }
            TxStatus::Failed(reason) => {
                self.store
                    .update_withdrawal(
                        withdrawal.id,
                        WithdrawalStatus::Pending,
                        WithdrawalUpdate::failed(),
                    )
                    .await?;
                error!(
                    withdrawal_id = %withdrawal.id,
                    deposit_id = %deposit.id,
                    tx_id = %withdrawal.destination_tx_id,
                    %reason,
                    "Unstake transaction failed, deposit needs operator action"
                );
                Ok(ItemOutcome::Failed {
                    kind: FailureKind::Permanent,
                    message: format!("unstake {} failed: {reason}", withdrawal.destination_tx_id),
                })
            }
            TxStatus::Success => self.release(item).await,
        }
    }

    async fn release(&self, item: &WithdrawalWithDeposit) -> Result<ItemOutcome, SettlementError> {
        let WithdrawalWithDeposit {
            withdrawal,
            deposit,
        } = item;

        let on_chain_id = self
            .source
            .deposit_id_from_receipt(&deposit.source_tx_hash)
            .await?;

        // an earlier release may have landed after its claim was cleared
        if self.source.gateway_state(on_chain_id).await?.released {
            let pair = PairUpdate::complete(withdrawal.id, deposit.id, None, Utc::now());
            self.store.update_withdrawal_and_deposit(pair).await?;
            warn!(
                withdrawal_id = %withdrawal.id,
                deposit_id = %deposit.id,
                "Gateway already released the deposit, completed without a release tx"
            );
            return Ok(ItemOutcome::Advanced);
        }

        self.store
            .update_withdrawal(
                withdrawal.id,
                WithdrawalStatus::Pending,
                WithdrawalUpdate::claim_release(Utc::now()),
            )
            .await?;

        let release_tx = match self
            .source
            .submit(GatewayAction::AdminRelease, on_chain_id)
            .await
        {
            Ok(tx) => tx,
            Err(e @ ChainError::Rejected(_)) => {
                if let Err(clear_err) = self
                    .store
                    .update_withdrawal(
                        withdrawal.id,
                        WithdrawalStatus::Pending,
                        WithdrawalUpdate::clear_release_claim(),
                    )
                    .await
                {
                    error!(withdrawal_id = %withdrawal.id, error = %clear_err, "Failed to release claim");
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let pair = PairUpdate::complete(withdrawal.id, deposit.id, Some(release_tx.clone()), Utc::now());
        self.store
            .update_withdrawal_and_deposit(pair)
            .await
            .inspect_err(|e| {
                error!(
                    withdrawal_id = %withdrawal.id,
                    deposit_id = %deposit.id,
                    %release_tx,
                    error = %e,
                    "Funds released on chain but completion could not be recorded"
                )
            })?;

        info!(
            withdrawal_id = %withdrawal.id,
            deposit_id = %deposit.id,
            %release_tx,
            "Withdrawal completed"
        );
        Ok(ItemOutcome::Advanced)
    }
}

#[async_trait]
impl Job for WithdrawalQueue {
    fn name(&self) -> &'static str {
        "withdrawal_scheduler"
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let report = self.process_pending_withdrawals().await?;
        if !report.is_empty() {
            info!(
                completed = report.advanced(),
                pending = report.unchanged(),
                failed = report.failed(),
                needs_reconciliation = report.needs_reconciliation(),
                "Completed withdrawal cycle"
            );
        }
        Ok(())
    }
}
