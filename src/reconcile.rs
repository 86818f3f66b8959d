use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chain::{ChainError, SourceChain};
use crate::db::{
    Deposit, DepositUpdate, PairUpdate, StateStore, StoreError, WithdrawalUpdate,
    WithdrawalWithDeposit,
};
use crate::lifecycle::{DepositStatus, FailureKind, ItemOutcome, TickReport, WithdrawalStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub deposits: TickReport,
    pub withdrawals: TickReport,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("deposit {0} has a recorded stake transaction; nothing to clear")]
    StakeRecorded(Uuid),
}

impl ReconcileError {
    fn into_outcome(self) -> ItemOutcome {
        let kind = match &self {
            ReconcileError::Chain(e) => e.failure_kind(),
            ReconcileError::Store(e) => e.failure_kind(),
            ReconcileError::StakeRecorded(_) => FailureKind::Integrity,
        };
        ItemOutcome::Failed {
            kind,
            message: self.to_string(),
        }
    }
}

/// Settles records whose last chain action has no recorded outcome, using
/// the gateway's own flags as the source of truth.
pub struct Reconciler {
    store: Arc<dyn StateStore>,
    source: Arc<dyn SourceChain>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn StateStore>, source: Arc<dyn SourceChain>) -> Self {
        Self { store, source }
    }

    pub async fn sweep(&self) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport::default();

        for deposit in self.store.list_deposits(DepositStatus::Received).await? {
            if deposit.bridge_attempted_at.is_none() || deposit.stake_tx_id.is_some() {
                continue;
            }
            let outcome = self
                .reconcile_deposit(&deposit)
                .await
                .unwrap_or_else(|e| {
                    error!(deposit_id = %deposit.id, error = %e, "Failed to reconcile deposit");
                    e.into_outcome()
                });
            report.deposits.record(deposit.id, outcome);
        }

        for item in self.store.list_withdrawals(WithdrawalStatus::Pending).await? {
            if item.withdrawal.release_attempted_at.is_none() {
                continue;
            }
            let id = item.withdrawal.id;
            let outcome = self.reconcile_withdrawal(&item).await.unwrap_or_else(|e| {
                error!(withdrawal_id = %id, error = %e, "Failed to reconcile withdrawal");
                e.into_outcome()
            });
            report.withdrawals.record(id, outcome);
        }

        info!(
            deposits_settled = report.deposits.advanced(),
            deposits_open = report.deposits.needs_reconciliation(),
            withdrawals_settled = report.withdrawals.advanced(),
            withdrawals_open = report.withdrawals.needs_reconciliation(),
            "Reconciliation sweep finished"
        );
        Ok(report)
    }

    async fn reconcile_deposit(&self, deposit: &Deposit) -> Result<ItemOutcome, ReconcileError> {
        let on_chain_id = self
            .source
            .deposit_id_from_receipt(&deposit.source_tx_hash)
            .await?;
        let state = self.source.gateway_state(on_chain_id).await?;

        if !state.bridged {
            warn!(
                deposit_id = %deposit.id,
                "Stake outcome unknown and gateway not bridged, check the destination chain"
            );
            return Ok(ItemOutcome::NeedsReconciliation(
                "gateway does not mark the deposit bridged".to_string(),
            ));
        }

        // bridged on the gateway implies the stake went through first
        self.store
            .update_deposit(
                deposit.id,
                DepositStatus::Received,
                DepositUpdate::stacked(Utc::now()),
            )
            .await?;
        info!(deposit_id = %deposit.id, "Reconciled deposit to STACKED");
        Ok(ItemOutcome::Advanced)
    }

    async fn reconcile_withdrawal(
        &self,
        item: &WithdrawalWithDeposit,
    ) -> Result<ItemOutcome, ReconcileError> {
        let on_chain_id = self
            .source
            .deposit_id_from_receipt(&item.deposit.source_tx_hash)
            .await?;
        let state = self.source.gateway_state(on_chain_id).await?;

        if !state.released {
            warn!(
                withdrawal_id = %item.withdrawal.id,
                "Release outcome unknown and gateway not released"
            );
            return Ok(ItemOutcome::NeedsReconciliation(
                "gateway does not mark the deposit withdrawn".to_string(),
            ));
        }

        let pair = PairUpdate::complete(item.withdrawal.id, item.deposit.id, None, Utc::now());
        self.store.update_withdrawal_and_deposit(pair).await?;
        info!(withdrawal_id = %item.withdrawal.id, "Reconciled withdrawal to COMPLETED");
        Ok(ItemOutcome::Advanced)
    }

    /// Operator action: forget a stake attempt that never reached the
    /// destination chain so the bridge scheduler retries it.
    pub async fn clear_bridge_claim(&self, deposit_id: Uuid) -> Result<Deposit, ReconcileError> {
        let deposit = self
            .store
            .find_deposit(deposit_id)
            .await?
            .ok_or_else(|| StoreError::deposit_not_found(deposit_id))?;
        if deposit.stake_tx_id.is_some() {
            return Err(ReconcileError::StakeRecorded(deposit_id));
        }

        let deposit = self
            .store
            .update_deposit(
                deposit_id,
                DepositStatus::Received,
                DepositUpdate::clear_bridge_claim(),
            )
            .await?;
        warn!(%deposit_id, "Bridge claim cleared by operator");
        Ok(deposit)
    }

    /// Operator action: drop a release claim after confirming on chain that
    /// `adminWithdraw` never landed.
    pub async fn clear_release_claim(
        &self,
        withdrawal_id: Uuid,
    ) -> Result<(), ReconcileError> {
        self.store
            .update_withdrawal(
                withdrawal_id,
                WithdrawalStatus::Pending,
                WithdrawalUpdate::clear_release_claim(),
            )
            .await?;
        warn!(%withdrawal_id, "Release claim cleared by operator");
        Ok(())
    }
}
