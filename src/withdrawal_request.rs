use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chain::{ChainError, DestinationChain, StakingAction};
use crate::db::{Deposit, DepositUpdate, StateStore, StoreError, Withdrawal};
use crate::lifecycle::DepositStatus;

#[derive(Debug, Error)]
pub enum WithdrawalRequestError {
    #[error("Deposit {0} not found")]
    NotFound(Uuid),

    #[error("Deposit {id} is {status}, expected {expected}")]
    InvalidState {
        id: Uuid,
        status: DepositStatus,
        expected: DepositStatus,
    },

    #[error("Deposit {deposit_id} already has withdrawal {withdrawal_id} in progress")]
    AlreadyActive {
        deposit_id: Uuid,
        withdrawal_id: Uuid,
    },

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Issues unstake requests for stacked deposits, plus the operator actions
/// for withdrawals that failed on the destination chain.
pub struct WithdrawalRequester {
    store: Arc<dyn StateStore>,
    destination: Arc<dyn DestinationChain>,
    // serializes check -> submit -> record within this process
    request_lock: Mutex<()>,
}

impl WithdrawalRequester {
    pub fn new(store: Arc<dyn StateStore>, destination: Arc<dyn DestinationChain>) -> Self {
        Self {
            store,
            destination,
            request_lock: Mutex::new(()),
        }
    }

    async fn load(
        &self,
        deposit_id: Uuid,
        expected: DepositStatus,
    ) -> Result<Deposit, WithdrawalRequestError> {
        let deposit = self
            .store
            .find_deposit(deposit_id)
            .await?
            .ok_or(WithdrawalRequestError::NotFound(deposit_id))?;
        if deposit.status != expected {
            return Err(WithdrawalRequestError::InvalidState {
                id: deposit_id,
                status: deposit.status,
                expected,
            });
        }
        Ok(deposit)
    }

    async fn ensure_no_active(&self, deposit_id: Uuid) -> Result<(), WithdrawalRequestError> {
        if let Some(active) = self.store.find_active_withdrawal(deposit_id).await? {
            return Err(WithdrawalRequestError::AlreadyActive {
                deposit_id,
                withdrawal_id: active.id,
            });
        }
        Ok(())
    }

    async fn unstake_and_record(
        &self,
        deposit: &Deposit,
    ) -> Result<Withdrawal, WithdrawalRequestError> {
        let tx_id = self
            .destination
            .submit(
                StakingAction::Unstake,
                deposit.net_amount,
                &deposit.destination_address,
            )
            .await?;

        self.store
            .create_withdrawal(deposit.id, deposit.status, &tx_id)
            .await
            .map_err(|e| {
                error!(
                    deposit_id = %deposit.id,
                    %tx_id,
                    error = %e,
                    "Unstake submitted but the withdrawal could not be recorded"
                );
                WithdrawalRequestError::from(e)
            })
    }

    /// Requests withdrawal of a STACKED deposit. Returns the destination
    /// transaction id of the unstake call.
    ///
    /// The deposit state and the absence of an active withdrawal are both
    /// checked before anything is sent on chain.
    pub async fn request_withdrawal(&self, deposit_id: Uuid) -> Result<String, WithdrawalRequestError> {
        let _guard = self.request_lock.lock().await;

        let deposit = self.load(deposit_id, DepositStatus::Stacked).await?;
        self.ensure_no_active(deposit_id).await?;

        let withdrawal = self.unstake_and_record(&deposit).await?;
        info!(
            %deposit_id,
            withdrawal_id = %withdrawal.id,
            tx_id = %withdrawal.destination_tx_id,
            "Withdrawal requested"
        );
        Ok(withdrawal.destination_tx_id)
    }

    /// Re-issues the unstake for a deposit whose last withdrawal FAILED.
    pub async fn retry_failed_withdrawal(
        &self,
        deposit_id: Uuid,
    ) -> Result<String, WithdrawalRequestError> {
        let _guard = self.request_lock.lock().await;

        let deposit = self
            .load(deposit_id, DepositStatus::WithdrawRequested)
            .await?;
        self.ensure_no_active(deposit_id).await?;

        let withdrawal = self.unstake_and_record(&deposit).await?;
        warn!(
            %deposit_id,
            withdrawal_id = %withdrawal.id,
            tx_id = %withdrawal.destination_tx_id,
            "Withdrawal re-issued by operator"
        );
        Ok(withdrawal.destination_tx_id)
    }

    /// Gives up on a deposit whose withdrawal failed: WITHDRAW_REQUESTED -> FAILED.
    pub async fn abandon_deposit(&self, deposit_id: Uuid) -> Result<Deposit, WithdrawalRequestError> {
        let _guard = self.request_lock.lock().await;

        self.load(deposit_id, DepositStatus::WithdrawRequested)
            .await?;
        self.ensure_no_active(deposit_id).await?;

        let deposit = self
            .store
            .update_deposit(
                deposit_id,
                DepositStatus::WithdrawRequested,
                DepositUpdate::status(DepositStatus::Failed),
            )
            .await?;
        warn!(%deposit_id, "Deposit marked FAILED by operator");
        Ok(deposit)
    }
}
