use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::db::database::{
    self, Deposit, DepositUpdate, NewDeposit, Withdrawal, WithdrawalUpdate, WithdrawalWithDeposit,
};
use crate::lifecycle::{DepositStatus, FailureKind, WithdrawalStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("duplicate {0}")]
    Duplicate(String),

    /// Check-and-set lost: the row is no longer in the expected status.
    #[error("{entity} {id} is {actual}, expected {expected}")]
    Conflict {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            StoreError::NotFound { .. }
            | StoreError::Conflict { .. }
            | StoreError::InvalidTransition { .. }
            | StoreError::Duplicate(_) => FailureKind::Integrity,
            StoreError::Database(_) | StoreError::Unavailable(_) => FailureKind::Persistence,
        }
    }

    pub(crate) fn deposit_not_found(id: Uuid) -> Self {
        StoreError::NotFound {
            entity: "deposit",
            id: id.to_string(),
        }
    }

    pub(crate) fn withdrawal_not_found(id: Uuid) -> Self {
        StoreError::NotFound {
            entity: "withdrawal",
            id: id.to_string(),
        }
    }

    pub(crate) fn deposit_conflict(id: Uuid, expected: DepositStatus, actual: DepositStatus) -> Self {
        StoreError::Conflict {
            entity: "deposit",
            id: id.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn withdrawal_conflict(
        id: Uuid,
        expected: WithdrawalStatus,
        actual: WithdrawalStatus,
    ) -> Self {
        StoreError::Conflict {
            entity: "withdrawal",
            id: id.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Completion of a withdrawal and its deposit, applied as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairUpdate {
    pub withdrawal_id: Uuid,
    pub withdrawal_expected: WithdrawalStatus,
    pub withdrawal: WithdrawalUpdate,
    pub deposit_id: Uuid,
    pub deposit_expected: DepositStatus,
    pub deposit: DepositUpdate,
}

impl PairUpdate {
    /// PENDING -> COMPLETED together with WITHDRAW_REQUESTED -> WITHDRAWN.
    pub fn complete(
        withdrawal_id: Uuid,
        deposit_id: Uuid,
        release_tx_hash: Option<String>,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            withdrawal_id,
            withdrawal_expected: WithdrawalStatus::Pending,
            withdrawal: WithdrawalUpdate::completed(release_tx_hash, at),
            deposit_id,
            deposit_expected: DepositStatus::WithdrawRequested,
            deposit: DepositUpdate::withdrawn(at),
        }
    }
}

pub(crate) fn check_deposit_transition(
    expected: DepositStatus,
    update: &DepositUpdate,
) -> Result<(), StoreError> {
    match update.status {
        Some(next) if !expected.can_transition_to(next) => Err(StoreError::InvalidTransition {
            from: expected.to_string(),
            to: next.to_string(),
        }),
        _ => Ok(()),
    }
}

pub(crate) fn check_withdrawal_transition(
    expected: WithdrawalStatus,
    update: &WithdrawalUpdate,
) -> Result<(), StoreError> {
    match update.status {
        Some(next) if !expected.can_transition_to(next) => Err(StoreError::InvalidTransition {
            from: expected.to_string(),
            to: next.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Durable record of deposits, withdrawals and scan cursors.
///
/// Every mutation is a check-and-set against an expected status, so a stale
/// reader can never move a record backwards.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fails with [`StoreError::Duplicate`] when the source tx hash is known.
    async fn create_deposit(&self, deposit: NewDeposit) -> Result<Deposit, StoreError>;

    async fn find_deposit(&self, id: Uuid) -> Result<Option<Deposit>, StoreError>;

    async fn find_deposit_by_tx_hash(
        &self,
        source_tx_hash: &str,
    ) -> Result<Option<Deposit>, StoreError>;

    /// Oldest first.
    async fn list_deposits(&self, status: DepositStatus) -> Result<Vec<Deposit>, StoreError>;

    /// Newest first.
    async fn list_deposits_by_user(&self, user_address: &str)
        -> Result<Vec<Deposit>, StoreError>;

    async fn update_deposit(
        &self,
        id: Uuid,
        expected: DepositStatus,
        update: DepositUpdate,
    ) -> Result<Deposit, StoreError>;

    /// Inserts a PENDING withdrawal and moves the deposit from `expected` to
    /// WITHDRAW_REQUESTED in one unit. `expected` may already be
    /// WITHDRAW_REQUESTED when an operator re-issues a failed withdrawal.
    async fn create_withdrawal(
        &self,
        deposit_id: Uuid,
        expected: DepositStatus,
        destination_tx_id: &str,
    ) -> Result<Withdrawal, StoreError>;

    async fn find_active_withdrawal(
        &self,
        deposit_id: Uuid,
    ) -> Result<Option<Withdrawal>, StoreError>;

    /// Oldest first, each joined with its deposit.
    async fn list_withdrawals(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalWithDeposit>, StoreError>;

    /// Newest first.
    async fn list_withdrawals_by_user(
        &self,
        user_address: &str,
    ) -> Result<Vec<WithdrawalWithDeposit>, StoreError>;

    async fn update_withdrawal(
        &self,
        id: Uuid,
        expected: WithdrawalStatus,
        update: WithdrawalUpdate,
    ) -> Result<Withdrawal, StoreError>;

    /// All-or-nothing: either both records change or neither does.
    async fn update_withdrawal_and_deposit(
        &self,
        pair: PairUpdate,
    ) -> Result<(Withdrawal, Deposit), StoreError>;

    async fn get_cursor(&self, key: &str) -> Result<Option<u64>, StoreError>;

    async fn set_cursor(&self, key: &str, block: u64) -> Result<(), StoreError>;
}

/// Postgres-backed [`StateStore`].
#[derive(Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn deposit_miss<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    expected: DepositStatus,
) -> StoreError {
    match database::get_deposit(executor, id).await {
        Ok(Some(current)) => StoreError::deposit_conflict(id, expected, current.status),
        Ok(None) => StoreError::deposit_not_found(id),
        Err(e) => StoreError::Database(e),
    }
}

async fn withdrawal_miss<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    expected: WithdrawalStatus,
) -> StoreError {
    match database::get_withdrawal(executor, id).await {
        Ok(Some(current)) => StoreError::withdrawal_conflict(id, expected, current.status),
        Ok(None) => StoreError::withdrawal_not_found(id),
        Err(e) => StoreError::Database(e),
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn create_deposit(&self, deposit: NewDeposit) -> Result<Deposit, StoreError> {
        database::insert_deposit(&self.pool, &deposit)
            .await
            .map_err(|e| {
                if database::is_unique_violation(&e) {
                    StoreError::Duplicate(format!("deposit for tx {}", deposit.source_tx_hash))
                } else {
                    StoreError::Database(e)
                }
            })
    }

    async fn find_deposit(&self, id: Uuid) -> Result<Option<Deposit>, StoreError> {
        Ok(database::get_deposit(&self.pool, id).await?)
    }

    async fn find_deposit_by_tx_hash(
        &self,
        source_tx_hash: &str,
    ) -> Result<Option<Deposit>, StoreError> {
        Ok(database::get_deposit_by_tx_hash(&self.pool, source_tx_hash).await?)
    }

    async fn list_deposits(&self, status: DepositStatus) -> Result<Vec<Deposit>, StoreError> {
        Ok(database::get_deposits_by_status(&self.pool, status).await?)
    }

    async fn list_deposits_by_user(
        &self,
        user_address: &str,
    ) -> Result<Vec<Deposit>, StoreError> {
        Ok(database::get_deposits_by_user(&self.pool, user_address).await?)
    }

    async fn update_deposit(
        &self,
        id: Uuid,
        expected: DepositStatus,
        update: DepositUpdate,
    ) -> Result<Deposit, StoreError> {
        check_deposit_transition(expected, &update)?;
        match database::update_deposit(&self.pool, id, expected, &update).await? {
            Some(deposit) => Ok(deposit),
            None => Err(deposit_miss(&self.pool, id, expected).await),
        }
    }

    async fn create_withdrawal(
        &self,
        deposit_id: Uuid,
        expected: DepositStatus,
        destination_tx_id: &str,
    ) -> Result<Withdrawal, StoreError> {
        let update = if expected == DepositStatus::WithdrawRequested {
            DepositUpdate::default()
        } else {
            DepositUpdate::status(DepositStatus::WithdrawRequested)
        };
        check_deposit_transition(expected, &update)?;

        let mut tx = self.pool.begin().await?;

        if database::update_deposit(&mut *tx, deposit_id, expected, &update)
            .await?
            .is_none()
        {
            return Err(deposit_miss(&mut *tx, deposit_id, expected).await);
        }

        let withdrawal = database::insert_withdrawal(&mut *tx, deposit_id, destination_tx_id)
            .await
            .map_err(|e| {
                if database::is_unique_violation(&e) {
                    StoreError::Duplicate(format!("active withdrawal for deposit {deposit_id}"))
                } else {
                    StoreError::Database(e)
                }
            })?;

        tx.commit().await?;
        debug!(%deposit_id, withdrawal_id = %withdrawal.id, "Recorded withdrawal");
        Ok(withdrawal)
    }

    async fn find_active_withdrawal(
        &self,
        deposit_id: Uuid,
    ) -> Result<Option<Withdrawal>, StoreError> {
        Ok(database::get_active_withdrawal(&self.pool, deposit_id).await?)
    }

    async fn list_withdrawals(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalWithDeposit>, StoreError> {
        Ok(database::get_withdrawals_by_status(&self.pool, status).await?)
    }

    async fn list_withdrawals_by_user(
        &self,
        user_address: &str,
    ) -> Result<Vec<WithdrawalWithDeposit>, StoreError> {
        Ok(database::get_withdrawals_by_user(&self.pool, user_address).await?)
    }

    async fn update_withdrawal(
        &self,
        id: Uuid,
        expected: WithdrawalStatus,
        update: WithdrawalUpdate,
    ) -> Result<Withdrawal, StoreError> {
        check_withdrawal_transition(expected, &update)?;
        match database::update_withdrawal(&self.pool, id, expected, &update).await? {
            Some(withdrawal) => Ok(withdrawal),
            None => Err(withdrawal_miss(&self.pool, id, expected).await),
        }
    }

    async fn update_withdrawal_and_deposit(
        &self,
        pair: PairUpdate,
    ) -> Result<(Withdrawal, Deposit), StoreError> {
        check_withdrawal_transition(pair.withdrawal_expected, &pair.withdrawal)?;
        check_deposit_transition(pair.deposit_expected, &pair.deposit)?;

        // Any early return drops `tx`, which rolls back both writes.
        let mut tx = self.pool.begin().await?;

        let withdrawal = match database::update_withdrawal(
            &mut *tx,
            pair.withdrawal_id,
            pair.withdrawal_expected,
            &pair.withdrawal,
        )
        .await?
        {
            Some(w) => w,
            None => {
                return Err(
                    withdrawal_miss(&mut *tx, pair.withdrawal_id, pair.withdrawal_expected).await,
                )
            }
        };

        let deposit = match database::update_deposit(
            &mut *tx,
            pair.deposit_id,
            pair.deposit_expected,
            &pair.deposit,
        )
        .await?
        {
            Some(d) => d,
            None => {
                return Err(deposit_miss(&mut *tx, pair.deposit_id, pair.deposit_expected).await)
            }
        };

        tx.commit().await?;
        Ok((withdrawal, deposit))
    }

    async fn get_cursor(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(database::get_last_processed_block(&self.pool, key).await?)
    }

    async fn set_cursor(&self, key: &str, block: u64) -> Result<(), StoreError> {
        Ok(database::update_last_processed_block(&self.pool, key, block).await?)
    }
}
