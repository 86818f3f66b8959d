use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgExecutor, Row};
use uuid::Uuid;

use crate::lifecycle::{DepositStatus, FeeSplit, WithdrawalStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: Uuid,
    pub source_tx_hash: String,
    pub source_block: i64,
    pub user_address: String,
    pub destination_address: String,
    pub gross_amount: i64,
    pub fee_amount: i64,
    pub net_amount: i64,
    pub status: DepositStatus,
    pub stake_tx_id: Option<String>,
    /// Set right before the stake call is submitted.
    pub bridge_attempted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub stacked_at: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeposit {
    pub source_tx_hash: String,
    pub source_block: i64,
    pub user_address: String,
    pub destination_address: String,
    pub amounts: FeeSplit,
}

impl Deposit {
    /// Fresh RECEIVED record, as `insert_deposit` would store it.
    pub fn received(new: NewDeposit, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_tx_hash: new.source_tx_hash,
            source_block: new.source_block,
            user_address: new.user_address,
            destination_address: new.destination_address,
            gross_amount: new.amounts.gross,
            fee_amount: new.amounts.fee,
            net_amount: new.amounts.net,
            status: DepositStatus::Received,
            stake_tx_id: None,
            bridge_attempted_at: None,
            created_at: now,
            stacked_at: None,
            withdrawn_at: None,
            updated_at: now,
        }
    }

    fn from_prefixed_row(row: &PgRow, prefix: &str) -> Result<Self, sqlx::Error> {
        let col = |name: &str| format!("{prefix}{name}");
        let status: String = row.try_get(col("status").as_str())?;
        Ok(Self {
            id: row.try_get(col("id").as_str())?,
            source_tx_hash: row.try_get(col("source_tx_hash").as_str())?,
            source_block: row.try_get(col("source_block").as_str())?,
            user_address: row.try_get(col("user_address").as_str())?,
            destination_address: row.try_get(col("destination_address").as_str())?,
            gross_amount: row.try_get(col("gross_amount").as_str())?,
            fee_amount: row.try_get(col("fee_amount").as_str())?,
            net_amount: row.try_get(col("net_amount").as_str())?,
            status: status.parse().map_err(|e| sqlx::Error::ColumnDecode {
                index: col("status"),
                source: Box::new(e),
            })?,
            stake_tx_id: row.try_get(col("stake_tx_id").as_str())?,
            bridge_attempted_at: row.try_get(col("bridge_attempted_at").as_str())?,
            created_at: row.try_get(col("created_at").as_str())?,
            stacked_at: row.try_get(col("stacked_at").as_str())?,
            withdrawn_at: row.try_get(col("withdrawn_at").as_str())?,
            updated_at: row.try_get(col("updated_at").as_str())?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Deposit {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Deposit::from_prefixed_row(row, "")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub deposit_id: Uuid,
    pub destination_tx_id: String,
    pub status: WithdrawalStatus,
    pub release_tx_hash: Option<String>,
    /// Set right before the source-chain release is submitted.
    pub release_attempted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Withdrawal {
    pub fn pending(deposit_id: Uuid, destination_tx_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            deposit_id,
            destination_tx_id: destination_tx_id.to_string(),
            status: WithdrawalStatus::Pending,
            release_tx_hash: None,
            release_attempted_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn from_prefixed_row(row: &PgRow, prefix: &str) -> Result<Self, sqlx::Error> {
        let col = |name: &str| format!("{prefix}{name}");
        let status: String = row.try_get(col("status").as_str())?;
        Ok(Self {
            id: row.try_get(col("id").as_str())?,
            deposit_id: row.try_get(col("deposit_id").as_str())?,
            destination_tx_id: row.try_get(col("destination_tx_id").as_str())?,
            status: status.parse().map_err(|e| sqlx::Error::ColumnDecode {
                index: col("status"),
                source: Box::new(e),
            })?,
            release_tx_hash: row.try_get(col("release_tx_hash").as_str())?,
            release_attempted_at: row.try_get(col("release_attempted_at").as_str())?,
            created_at: row.try_get(col("created_at").as_str())?,
            updated_at: row.try_get(col("updated_at").as_str())?,
            completed_at: row.try_get(col("completed_at").as_str())?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Withdrawal {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Withdrawal::from_prefixed_row(row, "")
    }
}

/// A withdrawal joined with the deposit it unwinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalWithDeposit {
    #[serde(flatten)]
    pub withdrawal: Withdrawal,
    pub deposit: Deposit,
}

impl<'r> FromRow<'r, PgRow> for WithdrawalWithDeposit {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            withdrawal: Withdrawal::from_prefixed_row(row, "w_")?,
            deposit: Deposit::from_prefixed_row(row, "d_")?,
        })
    }
}

/// Partial update of a deposit row. `None` leaves a column untouched; the
/// nested options on claim markers allow clearing them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositUpdate {
    pub status: Option<DepositStatus>,
    pub stake_tx_id: Option<String>,
    pub bridge_attempted_at: Option<Option<DateTime<Utc>>>,
    pub stacked_at: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
}

impl DepositUpdate {
    pub fn claim_bridge(at: DateTime<Utc>) -> Self {
        Self {
            bridge_attempted_at: Some(Some(at)),
            ..Default::default()
        }
    }

    pub fn clear_bridge_claim() -> Self {
        Self {
            bridge_attempted_at: Some(None),
            ..Default::default()
        }
    }

    pub fn stake_submitted(tx_id: &str) -> Self {
        Self {
            stake_tx_id: Some(tx_id.to_string()),
            ..Default::default()
        }
    }

    pub fn stacked(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(DepositStatus::Stacked),
            stacked_at: Some(at),
            ..Default::default()
        }
    }

    pub fn withdrawn(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(DepositStatus::Withdrawn),
            withdrawn_at: Some(at),
            ..Default::default()
        }
    }

    pub fn status(status: DepositStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, deposit: &mut Deposit, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            deposit.status = status;
        }
        if let Some(tx_id) = &self.stake_tx_id {
            deposit.stake_tx_id = Some(tx_id.clone());
        }
        if let Some(at) = self.bridge_attempted_at {
            deposit.bridge_attempted_at = at;
        }
        if let Some(at) = self.stacked_at {
            deposit.stacked_at = Some(at);
        }
        if let Some(at) = self.withdrawn_at {
            deposit.withdrawn_at = Some(at);
        }
        deposit.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WithdrawalUpdate {
    pub status: Option<WithdrawalStatus>,
    pub release_tx_hash: Option<String>,
    pub release_attempted_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WithdrawalUpdate {
    pub fn failed() -> Self {
        Self {
            status: Some(WithdrawalStatus::Failed),
            ..Default::default()
        }
    }

    pub fn claim_release(at: DateTime<Utc>) -> Self {
        Self {
            release_attempted_at: Some(Some(at)),
            ..Default::default()
        }
    }

    pub fn clear_release_claim() -> Self {
        Self {
            release_attempted_at: Some(None),
            ..Default::default()
        }
    }

    pub fn completed(release_tx_hash: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(WithdrawalStatus::Completed),
            release_tx_hash,
            completed_at: Some(at),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, withdrawal: &mut Withdrawal, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            withdrawal.status = status;
        }
        if let Some(tx) = &self.release_tx_hash {
            withdrawal.release_tx_hash = Some(tx.clone());
        }
        if let Some(at) = self.release_attempted_at {
            withdrawal.release_attempted_at = at;
        }
        if let Some(at) = self.completed_at {
            withdrawal.completed_at = Some(at);
        }
        withdrawal.updated_at = now;
    }
}

const DEPOSIT_COLUMNS: &str = "id, source_tx_hash, source_block, user_address, \
    destination_address, gross_amount, fee_amount, net_amount, status, stake_tx_id, \
    bridge_attempted_at, created_at, stacked_at, withdrawn_at, updated_at";

const WITHDRAWAL_COLUMNS: &str = "id, deposit_id, destination_tx_id, status, \
    release_tx_hash, release_attempted_at, created_at, updated_at, completed_at";

const JOINED_COLUMNS: &str = "w.id AS w_id, w.deposit_id AS w_deposit_id, \
    w.destination_tx_id AS w_destination_tx_id, w.status AS w_status, \
    w.release_tx_hash AS w_release_tx_hash, w.release_attempted_at AS w_release_attempted_at, \
    w.created_at AS w_created_at, w.updated_at AS w_updated_at, w.completed_at AS w_completed_at, \
    d.id AS d_id, d.source_tx_hash AS d_source_tx_hash, d.source_block AS d_source_block, \
    d.user_address AS d_user_address, d.destination_address AS d_destination_address, \
    d.gross_amount AS d_gross_amount, d.fee_amount AS d_fee_amount, d.net_amount AS d_net_amount, \
    d.status AS d_status, d.stake_tx_id AS d_stake_tx_id, \
    d.bridge_attempted_at AS d_bridge_attempted_at, d.created_at AS d_created_at, \
    d.stacked_at AS d_stacked_at, d.withdrawn_at AS d_withdrawn_at, d.updated_at AS d_updated_at";

pub async fn insert_deposit<'e, E: PgExecutor<'e>>(
    executor: E,
    deposit: &NewDeposit,
) -> Result<Deposit, sqlx::Error> {
    let sql = format!(
        "INSERT INTO deposits (id, source_tx_hash, source_block, user_address, destination_address, \
         gross_amount, fee_amount, net_amount, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'RECEIVED') \
         RETURNING {DEPOSIT_COLUMNS}"
    );
    sqlx::query_as::<_, Deposit>(&sql)
        .bind(Uuid::new_v4())
        .bind(&deposit.source_tx_hash)
        .bind(deposit.source_block)
        .bind(&deposit.user_address)
        .bind(&deposit.destination_address)
        .bind(deposit.amounts.gross)
        .bind(deposit.amounts.fee)
        .bind(deposit.amounts.net)
        .fetch_one(executor)
        .await
}

pub async fn get_deposit<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
) -> Result<Option<Deposit>, sqlx::Error> {
    let sql = format!("SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE id = $1");
    sqlx::query_as::<_, Deposit>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn get_deposit_by_tx_hash<'e, E: PgExecutor<'e>>(
    executor: E,
    source_tx_hash: &str,
) -> Result<Option<Deposit>, sqlx::Error> {
    let sql = format!("SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE source_tx_hash = $1");
    sqlx::query_as::<_, Deposit>(&sql)
        .bind(source_tx_hash)
        .fetch_optional(executor)
        .await
}

/// Oldest first, so schedulers work through backlogs in arrival order.
pub async fn get_deposits_by_status<'e, E: PgExecutor<'e>>(
    executor: E,
    status: DepositStatus,
) -> Result<Vec<Deposit>, sqlx::Error> {
    let sql = format!(
        "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE status = $1 ORDER BY created_at ASC"
    );
    sqlx::query_as::<_, Deposit>(&sql)
        .bind(status.as_str())
        .fetch_all(executor)
        .await
}

pub async fn get_deposits_by_user<'e, E: PgExecutor<'e>>(
    executor: E,
    user_address: &str,
) -> Result<Vec<Deposit>, sqlx::Error> {
    let sql = format!(
        "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE LOWER(user_address) = LOWER($1) \
         ORDER BY created_at DESC"
    );
    sqlx::query_as::<_, Deposit>(&sql)
        .bind(user_address)
        .fetch_all(executor)
        .await
}

/// Check-and-set: applies `update` only while the row is still in `expected`.
/// Returns `None` when no row matched.
pub async fn update_deposit<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    expected: DepositStatus,
    update: &DepositUpdate,
) -> Result<Option<Deposit>, sqlx::Error> {
    let sql = format!(
        "UPDATE deposits SET \
            status = COALESCE($3, status), \
            stake_tx_id = COALESCE($4, stake_tx_id), \
            bridge_attempted_at = CASE WHEN $5 THEN $6 ELSE bridge_attempted_at END, \
            stacked_at = COALESCE($7, stacked_at), \
            withdrawn_at = COALESCE($8, withdrawn_at), \
            updated_at = NOW() \
         WHERE id = $1 AND status = $2 \
         RETURNING {DEPOSIT_COLUMNS}"
    );
    sqlx::query_as::<_, Deposit>(&sql)
        .bind(id)
        .bind(expected.as_str())
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.stake_tx_id.as_deref())
        .bind(update.bridge_attempted_at.is_some())
        .bind(update.bridge_attempted_at.flatten())
        .bind(update.stacked_at)
        .bind(update.withdrawn_at)
        .fetch_optional(executor)
        .await
}

pub async fn insert_withdrawal<'e, E: PgExecutor<'e>>(
    executor: E,
    deposit_id: Uuid,
    destination_tx_id: &str,
) -> Result<Withdrawal, sqlx::Error> {
    let sql = format!(
        "INSERT INTO withdrawals (id, deposit_id, destination_tx_id, status) \
         VALUES ($1, $2, $3, 'PENDING') \
         RETURNING {WITHDRAWAL_COLUMNS}"
    );
    sqlx::query_as::<_, Withdrawal>(&sql)
        .bind(Uuid::new_v4())
        .bind(deposit_id)
        .bind(destination_tx_id)
        .fetch_one(executor)
        .await
}

pub async fn get_withdrawal<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
) -> Result<Option<Withdrawal>, sqlx::Error> {
    let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = $1");
    sqlx::query_as::<_, Withdrawal>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn get_active_withdrawal<'e, E: PgExecutor<'e>>(
    executor: E,
    deposit_id: Uuid,
) -> Result<Option<Withdrawal>, sqlx::Error> {
    let sql = format!(
        "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals \
         WHERE deposit_id = $1 AND status <> 'FAILED'"
    );
    sqlx::query_as::<_, Withdrawal>(&sql)
        .bind(deposit_id)
        .fetch_optional(executor)
        .await
}

pub async fn get_withdrawals_by_status<'e, E: PgExecutor<'e>>(
    executor: E,
    status: WithdrawalStatus,
) -> Result<Vec<WithdrawalWithDeposit>, sqlx::Error> {
    let sql = format!(
        "SELECT {JOINED_COLUMNS} FROM withdrawals w \
         JOIN deposits d ON d.id = w.deposit_id \
         WHERE w.status = $1 ORDER BY w.created_at ASC"
    );
    sqlx::query_as::<_, WithdrawalWithDeposit>(&sql)
        .bind(status.as_str())
        .fetch_all(executor)
        .await
}

pub async fn get_withdrawals_by_user<'e, E: PgExecutor<'e>>(
    executor: E,
    user_address: &str,
) -> Result<Vec<WithdrawalWithDeposit>, sqlx::Error> {
    let sql = format!(
        "SELECT {JOINED_COLUMNS} FROM withdrawals w \
         JOIN deposits d ON d.id = w.deposit_id \
         WHERE LOWER(d.user_address) = LOWER($1) ORDER BY w.created_at DESC"
    );
    sqlx::query_as::<_, WithdrawalWithDeposit>(&sql)
        .bind(user_address)
        .fetch_all(executor)
        .await
}

pub async fn update_withdrawal<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    expected: WithdrawalStatus,
    update: &WithdrawalUpdate,
) -> Result<Option<Withdrawal>, sqlx::Error> {
    let sql = format!(
        "UPDATE withdrawals SET \
            status = COALESCE($3, status), \
            release_tx_hash = COALESCE($4, release_tx_hash), \
            release_attempted_at = CASE WHEN $5 THEN $6 ELSE release_attempted_at END, \
            completed_at = COALESCE($7, completed_at), \
            updated_at = NOW() \
         WHERE id = $1 AND status = $2 \
         RETURNING {WITHDRAWAL_COLUMNS}"
    );
    sqlx::query_as::<_, Withdrawal>(&sql)
        .bind(id)
        .bind(expected.as_str())
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.release_tx_hash.as_deref())
        .bind(update.release_attempted_at.is_some())
        .bind(update.release_attempted_at.flatten())
        .bind(update.completed_at)
        .fetch_optional(executor)
        .await
}

pub async fn get_last_processed_block<'e, E: PgExecutor<'e>>(
    executor: E,
    key: &str,
) -> Result<Option<u64>, sqlx::Error> {
    let row = sqlx::query("SELECT last_block FROM block_trackers WHERE key = $1")
        .bind(key)
        .fetch_optional(executor)
        .await?;

    match row {
        Some(row) => {
            let last_block: i64 = row.try_get("last_block")?;
            let last_block =
                u64::try_from(last_block).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            Ok(Some(last_block))
        }
        None => Ok(None),
    }
}

pub async fn update_last_processed_block<'e, E: PgExecutor<'e>>(
    executor: E,
    key: &str,
    block_number: u64,
) -> Result<(), sqlx::Error> {
    let block_number = i64::try_from(block_number).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO block_trackers (key, last_block)
        VALUES ($1, $2)
        ON CONFLICT (key) DO UPDATE SET last_block = EXCLUDED.last_block, updated_at = NOW()
        "#,
    )
    .bind(key)
    .bind(block_number)
    .execute(executor)
    .await?;

    Ok(())
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
