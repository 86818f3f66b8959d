use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::database::{
    Deposit, DepositUpdate, NewDeposit, Withdrawal, WithdrawalUpdate, WithdrawalWithDeposit,
};
use crate::db::store::{
    check_deposit_transition, check_withdrawal_transition, PairUpdate, StateStore, StoreError,
};
use crate::lifecycle::{DepositStatus, WithdrawalStatus};

/// Failures that can be armed on a [`MemoryStore`]. Each fires once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Abort `update_withdrawal_and_deposit` after the withdrawal half has
    /// been staged but before the deposit half.
    InterruptPairUpdate,
    /// Fail `create_deposit` for this source tx hash.
    FailCreateDeposit(String),
    /// Fail the next `update_deposit` touching this deposit.
    FailUpdateDeposit(Uuid),
    /// Fail the next `create_withdrawal` for this deposit.
    FailCreateWithdrawal(Uuid),
}

#[derive(Default)]
struct MemoryState {
    deposits: Vec<Deposit>,
    withdrawals: Vec<Withdrawal>,
    cursors: HashMap<String, u64>,
    faults: Vec<Fault>,
}

impl MemoryState {
    fn take_fault(&mut self, fault: &Fault) -> bool {
        match self.faults.iter().position(|f| f == fault) {
            Some(idx) => {
                self.faults.remove(idx);
                true
            }
            None => false,
        }
    }

    fn deposit(&self, id: Uuid) -> Option<&Deposit> {
        self.deposits.iter().find(|d| d.id == id)
    }

    fn join(&self, withdrawal: &Withdrawal) -> Result<WithdrawalWithDeposit, StoreError> {
        let deposit = self
            .deposit(withdrawal.deposit_id)
            .cloned()
            .ok_or_else(|| StoreError::deposit_not_found(withdrawal.deposit_id))?;
        Ok(WithdrawalWithDeposit {
            withdrawal: withdrawal.clone(),
            deposit,
        })
    }

    /// Validates a deposit check-and-set and returns the updated copy
    /// without writing it back.
    fn stage_deposit(
        &self,
        id: Uuid,
        expected: DepositStatus,
        update: &DepositUpdate,
    ) -> Result<(usize, Deposit), StoreError> {
        check_deposit_transition(expected, update)?;
        let idx = self
            .deposits
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| StoreError::deposit_not_found(id))?;
        let mut staged = self.deposits[idx].clone();
        if staged.status != expected {
            return Err(StoreError::deposit_conflict(id, expected, staged.status));
        }
        update.apply_to(&mut staged, Utc::now());
        Ok((idx, staged))
    }

    fn stage_withdrawal(
        &self,
        id: Uuid,
        expected: WithdrawalStatus,
        update: &WithdrawalUpdate,
    ) -> Result<(usize, Withdrawal), StoreError> {
        check_withdrawal_transition(expected, update)?;
        let idx = self
            .withdrawals
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| StoreError::withdrawal_not_found(id))?;
        let mut staged = self.withdrawals[idx].clone();
        if staged.status != expected {
            return Err(StoreError::withdrawal_conflict(id, expected, staged.status));
        }
        update.apply_to(&mut staged, Utc::now());
        Ok((idx, staged))
    }
}

/// In-process [`StateStore`] with the same check-and-set and uniqueness
/// rules as the Postgres store. Used for tests and dry runs; faults can be
/// armed to exercise partial-failure paths.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn inject_fault(&self, fault: Fault) {
        self.state.lock().await.faults.push(fault);
    }

    /// Inserts a record as-is, bypassing lifecycle checks. For seeding.
    pub async fn insert_deposit_record(&self, deposit: Deposit) {
        self.state.lock().await.deposits.push(deposit);
    }

    pub async fn insert_withdrawal_record(&self, withdrawal: Withdrawal) {
        self.state.lock().await.withdrawals.push(withdrawal);
    }

    pub async fn deposits(&self) -> Vec<Deposit> {
        self.state.lock().await.deposits.clone()
    }

    pub async fn withdrawals(&self) -> Vec<Withdrawal> {
        self.state.lock().await.withdrawals.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn create_deposit(&self, deposit: NewDeposit) -> Result<Deposit, StoreError> {
        let mut state = self.state.lock().await;
        if state.take_fault(&Fault::FailCreateDeposit(deposit.source_tx_hash.clone())) {
            return Err(StoreError::Unavailable("injected create_deposit failure".into()));
        }
        if state
            .deposits
            .iter()
            .any(|d| d.source_tx_hash == deposit.source_tx_hash)
        {
            return Err(StoreError::Duplicate(format!(
                "deposit for tx {}",
                deposit.source_tx_hash
            )));
        }
        let record = Deposit::received(deposit, Utc::now());
        state.deposits.push(record.clone());
        Ok(record)
    }

    async fn find_deposit(&self, id: Uuid) -> Result<Option<Deposit>, StoreError> {
        Ok(self.state.lock().await.deposit(id).cloned())
    }

    async fn find_deposit_by_tx_hash(
        &self,
        source_tx_hash: &str,
    ) -> Result<Option<Deposit>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .deposits
            .iter()
            .find(|d| d.source_tx_hash == source_tx_hash)
            .cloned())
    }

    async fn list_deposits(&self, status: DepositStatus) -> Result<Vec<Deposit>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .deposits
            .iter()
            .filter(|d| d.status == status)
            .cloned()
            .collect())
    }

    async fn list_deposits_by_user(
        &self,
        user_address: &str,
    ) -> Result<Vec<Deposit>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .deposits
            .iter()
            .rev()
            .filter(|d| d.user_address.eq_ignore_ascii_case(user_address))
            .cloned()
            .collect())
    }

    async fn update_deposit(
        &self,
        id: Uuid,
        expected: DepositStatus,
        update: DepositUpdate,
    ) -> Result<Deposit, StoreError> {
        let mut state = self.state.lock().await;
        if state.take_fault(&Fault::FailUpdateDeposit(id)) {
            return Err(StoreError::Unavailable("injected update_deposit failure".into()));
        }
        let (idx, staged) = state.stage_deposit(id, expected, &update)?;
        state.deposits[idx] = staged.clone();
        Ok(staged)
    }

    async fn create_withdrawal(
        &self,
        deposit_id: Uuid,
        expected: DepositStatus,
        destination_tx_id: &str,
    ) -> Result<Withdrawal, StoreError> {
        let mut state = self.state.lock().await;
        if state.take_fault(&Fault::FailCreateWithdrawal(deposit_id)) {
            return Err(StoreError::Unavailable(
                "injected create_withdrawal failure".into(),
            ));
        }
        let update = if expected == DepositStatus::WithdrawRequested {
            DepositUpdate::default()
        } else {
            DepositUpdate::status(DepositStatus::WithdrawRequested)
        };
        let (idx, staged) = state.stage_deposit(deposit_id, expected, &update)?;
        if state
            .withdrawals
            .iter()
            .any(|w| w.deposit_id == deposit_id && w.status.is_active())
        {
            return Err(StoreError::Duplicate(format!(
                "active withdrawal for deposit {deposit_id}"
            )));
        }
        let withdrawal = Withdrawal::pending(deposit_id, destination_tx_id, Utc::now());
        state.deposits[idx] = staged;
        state.withdrawals.push(withdrawal.clone());
        Ok(withdrawal)
    }

    async fn find_active_withdrawal(
        &self,
        deposit_id: Uuid,
    ) -> Result<Option<Withdrawal>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .withdrawals
            .iter()
            .find(|w| w.deposit_id == deposit_id && w.status.is_active())
            .cloned())
    }

    async fn list_withdrawals(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalWithDeposit>, StoreError> {
        let state = self.state.lock().await;
        state
            .withdrawals
            .iter()
            .filter(|w| w.status == status)
            .map(|w| state.join(w))
            .collect()
    }

    async fn list_withdrawals_by_user(
        &self,
        user_address: &str,
    ) -> Result<Vec<WithdrawalWithDeposit>, StoreError> {
        let state = self.state.lock().await;
        let mut joined = Vec::new();
        for withdrawal in state.withdrawals.iter().rev() {
            let item = state.join(withdrawal)?;
            if item.deposit.user_address.eq_ignore_ascii_case(user_address) {
                joined.push(item);
            }
        }
        Ok(joined)
    }

    async fn update_withdrawal(
        &self,
        id: Uuid,
        expected: WithdrawalStatus,
        update: WithdrawalUpdate,
    ) -> Result<Withdrawal, StoreError> {
        let mut state = self.state.lock().await;
        let (idx, staged) = state.stage_withdrawal(id, expected, &update)?;
        state.withdrawals[idx] = staged.clone();
        Ok(staged)
    }

    async fn update_withdrawal_and_deposit(
        &self,
        pair: PairUpdate,
    ) -> Result<(Withdrawal, Deposit), StoreError> {
        let mut state = self.state.lock().await;
        let (w_idx, withdrawal) =
            state.stage_withdrawal(pair.withdrawal_id, pair.withdrawal_expected, &pair.withdrawal)?;
        if state.take_fault(&Fault::InterruptPairUpdate) {
            // staged copies are discarded, nothing was written
            return Err(StoreError::Unavailable(
                "injected failure between withdrawal and deposit writes".into(),
            ));
        }
        let (d_idx, deposit) =
            state.stage_deposit(pair.deposit_id, pair.deposit_expected, &pair.deposit)?;
        state.withdrawals[w_idx] = withdrawal.clone();
        state.deposits[d_idx] = deposit.clone();
        Ok((withdrawal, deposit))
    }

    async fn get_cursor(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.state.lock().await.cursors.get(key).copied())
    }

    async fn set_cursor(&self, key: &str, block: u64) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .cursors
            .insert(key.to_string(), block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::FeeSchedule;

    fn new_deposit(tx: &str) -> NewDeposit {
        NewDeposit {
            source_tx_hash: tx.to_string(),
            source_block: 10,
            user_address: "0xAbC".to_string(),
            destination_address: "ST000000000000000000002AMW42H".to_string(),
            amounts: FeeSchedule::default().split(1_000_000).unwrap(),
        }
    }

    #[tokio::test]
    async fn duplicate_tx_hash_is_rejected() {
        let store = MemoryStore::new();
        store.create_deposit(new_deposit("0x01")).await.unwrap();
        let err = store.create_deposit(new_deposit("0x01")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.deposits().await.len(), 1);
    }

    #[tokio::test]
    async fn stale_status_loses_check_and_set() {
        let store = MemoryStore::new();
        let deposit = store.create_deposit(new_deposit("0x02")).await.unwrap();
        store
            .update_deposit(deposit.id, DepositStatus::Received, DepositUpdate::stacked(Utc::now()))
            .await
            .unwrap();

        let err = store
            .update_deposit(deposit.id, DepositStatus::Received, DepositUpdate::stacked(Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn illegal_transition_is_refused() {
        let store = MemoryStore::new();
        let deposit = store.create_deposit(new_deposit("0x03")).await.unwrap();
        let err = store
            .update_deposit(
                deposit.id,
                DepositStatus::Received,
                DepositUpdate::withdrawn(Utc::now()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(
            store.find_deposit(deposit.id).await.unwrap().unwrap().status,
            DepositStatus::Received
        );
    }

    #[tokio::test]
    async fn only_one_active_withdrawal_per_deposit() {
        let store = MemoryStore::new();
        let deposit = store.create_deposit(new_deposit("0x04")).await.unwrap();
        store
            .update_deposit(deposit.id, DepositStatus::Received, DepositUpdate::stacked(Utc::now()))
            .await
            .unwrap();
        let first = store
            .create_withdrawal(deposit.id, DepositStatus::Stacked, "0xunstake1")
            .await
            .unwrap();

        let err = store
            .create_withdrawal(deposit.id, DepositStatus::WithdrawRequested, "0xunstake2")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        store
            .update_withdrawal(first.id, WithdrawalStatus::Pending, WithdrawalUpdate::failed())
            .await
            .unwrap();
        store
            .create_withdrawal(deposit.id, DepositStatus::WithdrawRequested, "0xunstake2")
            .await
            .unwrap();
        assert_eq!(store.withdrawals().await.len(), 2);
    }
}
