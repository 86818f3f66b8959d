//! Runs against a real Postgres. Set DATABASE_URL and use
//! `cargo test --test pg_store -- --ignored`.

#[path = "utils.rs"]
mod utils;

use chrono::Utc;
use dotenv::dotenv;
use pretty_assertions::assert_eq;
use stackyield_sequencer::db::{
    DBClient, DepositUpdate, PairUpdate, PgStateStore, StateStore, StoreError,
};
use stackyield_sequencer::lifecycle::{DepositStatus, WithdrawalStatus};
use utils::{create_test_config, new_deposit};
use uuid::Uuid;

async fn setup_store() -> PgStateStore {
    dotenv().ok();
    let db = DBClient::new(&create_test_config())
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");
    db.state_store()
}

fn unique_tx() -> String {
    format!("0x{}", Uuid::new_v4().simple())
}

async fn stacked_deposit(store: &PgStateStore) -> Uuid {
    let deposit = store
        .create_deposit(new_deposit(&unique_tx(), 1_000_000))
        .await
        .unwrap();
    store
        .update_deposit(
            deposit.id,
            DepositStatus::Received,
            DepositUpdate::stacked(Utc::now()),
        )
        .await
        .unwrap();
    deposit.id
}

#[tokio::test]
#[ignore]
async fn test_deposit_round_trip_and_duplicate() {
    let store = setup_store().await;
    let tx = unique_tx();

    let created = store.create_deposit(new_deposit(&tx, 1_000_000)).await.unwrap();
    let found = store.find_deposit_by_tx_hash(&tx).await.unwrap().unwrap();

    assert_eq!(found.id, created.id);
    assert_eq!(found.net_amount, 998_000);
    assert_eq!(found.status, DepositStatus::Received);
    assert!(matches!(
        store.create_deposit(new_deposit(&tx, 1_000_000)).await,
        Err(StoreError::Duplicate(_))
    ));
}

#[tokio::test]
#[ignore]
async fn test_stale_update_conflicts() {
    let store = setup_store().await;
    let id = stacked_deposit(&store).await;

    let err = store
        .update_deposit(id, DepositStatus::Received, DepositUpdate::stacked(Utc::now()))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Conflict { .. }));
}

#[tokio::test]
#[ignore]
async fn test_one_active_withdrawal_per_deposit() {
    let store = setup_store().await;
    let id = stacked_deposit(&store).await;

    store
        .create_withdrawal(id, DepositStatus::Stacked, "0xunstake")
        .await
        .unwrap();
    let err = store
        .create_withdrawal(id, DepositStatus::WithdrawRequested, "0xunstake2")
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Duplicate(_)));
}

#[tokio::test]
#[ignore]
async fn test_pair_update_rolls_back_on_missing_deposit() {
    let store = setup_store().await;
    let id = stacked_deposit(&store).await;
    let withdrawal = store
        .create_withdrawal(id, DepositStatus::Stacked, "0xunstake")
        .await
        .unwrap();

    let bogus = PairUpdate::complete(withdrawal.id, Uuid::new_v4(), None, Utc::now());
    let err = store.update_withdrawal_and_deposit(bogus).await.unwrap_err();

    assert!(matches!(err, StoreError::NotFound { .. }));
    let active = store.find_active_withdrawal(id).await.unwrap().unwrap();
    assert_eq!(active.status, WithdrawalStatus::Pending);

    let pair = PairUpdate::complete(withdrawal.id, id, Some("0xrelease".into()), Utc::now());
    let (w, d) = store.update_withdrawal_and_deposit(pair).await.unwrap();
    assert_eq!(w.status, WithdrawalStatus::Completed);
    assert_eq!(d.status, DepositStatus::Withdrawn);
}

#[tokio::test]
#[ignore]
async fn test_cursor_upsert() {
    let store = setup_store().await;
    let key = format!("test_cursor_{}", Uuid::new_v4().simple());

    assert_eq!(store.get_cursor(&key).await.unwrap(), None);
    store.set_cursor(&key, 100).await.unwrap();
    store.set_cursor(&key, 120).await.unwrap();
    assert_eq!(store.get_cursor(&key).await.unwrap(), Some(120));
}
