#[path = "utils.rs"]
mod utils;

use chrono::Utc;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use stackyield_sequencer::chain::GatewayDepositState;
use stackyield_sequencer::db::{DepositUpdate, MemoryStore, StateStore, WithdrawalUpdate};
use stackyield_sequencer::lifecycle::{DepositStatus, ItemOutcome, WithdrawalStatus};
use stackyield_sequencer::reconcile::{ReconcileError, Reconciler};
use utils::{
    deposit, memory_store, on_chain_id, seed_pending_withdrawal, seed_received, withdrawal,
    MockSource,
};

fn gateway(state: GatewayDepositState) -> MockSource {
    let mut source = MockSource::new();
    source
        .expect_deposit_id_from_receipt()
        .returning(|_| Ok(on_chain_id(1)));
    source.expect_gateway_state().returning(move |_| Ok(state));
    source.expect_submit().times(0);
    source
}

fn reconciler(store: Arc<MemoryStore>, source: MockSource) -> Reconciler {
    Reconciler::new(store, Arc::new(source))
}

async fn seed_claimed(store: &MemoryStore, tx_hash: &str) -> uuid::Uuid {
    let seeded = seed_received(store, tx_hash).await;
    store
        .update_deposit(
            seeded.id,
            DepositStatus::Received,
            DepositUpdate::claim_bridge(Utc::now()),
        )
        .await
        .unwrap();
    seeded.id
}

#[tokio::test]
async fn test_bridged_gateway_settles_claimed_deposit() {
    let store = memory_store();
    let id = seed_claimed(&store, "0xA").await;

    let report = reconciler(
        store.clone(),
        gateway(GatewayDepositState {
            bridged: true,
            released: false,
        }),
    )
    .sweep()
    .await
    .unwrap();

    assert_eq!(report.deposits.outcome_of(id), Some(&ItemOutcome::Advanced));
    assert_eq!(deposit(&store, id).await.status, DepositStatus::Stacked);
}

#[tokio::test]
async fn test_unbridged_gateway_leaves_claim_for_operator() {
    let store = memory_store();
    let id = seed_claimed(&store, "0xA").await;

    let report = reconciler(store.clone(), gateway(GatewayDepositState::default()))
        .sweep()
        .await
        .unwrap();

    assert_eq!(report.deposits.needs_reconciliation(), 1);
    let stored = deposit(&store, id).await;
    assert_eq!(stored.status, DepositStatus::Received);
    assert!(stored.bridge_attempted_at.is_some());
}

#[tokio::test]
async fn test_sweep_ignores_untouched_records() {
    let store = memory_store();
    seed_received(&store, "0xA").await;
    seed_pending_withdrawal(&store, "0xB", "0xunstake").await;

    let mut source = MockSource::new();
    source.expect_deposit_id_from_receipt().times(0);
    source.expect_gateway_state().times(0);

    let report = reconciler(store, source).sweep().await.unwrap();

    assert!(report.deposits.is_empty());
    assert!(report.withdrawals.is_empty());
}

#[tokio::test]
async fn test_released_gateway_completes_claimed_withdrawal() {
    let store = memory_store();
    let (seeded_deposit, seeded) = seed_pending_withdrawal(&store, "0xA", "0xB").await;
    store
        .update_withdrawal(
            seeded.id,
            WithdrawalStatus::Pending,
            WithdrawalUpdate::claim_release(Utc::now()),
        )
        .await
        .unwrap();

    let report = reconciler(
        store.clone(),
        gateway(GatewayDepositState {
            bridged: true,
            released: true,
        }),
    )
    .sweep()
    .await
    .unwrap();

    assert_eq!(report.withdrawals.advanced(), 1);
    let w = withdrawal(&store, seeded.id).await;
    assert_eq!(w.status, WithdrawalStatus::Completed);
    assert_eq!(w.release_tx_hash, None);
    assert_eq!(
        deposit(&store, seeded_deposit.id).await.status,
        DepositStatus::Withdrawn
    );
}

#[tokio::test]
async fn test_clear_bridge_claim() {
    let store = memory_store();
    let id = seed_claimed(&store, "0xA").await;

    let cleared = reconciler(store.clone(), MockSource::new())
        .clear_bridge_claim(id)
        .await
        .unwrap();

    assert_eq!(cleared.bridge_attempted_at, None);
    assert_eq!(cleared.status, DepositStatus::Received);
}

#[tokio::test]
async fn test_clear_bridge_claim_refuses_recorded_stake() {
    let store = memory_store();
    let id = seed_claimed(&store, "0xA").await;
    store
        .update_deposit(
            id,
            DepositStatus::Received,
            DepositUpdate::stake_submitted("0xstake"),
        )
        .await
        .unwrap();

    let err = reconciler(store.clone(), MockSource::new())
        .clear_bridge_claim(id)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::StakeRecorded(_)));
    assert!(deposit(&store, id).await.bridge_attempted_at.is_some());
}

#[tokio::test]
async fn test_clear_release_claim() {
    let store = memory_store();
    let (_, seeded) = seed_pending_withdrawal(&store, "0xA", "0xB").await;
    store
        .update_withdrawal(
            seeded.id,
            WithdrawalStatus::Pending,
            WithdrawalUpdate::claim_release(Utc::now()),
        )
        .await
        .unwrap();

    reconciler(store.clone(), MockSource::new())
        .clear_release_claim(seeded.id)
        .await
        .unwrap();

    assert_eq!(withdrawal(&store, seeded.id).await.release_attempted_at, None);
}
