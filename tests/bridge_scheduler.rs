#[path = "utils.rs"]
mod utils;

use chrono::Utc;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use stackyield_sequencer::chain::{
    ChainError, GatewayAction, GatewayDepositState, StakingAction,
};
use stackyield_sequencer::db::{DepositUpdate, MemoryStore, StateStore};
use stackyield_sequencer::lifecycle::{DepositStatus, FailureKind, ItemOutcome};
use stackyield_sequencer::queue::BridgeQueue;
use utils::{
    deposit, memory_store, on_chain_id, seed_received, stacks_address, MockDestination,
    MockSource,
};

fn queue(store: Arc<MemoryStore>, source: MockSource, destination: MockDestination) -> BridgeQueue {
    BridgeQueue::new(store, Arc::new(source), Arc::new(destination))
}

/// Gateway side of a successful bridge: receipt lookup, not yet bridged,
/// `markDepositBridged` accepted.
fn bridging_source() -> MockSource {
    let mut source = MockSource::new();
    source
        .expect_deposit_id_from_receipt()
        .returning(|_| Ok(on_chain_id(1)));
    source
        .expect_gateway_state()
        .returning(|_| Ok(GatewayDepositState::default()));
    source
        .expect_submit()
        .withf(|action, id| *action == GatewayAction::MarkBridged && *id == on_chain_id(1))
        .returning(|_, _| Ok("0xmark".to_string()));
    source
}

#[tokio::test]
async fn test_received_deposit_is_stacked() {
    let store = memory_store();
    let seeded = seed_received(&store, "0xA").await;

    let mut destination = MockDestination::new();
    let expected_address = stacks_address(0x22);
    destination
        .expect_submit()
        .withf(move |action, amount, address| {
            *action == StakingAction::Stake && *amount == 998_000 && address == expected_address
        })
        .times(1)
        .returning(|_, _, _| Ok("0xstake".to_string()));

    let queue = queue(store.clone(), bridging_source(), destination);
    let report = queue.process_received_deposits().await.unwrap();

    assert_eq!(report.outcome_of(seeded.id), Some(&ItemOutcome::Advanced));
    let stored = deposit(&store, seeded.id).await;
    assert_eq!(stored.status, DepositStatus::Stacked);
    assert_eq!(stored.stake_tx_id.as_deref(), Some("0xstake"));
    assert!(stored.stacked_at.is_some());
}

#[tokio::test]
async fn test_recorded_stake_is_not_resubmitted() {
    let store = memory_store();
    let seeded = seed_received(&store, "0xA").await;
    store
        .update_deposit(
            seeded.id,
            DepositStatus::Received,
            DepositUpdate::claim_bridge(Utc::now()),
        )
        .await
        .unwrap();
    store
        .update_deposit(
            seeded.id,
            DepositStatus::Received,
            DepositUpdate::stake_submitted("0xstake"),
        )
        .await
        .unwrap();

    let mut destination = MockDestination::new();
    destination.expect_submit().times(0);

    let queue = queue(store.clone(), bridging_source(), destination);
    let report = queue.process_received_deposits().await.unwrap();

    assert_eq!(report.advanced(), 1);
    assert_eq!(deposit(&store, seeded.id).await.status, DepositStatus::Stacked);
}

#[tokio::test]
async fn test_claim_without_stake_tx_needs_reconciliation() {
    let store = memory_store();
    let seeded = seed_received(&store, "0xA").await;
    store
        .update_deposit(
            seeded.id,
            DepositStatus::Received,
            DepositUpdate::claim_bridge(Utc::now()),
        )
        .await
        .unwrap();

    let mut source = MockSource::new();
    source.expect_submit().times(0);
    let mut destination = MockDestination::new();
    destination.expect_submit().times(0);

    let queue = queue(store.clone(), source, destination);
    let report = queue.process_received_deposits().await.unwrap();

    assert_eq!(report.needs_reconciliation(), 1);
    assert_eq!(deposit(&store, seeded.id).await.status, DepositStatus::Received);
}

#[tokio::test]
async fn test_rejected_stake_releases_claim() {
    let store = memory_store();
    let seeded = seed_received(&store, "0xA").await;

    let mut destination = MockDestination::new();
    destination
        .expect_submit()
        .times(1)
        .returning(|_, _, _| Err(ChainError::Rejected("nonce lookup failed".into())));

    let queue = queue(store.clone(), MockSource::new(), destination);
    let report = queue.process_received_deposits().await.unwrap();

    assert!(matches!(
        report.outcome_of(seeded.id),
        Some(ItemOutcome::Failed {
            kind: FailureKind::Transient,
            ..
        })
    ));
    let stored = deposit(&store, seeded.id).await;
    assert_eq!(stored.status, DepositStatus::Received);
    assert_eq!(stored.bridge_attempted_at, None);
    assert_eq!(stored.stake_tx_id, None);
}

#[tokio::test]
async fn test_already_bridged_gateway_is_not_marked_again() {
    let store = memory_store();
    let seeded = seed_received(&store, "0xA").await;

    let mut source = MockSource::new();
    source
        .expect_deposit_id_from_receipt()
        .returning(|_| Ok(on_chain_id(1)));
    source.expect_gateway_state().returning(|_| {
        Ok(GatewayDepositState {
            bridged: true,
            released: false,
        })
    });
    source.expect_submit().times(0);

    let mut destination = MockDestination::new();
    destination
        .expect_submit()
        .returning(|_, _, _| Ok("0xstake".to_string()));

    let queue = queue(store.clone(), source, destination);
    let report = queue.process_received_deposits().await.unwrap();

    assert_eq!(report.advanced(), 1);
    assert_eq!(deposit(&store, seeded.id).await.status, DepositStatus::Stacked);
}

#[tokio::test]
async fn test_mark_bridged_failure_resumes_without_restaking() {
    let store = memory_store();
    let seeded = seed_received(&store, "0xA").await;

    let mut source = MockSource::new();
    source
        .expect_deposit_id_from_receipt()
        .returning(|_| Ok(on_chain_id(1)));
    source
        .expect_gateway_state()
        .returning(|_| Ok(GatewayDepositState::default()));
    let mut attempts = 0;
    source.expect_submit().times(2).returning(move |_, _| {
        attempts += 1;
        if attempts == 1 {
            Err(ChainError::Rpc("timeout".into()))
        } else {
            Ok("0xmark".to_string())
        }
    });

    let mut destination = MockDestination::new();
    destination
        .expect_submit()
        .times(1)
        .returning(|_, _, _| Ok("0xstake".to_string()));

    let queue = queue(store.clone(), source, destination);

    let first = queue.process_received_deposits().await.unwrap();
    assert_eq!(first.failed(), 1);
    let stored = deposit(&store, seeded.id).await;
    assert_eq!(stored.status, DepositStatus::Received);
    assert_eq!(stored.stake_tx_id.as_deref(), Some("0xstake"));

    let second = queue.process_received_deposits().await.unwrap();
    assert_eq!(second.advanced(), 1);
    assert_eq!(deposit(&store, seeded.id).await.status, DepositStatus::Stacked);
}

#[tokio::test]
async fn test_failing_deposit_does_not_block_others() {
    let store = memory_store();
    let first = seed_received(&store, "0xA").await;
    let second = seed_received(&store, "0xB").await;

    let mut destination = MockDestination::new();
    let mut calls = 0;
    destination.expect_submit().times(2).returning(move |_, _, _| {
        calls += 1;
        if calls == 1 {
            Err(ChainError::Rpc("connection dropped after send".into()))
        } else {
            Ok("0xstake-b".to_string())
        }
    });

    let queue = queue(store.clone(), bridging_source(), destination);
    let report = queue.process_received_deposits().await.unwrap();

    assert!(matches!(
        report.outcome_of(first.id),
        Some(ItemOutcome::Failed { .. })
    ));
    assert_eq!(report.outcome_of(second.id), Some(&ItemOutcome::Advanced));
    assert_eq!(deposit(&store, second.id).await.status, DepositStatus::Stacked);

    // the ambiguous stake keeps its claim and is held back on the next tick
    let held = deposit(&store, first.id).await;
    assert!(held.bridge_attempted_at.is_some());
    let report = queue.process_received_deposits().await.unwrap();
    assert!(matches!(
        report.outcome_of(first.id),
        Some(ItemOutcome::NeedsReconciliation(_))
    ));
}
