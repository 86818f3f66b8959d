#[path = "utils.rs"]
mod utils;

use mockito::{mock, Matcher};
use pretty_assertions::assert_eq;
use stackyield_sequencer::chain::{
    ChainError, DestinationChain, StacksClient, StakingAction, TxStatus,
};
use stackyield_sequencer::config::StacksConfig;
use utils::{create_test_config, stacks_address};

const TEST_KEY: &str = "e9873d79c6d87dc0fb6a5778633389f4453213303da61f20bd67fc233aa33262";

fn stacks_config(sender_fill: u8) -> StacksConfig {
    StacksConfig {
        api_url: mockito::server_url(),
        sender_address: stacks_address(sender_fill),
        ..create_test_config().stacks
    }
}

fn client(sender_fill: u8) -> StacksClient {
    StacksClient::with_private_key(&stacks_config(sender_fill), TEST_KEY).unwrap()
}

#[tokio::test]
async fn test_tip_height() {
    let _m = mock("GET", "/v2/info")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"stacks_tip_height": 1234, "burn_block_height": 800000}"#)
        .create();

    assert_eq!(client(0x33).tip_height().await.unwrap(), 1234);
}

#[tokio::test]
async fn test_unknown_transaction_is_pending() {
    let _m = mock("GET", "/extended/v1/tx/0xunknown")
        .with_status(404)
        .create();

    let status = client(0x33).transaction_status("0xunknown").await.unwrap();

    assert_eq!(status, TxStatus::Pending);
}

#[tokio::test]
async fn test_transaction_status_is_mapped() {
    let _ok = mock("GET", "/extended/v1/tx/0xconfirmed")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"tx_id": "0xconfirmed", "tx_status": "success"}"#)
        .create();
    let _aborted = mock("GET", "/extended/v1/tx/0xaborted")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"tx_id": "0xaborted", "tx_status": "abort_by_response"}"#)
        .create();

    let client = client(0x33);

    assert_eq!(
        client.transaction_status("0xconfirmed").await.unwrap(),
        TxStatus::Success
    );
    assert_eq!(
        client.transaction_status("0xaborted").await.unwrap(),
        TxStatus::Failed("abort_by_response".to_string())
    );
}

#[tokio::test]
async fn test_node_error_on_status_is_transient() {
    let _m = mock("GET", "/extended/v1/tx/0xflaky")
        .with_status(503)
        .create();

    let err = client(0x33).transaction_status("0xflaky").await.unwrap_err();

    assert!(matches!(err, ChainError::Rpc(_)));
    assert!(err.is_transient());
}

// All broadcast cases share the /v2/transactions mock path, so they run in
// one test with each mock dropped before the next is created.
#[tokio::test]
async fn test_submit_signs_and_broadcasts() {
    let sender = stacks_address(0x44);
    let nonce = mock("GET", format!("/extended/v1/address/{sender}/nonces").as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"possible_next_nonce": 7, "last_executed_tx_nonce": 6}"#)
        .expect(2)
        .create();

    {
        let broadcast = mock("POST", "/v2/transactions")
            .match_header("content-type", "application/octet-stream")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#""0xabc123""#)
            .create();

        let tx_id = client(0x44)
            .submit(StakingAction::Stake, 998_000, &stacks_address(0x22))
            .await
            .unwrap();

        assert_eq!(tx_id, "0xabc123");
        broadcast.assert();
    }

    {
        let _rejected = mock("POST", "/v2/transactions")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "transaction rejected", "reason": "NotEnoughFunds"}"#)
            .create();

        let err = client(0x44)
            .submit(StakingAction::Unstake, 998_000, &stacks_address(0x22))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ChainError::Rejected("transaction rejected: NotEnoughFunds".to_string())
        );
    }
    nonce.assert();

    // nodes without the extended API only expose the account nonce
    let sender = stacks_address(0x55);
    let _extended = mock("GET", format!("/extended/v1/address/{sender}/nonces").as_str())
        .with_status(404)
        .create();
    let account = mock("GET", Matcher::Regex(format!("^/v2/accounts/{sender}")))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"balance": "0x0", "nonce": 3}"#)
        .create();
    let _broadcast = mock("POST", "/v2/transactions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#""0xdef456""#)
        .create();

    let tx_id = client(0x55)
        .submit(StakingAction::Stake, 1_000, &stacks_address(0x22))
        .await
        .unwrap();

    assert_eq!(tx_id, "0xdef456");
    account.assert();
}

#[tokio::test]
async fn test_invalid_destination_is_rejected_before_broadcast() {
    let sender = stacks_address(0x66);
    let _nonce = mock("GET", format!("/extended/v1/address/{sender}/nonces").as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"possible_next_nonce": 0}"#)
        .create();

    let err = client(0x66)
        .submit(StakingAction::Stake, 1_000, "not-a-stacks-address")
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Rejected(_)));
}

#[test]
fn test_sender_on_wrong_network_is_a_config_error() {
    let config = StacksConfig {
        network: "mainnet".to_string(),
        ..stacks_config(0x33)
    };

    let result = StacksClient::with_private_key(&config, TEST_KEY);

    assert!(matches!(result, Err(ChainError::Config(_))));
}
