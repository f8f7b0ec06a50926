//! QA scenarios driven through the public API only: config from YAML,
//! scripted chains, in-memory ledger.

#![cfg(feature = "mock-chain")]

use std::sync::Arc;
use std::time::Duration;

use nft_bridge::bridge::{
    MemoryLedger, MemorySink, RecoveryScanner, TransferEventKind, TransferLedger,
    TransferOrchestrator, TransferPool, TransferStage, WorkerConfig,
};
use nft_bridge::chain::mock::MockChainClient;
use nft_bridge::chain::{ContractCall, FeeEstimate};
use nft_bridge::config::AppConfig;
use nft_bridge::{AssetId, BridgeError};

const QA_CONFIG: &str = r#"
log_level: "info"
log_dir: "./logs"
log_file: "qa.log"
use_json: false
rotation: "never"
bridge:
  confirmation_timeout_ms: 50
  max_concurrent_transfers: 2
  retry:
    max_attempts: 3
    base_backoff_ms: 1
    max_backoff_ms: 5
  source:
    chain_id: "polygon"
    native_symbol: "MATIC"
    rpc:
      url: "http://127.0.0.1:8545"
    contract_address: "0xA90CeD32E40A95725C943D5392F862aEBf3C7928"
    signer_address: "0x00000000000000000000000000000000000000a1"
    required_confirmations: 1
  destination:
    chain_id: "sepolia"
    native_symbol: "ETH"
    rpc:
      url: "http://127.0.0.1:8546"
    contract_address: "0x064E7B51564504a95C262eD136547EF43e9973b4"
    signer_address: "0x00000000000000000000000000000000000000a1"
    required_confirmations: 1
"#;

struct Relay {
    source: Arc<MockChainClient>,
    destination: Arc<MockChainClient>,
    ledger: Arc<MemoryLedger>,
    sink: Arc<MemorySink>,
    orchestrator: Arc<TransferOrchestrator>,
    config: AppConfig,
}

fn relay_over(
    source: Arc<MockChainClient>,
    destination: Arc<MockChainClient>,
    ledger: Arc<MemoryLedger>,
) -> Relay {
    let config = AppConfig::from_yaml(QA_CONFIG).expect("QA config must parse");
    let sink = Arc::new(MemorySink::new());
    let orchestrator = TransferOrchestrator::new(
        ledger.clone(),
        source.clone(),
        destination.clone(),
        &config.bridge,
    )
    .with_event_sink(sink.clone());

    Relay {
        source,
        destination,
        ledger,
        sink,
        orchestrator: Arc::new(orchestrator),
        config,
    }
}

fn relay() -> Relay {
    let source = Arc::new(MockChainClient::new("polygon"));
    source.set_lock_proof("0xabc", "ipfs://xyz");
    relay_over(
        source,
        Arc::new(MockChainClient::new("sepolia")),
        Arc::new(MemoryLedger::new()),
    )
}

#[tokio::test]
async fn qa_tc_bridge_asset_42_end_to_end() {
    let r = relay();

    let record = r.orchestrator.transfer(AssetId::new(42)).await.unwrap();

    assert_eq!(record.stage, TransferStage::MintConfirmed);
    assert_eq!(record.owner_address.as_deref(), Some("0xabc"));
    assert_eq!(record.token_uri.as_deref(), Some("ipfs://xyz"));
    assert_eq!(
        r.destination.submitted_calls(),
        vec![ContractCall::Mint {
            owner: "0xabc".into(),
            asset_id: AssetId::new(42),
            token_uri: "ipfs://xyz".into(),
        }]
    );
    assert_eq!(r.orchestrator.status(AssetId::new(42)).await.unwrap(), record);
}

#[tokio::test]
async fn qa_tc_missing_lock_event_never_mints() {
    let r = relay_over(
        Arc::new(MockChainClient::new("polygon")),
        Arc::new(MockChainClient::new("sepolia")),
        Arc::new(MemoryLedger::new()),
    );

    let record = r.orchestrator.transfer(AssetId::new(42)).await.unwrap();

    assert_eq!(record.stage, TransferStage::Failed);
    let last_error = record.last_error.unwrap_or_default();
    assert!(last_error.starts_with("PROOF_NOT_FOUND"), "{}", last_error);
    assert_eq!(r.destination.submit_count(), 0);
}

#[tokio::test]
async fn qa_tc_mint_timeouts_exhaust_budget_of_three() {
    let r = relay();
    assert_eq!(r.config.bridge.retry.max_attempts, 3);
    r.destination.set_confirmation_delay(Duration::from_secs(10));

    let record = r.orchestrator.transfer(AssetId::new(42)).await.unwrap();

    assert_eq!(record.stage, TransferStage::Failed);
    assert_eq!(record.attempts, 3);
    let last_error = record.last_error.unwrap_or_default();
    assert!(
        last_error.starts_with("RETRY_BUDGET_EXHAUSTED"),
        "{}",
        last_error
    );

    let failed = r
        .sink
        .events_for(AssetId::new(42))
        .into_iter()
        .filter(|e| e.kind == TransferEventKind::Failed)
        .count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn qa_tc_duplicate_request_is_rejected() {
    let r = relay();
    r.source.set_confirmation_delay(Duration::from_millis(20));

    let (a, b) = tokio::join!(
        r.orchestrator.transfer(AssetId::new(7)),
        r.orchestrator.transfer(AssetId::new(7))
    );

    let rejected = [&a, &b]
        .iter()
        .filter(|res| matches!(res, Err(BridgeError::AlreadyInFlight(_))))
        .count();
    assert_eq!(rejected, 1);
    assert_eq!(r.destination.submit_count(), 1);
}

#[tokio::test]
async fn qa_tc_completed_transfer_is_not_repeated() {
    let r = relay();
    let done = r.orchestrator.transfer(AssetId::new(5)).await.unwrap();
    let before = r.source.call_count() + r.destination.call_count();

    let again = r.orchestrator.transfer(AssetId::new(5)).await.unwrap();

    assert_eq!(again, done);
    assert_eq!(r.source.call_count() + r.destination.call_count(), before);
}

#[tokio::test]
async fn qa_tc_fee_above_ceiling_aborts_before_submission() {
    let r = relay();
    r.source
        .set_default_fee(FeeEstimate::new(1_000_000, 1_000_000_000_000));

    let record = r.orchestrator.transfer(AssetId::new(3)).await.unwrap();

    assert_eq!(record.stage, TransferStage::Failed);
    assert!(
        record
            .last_error
            .as_deref()
            .is_some_and(|e| e.starts_with("FEE_TOO_HIGH"))
    );
    assert_eq!(r.source.submit_count(), 0);
    assert!(record.lock_tx.is_none());
}

#[tokio::test]
async fn qa_tc_restart_resumes_from_persisted_stage() {
    let first = relay();
    first.ledger.create(AssetId::new(77)).await.unwrap();
    first.orchestrator.step(AssetId::new(77)).await.unwrap();
    first.orchestrator.step(AssetId::new(77)).await.unwrap();
    first.orchestrator.step(AssetId::new(77)).await.unwrap();
    assert_eq!(
        first.ledger.load(AssetId::new(77)).await.unwrap().stage,
        TransferStage::ProofExtracted
    );

    // Process restart over the same ledger and chains
    let second = relay_over(
        first.source.clone(),
        first.destination.clone(),
        first.ledger.clone(),
    );
    let pool = Arc::new(TransferPool::new(
        second.orchestrator.clone(),
        second.config.bridge.max_concurrent_transfers,
    ));
    let scanner = RecoveryScanner::new(pool, WorkerConfig::from(&second.config.bridge.recovery));

    let report = scanner.recover_once().await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(first.source.submit_count(), 1);
    assert_eq!(first.destination.submit_count(), 1);
    assert!(
        second
            .sink
            .events()
            .iter()
            .all(|e| e.stage.id() >= TransferStage::MintSubmitted.id())
    );
}

#[tokio::test]
async fn qa_tc_pool_bridges_many_assets() {
    let r = relay();
    let pool = TransferPool::new(
        r.orchestrator.clone(),
        r.config.bridge.max_concurrent_transfers,
    );

    let outcomes = pool.transfer_all((100..110).map(AssetId::new)).await;

    assert_eq!(outcomes.len(), 10);
    for (asset_id, outcome) in outcomes {
        let record = outcome.unwrap();
        assert_eq!(record.asset_id, asset_id);
        assert_eq!(record.stage, TransferStage::MintConfirmed);
    }
    assert!(r.ledger.list_non_terminal().await.unwrap().is_empty());
}
