//! End-to-end withdraw flows through the HTTP router, the gateway and the
//! transfer pipeline, against the in-memory chain.

use alloy_primitives::U256;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use yieldsim::api::{build_router, ApiState};
use yieldsim::chain::ChainProvider;
use yieldsim::engine::{ChainGateway, ProviderSource, StatusReporter, TransferSettings};
use yieldsim::ledger::scheduler::TickScheduler;
use yieldsim::ledger::{Ledger, LedgerParams, SECONDS_PER_YEAR};
use yieldsim::types::{ProtocolRate, TransferError, TransferRequest};

use crate::mock_chain::{Confirmation, MockChain};

/// Hardhat account #0.
const SIGNER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
/// Hardhat account #1.
const DEST: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

struct Harness {
    ledger: Arc<Ledger>,
    chain: Arc<MockChain>,
    gateway: Arc<ChainGateway>,
    router: Router,
}

/// Four strategies at 20% with a one-year period: each tick adds 20.0 per
/// strategy.
fn ledger_params() -> LedgerParams {
    LedgerParams {
        protocols: vec![ProtocolRate::new("alpha", 20.0)],
        strategy_count: 4,
        boost: 1.0,
        leverage: 1.0,
        yield_basis: 100.0,
        period: Duration::from_secs(SECONDS_PER_YEAR as u64),
    }
}

fn harness(chain: MockChain, settings: TransferSettings) -> Harness {
    let ledger = Arc::new(Ledger::new(&ledger_params()));
    let chain = Arc::new(chain);
    let provider: Arc<dyn ChainProvider> = chain.clone();
    let gateway = Arc::new(ChainGateway::new(
        ProviderSource::Static(provider),
        Some(SecretString::new(SIGNER_KEY.to_string())),
        Arc::clone(&ledger),
        settings,
        Some(DEST.to_string()),
    ));
    let state = Arc::new(ApiState {
        reporter: StatusReporter::new(Arc::clone(&ledger), Arc::clone(&gateway), 50),
        gateway: Arc::clone(&gateway),
        auth_token: None,
    });
    let router = build_router(state, Duration::from_secs(5));

    Harness {
        ledger,
        chain,
        gateway,
        router,
    }
}

fn post(uri: &str, json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn total(ledger: &Ledger) -> f64 {
    ledger.snapshot(0).await.total_accumulated
}

#[tokio::test]
async fn test_invalid_destination_leaves_ledger_unchanged() {
    let h = harness(MockChain::with_ether(10), TransferSettings::default());
    h.ledger.tick().await;
    let before = total(&h.ledger).await;

    let (status, json) = send(
        &h.router,
        post("/withdraw", r#"{"destination":"not-an-address","amount":0.01}"#),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "invalid_request");
    assert_eq!(json["funds_may_have_moved"], false);
    assert_eq!(total(&h.ledger).await, before);
    assert!(h.chain.broadcasts().is_empty());
}

#[tokio::test]
async fn test_insufficient_funds_never_broadcasts() {
    let h = harness(
        MockChain::with_wei(U256::from(500_000_000_000_000_000u64)),
        TransferSettings::default(),
    );

    let body = format!(r#"{{"destination":"{DEST}","amount":1000}}"#);
    let (status, json) = send(&h.router, post("/withdraw", &body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "insufficient_funds");
    assert_eq!(json["stage"], "check_balance");
    assert_eq!(json["balance"], 0.5);
    assert!(h.chain.broadcasts().is_empty());
}

#[tokio::test]
async fn test_successful_withdraw_reconciles_ledger() {
    let h = harness(MockChain::with_ether(10), TransferSettings::default());
    h.ledger.tick().await;
    let before = h.ledger.snapshot(usize::MAX).await;
    assert!((before.total_accumulated - 80.0).abs() < 1e-9);

    let body = format!(r#"{{"destination":"{DEST}","amount":0.01}}"#);
    let (status, json) = send(&h.router, post("/withdraw", &body)).await;

    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["success"], true);
    assert_eq!(json["block_number"], 1_000);
    assert_eq!(json["reconciled"], true);
    assert_eq!(json["to"], DEST);
    assert_eq!(h.chain.broadcasts().len(), 1);

    // 0.01 ETH at 3450 per ETH, split across four strategies.
    let after = h.ledger.snapshot(usize::MAX).await;
    assert!((before.total_accumulated - after.total_accumulated - 34.5).abs() < 1e-9);
    for (b, a) in before.strategies.iter().zip(after.strategies.iter()) {
        assert!((b.accumulated_value - a.accumulated_value - 34.5 / 4.0).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_reconcile_clamps_when_ledger_is_small() {
    let h = harness(MockChain::with_ether(10), TransferSettings::default());
    // Nothing accrued yet: the transfer stands and the ledger stays at zero.
    let body = format!(r#"{{"to":"{DEST}","amountETH":"0.5"}}"#);
    let (status, json) = send(&h.router, post("/transfer", &body)).await;

    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["reconciled"], true);
    assert_eq!(total(&h.ledger).await, 0.0);
}

#[tokio::test]
async fn test_confirmation_timeout_returns_tx_id() {
    let chain = MockChain::with_ether(10);
    chain.set_confirmation(Confirmation::Never);
    let settings = TransferSettings {
        confirmation_timeout: Duration::from_millis(100),
        ..TransferSettings::default()
    };
    let h = harness(chain, settings);
    h.ledger.tick().await;
    let before = total(&h.ledger).await;

    let (status, json) = send(&h.router, post("/withdraw", r#"{"amount":0.01}"#)).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["kind"], "confirmation_timeout");
    assert_eq!(json["funds_may_have_moved"], true);
    let tx = json["transaction_id"].as_str().unwrap();
    assert_eq!(tx.len(), 66);
    assert_eq!(total(&h.ledger).await, before);
}

#[tokio::test]
async fn test_reverted_transfer_is_network_error() {
    let chain = MockChain::with_ether(10);
    chain.set_confirmation(Confirmation::Revert);
    let h = harness(chain, TransferSettings::default());

    let (status, json) = send(&h.router, post("/coinbase-withdraw", r#"{"amount":0.01}"#)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["kind"], "network_error");
    assert!(json["transaction_id"].is_string());
}

#[tokio::test]
async fn test_fee_outage_uses_default_price() {
    let chain = MockChain::with_ether(10);
    chain.set_gas_price(None);
    let h = harness(chain, TransferSettings::default());

    let result = tokio_test::assert_ok!(
        h.gateway
            .withdraw(&TransferRequest {
                destination: DEST.to_string(),
                amount: 0.01,
            })
            .await
    );
    assert_eq!(result.block_number, 1_000);
    assert_eq!(h.chain.broadcasts().len(), 1);
}

#[tokio::test]
async fn test_lagging_provider_nonce_never_reused() {
    let chain = MockChain::with_ether(10);
    chain.set_stuck_nonce(Some(3));
    let h = harness(chain, TransferSettings::default());

    let mut nonces = Vec::new();
    for _ in 0..3 {
        let (status, json) = send(&h.router, post("/send-eth", r#"{"amount":"0.001"}"#)).await;
        assert_eq!(status, StatusCode::OK, "{json}");
        nonces.push(json["nonce"].as_u64().unwrap());
    }
    assert_eq!(nonces, vec![3, 4, 5]);
}

#[tokio::test]
async fn test_provider_outage_before_broadcast() {
    let chain = MockChain::with_ether(10);
    chain.set_error("simulated disconnect");
    let h = harness(chain, TransferSettings::default());

    let err = tokio_test::assert_err!(
        h.gateway
            .withdraw(&TransferRequest {
                destination: DEST.to_string(),
                amount: 0.01,
            })
            .await
    );
    assert!(matches!(err, TransferError::ProviderUnavailable { .. }));
    assert!(!err.funds_may_have_moved());

    let (status, _) = send(&h.router, get("/balance")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (_, status) = send(&h.router, get("/status")).await;
    assert_eq!(status["chain"]["state"], "unreachable");
    assert_eq!(status["chain"]["endpoint"], "static");
}

#[tokio::test]
async fn test_balance_and_status_after_connect() {
    let h = harness(MockChain::with_ether(10), TransferSettings::default());

    let (_, status) = send(&h.router, get("/status")).await;
    assert_eq!(status["chain"]["state"], "disconnected");

    let (code, balance) = send(&h.router, get("/balance")).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(balance["balance"], "10.000000");
    assert_eq!(balance["destination"], DEST);
    assert_eq!(balance["address"], "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    let (_, status) = send(&h.router, get("/status")).await;
    assert_eq!(status["chain"]["state"], "connected");
    assert_eq!(status["signer"], "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
}

#[tokio::test]
async fn test_concurrent_withdrawals_after_scheduled_tick() {
    let h = harness(MockChain::with_ether(10), TransferSettings::default());

    // The first interval tick fires at once; the next is a year away.
    let ticker = TickScheduler::start(Arc::clone(&h.ledger));
    while h.ledger.snapshot(0).await.trade_count < 4 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let router = h.router.clone();
        handles.push(tokio::spawn(async move {
            send(&router, post("/withdraw", r#"{"amount":0.001}"#)).await
        }));
    }
    let mut nonces = Vec::new();
    for handle in handles {
        let (status, json) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK, "{json}");
        nonces.push(json["nonce"].as_u64().unwrap());
    }
    ticker.stop().await;

    nonces.sort_unstable();
    assert_eq!(nonces, vec![0, 1, 2, 3]);
    assert_eq!(h.chain.broadcasts().len(), 4);

    let snap = h.ledger.snapshot(usize::MAX).await;
    let sum: f64 = snap.strategies.iter().map(|s| s.accumulated_value).sum();
    assert_eq!(sum, snap.total_accumulated);
    assert_eq!(snap.trade_count, 4);
    assert!((80.0 - snap.total_accumulated - 4.0 * 0.001 * 3450.0).abs() < 1e-9);
}
