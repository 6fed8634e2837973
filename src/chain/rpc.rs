//! Ethereum JSON-RPC provider.
//!
//! Talks to a single HTTP endpoint picked by `connect`, which walks a list
//! of candidate URLs and keeps the first one that answers `eth_blockNumber`
//! within the per-candidate timeout.
//!
//! Read calls retry on transport errors, HTTP 429 and 5xx with exponential
//! backoff; other 4xx statuses fail at once. `eth_sendRawTransaction` is
//! sent once: a retry after an ambiguous failure is the caller's decision.
//! Confirmation polling rides out transient errors until its timeout.

use alloy_primitives::{hex, Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChainProvider, ProviderError};
use crate::types::FeeEstimate;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Maximum retries for idempotent reads.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff.
const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Whole-request timeout for a single HTTP round trip.
const REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
}

/// The two receipt fields confirmation tracking needs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptFields {
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct JsonRpcProvider {
    http: Client,
    url: String,
    poll_interval: Duration,
    backoff: Duration,
    next_id: AtomicU64,
}

impl JsonRpcProvider {
    pub fn new(url: &str) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: url.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: BASE_BACKOFF,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff = base;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    /// Try each candidate in order; keep the first that reports a block
    /// number within `connect_timeout`.
    pub async fn connect(urls: &[String], connect_timeout: Duration) -> Result<Self, ProviderError> {
        let mut failures = Vec::new();

        for url in urls {
            info!(url = %url, "Trying RPC endpoint");
            let provider = match JsonRpcProvider::new(url) {
                Ok(p) => p,
                Err(e) => {
                    failures.push(format!("{url}: {e}"));
                    continue;
                }
            };

            match tokio::time::timeout(connect_timeout, provider.block_number()).await {
                Ok(Ok(block)) => {
                    info!(url = %url, block, "Connected to chain endpoint");
                    return Ok(provider);
                }
                Ok(Err(e)) => {
                    warn!(url = %url, error = %e, "RPC endpoint failed");
                    failures.push(format!("{url}: {e}"));
                }
                Err(_) => {
                    warn!(url = %url, timeout_ms = connect_timeout.as_millis() as u64, "RPC endpoint timed out");
                    failures.push(format!("{url}: timeout"));
                }
            }
        }

        Err(ProviderError::Unavailable(if failures.is_empty() {
            "no endpoints configured".to_string()
        } else {
            failures.join("; ")
        }))
    }

    /// One JSON-RPC round trip, no retries.
    async fn call_once<T: DeserializeOwned>(&self, method: &str, params: &Value) -> Result<T, ProviderError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params: params.clone(),
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("{method}: {e}")))?;

        if let Some(err) = body.error {
            return Err(ProviderError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        serde_json::from_value(body.result.unwrap_or(Value::Null))
            .map_err(|e| ProviderError::Decode(format!("{method}: {e}")))
    }

    /// Round trip with retry + backoff on transport failures.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ProviderError> {
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = self.backoff * 2u32.pow(attempt - 1);
                debug!(method, attempt, delay_ms = delay.as_millis() as u64, "Retrying RPC call");
                tokio::time::sleep(delay).await;
            }

            match self.call_once(method, &params).await {
                Ok(value) => return Ok(value),
                Err(ProviderError::Transport(msg)) => {
                    warn!(method, attempt, error = %msg, "Retryable RPC error");
                    last_error = Some(ProviderError::Transport(msg));
                }
                Err(other) => return Err(other),
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Transport("retries exhausted".into())))
    }

    async fn receipt(&self, tx: TxHash) -> Result<Option<ReceiptFields>, ProviderError> {
        self.call("eth_getTransactionReceipt", json!([tx])).await
    }

    async fn poll_confirmation(&self, tx: TxHash, min_confirmations: u64) -> Result<u64, ProviderError> {
        let needed = min_confirmations.max(1);

        loop {
            match self.check_receipt(tx, needed).await {
                Ok(Some(block)) => return Ok(block),
                Ok(None) => {}
                Err(e @ (ProviderError::Reverted(_) | ProviderError::Decode(_))) => return Err(e),
                Err(e) => warn!(%tx, error = %e, "Confirmation poll failed, still waiting"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Inclusion block once the receipt has `needed` confirmations.
    async fn check_receipt(&self, tx: TxHash, needed: u64) -> Result<Option<u64>, ProviderError> {
        let Some(receipt) = self.receipt(tx).await? else {
            return Ok(None);
        };
        if receipt.status.as_deref() == Some("0x0") {
            return Err(ProviderError::Reverted(tx));
        }
        let Some(block) = receipt.block_number.as_deref() else {
            return Ok(None);
        };
        let included = parse_quantity(block)?;
        let head = self.block_number().await?;
        let confirmations = head.saturating_sub(included) + 1;
        debug!(%tx, included, head, confirmations, "Receipt seen");
        Ok((confirmations >= needed).then_some(included))
    }
}

#[async_trait]
impl ChainProvider for JsonRpcProvider {
    async fn get_balance(&self, address: Address) -> Result<U256, ProviderError> {
        let raw: String = self.call("eth_getBalance", json!([address, "latest"])).await?;
        raw.parse::<U256>()
            .map_err(|e| ProviderError::Decode(format!("eth_getBalance: {e}")))
    }

    async fn get_fee_estimate(&self) -> Result<FeeEstimate, ProviderError> {
        let raw: String = self.call("eth_gasPrice", json!([])).await?;
        let price = raw
            .parse::<U256>()
            .map_err(|e| ProviderError::Decode(format!("eth_gasPrice: {e}")))?;
        let price = u128::try_from(price)
            .map_err(|_| ProviderError::Decode(format!("eth_gasPrice out of range: {raw}")))?;
        Ok(FeeEstimate::live(price))
    }

    async fn get_nonce(&self, address: Address) -> Result<u64, ProviderError> {
        let raw: String = self
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        parse_quantity(&raw)
    }

    async fn broadcast(&self, raw: Bytes) -> Result<TxHash, ProviderError> {
        let params = json!([hex::encode_prefixed(&raw)]);
        let hash: String = self.call_once("eth_sendRawTransaction", &params).await?;
        hash.parse::<TxHash>()
            .map_err(|e| ProviderError::Decode(format!("eth_sendRawTransaction: {e}")))
    }

    async fn await_confirmation(
        &self,
        tx: TxHash,
        min_confirmations: u64,
        timeout: Duration,
    ) -> Result<u64, ProviderError> {
        tokio::time::timeout(timeout, self.poll_confirmation(tx, min_confirmations))
            .await
            .map_err(|_| ProviderError::Timeout(timeout))?
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw)
    }
}

/// 429 and 5xx are worth retrying; any other failure status is final.
fn status_error(status: StatusCode, body: String) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transport(format!("HTTP {status}: {body}"))
    } else {
        ProviderError::Http {
            status: status.as_u16(),
            body,
        }
    }
}

/// Parse a `0x`-prefixed hex quantity.
fn parse_quantity(raw: &str) -> Result<u64, ProviderError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| ProviderError::Decode(format!("quantity without 0x prefix: {raw}")))?;
    if digits.is_empty() {
        return Err(ProviderError::Decode("empty quantity".into()));
    }
    u64::from_str_radix(digits, 16).map_err(|e| ProviderError::Decode(format!("{raw}: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
