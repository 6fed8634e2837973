//! Chain access.
//!
//! Defines the `ChainProvider` trait the transfer pipeline talks to, plus the
//! unit and address helpers shared by every implementation:
//! - `rpc`: Ethereum JSON-RPC over HTTP with endpoint failover
//! - `signer`: the process-held signing key and EIP-155 transaction signing

pub mod rpc;
pub mod signer;

use alloy_primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use rust_decimal::prelude::*;
use serde::Serializer;
use std::time::Duration;

use crate::types::FeeEstimate;

/// Wei in one ether.
pub const WEI_PER_ETHER: u64 = 1_000_000_000_000_000_000;
/// Wei in one gwei.
pub const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Errors surfaced by a chain access provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("No chain endpoint reachable: {0}")]
    Unavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-retryable HTTP status (4xx other than 429).
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed provider response: {0}")]
    Decode(String),

    #[error("Transaction {0} reverted")]
    Reverted(TxHash),

    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Abstraction over a distributed-ledger access endpoint.
///
/// Implementors own their transport, retries and endpoint selection; the
/// pipeline only sees these six calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Confirmed balance of `address`, in wei.
    async fn get_balance(&self, address: Address) -> Result<U256, ProviderError>;

    /// Live gas price.
    async fn get_fee_estimate(&self) -> Result<FeeEstimate, ProviderError>;

    /// Next nonce for `address`, counting transactions still in the mempool.
    async fn get_nonce(&self, address: Address) -> Result<u64, ProviderError>;

    /// Submit a signed, RLP-encoded transaction. Returns its hash.
    async fn broadcast(&self, raw: Bytes) -> Result<TxHash, ProviderError>;

    /// Wait until `tx` has at least `min_confirmations` confirmations and
    /// return the block that included it. Must give up after `timeout`.
    async fn await_confirmation(
        &self,
        tx: TxHash,
        min_confirmations: u64,
        timeout: Duration,
    ) -> Result<u64, ProviderError>;

    /// Current chain head.
    async fn block_number(&self) -> Result<u64, ProviderError>;
}

// ---------------------------------------------------------------------------
// Address and unit helpers
// ---------------------------------------------------------------------------

/// Parse a hex account address.
///
/// Accepts 40 hex digits with or without a `0x` prefix. All-lowercase and
/// all-uppercase forms are accepted as-is; mixed case must carry a valid
/// EIP-55 checksum.
pub fn parse_address(input: &str) -> Result<Address, String> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("not a well-formed address: {input:?}"));
    }

    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    let prefixed = format!("0x{digits}");

    if has_lower && has_upper {
        return Address::parse_checksummed(&prefixed, None)
            .map_err(|_| format!("address checksum mismatch: {input}"));
    }

    prefixed
        .parse::<Address>()
        .map_err(|e| format!("not a well-formed address: {input:?} ({e})"))
}

/// Convert an ether amount to wei, truncating below one wei.
/// Returns `None` for negative or unrepresentably large amounts.
pub fn ether_to_wei(amount: Decimal) -> Option<U256> {
    let wei = amount.checked_mul(Decimal::from(WEI_PER_ETHER))?.trunc();
    wei.to_u128().map(U256::from)
}

/// Convert wei to ether. Saturates at `Decimal::MAX`.
pub fn wei_to_ether(wei: U256) -> Decimal {
    u128::try_from(wei)
        .ok()
        .and_then(|v| i128::try_from(v).ok())
        .and_then(|v| Decimal::try_from_i128_with_scale(v, 18).ok())
        .map(|d| d.normalize())
        .unwrap_or(Decimal::MAX)
}

pub fn gwei_to_wei(gwei: u64) -> u128 {
    u128::from(gwei) * WEI_PER_GWEI
}

/// Serialize an address in EIP-55 mixed case. Use with `serialize_with`.
pub fn serialize_checksummed<S: Serializer>(address: &Address, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&address.to_checksum(None))
}

/// `serialize_checksummed` for optional addresses; `None` becomes null.
pub fn serialize_checksummed_opt<S: Serializer>(
    address: &Option<Address>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match address {
        Some(address) => serialize_checksummed(address, s),
        None => s.serialize_none(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
