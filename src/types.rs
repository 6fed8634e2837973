//! Shared types for the YIELDSIM service.
//!
//! The ledger, the transfer pipeline, the status reporter and the HTTP layer
//! all speak in these types, so they live here rather than in any one module.

use alloy_primitives::{Address, TxHash};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::chain::ProviderError;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// One synthetic yield-accruing unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: u32,
    /// Protocol label from the base-rate table (e.g. "uniswap").
    pub protocol: String,
    pub name: String,
    /// Simulated annual rate, in percent.
    pub annualized_yield_rate: f64,
    /// Never negative.
    pub accumulated_value: f64,
    pub active: bool,
}

/// A row of the base-rate table strategies are generated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRate {
    pub name: String,
    pub base_rate: f64,
}

impl ProtocolRate {
    pub fn new(name: &str, base_rate: f64) -> Self {
        Self {
            name: name.to_string(),
            base_rate,
        }
    }

    /// The stock table, highest base rate first.
    pub fn default_table() -> Vec<ProtocolRate> {
        vec![
            ProtocolRate::new("uniswap", 45.8),
            ProtocolRate::new("gmx", 32.1),
            ProtocolRate::new("pendle", 28.6),
            ProtocolRate::new("convex", 22.4),
            ProtocolRate::new("eigenlayer", 19.2),
            ProtocolRate::new("balancer", 18.3),
            ProtocolRate::new("yearn", 15.7),
            ProtocolRate::new("curve", 12.5),
            ProtocolRate::new("morpho", 11.9),
            ProtocolRate::new("aave", 8.2),
        ]
    }
}

/// Consistent copy of the ledger taken under a single read lock.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    /// The first `top_n` strategies in ledger (yield-descending) order.
    pub strategies: Vec<Strategy>,
    pub strategy_count: usize,
    pub total_accumulated: f64,
    pub average_yield: f64,
    pub trade_count: u64,
    pub start_time: DateTime<Utc>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub active: bool,
    pub taken_at: DateTime<Utc>,
}

impl LedgerSnapshot {
    /// Time between ledger creation and this snapshot.
    pub fn elapsed(&self) -> Duration {
        (self.taken_at - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// What a `reconcile` call actually took off the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub requested: f64,
    /// At most `requested`; less when strategies were already near zero.
    pub removed: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LedgerError {
    #[error("reconcile amount must be finite and non-negative, got {0}")]
    InvalidAmount(f64),
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// A withdrawal request, already normalised from whichever field aliases the
/// caller used. Not yet validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub destination: String,
    /// Native-asset units (ETH).
    pub amount: f64,
}

/// Outcome of a confirmed transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transaction_id: TxHash,
    pub block_number: u64,
    pub amount_sent: Decimal,
    #[serde(serialize_with = "crate::chain::serialize_checksummed")]
    pub from: Address,
    #[serde(serialize_with = "crate::chain::serialize_checksummed")]
    pub to: Address,
    pub nonce: u64,
    /// False when the ledger write-back failed; the on-chain transfer stands.
    pub reconciled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeSource {
    Live,
    Default,
}

/// Gas price used for a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    /// Wei per gas unit.
    pub price_per_gas_unit: u128,
    pub source: FeeSource,
}

impl FeeEstimate {
    pub fn live(price_per_gas_unit: u128) -> Self {
        Self {
            price_per_gas_unit,
            source: FeeSource::Live,
        }
    }

    pub fn fallback(price_per_gas_unit: u128) -> Self {
        Self {
            price_per_gas_unit,
            source: FeeSource::Default,
        }
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    CheckBalance,
    EstimateFee,
    AssignNonce,
    Sign,
    Broadcast,
    AwaitConfirmation,
    Reconcile,
    Done,
}

impl Stage {
    /// Whether a failure at this stage can leave funds moved on-chain.
    pub fn is_post_broadcast(&self) -> bool {
        *self >= Stage::Broadcast
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::CheckBalance => "check_balance",
            Stage::EstimateFee => "estimate_fee",
            Stage::AssignNonce => "assign_nonce",
            Stage::Sign => "sign",
            Stage::Broadcast => "broadcast",
            Stage::AwaitConfirmation => "await_confirmation",
            Stage::Reconcile => "reconcile",
            Stage::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// Terminal failures of the transfer pipeline.
///
/// Ledger write-back failures are not represented here. They are logged and
/// reported through `TransferResult::reconciled`.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient backend balance: have {balance} ETH, need {required} ETH")]
    InsufficientFunds { balance: Decimal, required: Decimal },

    #[error("Chain provider unavailable at {stage}: {source}")]
    ProviderUnavailable {
        stage: Stage,
        #[source]
        source: ProviderError,
    },

    #[error("Signing failed: {0}")]
    SigningFailure(String),

    #[error("Broadcast of {local_hash} failed, funds may or may not have moved: {source}")]
    BroadcastFailure {
        local_hash: TxHash,
        #[source]
        source: ProviderError,
    },

    #[error("Transaction {transaction_id} not confirmed within {}s", .timeout.as_secs())]
    ConfirmationTimeout {
        transaction_id: TxHash,
        timeout: Duration,
    },

    #[error("Network error awaiting confirmation of {transaction_id}: {source}")]
    NetworkError {
        transaction_id: TxHash,
        #[source]
        source: ProviderError,
    },
}

impl TransferError {
    pub fn provider(stage: Stage, source: ProviderError) -> Self {
        TransferError::ProviderUnavailable { stage, source }
    }

    /// The stage that detected the failure.
    pub fn stage(&self) -> Stage {
        match self {
            TransferError::InvalidRequest(_) => Stage::Validate,
            TransferError::InsufficientFunds { .. } => Stage::CheckBalance,
            TransferError::ProviderUnavailable { stage, .. } => *stage,
            TransferError::SigningFailure(_) => Stage::Sign,
            TransferError::BroadcastFailure { .. } => Stage::Broadcast,
            TransferError::ConfirmationTimeout { .. } | TransferError::NetworkError { .. } => {
                Stage::AwaitConfirmation
            }
        }
    }

    /// True once a signed transaction may have reached the network.
    pub fn funds_may_have_moved(&self) -> bool {
        self.stage().is_post_broadcast()
    }

    /// Faults the caller can fix by changing the request.
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            TransferError::InvalidRequest(_) | TransferError::InsufficientFunds { .. }
        )
    }

    /// Identifier the caller can poll with, if one exists.
    pub fn transaction_id(&self) -> Option<TxHash> {
        match self {
            TransferError::BroadcastFailure { local_hash, .. } => Some(*local_hash),
            TransferError::ConfirmationTimeout { transaction_id, .. }
            | TransferError::NetworkError { transaction_id, .. } => Some(*transaction_id),
            _ => None,
        }
    }

    /// Stable machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::InvalidRequest(_) => "invalid_request",
            TransferError::InsufficientFunds { .. } => "insufficient_funds",
            TransferError::ProviderUnavailable { .. } => "provider_unavailable",
            TransferError::SigningFailure(_) => "signing_failure",
            TransferError::BroadcastFailure { .. } => "broadcast_failure",
            TransferError::ConfirmationTimeout { .. } => "confirmation_timeout",
            TransferError::NetworkError { .. } => "network_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
