//! Transfer pipeline.
//!
//! Moves native value from the signer account to a destination:
//! validate → check balance → estimate fee → assign nonce → sign →
//! broadcast → await confirmation → reconcile ledger.
//!
//! Runs for the same signer are serialised end to end: the nonce sequencer
//! lock is taken before the balance check and held until the run finishes.
//! Everything before broadcast is side-effect free apart from reads;
//! everything after it reports the transaction id so the caller can follow
//! up independently.

use alloy_primitives::{Address, TxHash, U256};
use rust_decimal::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chain::signer::{LegacyTransfer, SignerAccount};
use crate::chain::{ether_to_wei, parse_address, wei_to_ether, ChainProvider, ProviderError};
use crate::ledger::Ledger;
use crate::types::{FeeEstimate, Stage, TransferError, TransferRequest, TransferResult};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// ETH kept back on top of the amount to cover fees.
    pub fee_reserve: Decimal,
    /// Wei per gas when the live estimate is unavailable.
    pub default_gas_price: u128,
    pub gas_limit: u64,
    pub chain_id: u64,
    pub min_confirmations: u64,
    pub confirmation_timeout: Duration,
    /// Ledger units per ETH.
    pub price_rate: f64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            fee_reserve: Decimal::new(3, 3),
            default_gas_price: 25_000_000_000,
            gas_limit: 21_000,
            chain_id: 1,
            min_confirmations: 1,
            confirmation_timeout: Duration::from_secs(120),
            price_rate: 3450.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A request that passed validation. Only the pipeline consumes these.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTransfer {
    pub destination: Address,
    pub amount: Decimal,
    pub amount_wei: U256,
}

impl TransferRequest {
    /// Check amount and destination. Pure; no I/O.
    pub fn validate(&self) -> Result<ValidatedTransfer, TransferError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(TransferError::InvalidRequest(
                "amount must be a finite positive number".into(),
            ));
        }

        // Amounts too large for the decimal or wei range saturate, so they
        // reach the balance check and fail there as insufficient funds.
        let amount = Decimal::from_f64(self.amount).unwrap_or(Decimal::MAX);
        let amount_wei = ether_to_wei(amount).unwrap_or(U256::MAX);
        if amount_wei.is_zero() {
            return Err(TransferError::InvalidRequest(format!(
                "amount is below one wei: {}",
                self.amount
            )));
        }

        let destination =
            parse_address(&self.destination).map_err(TransferError::InvalidRequest)?;

        Ok(ValidatedTransfer {
            destination,
            amount,
            amount_wei,
        })
    }
}

// ---------------------------------------------------------------------------
// Nonce sequencing
// ---------------------------------------------------------------------------

/// Tracks the last nonce this process broadcast, so a provider whose
/// pending count lags behind cannot hand out the same nonce twice.
#[derive(Debug, Default)]
pub struct NonceSequencer {
    last_used: Option<u64>,
}

impl NonceSequencer {
    pub fn next(&self, provider_pending: u64) -> u64 {
        match self.last_used {
            Some(last) => provider_pending.max(last + 1),
            None => provider_pending,
        }
    }

    pub fn commit(&mut self, nonce: u64) {
        self.last_used = Some(self.last_used.map_or(nonce, |last| last.max(nonce)));
    }

    pub fn last_used(&self) -> Option<u64> {
        self.last_used
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct TransferPipeline {
    provider: Arc<dyn ChainProvider>,
    signer: Arc<SignerAccount>,
    ledger: Arc<Ledger>,
    settings: TransferSettings,
    fee_reserve_wei: U256,
    sequencer: Mutex<NonceSequencer>,
}

impl TransferPipeline {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        signer: Arc<SignerAccount>,
        ledger: Arc<Ledger>,
        settings: TransferSettings,
    ) -> Self {
        let fee_reserve_wei = ether_to_wei(settings.fee_reserve).unwrap_or(U256::ZERO);
        Self {
            provider,
            signer,
            ledger,
            settings,
            fee_reserve_wei,
            sequencer: Mutex::new(NonceSequencer::default()),
        }
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Validate and execute in one call.
    pub async fn submit(&self, request: &TransferRequest) -> Result<TransferResult, TransferError> {
        let transfer = request.validate().map_err(|e| {
            info!(error = %e, "Transfer rejected at validation");
            e
        })?;
        self.execute(transfer).await
    }

    /// Run every stage after validation.
    pub async fn execute(&self, transfer: ValidatedTransfer) -> Result<TransferResult, TransferError> {
        let span = info_span!(
            "transfer",
            run_id = %Uuid::new_v4(),
            to = %transfer.destination,
            amount = %transfer.amount,
        );

        let outcome = self.run(transfer).instrument(span.clone()).await;
        span.in_scope(|| match &outcome {
            Ok(result) => info!(
                tx = %result.transaction_id,
                block = result.block_number,
                nonce = result.nonce,
                reconciled = result.reconciled,
                "Transfer complete"
            ),
            Err(e) => warn!(
                stage = %e.stage(),
                kind = e.kind(),
                funds_may_have_moved = e.funds_may_have_moved(),
                error = %e,
                "Transfer failed"
            ),
        });
        outcome
    }

    async fn run(&self, transfer: ValidatedTransfer) -> Result<TransferResult, TransferError> {
        let from = self.signer.address();

        // One run per signer at a time; held until Done.
        let mut sequencer = self.sequencer.lock().await;

        // -- CheckBalance --------------------------------------------------
        debug!(stage = %Stage::CheckBalance, "Entering stage");
        let balance = self
            .provider
            .get_balance(from)
            .await
            .map_err(|e| TransferError::provider(Stage::CheckBalance, e))?;

        let required_wei = transfer.amount_wei.saturating_add(self.fee_reserve_wei);
        if balance < required_wei {
            return Err(TransferError::InsufficientFunds {
                balance: wei_to_ether(balance),
                required: transfer.amount.saturating_add(self.settings.fee_reserve),
            });
        }

        // -- EstimateFee ---------------------------------------------------
        debug!(stage = %Stage::EstimateFee, "Entering stage");
        let fee = self.estimate_fee().await;

        // -- AssignNonce ---------------------------------------------------
        debug!(stage = %Stage::AssignNonce, "Entering stage");
        let pending = self
            .provider
            .get_nonce(from)
            .await
            .map_err(|e| TransferError::provider(Stage::AssignNonce, e))?;
        let nonce = sequencer.next(pending);
        if nonce != pending {
            debug!(pending, nonce, "Provider nonce behind local sequence");
        }

        // -- Sign ----------------------------------------------------------
        debug!(stage = %Stage::Sign, "Entering stage");
        let tx = LegacyTransfer {
            nonce,
            gas_price: fee.price_per_gas_unit,
            gas_limit: self.settings.gas_limit,
            to: transfer.destination,
            value: transfer.amount_wei,
            chain_id: self.settings.chain_id,
        };
        let signed = self
            .signer
            .sign(&tx)
            .map_err(|e| TransferError::SigningFailure(e.to_string()))?;

        // -- Broadcast -----------------------------------------------------
        debug!(stage = %Stage::Broadcast, hash = %signed.hash, "Entering stage");
        let transaction_id = self
            .provider
            .broadcast(signed.raw.clone())
            .await
            .map_err(|source| TransferError::BroadcastFailure {
                local_hash: signed.hash,
                source,
            })?;
        sequencer.commit(nonce);
        if transaction_id != signed.hash {
            warn!(provider = %transaction_id, local = %signed.hash, "Provider returned a different transaction hash");
        }
        info!(tx = %transaction_id, nonce, gas_price = fee.price_per_gas_unit, "Transaction broadcast");

        // -- AwaitConfirmation ---------------------------------------------
        debug!(stage = %Stage::AwaitConfirmation, "Entering stage");
        let block_number = self.await_confirmation(transaction_id).await?;
        info!(tx = %transaction_id, block = block_number, "Transaction confirmed");

        // -- Reconcile -----------------------------------------------------
        debug!(stage = %Stage::Reconcile, "Entering stage");
        let reconciled = self.reconcile_ledger(transfer.amount).await;

        debug!(stage = %Stage::Done, "Entering stage");
        Ok(TransferResult {
            transaction_id,
            block_number,
            amount_sent: transfer.amount,
            from,
            to: transfer.destination,
            nonce,
            reconciled,
        })
    }

    /// Live gas price, or the configured default. Never fails.
    async fn estimate_fee(&self) -> FeeEstimate {
        match self.provider.get_fee_estimate().await {
            Ok(fee) if fee.price_per_gas_unit > 0 => fee,
            Ok(_) => {
                warn!("Provider reported a zero gas price, using default");
                FeeEstimate::fallback(self.settings.default_gas_price)
            }
            Err(e) => {
                warn!(error = %e, "Fee estimate unavailable, using default");
                FeeEstimate::fallback(self.settings.default_gas_price)
            }
        }
    }

    async fn await_confirmation(&self, tx: TxHash) -> Result<u64, TransferError> {
        let timeout = self.settings.confirmation_timeout;
        let wait = self
            .provider
            .await_confirmation(tx, self.settings.min_confirmations, timeout);

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(block)) => Ok(block),
            Ok(Err(ProviderError::Timeout(_))) | Err(_) => Err(TransferError::ConfirmationTimeout {
                transaction_id: tx,
                timeout,
            }),
            Ok(Err(source)) => Err(TransferError::NetworkError {
                transaction_id: tx,
                source,
            }),
        }
    }

    /// Best-effort ledger write-back. Returns whether it applied.
    async fn reconcile_ledger(&self, amount: Decimal) -> bool {
        let value = amount.to_f64().unwrap_or(f64::NAN) * self.settings.price_rate;
        match self.ledger.reconcile(value).await {
            Ok(outcome) => {
                info!(requested = outcome.requested, removed = outcome.removed, "Ledger reconciled");
                true
            }
            Err(e) => {
                warn!(
                    kind = "reconcile_failure",
                    error = %e,
                    "Ledger reconcile failed; on-chain transfer stands"
                );
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
