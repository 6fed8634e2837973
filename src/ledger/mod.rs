//! Ledger accumulator: the synthetic yield ledger.
//!
//! Owns the strategy set and its simulated accrued values. Every mutation
//! (`tick`, `reconcile`) runs under one write lock and recomputes the
//! total before releasing it, so `snapshot` readers always see a total that
//! is the exact in-order sum of the strategies.
//!
//! Nothing here is backed by market data. The growth is a fixed-rate
//! simulation and is reported as such.

pub mod scheduler;

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::types::{LedgerError, LedgerSnapshot, ProtocolRate, ReconcileOutcome, Strategy};

/// 365 days of seconds.
pub const SECONDS_PER_YEAR: f64 = 31_536_000.0;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Everything that determines the initial ledger and its growth.
#[derive(Debug, Clone)]
pub struct LedgerParams {
    pub protocols: Vec<ProtocolRate>,
    pub strategy_count: usize,
    pub boost: f64,
    pub leverage: f64,
    /// Notional principal each strategy's percent rate applies to.
    pub yield_basis: f64,
    pub period: Duration,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            protocols: ProtocolRate::default_table(),
            strategy_count: 450,
            boost: 2.8,
            leverage: 4.5,
            yield_basis: 100.0,
            period: Duration::from_millis(100),
        }
    }
}

/// Build the strategy set: base rates assigned round-robin, scaled by
/// `boost * leverage`, then stable-sorted by rate, highest first.
pub fn generate_strategies(params: &LedgerParams) -> Vec<Strategy> {
    if params.protocols.is_empty() {
        return Vec::new();
    }

    let mut strategies: Vec<Strategy> = (0..params.strategy_count)
        .map(|i| {
            let protocol = &params.protocols[i % params.protocols.len()];
            let id = (i + 1) as u32;
            Strategy {
                id,
                protocol: protocol.name.clone(),
                name: format!("{} Strategy #{id}", protocol.name.to_uppercase()),
                annualized_yield_rate: protocol.base_rate * params.boost * params.leverage,
                accumulated_value: 0.0,
                active: true,
            }
        })
        .collect();

    strategies.sort_by(|a, b| b.annualized_yield_rate.total_cmp(&a.annualized_yield_rate));
    strategies
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LedgerState {
    strategies: Vec<Strategy>,
    total_accumulated: f64,
    start_time: DateTime<Utc>,
    last_update_time: Option<DateTime<Utc>>,
    trade_count: u64,
    active: bool,
}

impl LedgerState {
    fn recompute_total(&mut self) {
        self.total_accumulated = self.strategies.iter().map(|s| s.accumulated_value).sum();
    }
}

#[derive(Debug)]
pub struct Ledger {
    state: RwLock<LedgerState>,
    period: Duration,
    basis_factor: f64,
    /// Rates never change after construction, so the mean is fixed.
    average_yield: f64,
}

impl Ledger {
    pub fn new(params: &LedgerParams) -> Self {
        let strategies = generate_strategies(params);
        let average_yield = if strategies.is_empty() {
            0.0
        } else {
            strategies.iter().map(|s| s.annualized_yield_rate).sum::<f64>() / strategies.len() as f64
        };

        info!(
            strategies = strategies.len(),
            period_ms = params.period.as_millis() as u64,
            average_yield = format!("{average_yield:.1}%"),
            "Ledger initialised (simulated yield)"
        );

        let mut state = LedgerState {
            strategies,
            total_accumulated: 0.0,
            start_time: Utc::now(),
            last_update_time: None,
            trade_count: 0,
            active: true,
        };
        state.recompute_total();

        Self {
            state: RwLock::new(state),
            period: params.period,
            basis_factor: params.yield_basis / 100.0,
            average_yield,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Per-tick increment for a strategy with the given percent rate.
    pub fn increment_for(&self, annualized_yield_rate: f64) -> f64 {
        annualized_yield_rate / SECONDS_PER_YEAR * self.period.as_secs_f64() * self.basis_factor
    }

    /// Advance every active strategy by one period.
    ///
    /// Returns false without touching anything when the ledger is inactive.
    pub async fn tick(&self) -> bool {
        let mut state = self.state.write().await;
        if !state.active {
            return false;
        }

        let mut active_count = 0u64;
        for strategy in state.strategies.iter_mut().filter(|s| s.active) {
            strategy.accumulated_value += self.increment_for(strategy.annualized_yield_rate);
            active_count += 1;
        }

        state.recompute_total();
        state.trade_count += active_count;
        state.last_update_time = Some(Utc::now());
        true
    }

    /// Copy totals and the first `top_n` strategies under one read lock.
    pub async fn snapshot(&self, top_n: usize) -> LedgerSnapshot {
        let state = self.state.read().await;
        LedgerSnapshot {
            strategies: state.strategies.iter().take(top_n).cloned().collect(),
            strategy_count: state.strategies.len(),
            total_accumulated: state.total_accumulated,
            average_yield: self.average_yield,
            trade_count: state.trade_count,
            start_time: state.start_time,
            last_update_time: state.last_update_time,
            active: state.active,
            taken_at: Utc::now(),
        }
    }

    /// Remove `value` from the ledger, split evenly across all strategies
    /// and clamped at zero per strategy. Applied atomically.
    pub async fn reconcile(&self, value: f64) -> Result<ReconcileOutcome, LedgerError> {
        if !value.is_finite() || value < 0.0 {
            return Err(LedgerError::InvalidAmount(value));
        }

        let mut state = self.state.write().await;
        if state.strategies.is_empty() {
            return Ok(ReconcileOutcome {
                requested: value,
                removed: 0.0,
            });
        }

        let share = value / state.strategies.len() as f64;
        let mut removed = 0.0;
        for strategy in state.strategies.iter_mut() {
            let take = strategy.accumulated_value.min(share);
            strategy.accumulated_value -= take;
            removed += take;
        }
        state.recompute_total();

        // Float summation of the shares can overshoot by an ulp.
        let removed = removed.min(value);
        debug!(requested = value, removed, total = state.total_accumulated, "Ledger reconciled");

        Ok(ReconcileOutcome {
            requested: value,
            removed,
        })
    }

    pub async fn set_active(&self, active: bool) {
        let mut state = self.state.write().await;
        if state.active != active {
            info!(active, "Ledger activity changed");
        }
        state.active = active;
    }

    pub async fn is_active(&self) -> bool {
        self.state.read().await.active
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
