//! Status reporter.
//!
//! Read-only views over the ledger and the gateway. Nothing here mutates
//! state, and only `balance` touches the network.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::gateway::{ChainGateway, Connectivity};
use crate::ledger::Ledger;
use crate::types::{Strategy, TransferError};

/// Live view sort order; the ledger keeps strategies yield-descending.
pub const SORT_ORDER: &str = "YIELD_DESCENDING";

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub ledger_active: bool,
    pub chain: Connectivity,
    pub chain_id: u64,
    #[serde(serialize_with = "crate::chain::serialize_checksummed_opt")]
    pub signer: Option<Address>,
    pub destination: Option<String>,
    pub strategy_count: usize,
    pub timestamp: DateTime<Utc>,
    pub simulated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub ledger_active: bool,
    pub strategy_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EarningsReport {
    pub total_accumulated: f64,
    pub trade_count: u64,
    pub hourly_rate: f64,
    pub uptime_ms: u64,
    pub active: bool,
    pub destination: Option<String>,
    pub simulated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveStrategiesReport {
    pub strategies: Vec<Strategy>,
    pub total_accumulated: f64,
    pub average_yield: f64,
    pub projected_hourly: f64,
    pub projected_daily: f64,
    pub trade_count: u64,
    pub sort_order: &'static str,
    pub active: bool,
    pub destination: Option<String>,
    pub simulated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceReport {
    #[serde(serialize_with = "crate::chain::serialize_checksummed")]
    pub address: Address,
    /// Ether, six decimal places.
    pub balance: String,
    pub destination: Option<String>,
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// Accrual per hour since start. Zero until any time has passed.
pub fn projection(total: f64, elapsed: Duration) -> f64 {
    let hours = elapsed.as_secs_f64() / 3600.0;
    if hours <= 0.0 {
        0.0
    } else {
        total / hours
    }
}

pub struct StatusReporter {
    ledger: Arc<Ledger>,
    gateway: Arc<ChainGateway>,
    top_n: usize,
}

impl StatusReporter {
    pub fn new(ledger: Arc<Ledger>, gateway: Arc<ChainGateway>, top_n: usize) -> Self {
        Self {
            ledger,
            gateway,
            top_n,
        }
    }

    fn destination(&self) -> Option<String> {
        self.gateway.default_destination().map(str::to_string)
    }

    pub async fn status(&self) -> StatusReport {
        let snap = self.ledger.snapshot(0).await;
        StatusReport {
            status: "online",
            ledger_active: snap.active,
            chain: self.gateway.connectivity().await,
            chain_id: self.gateway.chain_id(),
            signer: self.gateway.signer_address(),
            destination: self.destination(),
            strategy_count: snap.strategy_count,
            timestamp: snap.taken_at,
            simulated: true,
        }
    }

    pub async fn health(&self) -> HealthReport {
        let snap = self.ledger.snapshot(0).await;
        HealthReport {
            status: "healthy",
            ledger_active: snap.active,
            strategy_count: snap.strategy_count,
        }
    }

    pub async fn earnings(&self) -> EarningsReport {
        let snap = self.ledger.snapshot(0).await;
        let elapsed = snap.elapsed();
        EarningsReport {
            total_accumulated: snap.total_accumulated,
            trade_count: snap.trade_count,
            hourly_rate: projection(snap.total_accumulated, elapsed),
            uptime_ms: elapsed.as_millis() as u64,
            active: snap.active,
            destination: self.destination(),
            simulated: true,
        }
    }

    pub async fn live_strategies(&self) -> LiveStrategiesReport {
        let snap = self.ledger.snapshot(self.top_n).await;
        let hourly = projection(snap.total_accumulated, snap.elapsed());
        LiveStrategiesReport {
            total_accumulated: snap.total_accumulated,
            average_yield: snap.average_yield,
            projected_hourly: hourly,
            projected_daily: hourly * 24.0,
            trade_count: snap.trade_count,
            sort_order: SORT_ORDER,
            active: snap.active,
            destination: self.destination(),
            simulated: true,
            strategies: snap.strategies,
        }
    }

    pub async fn balance(&self) -> Result<BalanceReport, TransferError> {
        let (address, ether) = self.gateway.signer_balance().await?;
        Ok(BalanceReport {
            address,
            balance: format!("{:.6}", ether.round_dp(6)),
            destination: self.destination(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
