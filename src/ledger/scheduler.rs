//! Periodic ledger ticks.
//!
//! One task drives the ledger on a fixed interval. Ticks run sequentially
//! inside that task, so they can never overlap; a tick that falls due while
//! the previous one is still running is skipped, not queued.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::Ledger;

pub struct TickScheduler;

impl TickScheduler {
    /// Spawn the tick loop on the ledger's own period.
    pub fn start(ledger: Arc<Ledger>) -> TickHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = ledger.period();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_ms = period.as_millis() as u64, "Tick scheduler started");

            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if !ledger.tick().await {
                            debug!("Ledger inactive, tick skipped");
                        }
                    }
                }
            }

            info!("Tick scheduler stopped");
        });

        TickHandle { stop_tx, task }
    }
}

/// Owner handle for a running scheduler.
pub struct TickHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TickHandle {
    /// Stop the loop and wait for it to exit. No tick runs after this returns.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Tick scheduler task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
