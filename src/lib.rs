//! YIELDSIM: simulated yield ledger with a custodial ETH withdrawal path.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod chain;
pub mod ledger;
pub mod engine;
pub mod api;
