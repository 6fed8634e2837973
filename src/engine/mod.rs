//! Core engine: the transfer pipeline, the chain gateway that feeds it and
//! the read-only status reporter.

pub mod gateway;
pub mod pipeline;
pub mod reporter;

pub use gateway::{ChainGateway, Connectivity, ProviderSource};
pub use pipeline::{NonceSequencer, TransferPipeline, TransferSettings, ValidatedTransfer};
pub use reporter::StatusReporter;
