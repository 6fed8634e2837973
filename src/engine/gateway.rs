//! Chain gateway.
//!
//! Owns the lazily-connected chain provider, the signer account and the
//! single transfer pipeline built from them. Status endpoints read the
//! cached connection state from here without touching the network; that
//! state follows the outcome of the most recent provider call.

use alloy_primitives::Address;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

use super::pipeline::{TransferPipeline, TransferSettings};
use crate::chain::rpc::JsonRpcProvider;
use crate::chain::signer::SignerAccount;
use crate::chain::{wei_to_ether, ChainProvider, ProviderError};
use crate::ledger::Ledger;
use crate::types::{Stage, TransferError, TransferRequest, TransferResult};

/// Where the chain provider comes from.
pub enum ProviderSource {
    /// An already-built provider, used as-is.
    Static(Arc<dyn ChainProvider>),
    /// JSON-RPC endpoints tried in order on first use.
    JsonRpc {
        urls: Vec<String>,
        connect_timeout: Duration,
        poll_interval: Duration,
    },
}

/// Cached connection state, as reported by `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Connectivity {
    Connected { endpoint: String },
    /// Connected once, but the latest provider call failed.
    Unreachable { endpoint: String, error: String },
    Disconnected,
}

pub struct ChainGateway {
    source: ProviderSource,
    provider: OnceCell<(Arc<dyn ChainProvider>, String)>,
    /// Last provider failure; cleared by the next success.
    last_failure: RwLock<Option<String>>,
    /// Err holds why no signer is available.
    signer: Result<Arc<SignerAccount>, String>,
    ledger: Arc<Ledger>,
    settings: TransferSettings,
    pipeline: OnceCell<Arc<TransferPipeline>>,
    default_destination: Option<String>,
}

impl ChainGateway {
    pub fn new(
        source: ProviderSource,
        signer_secret: Option<SecretString>,
        ledger: Arc<Ledger>,
        settings: TransferSettings,
        default_destination: Option<String>,
    ) -> Self {
        let signer = match signer_secret {
            None => {
                warn!("No signer key configured, withdrawals disabled");
                Err("signer secret not configured".to_string())
            }
            Some(secret) => match SignerAccount::from_secret(&secret) {
                Ok(account) => {
                    info!(address = %account.address(), "Signer account loaded");
                    Ok(Arc::new(account))
                }
                Err(e) => {
                    warn!(error = %e, "Signer key rejected, withdrawals disabled");
                    Err(format!("signer secret invalid: {e}"))
                }
            },
        };

        Self {
            source,
            provider: OnceCell::new(),
            last_failure: RwLock::new(None),
            signer,
            ledger,
            settings,
            pipeline: OnceCell::new(),
            default_destination,
        }
    }

    pub fn default_destination(&self) -> Option<&str> {
        self.default_destination.as_deref()
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().ok().map(|s| s.address())
    }

    pub fn chain_id(&self) -> u64 {
        self.settings.chain_id
    }

    /// Connection state without a network call.
    pub async fn connectivity(&self) -> Connectivity {
        let Some((_, endpoint)) = self.provider.get() else {
            return Connectivity::Disconnected;
        };
        match self.last_failure.read().await.as_ref() {
            Some(error) => Connectivity::Unreachable {
                endpoint: endpoint.clone(),
                error: error.clone(),
            },
            None => Connectivity::Connected {
                endpoint: endpoint.clone(),
            },
        }
    }

    /// Fold a provider-facing outcome into the reported connection state.
    async fn observe<T>(&self, outcome: &Result<T, TransferError>) {
        let failure = match outcome {
            Ok(_) | Err(TransferError::InsufficientFunds { .. }) => None,
            Err(TransferError::ProviderUnavailable { source, .. }) => Some(source.to_string()),
            Err(_) => return,
        };
        let mut last = self.last_failure.write().await;
        if failure.is_some() && last.is_none() {
            warn!(error = failure.as_deref().unwrap_or_default(), "Chain provider unreachable");
        } else if failure.is_none() && last.is_some() {
            info!("Chain provider reachable again");
        }
        *last = failure;
    }

    /// The provider, connecting on first use. A failed connect is not
    /// cached; the next call tries again.
    pub async fn provider(&self) -> Result<Arc<dyn ChainProvider>, ProviderError> {
        let (provider, _) = self
            .provider
            .get_or_try_init(|| async move {
                match &self.source {
                    ProviderSource::Static(provider) => {
                        Ok::<_, ProviderError>((Arc::clone(provider), "static".to_string()))
                    }
                    ProviderSource::JsonRpc {
                        urls,
                        connect_timeout,
                        poll_interval,
                    } => {
                        let rpc = JsonRpcProvider::connect(urls, *connect_timeout)
                            .await?
                            .with_poll_interval(*poll_interval);
                        let endpoint = rpc.endpoint().to_string();
                        info!(endpoint = %endpoint, "Chain provider connected");
                        Ok((Arc::new(rpc) as Arc<dyn ChainProvider>, endpoint))
                    }
                }
            })
            .await?;
        Ok(Arc::clone(provider))
    }

    fn signer(&self) -> Result<Arc<SignerAccount>, TransferError> {
        self.signer
            .as_ref()
            .map(Arc::clone)
            .map_err(|reason| TransferError::SigningFailure(reason.clone()))
    }

    /// The transfer pipeline, built once the signer and provider exist.
    pub async fn pipeline(&self) -> Result<Arc<TransferPipeline>, TransferError> {
        let signer = self.signer()?;
        let pipeline = self
            .pipeline
            .get_or_try_init(|| async move {
                let provider = self
                    .provider()
                    .await
                    .map_err(|e| TransferError::provider(Stage::CheckBalance, e))?;
                Ok::<_, TransferError>(Arc::new(TransferPipeline::new(
                    provider,
                    signer,
                    Arc::clone(&self.ledger),
                    self.settings.clone(),
                )))
            })
            .await?;
        Ok(Arc::clone(pipeline))
    }

    /// Validate, then run the pipeline. Invalid requests never reach the
    /// provider, not even to connect.
    pub async fn withdraw(&self, request: &TransferRequest) -> Result<TransferResult, TransferError> {
        let transfer = request.validate().map_err(|e| {
            info!(error = %e, "Withdrawal rejected at validation");
            e
        })?;
        let pipeline = self.pipeline().await?;
        let outcome = pipeline.execute(transfer).await;
        self.observe(&outcome).await;
        outcome
    }

    /// Signer address and balance in ether.
    pub async fn signer_balance(&self) -> Result<(Address, Decimal), TransferError> {
        let signer = self.signer()?;
        let provider = self
            .provider()
            .await
            .map_err(|e| TransferError::provider(Stage::CheckBalance, e))?;
        let outcome = provider
            .get_balance(signer.address())
            .await
            .map_err(|e| TransferError::provider(Stage::CheckBalance, e));
        self.observe(&outcome).await;
        Ok((signer.address(), wei_to_ether(outcome?)))
    }

    /// Try to connect once at start-up. Failure is logged, never fatal.
    pub async fn warm_up(&self) {
        match self.provider().await {
            Ok(provider) => {
                let outcome = provider
                    .block_number()
                    .await
                    .map_err(|e| TransferError::provider(Stage::CheckBalance, e));
                match &outcome {
                    Ok(head) => info!(head, "Chain provider ready"),
                    Err(e) => warn!(error = %e, "Chain provider connected but head query failed"),
                }
                self.observe(&outcome).await;
            }
            Err(e) => warn!(error = %e, "Chain provider unavailable at start-up, will retry on demand"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
