//! Mock chain for integration testing.
//!
//! Provides a deterministic `ChainProvider` implementation that holds one
//! balance, counts nonces, records every broadcast and confirms on demand.
//! All in-memory with no external dependencies.

use alloy_primitives::{keccak256, Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use yieldsim::chain::{ChainProvider, ProviderError, WEI_PER_ETHER};
use yieldsim::types::FeeEstimate;

/// How `await_confirmation` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Confirm at this block straight away.
    InBlock(u64),
    /// Never confirm; the caller's timeout decides.
    Never,
    /// Report the transaction as reverted.
    Revert,
}

/// A mock chain for deterministic testing.
///
/// Balance, fees, nonce behaviour and confirmation are controllable from
/// test code. The balance is not debited on broadcast.
pub struct MockChain {
    balance: Arc<Mutex<U256>>,
    gas_price: Arc<Mutex<Option<u128>>>,
    /// When set, `get_nonce` always returns this instead of the broadcast count.
    stuck_nonce: Arc<Mutex<Option<u64>>>,
    broadcasts: Arc<Mutex<Vec<Bytes>>>,
    confirmation: Arc<Mutex<Confirmation>>,
    /// If set, every call fails with a transport error carrying this text.
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockChain {
    /// A chain where the signer holds `ether` whole ETH.
    pub fn with_ether(ether: u64) -> Self {
        Self::with_wei(U256::from(ether) * U256::from(WEI_PER_ETHER))
    }

    pub fn with_wei(balance: U256) -> Self {
        Self {
            balance: Arc::new(Mutex::new(balance)),
            gas_price: Arc::new(Mutex::new(Some(23_809_523_810))),
            stuck_nonce: Arc::new(Mutex::new(None)),
            broadcasts: Arc::new(Mutex::new(Vec::new())),
            confirmation: Arc::new(Mutex::new(Confirmation::InBlock(1_000))),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_gas_price(&self, price: Option<u128>) {
        *self.gas_price.lock().unwrap() = price;
    }

    pub fn set_stuck_nonce(&self, nonce: Option<u64>) {
        *self.stuck_nonce.lock().unwrap() = nonce;
    }

    pub fn set_confirmation(&self, behaviour: Confirmation) {
        *self.confirmation.lock().unwrap() = behaviour;
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Every raw transaction broadcast so far.
    pub fn broadcasts(&self) -> Vec<Bytes> {
        self.broadcasts.lock().unwrap().clone()
    }

    fn check_error(&self) -> Result<(), ProviderError> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(ProviderError::Transport(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainProvider for MockChain {
    async fn get_balance(&self, _address: Address) -> Result<U256, ProviderError> {
        self.check_error()?;
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_fee_estimate(&self) -> Result<FeeEstimate, ProviderError> {
        self.check_error()?;
        match *self.gas_price.lock().unwrap() {
            Some(price) => Ok(FeeEstimate::live(price)),
            None => Err(ProviderError::Rpc {
                code: -32601,
                message: "method not found".into(),
            }),
        }
    }

    async fn get_nonce(&self, _address: Address) -> Result<u64, ProviderError> {
        self.check_error()?;
        if let Some(nonce) = *self.stuck_nonce.lock().unwrap() {
            return Ok(nonce);
        }
        Ok(self.broadcasts.lock().unwrap().len() as u64)
    }

    async fn broadcast(&self, raw: Bytes) -> Result<TxHash, ProviderError> {
        self.check_error()?;
        let hash = keccak256(&raw);
        self.broadcasts.lock().unwrap().push(raw);
        Ok(hash)
    }

    async fn await_confirmation(
        &self,
        tx: TxHash,
        _min_confirmations: u64,
        _timeout: Duration,
    ) -> Result<u64, ProviderError> {
        self.check_error()?;
        let behaviour = *self.confirmation.lock().unwrap();
        match behaviour {
            Confirmation::InBlock(block) => Ok(block),
            Confirmation::Revert => Err(ProviderError::Reverted(tx)),
            Confirmation::Never => std::future::pending().await,
        }
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        self.check_error()?;
        Ok(1_000)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_nonce_follows_broadcasts() {
        let chain = MockChain::with_ether(1);
        assert_eq!(chain.get_nonce(Address::ZERO).await.unwrap(), 0);
        chain.broadcast(Bytes::from_static(b"one")).await.unwrap();
        assert_eq!(chain.get_nonce(Address::ZERO).await.unwrap(), 1);

        chain.set_stuck_nonce(Some(0));
        chain.broadcast(Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(chain.get_nonce(Address::ZERO).await.unwrap(), 0);
        assert_eq!(chain.broadcasts().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_forced_error() {
        let chain = MockChain::with_ether(1);
        chain.set_error("simulated disconnect");
        assert!(chain.get_balance(Address::ZERO).await.is_err());
        assert!(chain.block_number().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_fee_outage() {
        let chain = MockChain::with_ether(1);
        chain.set_gas_price(None);
        assert!(matches!(
            chain.get_fee_estimate().await,
            Err(ProviderError::Rpc { .. })
        ));
    }
}
