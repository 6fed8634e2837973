//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` (optional; every section has defaults) and
//! deserializes into strongly-typed structs. Secrets are referenced by
//! env-var name in the config and resolved at runtime, never stored in the
//! file itself.

use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::chain::gwei_to_wei;
use crate::engine::pipeline::TransferSettings;
use crate::ledger::LedgerParams;
use crate::types::ProtocolRate;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub chain: ChainConfig,
    pub transfer: TransferConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    pub tick_interval_ms: u64,
    pub strategy_count: usize,
    pub boost: f64,
    pub leverage: f64,
    pub yield_basis: f64,
    /// How many strategies the live view returns.
    pub display_top_n: usize,
    pub protocols: Vec<ProtocolRate>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let params = LedgerParams::default();
        Self {
            tick_interval_ms: params.period.as_millis() as u64,
            strategy_count: params.strategy_count,
            boost: params.boost,
            leverage: params.leverage,
            yield_basis: params.yield_basis,
            display_top_n: 50,
            protocols: params.protocols,
        }
    }
}

impl LedgerConfig {
    pub fn params(&self) -> LedgerParams {
        LedgerParams {
            protocols: self.protocols.clone(),
            strategy_count: self.strategy_count,
            boost: self.boost,
            leverage: self.leverage,
            yield_basis: self.yield_basis,
            period: Duration::from_millis(self.tick_interval_ms.max(1)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChainConfig {
    /// Candidate endpoints, tried in order.
    pub rpc_urls: Vec<String>,
    pub connect_timeout_secs: u64,
    pub chain_id: u64,
    pub poll_interval_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_urls: vec![
                "https://ethereum-rpc.publicnode.com".to_string(),
                "https://eth.drpc.org".to_string(),
                "https://rpc.ankr.com/eth".to_string(),
                "https://eth.llamarpc.com".to_string(),
                "https://1rpc.io/eth".to_string(),
            ],
            connect_timeout_secs: 5,
            chain_id: 1,
            poll_interval_ms: 2_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransferConfig {
    /// Recipient used when a request names none.
    pub default_destination: Option<String>,
    /// Env vars checked, in order, for the signer's hex private key.
    pub signer_key_envs: Vec<String>,
    /// Safety margin (ETH) kept on top of the amount for fees.
    pub fee_reserve: f64,
    pub default_gas_price_gwei: u64,
    pub gas_limit: u64,
    pub min_confirmations: u64,
    pub confirmation_timeout_secs: u64,
    /// Ledger units per ETH used when reconciling a transfer.
    pub price_rate: f64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            default_destination: None,
            signer_key_envs: vec![
                "TREASURY_PRIVATE_KEY".to_string(),
                "VAULT_PRIVATE_KEY".to_string(),
            ],
            fee_reserve: 0.003,
            default_gas_price_gwei: 25,
            gas_limit: 21_000,
            min_confirmations: 1,
            confirmation_timeout_secs: 120,
            price_rate: 3450.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ApiConfig {
    /// Env var holding a bearer token for the withdraw routes. Unset or
    /// empty means the routes are open.
    pub auth_token_env: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            let cfg = Self::load(path)?;
            info!(path, "Configuration loaded");
            Ok(cfg)
        } else {
            warn!(path, "No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply `PORT` and `DESTINATION_WALLET` overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("PORT is not a valid port: {port}"))?;
        }
        if let Ok(dest) = std::env::var("DESTINATION_WALLET") {
            if !dest.trim().is_empty() {
                self.transfer.default_destination = Some(dest.trim().to_string());
            }
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// First non-empty signer key among `transfer.signer_key_envs`.
    pub fn signer_secret(&self) -> Option<SecretString> {
        self.transfer
            .signer_key_envs
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.trim().is_empty())
            .map(SecretString::new)
    }

    /// Bearer token for the withdraw routes, if configured.
    pub fn api_token(&self) -> Option<SecretString> {
        self.api
            .auth_token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|value| !value.is_empty())
            .map(SecretString::new)
    }

    pub fn transfer_settings(&self) -> Result<TransferSettings> {
        let t = &self.transfer;
        let fee_reserve = Decimal::from_f64(t.fee_reserve)
            .filter(|d| !d.is_sign_negative())
            .with_context(|| format!("transfer.fee_reserve is not a valid amount: {}", t.fee_reserve))?;
        if !t.price_rate.is_finite() || t.price_rate < 0.0 {
            anyhow::bail!("transfer.price_rate must be finite and non-negative: {}", t.price_rate);
        }

        Ok(TransferSettings {
            fee_reserve,
            default_gas_price: gwei_to_wei(t.default_gas_price_gwei),
            gas_limit: t.gas_limit,
            chain_id: self.chain.chain_id,
            min_confirmations: t.min_confirmations.max(1),
            confirmation_timeout: Duration::from_secs(t.confirmation_timeout_secs.max(1)),
            price_rate: t.price_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_load_config() {
        // Requires config.toml in the working directory; absent is acceptable.
        let result = AppConfig::load("config.toml");
        if let Ok(cfg) = result {
            assert!(cfg.server.port > 0);
            assert!(cfg.ledger.tick_interval_ms > 0);
            assert!(!cfg.chain.rpc_urls.is_empty());
            assert!(cfg.transfer.price_rate > 0.0);
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 3001);
        assert_eq!(cfg.ledger.tick_interval_ms, 100);
        assert_eq!(cfg.ledger.strategy_count, 450);
        assert_eq!(cfg.ledger.protocols.len(), 10);
        assert_eq!(cfg.chain.chain_id, 1);
        assert_eq!(cfg.transfer.gas_limit, 21_000);
        assert_eq!(cfg.transfer.signer_key_envs[0], "TREASURY_PRIVATE_KEY");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            port = 8080

            [transfer]
            price_rate = 2000.0
            default_destination = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"

            [[ledger.protocols]]
            name = "solo"
            base_rate = 5.0
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.transfer.price_rate, 2000.0);
        assert_eq!(cfg.transfer.fee_reserve, 0.003);
        assert_eq!(cfg.ledger.protocols, vec![ProtocolRate::new("solo", 5.0)]);
        assert_eq!(cfg.ledger.strategy_count, 450);
    }

    #[test]
    fn test_transfer_settings() {
        let cfg = AppConfig::default();
        let settings = cfg.transfer_settings().unwrap();
        assert_eq!(settings.fee_reserve, dec!(0.003));
        assert_eq!(settings.default_gas_price, 25_000_000_000);
        assert_eq!(settings.chain_id, 1);
        assert_eq!(settings.confirmation_timeout, Duration::from_secs(120));
        assert_eq!(settings.price_rate, 3450.0);
    }

    #[test]
    fn test_transfer_settings_rejects_negative_reserve() {
        let mut cfg = AppConfig::default();
        cfg.transfer.fee_reserve = -1.0;
        assert!(cfg.transfer_settings().is_err());
    }

    #[test]
    fn test_ledger_params_clamp_zero_interval() {
        let mut cfg = LedgerConfig::default();
        cfg.tick_interval_ms = 0;
        assert_eq!(cfg.params().period, Duration::from_millis(1));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = AppConfig::load_or_default("/nonexistent/yieldsim.toml").unwrap();
        assert_eq!(cfg.server.port, 3001);
    }
}
