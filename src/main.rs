//! YIELDSIM: simulated yield ledger with a custodial ETH withdrawal path.
//!
//! Entry point. Loads configuration, initialises structured logging, starts
//! the ledger tick loop and serves the HTTP API until Ctrl-C or SIGTERM.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use yieldsim::api::{self, ApiState};
use yieldsim::config::AppConfig;
use yieldsim::engine::{ChainGateway, ProviderSource, StatusReporter};
use yieldsim::ledger::scheduler::TickScheduler;
use yieldsim::ledger::Ledger;

const BANNER: &str = r#"
 __   _______ ______ _      _____   _____ _____ __  __
 \ \ / /_   _|  ____| |    |  __ \ / ____|_   _|  \/  |
  \ V /  | | | |__  | |    | |  | | (___   | | | \  / |
   | |   | | |  __| | |    | |  | |\___ \  | | | |\/| |
   | |  _| |_| |____| |____| |__| |____) |_| |_| |  | |
   |_| |_____|______|______|_____/|_____/|_____|_|  |_|

  Simulated yield ledger. Withdrawals move real ETH.
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("YIELDSIM_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

    // Logging first so config loading is visible.
    init_logging();

    let mut cfg = AppConfig::load_or_default(&config_path)?;
    cfg.apply_env_overrides()?;
    let settings = cfg.transfer_settings()?;

    println!("{BANNER}");
    info!(
        port = cfg.server.port,
        strategies = cfg.ledger.strategy_count,
        tick_ms = cfg.ledger.tick_interval_ms,
        chain_id = settings.chain_id,
        "YIELDSIM starting up"
    );

    // -- Ledger ----------------------------------------------------------

    let ledger = Arc::new(Ledger::new(&cfg.ledger.params()));
    let ticker = TickScheduler::start(Arc::clone(&ledger));

    // -- Chain gateway ---------------------------------------------------

    if cfg.transfer.default_destination.is_none() {
        warn!("No default destination configured; withdraw requests must name one");
    }

    let gateway = Arc::new(ChainGateway::new(
        ProviderSource::JsonRpc {
            urls: cfg.chain.rpc_urls.clone(),
            connect_timeout: Duration::from_secs(cfg.chain.connect_timeout_secs),
            poll_interval: Duration::from_millis(cfg.chain.poll_interval_ms),
        },
        cfg.signer_secret(),
        Arc::clone(&ledger),
        settings,
        cfg.transfer.default_destination.clone(),
    ));

    {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.warm_up().await });
    }

    // -- HTTP ------------------------------------------------------------

    let auth_token = cfg.api_token();
    if auth_token.is_none() {
        warn!("Withdraw routes are not protected by a bearer token");
    }

    let state = Arc::new(ApiState {
        reporter: StatusReporter::new(
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            cfg.ledger.display_top_n,
        ),
        gateway,
        auth_token,
    });
    let app = api::build_router(state, Duration::from_secs(cfg.server.request_timeout_secs));

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP server listening. Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // -- Shutdown --------------------------------------------------------

    ledger.set_active(false).await;
    ticker.stop().await;

    let snap = ledger.snapshot(0).await;
    info!(
        total = format!("{:.6}", snap.total_accumulated),
        trades = snap.trade_count,
        "YIELDSIM shut down cleanly."
    );

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received.");
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("yieldsim=info,tower_http=info"));

    let json_logging = std::env::var("YIELDSIM_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
