//! API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.

use alloy_primitives::{Address, TxHash};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use crate::engine::reporter::{
    BalanceReport, EarningsReport, HealthReport, LiveStrategiesReport, StatusReport,
};
use crate::engine::{ChainGateway, StatusReporter};
use crate::types::{Stage, TransferError, TransferRequest, TransferResult};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ApiState {
    pub reporter: StatusReporter,
    pub gateway: Arc<ChainGateway>,
    /// Bearer token required on withdraw routes, when set.
    pub auth_token: Option<SecretString>,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Withdraw body
// ---------------------------------------------------------------------------

/// Amounts arrive as JSON numbers or numeric strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AmountField {
    Number(f64),
    Text(String),
}

impl AmountField {
    fn is_blank(&self) -> bool {
        matches!(self, AmountField::Text(s) if s.trim().is_empty())
    }

    fn value(&self) -> Result<f64, TransferError> {
        match self {
            AmountField::Number(n) => Ok(*n),
            AmountField::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| TransferError::InvalidRequest(format!("amount is not a number: {s:?}"))),
        }
    }
}

/// Raw withdraw body with every accepted field alias.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WithdrawBody {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, rename = "toAddress")]
    pub to_address: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default, rename = "amountETH")]
    pub amount_eth: Option<AmountField>,
    #[serde(default)]
    pub amount: Option<AmountField>,
}

impl WithdrawBody {
    /// Resolve aliases: `to` > `toAddress` > `destination` > default, and
    /// `amountETH` > `amount`. Blank values count as absent.
    pub fn into_request(self, default_destination: Option<&str>) -> Result<TransferRequest, TransferError> {
        let destination = [self.to, self.to_address, self.destination]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .or_else(|| default_destination.map(str::to_string))
            .ok_or_else(|| {
                TransferError::InvalidRequest("no destination given and no default configured".into())
            })?;

        let amount = [self.amount_eth, self.amount]
            .into_iter()
            .flatten()
            .find(|a| !a.is_blank())
            .ok_or_else(|| TransferError::InvalidRequest("amount is required".into()))?
            .value()?;

        Ok(TransferRequest {
            destination: destination.trim().to_string(),
            amount,
        })
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawResponse {
    pub success: bool,
    pub transaction_id: TxHash,
    #[serde(serialize_with = "crate::chain::serialize_checksummed")]
    pub from: Address,
    #[serde(serialize_with = "crate::chain::serialize_checksummed")]
    pub to: Address,
    pub amount: Decimal,
    pub block_number: u64,
    pub nonce: u64,
    pub reconciled: bool,
}

impl From<TransferResult> for WithdrawResponse {
    fn from(r: TransferResult) -> Self {
        Self {
            success: true,
            transaction_id: r.transaction_id,
            from: r.from,
            to: r.to,
            amount: r.amount_sent,
            block_number: r.block_number,
            nonce: r.nonce,
            reconciled: r.reconciled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub funds_may_have_moved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Transfer(TransferError),
    /// The transfer task ended without a result (panicked).
    Internal(String),
}

impl From<TransferError> for ApiError {
    fn from(e: TransferError) -> Self {
        ApiError::Transfer(e)
    }
}

/// HTTP status for a pipeline failure.
pub fn status_for(e: &TransferError) -> StatusCode {
    match e {
        TransferError::InvalidRequest(_) | TransferError::InsufficientFunds { .. } => {
            StatusCode::BAD_REQUEST
        }
        TransferError::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        TransferError::SigningFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        TransferError::BroadcastFailure { .. } | TransferError::NetworkError { .. } => {
            StatusCode::BAD_GATEWAY
        }
        TransferError::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: "missing or invalid bearer token".into(),
                    kind: "unauthorized",
                    stage: None,
                    funds_may_have_moved: false,
                    transaction_id: None,
                    balance: None,
                    required: None,
                },
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: msg,
                    kind: "internal",
                    stage: None,
                    funds_may_have_moved: true,
                    transaction_id: None,
                    balance: None,
                    required: None,
                },
            ),
            ApiError::Transfer(e) => {
                let (balance, required) = match &e {
                    TransferError::InsufficientFunds { balance, required } => {
                        (Some(*balance), Some(*required))
                    }
                    _ => (None, None),
                };
                (
                    status_for(&e),
                    ErrorBody {
                        error: e.to_string(),
                        kind: e.kind(),
                        stage: Some(e.stage()),
                        funds_may_have_moved: e.funds_may_have_moved(),
                        transaction_id: e.transaction_id(),
                        balance,
                        required,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.auth_token else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if token == expected.expose_secret().as_str() => Ok(()),
        _ => {
            warn!("Withdraw request rejected: bad or missing bearer token");
            Err(ApiError::Unauthorized)
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.reporter.status().await)
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.reporter.health().await)
}

/// GET /earnings
pub async fn get_earnings(State(state): State<AppState>) -> Json<EarningsReport> {
    Json(state.reporter.earnings().await)
}

/// GET /strategies/live
pub async fn get_live_strategies(State(state): State<AppState>) -> Json<LiveStrategiesReport> {
    Json(state.reporter.live_strategies().await)
}

/// GET /balance
pub async fn get_balance(State(state): State<AppState>) -> Result<Json<BalanceReport>, ApiError> {
    Ok(Json(state.reporter.balance().await?))
}

/// POST /withdraw and its aliases.
pub async fn withdraw(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<WithdrawBody>, JsonRejection>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    authorize(&state, &headers)?;

    let Json(body) = payload
        .map_err(|e| TransferError::InvalidRequest(format!("malformed body: {}", e.body_text())))?;
    let request = body.into_request(state.gateway.default_destination())?;

    // Run detached so a dropped connection cannot cancel a run after broadcast.
    let gateway = Arc::clone(&state.gateway);
    let result = tokio::spawn(async move { gateway.withdraw(&request).await })
        .await
        .map_err(|e| {
            error!(error = %e, "Transfer task failed");
            ApiError::Internal(format!("transfer task failed: {e}"))
        })??;

    Ok(Json(result.into()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
