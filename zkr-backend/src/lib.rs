//! zkr-backend
//!
//! Thin HTTP surface over the operator: transfer submission, account
//! lookups, deployment parameters and health.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de, Deserialize, Deserializer, Serialize};
use tracing::warn;
use zkr_common::{address, address_hex, fr_from_decimal, fr_to_decimal, Point, Signature};
use zkr_operator::models::serde_wei;
use zkr_operator::{
    BalanceLeaf, LedgerKind, Operator, OperatorConfig, OperatorError, Transaction,
    TransferService, TreeState, Wei,
};

const CODE_INVALID_REQUEST: &str = "INVALID_REQUEST";
const CODE_USER_NOT_FOUND: &str = "USER_NOT_FOUND";

/// Deployment parameters served by `GET /contracts`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractsInfo {
    pub ledger: String,
    pub rollup_address: Option<String>,
    pub tree_name: String,
    pub tree_depth: usize,
    pub batch_size: usize,
    pub min_fee_numerator: u128,
    pub min_fee_denominator: u128,
}

impl ContractsInfo {
    pub fn from_config(config: &OperatorConfig, rollup_address: Option<String>) -> Self {
        let ledger = match &config.ledger {
            LedgerKind::Memory => "memory",
            LedgerKind::Ethereum { .. } => "ethereum",
        };
        let rollup_address = rollup_address.or_else(|| match &config.ledger {
            LedgerKind::Ethereum { rollup_address, .. } => Some(rollup_address.clone()),
            LedgerKind::Memory => None,
        });
        Self {
            ledger: ledger.to_string(),
            rollup_address,
            tree_name: config.tree_name.clone(),
            tree_depth: config.tree_depth,
            batch_size: config.batch_size,
            min_fee_numerator: config.min_fee_numerator,
            min_fee_denominator: config.min_fee_denominator,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    tree: Arc<TreeState>,
    transfers: TransferService,
    contracts: Arc<ContractsInfo>,
}

impl AppState {
    pub fn new(tree: Arc<TreeState>, transfers: TransferService, contracts: ContractsInfo) -> Self {
        Self {
            tree,
            transfers,
            contracts: Arc::new(contracts),
        }
    }

    pub fn from_operator(operator: &Operator) -> Self {
        let contracts = ContractsInfo::from_config(
            operator.config(),
            operator.ledger_address().map(str::to_string),
        );
        Self::new(operator.state(), operator.transfer_service(), contracts)
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/send", post(send_handler))
        .route("/users/index/:index", get(user_by_index))
        .route("/users/address/:address", get(user_by_address))
        .route("/contracts", get(contracts_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

// === Requests and responses ===

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(number) => Ok(number),
        Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(deserialize_with = "lenient_u64")]
    pub from: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub to: u64,
    #[serde(with = "serde_wei")]
    pub amount: Wei,
    #[serde(with = "serde_wei")]
    pub fee: Wei,
    #[serde(deserialize_with = "lenient_u64")]
    pub nonce: u64,
    pub signature: Signature,
}

impl From<SendRequest> for Transaction {
    fn from(request: SendRequest) -> Self {
        Transaction {
            from: request.from,
            to: request.to,
            amount: request.amount,
            fee: request.fee,
            nonce: request.nonce,
            signature: Some(request.signature),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendResponse {
    status: &'static str,
    queue_index: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserResponse {
    index: u64,
    public_key: Point,
    address: String,
    #[serde(with = "serde_wei")]
    balance: Wei,
    nonce: u64,
}

impl UserResponse {
    fn new(index: u64, leaf: &BalanceLeaf) -> Self {
        Self {
            index,
            public_key: leaf.public_key,
            address: address_hex(&leaf.public_key),
            balance: leaf.balance,
            nonce: leaf.nonce,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    root: String,
    next_leaf_index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    desync: Option<String>,
}

// === Errors ===

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, CODE_INVALID_REQUEST, message)
    }

    fn user_not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, CODE_USER_NOT_FOUND, message)
    }
}

impl From<OperatorError> for ApiError {
    fn from(err: OperatorError) -> Self {
        let status = StatusCode::from_u16(err.suggested_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(%err, code = err.error_code(), "request failed");
        }
        Self::new(status, err.error_code(), err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    error_code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            error_code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

// === Handlers ===

async fn send_handler(
    State(state): State<AppState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SendResponse>), ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let queue_index = state.transfers.submit(request.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(SendResponse {
            status: "accepted",
            queue_index,
        }),
    ))
}

async fn user_by_index(
    State(state): State<AppState>,
    AxumPath(index): AxumPath<u64>,
) -> Result<Json<UserResponse>, ApiError> {
    state
        .tree
        .read(|tree| tree.leaf_raw(index).map(|leaf| UserResponse::new(index, leaf)))
        .await
        .map(Json)
        .ok_or_else(|| ApiError::user_not_found(format!("no account at leaf index {index}")))
}

async fn user_by_address(
    State(state): State<AppState>,
    AxumPath(raw): AxumPath<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let wanted = fr_from_decimal(&raw)
        .map_err(|err| ApiError::bad_request(format!("invalid address: {err}")))?;

    state
        .tree
        .read(|tree| {
            tree.leaves_raw()
                .iter()
                .zip(0u64..)
                .find(|(leaf, _)| address(&leaf.public_key) == wanted)
                .map(|(leaf, index)| UserResponse::new(index, leaf))
        })
        .await
        .map(Json)
        .ok_or_else(|| ApiError::user_not_found(format!("no account with address {raw}")))
}

async fn contracts_handler(State(state): State<AppState>) -> Json<ContractsInfo> {
    Json(state.contracts.as_ref().clone())
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let (root, next_leaf_index) = state
        .tree
        .read(|tree| (fr_to_decimal(&tree.root()), tree.next_leaf_index()))
        .await;
    let desync = state.tree.desync_reason().await;
    Json(HealthResponse {
        status: if desync.is_some() { "desync" } else { "ok" },
        root,
        next_leaf_index,
        desync,
    })
}
