//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the vault over HTTP. All endpoints
//! share application state through axum's `State` extractor.
//!
//! Mutating endpoints act on behalf of the account named in the
//! `x-vault-caller` header. On a devnet node the header is trusted as is.
//!
//! ## Endpoints
//!
//! | Method | Path                        | Description                          |
//! |--------|-----------------------------|--------------------------------------|
//! | GET    | `/health`                   | Liveness probe                       |
//! | GET    | `/status`                   | Vault status summary                 |
//! | POST   | `/grants`                   | Grant a delegate access to an owner  |
//! | POST   | `/grants/revoke`            | Revoke a delegate                    |
//! | GET    | `/owners/:owner/delegates`  | Delegates of an owner                |
//! | GET    | `/access/:owner/:actor`     | Whether `actor` may act for `owner`  |
//! | POST   | `/deposit`                  | Move tokens into the vault           |
//! | POST   | `/withdraw`                 | Move tokens out of the vault         |
//! | GET    | `/balances/:owner`          | Internal ledger balance              |
//! | GET    | `/tokens/:account`          | External token balance               |
//! | GET    | `/networks`                 | Supported deployment table           |
//! | GET    | `/networks/:chain_id`       | One deployment                       |
//! | GET    | `/ws`                       | WebSocket vault event stream         |

use std::sync::Arc;
use std::time::Instant;

use axum::{
    async_trait,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        rejection::{JsonRejection, PathRejection},
        FromRequest, FromRequestParts, Path, State,
    },
    http::{request::Parts, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use zap_vault::network::chain_name;
use zap_vault::{
    Account, AuthorizationError, AuthorizationRegistry, CustodialLedger, EventBus,
    InMemoryTokenLedger, NetworkDeployment, NetworkError, NetworkRegistry, VaultConfig,
    VaultError,
};

use crate::metrics::SharedMetrics;

/// Header carrying the acting account.
pub const CALLER_HEADER: &str = "x-vault-caller";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Chain this node serves.
    pub chain_id: u64,
    /// Delegation table.
    pub registry: Arc<AuthorizationRegistry>,
    /// Internal custody ledger.
    pub ledger: Arc<CustodialLedger>,
    /// External token ledger the vault moves funds through.
    pub tokens: Arc<InMemoryTokenLedger>,
    /// Contract deployment table.
    pub networks: Arc<NetworkRegistry>,
    /// Vault event feed, shared by the registry and the ledger.
    pub events: EventBus,
    /// Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

impl AppState {
    /// Wires a registry and ledger over `tokens`, publishing into one shared
    /// event bus.
    pub fn new(
        version: impl Into<String>,
        chain_id: u64,
        networks: NetworkRegistry,
        tokens: Arc<InMemoryTokenLedger>,
        config: &VaultConfig,
        metrics: SharedMetrics,
    ) -> Self {
        let events = EventBus::default();
        let registry = Arc::new(AuthorizationRegistry::new(config).with_events(events.clone()));
        let ledger = Arc::new(
            CustodialLedger::new(Arc::clone(&registry), tokens.clone(), config)
                .with_events(events.clone()),
        );

        Self {
            version: version.into(),
            chain_id,
            registry,
            ledger,
            tokens,
            networks: Arc::new(networks),
            events,
            metrics,
        }
    }

    /// Records the outcome of `operation` and refreshes the ledger gauges.
    fn record<T>(
        &self,
        operation: &str,
        started: Instant,
        result: Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        self.metrics.observe(operation, outcome, started.elapsed());
        self.metrics
            .set_ledger_totals(self.ledger.total_custodied(), self.ledger.owner_count());
        result
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/grants", post(grant_handler))
        .route("/grants/revoke", post(revoke_handler))
        .route("/owners/:owner/delegates", get(delegates_handler))
        .route("/access/:owner/:actor", get(access_handler))
        .route("/deposit", post(deposit_handler))
        .route("/withdraw", post(withdraw_handler))
        .route("/balances/:owner", get(balance_handler))
        .route("/tokens/:account", get(token_balance_handler))
        .route("/networks", get(networks_handler))
        .route("/networks/:chain_id", get(network_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Every way a request can fail, mapped onto an HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("missing x-vault-caller header")]
    MissingCaller,

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Vault(e) => match e {
                VaultError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                VaultError::InvalidAmount => StatusCode::BAD_REQUEST,
                VaultError::InsufficientFunds { .. } | VaultError::Overflow { .. } => {
                    StatusCode::CONFLICT
                }
                VaultError::Transfer(_) => StatusCode::BAD_GATEWAY,
                VaultError::TransferTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            },
            ApiError::Authorization(e) => match e {
                AuthorizationError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                AuthorizationError::DelegateLimitReached { .. } => StatusCode::CONFLICT,
            },
            ApiError::Network(NetworkError::UnsupportedNetwork(_)) => StatusCode::NOT_FOUND,
            ApiError::Network(NetworkError::Malformed(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::MissingCaller => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Short machine-readable error kind, also used as the metrics outcome.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Vault(e) => match e {
                VaultError::PermissionDenied { .. } => "permission_denied",
                VaultError::InvalidAmount => "invalid_amount",
                VaultError::InsufficientFunds { .. } => "insufficient_funds",
                VaultError::Overflow { .. } => "overflow",
                VaultError::Transfer(_) => "transfer_failed",
                VaultError::TransferTimeout(_) => "transfer_timeout",
            },
            ApiError::Authorization(e) => match e {
                AuthorizationError::PermissionDenied { .. } => "permission_denied",
                AuthorizationError::DelegateLimitReached { .. } => "delegate_limit",
            },
            ApiError::Network(NetworkError::UnsupportedNetwork(_)) => "unsupported_network",
            ApiError::Network(NetworkError::Malformed(_)) => "malformed_network_table",
            ApiError::MissingCaller => "missing_caller",
            ApiError::BadRequest(_) => "bad_request",
        }
    }
}

/// Error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            kind: self.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// JSON request body. Malformed bodies are rejected as [`ApiError::BadRequest`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Path parameters. Unparsable segments are rejected as [`ApiError::BadRequest`].
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// The acting account, taken from the `x-vault-caller` header.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Account);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(CALLER_HEADER)
            .ok_or(ApiError::MissingCaller)?;
        let text = value
            .to_str()
            .map_err(|_| ApiError::BadRequest("caller header is not valid text".into()))?;
        text.trim()
            .parse()
            .map(Caller)
            .map_err(|e| ApiError::BadRequest(format!("caller: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /grants` and `POST /grants/revoke`.
#[derive(Debug, Serialize, Deserialize)]
pub struct GrantRequest {
    pub owner: Account,
    pub delegate: Account,
}

/// Result of a grant or revoke. `changed` is false when the call was a no-op.
#[derive(Debug, Serialize, Deserialize)]
pub struct GrantResponse {
    pub owner: Account,
    pub delegate: Account,
    pub changed: bool,
}

/// Body of `POST /deposit` and `POST /withdraw`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    pub owner: Account,
    pub amount: u64,
}

/// Result of a deposit or withdrawal.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub actor: Account,
    pub owner: Account,
    pub amount: u64,
    /// The owner's ledger balance after the operation.
    pub balance: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DelegatesResponse {
    pub owner: Account,
    pub delegates: Vec<Account>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessResponse {
    pub owner: Account,
    pub actor: Account,
    pub has_access: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub account: Account,
    pub balance: u64,
}

/// Response body for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub chain_id: u64,
    pub network: String,
    pub custodian: Account,
    /// Owners with a ledger slot.
    pub owners: usize,
    /// Owners with at least one delegate.
    pub delegating_owners: usize,
    pub custodied: u128,
    pub event_subscribers: usize,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: vault status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let network = state
        .networks
        .deployment(state.chain_id)
        .map(|d| d.name.clone())
        .unwrap_or_else(|_| chain_name(state.chain_id));

    Json(StatusResponse {
        version: state.version.clone(),
        chain_id: state.chain_id,
        network,
        custodian: state.tokens.custodian(),
        owners: state.ledger.owner_count(),
        delegating_owners: state.registry.owner_count(),
        custodied: state.ledger.total_custodied(),
        event_subscribers: state.events.subscriber_count(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `POST /grants`: the caller grants `delegate` access to `owner`.
async fn grant_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<GrantRequest>,
) -> Result<Json<GrantResponse>, ApiError> {
    let started = Instant::now();
    let result = state
        .registry
        .grant_access(&caller, &req.owner, &req.delegate)
        .map_err(ApiError::from);
    let changed = state.record("grant", started, result)?;

    Ok(Json(GrantResponse {
        owner: req.owner,
        delegate: req.delegate,
        changed,
    }))
}

/// `POST /grants/revoke`: the caller removes `delegate` from `owner`.
async fn revoke_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<GrantRequest>,
) -> Result<Json<GrantResponse>, ApiError> {
    let started = Instant::now();
    let result = state
        .registry
        .revoke_access(&caller, &req.owner, &req.delegate)
        .map_err(ApiError::from);
    let changed = state.record("revoke", started, result)?;

    Ok(Json(GrantResponse {
        owner: req.owner,
        delegate: req.delegate,
        changed,
    }))
}

async fn delegates_handler(
    ApiPath(owner): ApiPath<Account>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(DelegatesResponse {
        owner,
        delegates: state.registry.delegates_of(&owner),
    })
}

async fn access_handler(
    ApiPath((owner, actor)): ApiPath<(Account, Account)>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(AccessResponse {
        owner,
        actor,
        has_access: state.registry.has_access(&actor, &owner),
    })
}

/// `POST /deposit`: debits the caller's tokens into `owner`'s ledger entry.
async fn deposit_handler(
    State(state): State<AppState>,
    Caller(actor): Caller,
    ApiJson(req): ApiJson<TransferRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let started = Instant::now();
    let result = state
        .ledger
        .deposit(&actor, &req.owner, req.amount)
        .await
        .map_err(ApiError::from);
    let balance = state.record("deposit", started, result)?;

    Ok(Json(TransferResponse {
        actor,
        owner: req.owner,
        amount: req.amount,
        balance,
    }))
}

/// `POST /withdraw`: pays `amount` out of `owner`'s ledger entry to the caller.
async fn withdraw_handler(
    State(state): State<AppState>,
    Caller(actor): Caller,
    ApiJson(req): ApiJson<TransferRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let started = Instant::now();
    let result = state
        .ledger
        .withdraw(&actor, &req.owner, req.amount)
        .await
        .map_err(ApiError::from);
    let balance = state.record("withdraw", started, result)?;

    Ok(Json(TransferResponse {
        actor,
        owner: req.owner,
        amount: req.amount,
        balance,
    }))
}

async fn balance_handler(
    ApiPath(owner): ApiPath<Account>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(BalanceResponse {
        account: owner,
        balance: state.ledger.balance_of(&owner),
    })
}

async fn token_balance_handler(
    ApiPath(account): ApiPath<Account>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(BalanceResponse {
        account,
        balance: state.tokens.balance_of(&account),
    })
}

async fn networks_handler(State(state): State<AppState>) -> Json<Vec<NetworkDeployment>> {
    Json(state.networks.deployments().cloned().collect())
}

async fn network_handler(
    ApiPath(chain_id): ApiPath<u64>,
    State(state): State<AppState>,
) -> Result<Json<NetworkDeployment>, ApiError> {
    Ok(Json(state.networks.deployment(chain_id)?.clone()))
}

/// `GET /ws`: WebSocket upgrade for the vault event stream.
///
/// Clients receive JSON-encoded vault events. Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Forwards vault events to one client until it disconnects or the bus
/// closes.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.events.subscribe();
    state.metrics.event_subscribers.inc();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize vault event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }

    state.metrics.event_subscribers.dec();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
