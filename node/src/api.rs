//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the platform node's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! Every monetary field in request and response bodies is a decimal string
//! of base units, never a JSON number: balances are `u128` internally and
//! JSON numbers do not survive that range in common clients.
//!
//! ## Endpoints
//!
//! | Method | Path                               | Description                        |
//! |--------|------------------------------------|------------------------------------|
//! | GET    | `/health`                          | Liveness probe                     |
//! | GET    | `/status`                          | Node status summary                |
//! | GET    | `/ws`                              | WebSocket for live token events    |
//! | POST   | `/tokens`                          | Create an asset token              |
//! | GET    | `/tokens`                          | List hosted tokens                 |
//! | GET    | `/tokens/:id`                      | Token detail                       |
//! | POST   | `/tokens/:id/buy`                  | Contribute to the funding round    |
//! | POST   | `/tokens/:id/reclaim`              | Refund out of a failed round       |
//! | POST   | `/tokens/:id/activate`             | Submit the custodian attestation   |
//! | POST   | `/tokens/:id/sell`                 | Sell tokens back to the broker     |
//! | POST   | `/tokens/:id/transfer`             | Transfer between holders           |
//! | POST   | `/tokens/:id/liquidate`            | Broker pays a holder out           |
//! | POST   | `/tokens/:id/payouts`              | Deposit revenue for distribution   |
//! | GET    | `/tokens/:id/payouts`              | List payouts                       |
//! | POST   | `/tokens/:id/payouts/:index/claim` | Claim a payout share               |
//! | GET    | `/tokens/:id/balances/:account`    | Holder balance                     |
//! | POST   | `/brokers`                         | Register a broker                  |
//! | GET    | `/brokers`                         | List registered brokers            |
//! | POST   | `/treasury/fund`                   | Credit an account (devnet faucet)  |
//! | GET    | `/treasury/:account`               | Treasury account balance           |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Request, State,
    },
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use keel_core::account::Account;
use keel_core::custody::Attestation;
use keel_core::treasury::Treasury;
use keel_token::asset_token::{AssetToken, Stage, TokenError, TokenEvent, TokenId};
use keel_token::registry::{BrokerRegistry, RegistryError};
use keel_token::store::TokenStore;

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Network identifier (e.g., "devnet", "testnet", "mainnet").
    pub network: String,
    /// When this node process started, for uptime reporting.
    pub started_at: DateTime<Utc>,
    /// Every token instance hosted by this node, keyed by id.
    ///
    /// Write access through the map gives each token a single writer at a
    /// time, which the state machine's commit discipline relies on.
    pub tokens: Arc<DashMap<TokenId, AssetToken>>,
    /// Platform broker registry. An account must be listed here before it
    /// can be named as the broker of a new token.
    pub registry: Arc<Mutex<BrokerRegistry>>,
    /// Platform treasury holding every participant's money balance.
    pub treasury: Arc<Mutex<Treasury>>,
    /// Persistent storage for tokens, the registry, and the treasury.
    pub store: TokenStore,
    /// Broadcast channel for live token event notifications.
    pub event_tx: broadcast::Sender<EventEnvelope>,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

/// Events pushed to WebSocket subscribers, tagged with the emitting token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Hex-encoded id of the token the event belongs to.
    pub token: String,
    /// The token lifecycle event.
    pub event: TokenEvent,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, tracing, and
/// request accounting.
///
/// The returned router is ready to be served on the configured RPC port.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/ws", get(ws_handler))
        .route(
            "/tokens",
            post(create_token_handler).get(list_tokens_handler),
        )
        .route("/tokens/:id", get(token_detail_handler))
        .route("/tokens/:id/buy", post(buy_handler))
        .route("/tokens/:id/reclaim", post(reclaim_handler))
        .route("/tokens/:id/activate", post(activate_handler))
        .route("/tokens/:id/sell", post(sell_handler))
        .route("/tokens/:id/transfer", post(transfer_handler))
        .route("/tokens/:id/liquidate", post(liquidate_handler))
        .route(
            "/tokens/:id/payouts",
            post(deposit_payout_handler).get(list_payouts_handler),
        )
        .route(
            "/tokens/:id/payouts/:index/claim",
            post(claim_payout_handler),
        )
        .route("/tokens/:id/balances/:account", get(token_balance_handler))
        .route("/brokers", post(add_broker_handler).get(list_brokers_handler))
        .route("/treasury/fund", post(fund_treasury_handler))
        .route("/treasury/:account", get(treasury_balance_handler))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Counts every API request and samples its latency for Prometheus.
async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.metrics.api_requests_total.inc();
    let timer = state.metrics.operation_latency_seconds.start_timer();
    let response = next.run(request).await;
    timer.observe_duration();
    response
}

// ---------------------------------------------------------------------------
// Request & Response Types
// ---------------------------------------------------------------------------

/// Request payload for `POST /tokens`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTokenRequest {
    /// Human-readable asset name.
    pub name: String,
    /// Short ticker symbol. Pinned by the custodian's attestation later.
    pub symbol: String,
    /// Hex-encoded broker account. Must be registered with the platform.
    pub broker: String,
    /// Hex-encoded custodian account whose attestation activates the token.
    pub custodian: String,
    /// Funding deadline (RFC 3339). Must lie in the future.
    pub deadline: DateTime<Utc>,
    /// Funding cap in base units, as a decimal string.
    pub supply_cap: String,
}

/// Abbreviated token listing entry for `GET /tokens`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenSummary {
    /// Hex-encoded token id.
    pub id: String,
    /// Human-readable asset name.
    pub name: String,
    /// Short ticker symbol.
    pub symbol: String,
    /// Current lifecycle stage.
    pub stage: Stage,
    /// Total raised so far, in base units.
    pub raised: String,
    /// Funding cap in base units.
    pub supply_cap: String,
    /// Funding deadline.
    pub deadline: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Full token detail for `GET /tokens/:id` and creation responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenDetail {
    /// Hex-encoded token id.
    pub id: String,
    /// Human-readable asset name.
    pub name: String,
    /// Short ticker symbol.
    pub symbol: String,
    /// Hex-encoded broker account.
    pub broker: String,
    /// Hex-encoded custodian account.
    pub custodian: String,
    /// Current lifecycle stage.
    pub stage: Stage,
    /// Funding deadline.
    pub deadline: DateTime<Utc>,
    /// Funding cap in base units.
    pub supply_cap: String,
    /// Total raised during the funding round, in base units.
    pub raised: String,
    /// Cap headroom still open to contributions, in base units.
    pub remaining_cap: String,
    /// Value currently escrowed inside the token, in base units.
    pub held_value: String,
    /// Circulating token supply, in base units.
    pub circulating: String,
    /// Number of accounts holding a nonzero balance.
    pub holder_count: u64,
    /// Number of payouts deposited so far.
    pub payout_count: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl TokenDetail {
    /// Snapshot of a token's externally visible state.
    fn from_token(token: &AssetToken) -> Self {
        Self {
            id: token.id.to_string(),
            name: token.name.clone(),
            symbol: token.symbol.clone(),
            broker: token.broker.to_hex(),
            custodian: token.custodian.to_hex(),
            stage: token.stage(),
            deadline: token.deadline,
            supply_cap: token.supply_cap.to_string(),
            raised: token.raised().to_string(),
            remaining_cap: token.remaining_cap().to_string(),
            held_value: token.held_value().to_string(),
            circulating: token.circulating().to_string(),
            holder_count: token.holder_count() as u64,
            payout_count: token.payouts().len() as u64,
            created_at: token.created_at,
        }
    }
}

/// Request payload for `POST /tokens/:id/buy`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BuyRequest {
    /// Hex-encoded contributor account.
    pub contributor: String,
    /// Contribution amount in base units, as a decimal string.
    pub amount: String,
}

/// Response payload for funding contributions.
#[derive(Debug, Serialize, Deserialize)]
pub struct BuyResponse {
    /// The contributor's token balance after the purchase, in base units.
    pub balance: String,
    /// Lifecycle stage after the purchase. Flips to `Pending` on exact fill.
    pub stage: Stage,
}

/// Request payload for `POST /tokens/:id/reclaim`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReclaimRequest {
    /// Hex-encoded account reclaiming its contribution.
    pub account: String,
}

/// Response payload for refund claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReclaimResponse {
    /// Amount refunded to the caller's treasury account, in base units.
    pub refunded: String,
    /// Lifecycle stage after the reclaim.
    pub stage: Stage,
}

/// Request payload for `POST /tokens/:id/activate`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActivateRequest {
    /// Recovery id of the custodian signature (27 or 28).
    pub v: u8,
    /// Hex-encoded first signature half (32 bytes).
    pub r: String,
    /// Hex-encoded second signature half (32 bytes).
    pub s: String,
}

/// Response payload for successful activation.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActivateResponse {
    /// Escrowed value forwarded to the broker, in base units.
    pub forwarded: String,
    /// Lifecycle stage after activation. Always `Active`.
    pub stage: Stage,
}

/// Request payload for `POST /tokens/:id/sell`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SellRequest {
    /// Hex-encoded holder selling back to the broker.
    pub seller: String,
    /// Token amount in base units, as a decimal string.
    pub amount: String,
}

/// Request payload for `POST /tokens/:id/transfer`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Hex-encoded sender account.
    pub from: String,
    /// Hex-encoded recipient account.
    pub to: String,
    /// Token amount in base units, as a decimal string.
    pub amount: String,
}

/// Request payload for `POST /tokens/:id/liquidate`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LiquidateRequest {
    /// Hex-encoded caller. Must be the token's broker.
    pub caller: String,
    /// Hex-encoded holder being paid out.
    pub recipient: String,
    /// Money amount in base units, as a decimal string.
    pub amount: String,
}

/// Request payload for `POST /tokens/:id/payouts`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DepositPayoutRequest {
    /// Hex-encoded depositor account.
    pub depositor: String,
    /// Revenue amount in base units, as a decimal string.
    pub amount: String,
}

/// Response payload for `POST /tokens/:id/payouts`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DepositPayoutResponse {
    /// Index of the new payout, numbered from zero.
    pub index: u64,
}

/// Payout listing entry for `GET /tokens/:id/payouts`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PayoutSummary {
    /// Payout index, numbered from zero.
    pub index: u64,
    /// Hex-encoded depositor account.
    pub depositor: String,
    /// Deposited amount in base units.
    pub amount: String,
    /// Ledger sequence the claims settle against.
    pub sequence_point: u64,
    /// Circulating supply at the deposit instant, in base units.
    pub circulating_at_deposit: String,
    /// Deposit timestamp.
    pub deposited_at: DateTime<Utc>,
    /// Number of accounts that have claimed so far.
    pub claim_count: u64,
}

/// Request payload for `POST /tokens/:id/payouts/:index/claim`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Hex-encoded claimant account.
    pub claimant: String,
}

/// Response payload for a successful claim.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimResponse {
    /// Share paid to the claimant's treasury account, in base units.
    pub amount: String,
}

/// Request payload for `POST /brokers`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AddBrokerRequest {
    /// Hex-encoded caller. Must be the platform owner.
    pub caller: String,
    /// Hex-encoded broker account to register.
    pub broker: String,
}

/// Response payload for the broker registry endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct BrokersResponse {
    /// Hex-encoded platform owner.
    pub owner: String,
    /// Hex-encoded registered brokers, in registration order.
    pub brokers: Vec<String>,
}

/// Request payload for `POST /treasury/fund`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FundRequest {
    /// Hex-encoded account to credit.
    pub account: String,
    /// Amount in base units, as a decimal string.
    pub amount: String,
}

/// Account balance payload shared by the balance-reporting endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    /// Hex-encoded account the balance belongs to.
    pub account: String,
    /// Balance in base units.
    pub balance: String,
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Node software version.
    pub version: String,
    /// Network identifier.
    pub network: String,
    /// Number of token instances hosted by this node.
    pub tokens_hosted: u64,
    /// Total value escrowed across all hosted tokens, in base units.
    pub escrowed_value: String,
    /// Seconds since the node process started.
    pub uptime_seconds: u64,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Error Mapping & Helpers
// ---------------------------------------------------------------------------

/// Maps a [`TokenError`] to the HTTP status it surfaces as.
///
/// Rejections that conflict with current token state are 409, bad inputs
/// are 400, missing resources 404, and authorization failures 403.
fn token_error_status(err: &TokenError) -> StatusCode {
    match err {
        TokenError::UnknownPayout { .. } => StatusCode::NOT_FOUND,
        TokenError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        TokenError::WrongStage { .. }
        | TokenError::CapExceeded { .. }
        | TokenError::NotExpired { .. }
        | TokenError::AlreadyClaimed { .. }
        | TokenError::NoEntitlement { .. }
        | TokenError::Ledger(_) => StatusCode::CONFLICT,
        TokenError::InvalidParams { .. }
        | TokenError::InvalidAmount
        | TokenError::InvalidSignature(_) => StatusCode::BAD_REQUEST,
        TokenError::TransferFailed(_) | TokenError::ArithmeticOverflow => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Builds the uniform JSON error response body.
fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Shorthand for the token error mapping.
fn token_error(err: TokenError) -> Response {
    error_response(token_error_status(&err), err.to_string())
}

/// Parses a hex account string or produces the 400 response.
fn parse_account(field: &str, s: &str) -> Result<Account, Response> {
    Account::from_hex(s)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("invalid {}: {}", field, e)))
}

/// Parses a decimal base-unit amount string or produces the 400 response.
fn parse_amount(field: &str, s: &str) -> Result<u128, Response> {
    s.parse::<u128>().map_err(|_| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("invalid {}: expected a decimal base-unit amount", field),
        )
    })
}

/// Parses a hex token id or produces the 400 response.
fn parse_token_id(s: &str) -> Result<TokenId, Response> {
    s.parse::<TokenId>()
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))
}

/// Parses one 32-byte hex signature half or produces the 400 response.
fn parse_signature_half(field: &str, s: &str) -> Result<[u8; 32], Response> {
    let bytes = hex::decode(s).map_err(|_| {
        error_response(StatusCode::BAD_REQUEST, format!("invalid {}: not hex", field))
    })?;
    bytes.try_into().map_err(|_| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("invalid {}: expected 32 bytes", field),
        )
    })
}

/// Looks up a token for reading, or produces the 404 response.
fn token_ref<'a>(
    state: &'a AppState,
    id: &TokenId,
) -> Result<Ref<'a, TokenId, AssetToken>, Response> {
    state
        .tokens
        .get(id)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("unknown token {}", id)))
}

/// Looks up a token for mutation, or produces the 404 response.
///
/// The returned guard holds the map shard's write lock, making the caller
/// the token's single writer until it drops.
fn token_entry<'a>(
    state: &'a AppState,
    id: &TokenId,
) -> Result<RefMut<'a, TokenId, AssetToken>, Response> {
    state
        .tokens
        .get_mut(id)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("unknown token {}", id)))
}

// The in-memory token set is authoritative for a running node; a failed
// store write is logged, not unwound.

fn persist_token(state: &AppState, token: &AssetToken) {
    if let Err(e) = state.store.put_token(token) {
        tracing::error!(token = %token.id, "failed to persist token: {}", e);
    }
}

fn persist_treasury(state: &AppState, treasury: &Treasury) {
    if let Err(e) = state.store.put_treasury(treasury) {
        tracing::error!("failed to persist treasury: {}", e);
    }
}

fn persist_registry(state: &AppState, registry: &BrokerRegistry) {
    if let Err(e) = state.store.put_registry(registry) {
        tracing::error!("failed to persist broker registry: {}", e);
    }
}

/// Drains the token's queued events and fans them out to WebSocket
/// subscribers. A send error only means nobody is listening.
fn publish_events(state: &AppState, token: &mut AssetToken) {
    let id = token.id.to_string();
    for event in token.drain_events() {
        let _ = state.event_tx.send(EventEnvelope {
            token: id.clone(),
            event,
        });
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` returns 200 if the node is alive.
///
/// This is the liveness probe for orchestrators (k8s, systemd, etc.).
/// It intentionally does not check internal subsystem health; that
/// belongs in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` returns the node status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let escrowed: u128 = state.tokens.iter().map(|t| t.held_value()).sum();
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    let resp = StatusResponse {
        version: state.version.clone(),
        network: state.network.clone(),
        tokens_hosted: state.tokens.len() as u64,
        escrowed_value: escrowed.to_string(),
        uptime_seconds: uptime,
        timestamp: Utc::now().to_rfc3339(),
    };
    Json(resp)
}

/// `GET /ws` upgrades to a WebSocket for live event streaming.
///
/// Clients receive JSON-encoded [`EventEnvelope`] messages for each token
/// lifecycle event. The connection is read-only from the server's
/// perspective; client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Drives a single WebSocket connection, forwarding broadcast events
/// until the client disconnects or the channel is closed.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(envelope) => {
                        let payload = match serde_json::to_string(&envelope) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            // Client disconnected.
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {
                        // Client messages are ignored; this is a push-only channel.
                    }
                    _ => break, // Disconnected or error.
                }
            }
        }
    }
}

/// `POST /tokens` creates a new asset token in the `Funding` stage.
///
/// The named broker must already be registered with the platform. Returns
/// 201 with the full token detail on success.
async fn create_token_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateTokenRequest>,
) -> Result<Response, Response> {
    let broker = parse_account("broker", &req.broker)?;
    let custodian = parse_account("custodian", &req.custodian)?;
    let supply_cap = parse_amount("supply_cap", &req.supply_cap)?;

    if !state.registry.lock().is_broker(&broker) {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            format!("broker {} is not registered", broker),
        ));
    }

    let mut token = AssetToken::new(
        req.name,
        req.symbol,
        broker,
        custodian,
        req.deadline,
        supply_cap,
    )
    .map_err(token_error)?;

    let detail = TokenDetail::from_token(&token);
    persist_token(&state, &token);
    publish_events(&state, &mut token);
    state.tokens.insert(token.id, token);
    state.metrics.tokens_created_total.inc();

    Ok((StatusCode::CREATED, Json(detail)).into_response())
}

/// `GET /tokens` lists every hosted token, oldest first.
async fn list_tokens_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut summaries: Vec<TokenSummary> = state
        .tokens
        .iter()
        .map(|t| TokenSummary {
            id: t.id.to_string(),
            name: t.name.clone(),
            symbol: t.symbol.clone(),
            stage: t.stage(),
            raised: t.raised().to_string(),
            supply_cap: t.supply_cap.to_string(),
            deadline: t.deadline,
            created_at: t.created_at,
        })
        .collect();
    summaries.sort_by_key(|s| s.created_at);
    Json(summaries)
}

/// `GET /tokens/:id` returns the full token detail.
async fn token_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let id = parse_token_id(&id)?;
    let token = token_ref(&state, &id)?;
    Ok(Json(TokenDetail::from_token(&token)).into_response())
}

/// `POST /tokens/:id/buy` contributes to an open funding round.
///
/// The contribution is paid out of the contributor's treasury account into
/// the token's escrow. A rejected contribution is returned in full; there
/// are no partial fills.
async fn buy_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<BuyRequest>,
) -> Result<Response, Response> {
    let id = parse_token_id(&id)?;
    let contributor = parse_account("contributor", &req.contributor)?;
    let amount = parse_amount("amount", &req.amount)?;

    let mut token = token_entry(&state, &id)?;
    let mut treasury = state.treasury.lock();

    treasury
        .withdraw(contributor, amount)
        .map_err(|e| error_response(StatusCode::CONFLICT, e.to_string()))?;

    match token.buy(contributor, amount) {
        Ok(balance) => {
            state.metrics.contributions_total.inc();
            persist_token(&state, &token);
            persist_treasury(&state, &treasury);
            publish_events(&state, &mut token);
            Ok(Json(BuyResponse {
                balance: balance.to_string(),
                stage: token.stage(),
            })
            .into_response())
        }
        Err(e) => {
            // Rejected contributions go back where they came from. Cannot
            // overflow: the same amount was withdrawn a moment ago.
            let _ = treasury.issue(contributor, amount);
            Err(token_error(e))
        }
    }
}

/// `POST /tokens/:id/reclaim` refunds the caller's full contribution out
/// of an expired or failed funding round.
///
/// The first reclaim after the deadline flips the token to `Failed`.
async fn reclaim_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReclaimRequest>,
) -> Result<Response, Response> {
    let id = parse_token_id(&id)?;
    let account = parse_account("account", &req.account)?;

    let mut token = token_entry(&state, &id)?;
    let mut treasury = state.treasury.lock();

    match token.reclaim(account, &mut treasury) {
        Ok(refunded) => {
            state.metrics.reclaims_total.inc();
            persist_token(&state, &token);
            persist_treasury(&state, &treasury);
            publish_events(&state, &mut token);
            Ok(Json(ReclaimResponse {
                refunded: refunded.to_string(),
                stage: token.stage(),
            })
            .into_response())
        }
        Err(e) => Err(token_error(e)),
    }
}

/// `POST /tokens/:id/activate` submits the custodian attestation for a
/// fully funded token.
///
/// On success the entire escrow moves to the broker's treasury account and
/// the token becomes `Active`. A rejected attestation leaves the token in
/// `Pending`; activation may be retried.
async fn activate_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActivateRequest>,
) -> Result<Response, Response> {
    let id = parse_token_id(&id)?;
    let r = parse_signature_half("r", &req.r)?;
    let s = parse_signature_half("s", &req.s)?;
    let attestation = Attestation { v: req.v, r, s };

    let mut token = token_entry(&state, &id)?;
    let mut treasury = state.treasury.lock();

    match token.activate(&attestation, &mut treasury) {
        Ok(forwarded) => {
            state.metrics.activations_total.inc();
            persist_token(&state, &token);
            persist_treasury(&state, &treasury);
            publish_events(&state, &mut token);
            Ok(Json(ActivateResponse {
                forwarded: forwarded.to_string(),
                stage: token.stage(),
            })
            .into_response())
        }
        Err(e) => Err(token_error(e)),
    }
}

/// `POST /tokens/:id/sell` moves tokens from a holder back to the broker's
/// pool. The money leg is settled separately via liquidate.
async fn sell_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SellRequest>,
) -> Result<Response, Response> {
    let id = parse_token_id(&id)?;
    let seller = parse_account("seller", &req.seller)?;
    let amount = parse_amount("amount", &req.amount)?;

    let mut token = token_entry(&state, &id)?;
    match token.sell(seller, amount) {
        Ok(()) => {
            persist_token(&state, &token);
            Ok(Json(BalanceResponse {
                account: seller.to_hex(),
                balance: token.balance_of(&seller).to_string(),
            })
            .into_response())
        }
        Err(e) => Err(token_error(e)),
    }
}

/// `POST /tokens/:id/transfer` moves tokens between two holders.
async fn transfer_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TransferRequest>,
) -> Result<Response, Response> {
    let id = parse_token_id(&id)?;
    let from = parse_account("from", &req.from)?;
    let to = parse_account("to", &req.to)?;
    let amount = parse_amount("amount", &req.amount)?;

    let mut token = token_entry(&state, &id)?;
    match token.transfer(from, to, amount) {
        Ok(()) => {
            persist_token(&state, &token);
            Ok(Json(BalanceResponse {
                account: from.to_hex(),
                balance: token.balance_of(&from).to_string(),
            })
            .into_response())
        }
        Err(e) => Err(token_error(e)),
    }
}

/// `POST /tokens/:id/liquidate` pays a holder out of the broker's treasury
/// account. Only the token's broker may call this; token balances are not
/// touched.
async fn liquidate_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<LiquidateRequest>,
) -> Result<Response, Response> {
    let id = parse_token_id(&id)?;
    let caller = parse_account("caller", &req.caller)?;
    let recipient = parse_account("recipient", &req.recipient)?;
    let amount = parse_amount("amount", &req.amount)?;

    let mut token = token_entry(&state, &id)?;
    let mut treasury = state.treasury.lock();

    // The broker funds liquidations from its own treasury account.
    treasury
        .withdraw(caller, amount)
        .map_err(|e| error_response(StatusCode::CONFLICT, e.to_string()))?;

    match token.liquidate(caller, recipient, amount, &mut treasury) {
        Ok(()) => {
            persist_token(&state, &token);
            persist_treasury(&state, &treasury);
            Ok(Json(BalanceResponse {
                account: recipient.to_hex(),
                balance: treasury.balance_of(&recipient).to_string(),
            })
            .into_response())
        }
        Err(e) => {
            let _ = treasury.issue(caller, amount);
            Err(token_error(e))
        }
    }
}

/// `POST /tokens/:id/payouts` deposits revenue for distribution to holders.
///
/// The deposit is paid out of the depositor's treasury account into the
/// token's escrow. Returns 201 with the new payout's index.
async fn deposit_payout_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DepositPayoutRequest>,
) -> Result<Response, Response> {
    let id = parse_token_id(&id)?;
    let depositor = parse_account("depositor", &req.depositor)?;
    let amount = parse_amount("amount", &req.amount)?;

    let mut token = token_entry(&state, &id)?;
    let mut treasury = state.treasury.lock();

    treasury
        .withdraw(depositor, amount)
        .map_err(|e| error_response(StatusCode::CONFLICT, e.to_string()))?;

    match token.deposit_payout(depositor, amount) {
        Ok(index) => {
            state.metrics.payouts_deposited_total.inc();
            persist_token(&state, &token);
            persist_treasury(&state, &treasury);
            publish_events(&state, &mut token);
            Ok((
                StatusCode::CREATED,
                Json(DepositPayoutResponse {
                    index: index as u64,
                }),
            )
                .into_response())
        }
        Err(e) => {
            let _ = treasury.issue(depositor, amount);
            Err(token_error(e))
        }
    }
}

/// `GET /tokens/:id/payouts` lists the token's payouts in deposit order.
async fn list_payouts_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let id = parse_token_id(&id)?;
    let token = token_ref(&state, &id)?;
    let payouts: Vec<PayoutSummary> = token
        .payouts()
        .iter()
        .enumerate()
        .map(|(index, p)| PayoutSummary {
            index: index as u64,
            depositor: p.depositor.to_hex(),
            amount: p.amount.to_string(),
            sequence_point: p.sequence_point,
            circulating_at_deposit: p.circulating_at_deposit.to_string(),
            deposited_at: p.deposited_at,
            claim_count: p.claim_count() as u64,
        })
        .collect();
    Ok(Json(payouts).into_response())
}

/// `POST /tokens/:id/payouts/:index/claim` pays the claimant its share of
/// a payout into its treasury account.
///
/// Each account may claim each payout once. Shares settle against balances
/// as of the deposit instant, so tokens bought afterwards earn nothing.
async fn claim_payout_handler(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
    Json(req): Json<ClaimRequest>,
) -> Result<Response, Response> {
    let id = parse_token_id(&id)?;
    let claimant = parse_account("claimant", &req.claimant)?;

    let mut token = token_entry(&state, &id)?;
    let mut treasury = state.treasury.lock();

    match token.claim_payout(claimant, index, &mut treasury) {
        Ok(amount) => {
            state.metrics.claims_total.inc();
            persist_token(&state, &token);
            persist_treasury(&state, &treasury);
            publish_events(&state, &mut token);
            Ok(Json(ClaimResponse {
                amount: amount.to_string(),
            })
            .into_response())
        }
        Err(e) => Err(token_error(e)),
    }
}

/// `GET /tokens/:id/balances/:account` returns a holder's token balance.
///
/// Accounts that never held the token report zero.
async fn token_balance_handler(
    State(state): State<AppState>,
    Path((id, account)): Path<(String, String)>,
) -> Result<Response, Response> {
    let id = parse_token_id(&id)?;
    let account = parse_account("account", &account)?;
    let token = token_ref(&state, &id)?;
    Ok(Json(BalanceResponse {
        account: account.to_hex(),
        balance: token.balance_of(&account).to_string(),
    })
    .into_response())
}

/// `POST /brokers` registers a broker with the platform.
///
/// Only the platform owner may register brokers. Returns 201 with the
/// updated registry.
async fn add_broker_handler(
    State(state): State<AppState>,
    Json(req): Json<AddBrokerRequest>,
) -> Result<Response, Response> {
    let caller = parse_account("caller", &req.caller)?;
    let broker = parse_account("broker", &req.broker)?;

    let mut registry = state.registry.lock();
    match registry.add_broker(caller, broker) {
        Ok(()) => {
            persist_registry(&state, &registry);
            Ok((
                StatusCode::CREATED,
                Json(BrokersResponse {
                    owner: registry.owner().to_hex(),
                    brokers: registry.brokers().iter().map(Account::to_hex).collect(),
                }),
            )
                .into_response())
        }
        Err(e) => {
            let status = match e {
                RegistryError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                RegistryError::DuplicateBroker { .. } => StatusCode::CONFLICT,
            };
            Err(error_response(status, e.to_string()))
        }
    }
}

/// `GET /brokers` lists the platform owner and all registered brokers.
async fn list_brokers_handler(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.lock();
    Json(BrokersResponse {
        owner: registry.owner().to_hex(),
        brokers: registry.brokers().iter().map(Account::to_hex).collect(),
    })
}

/// `POST /treasury/fund` credits an account with fresh funds.
///
/// This is the devnet faucet. Production deployments pair treasury credits
/// with an external settlement rail instead.
async fn fund_treasury_handler(
    State(state): State<AppState>,
    Json(req): Json<FundRequest>,
) -> Result<Response, Response> {
    let account = parse_account("account", &req.account)?;
    let amount = parse_amount("amount", &req.amount)?;

    let mut treasury = state.treasury.lock();
    treasury
        .issue(account, amount)
        .map_err(|e| error_response(StatusCode::CONFLICT, e.to_string()))?;
    persist_treasury(&state, &treasury);

    Ok(Json(BalanceResponse {
        account: account.to_hex(),
        balance: treasury.balance_of(&account).to_string(),
    })
    .into_response())
}

/// `GET /treasury/:account` returns an account's treasury balance.
async fn treasury_balance_handler(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Response, Response> {
    let account = parse_account("account", &account)?;
    let balance = state.treasury.lock().balance_of(&account);
    Ok(Json(BalanceResponse {
        account: account.to_hex(),
        balance: balance.to_string(),
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
