use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        FromRequest, Path, Query, Request, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::Response,
    routing::{delete, get, post},
};

use crate::{
    errors::EngineError,
    exchange::UserOrder,
    instrument::Pair,
    orderbook::{BookSnapshot, LiquidityStatus},
    orders::{OrderId, OrderType, Price, Quantity, Side, UserId},
    state::{AppState, TradeEvent},
    trade::Trade,
};

type ApiErr = (StatusCode, Json<serde_json::Value>);

fn err(status: StatusCode, msg: &str) -> ApiErr {
    (status, Json(json!({ "error": msg })))
}

fn engine_err(e: &EngineError) -> ApiErr {
    let status = match e {
        EngineError::UnknownOrder(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidSize
        | EngineError::UnknownMarket(_)
        | EngineError::InsufficientLiquidity => StatusCode::BAD_REQUEST,
    };
    err(status, &e.to_string())
}

fn parse_market(s: &str) -> Result<Pair, ApiErr> {
    s.parse()
        .map_err(|_| err(StatusCode::BAD_REQUEST, &format!("unsupported market `{s}`")))
}

fn log_rejected(payload: &NewOrder, reason: &str) {
    warn!(
        reason,
        user_id = payload.user_id,
        side = ?payload.side,
        order_type = ?payload.order_type,
        price = ?payload.price,
        quantity = payload.quantity,
        market = %payload.pair,
        "order rejected"
    );
}

/// JSON extractor that logs rejected payloads before returning 422, with the
/// body preview capped to keep the log line bounded.
pub struct LoggedJson<T>(pub T);

impl<S, T> FromRequest<S> for LoggedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiErr;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| err(StatusCode::BAD_REQUEST, &e.to_string()))?;

        match serde_json::from_slice::<T>(&bytes) {
            Ok(val) => Ok(LoggedJson(val)),
            Err(e) => {
                let preview = String::from_utf8_lossy(&bytes);
                let preview = &preview[..preview.len().min(4096)];
                warn!(
                    error = %e,
                    %method,
                    uri = %uri,
                    body_preview = %preview,
                    "request rejected: JSON deserialization failed"
                );
                Err(err(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()))
            }
        }
    }
}

/// Request payload for `POST /orders`.
///
/// - `user_id`: opaque identifier of the submitting user
/// - `side`: buy or sell
/// - `order_type`: limit or market
/// - `price`: limit price in ticks (required for limit, ignored for market)
/// - `quantity`: how many base units to trade
/// - `symbol`: market code, e.g. `"ETH-USD"`
#[derive(Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: UserId,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub quantity: Quantity,
    #[serde(rename = "symbol")]
    pub pair: Pair,
}

/// Response for `POST /orders`.
///
/// - `order_id`: the engine-assigned order id
/// - `trades`: trades produced by this submission, in execution order
/// - `status`: liquidity outcome, present for market orders only
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: OrderId,
    pub trades: Vec<Trade>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LiquidityStatus>,
}

#[derive(Serialize, Deserialize)]
pub struct PriceResponse {
    pub price: Price,
}

#[derive(Serialize, Deserialize)]
pub struct UserOrdersResponse {
    pub bids: Vec<UserOrder>,
    pub asks: Vec<UserOrder>,
}

fn default_limit() -> usize {
    100
}

#[derive(Deserialize)]
pub struct TradesQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

/// A websocket frame: either a snapshot of the order book or a single trade
/// event.
///
/// Serialized as an internally-tagged enum:
/// ```text
/// {"type": "BookSnapshot", "data": { /* snapshot fields */ }}
/// {"type": "Trade", "data": { /* trade fields */ }}
/// ```
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsFrame {
    BookSnapshot(BookSnapshot),
    Trade(TradeEvent),
}

/// `POST /orders`
/// Places a limit or market order.
///
/// *Success:* 200, JSON [`OrderAck`]
/// *Bad request:* 400, JSON `{ "error": ... }` (validation or liquidity)
/// *Malformed body:* 422
pub async fn create_order(
    State(state): State<AppState>,
    LoggedJson(payload): LoggedJson<NewOrder>,
) -> Result<Json<OrderAck>, ApiErr> {
    if payload.quantity == 0 {
        log_rejected(&payload, "quantity must be > 0");
        return Err(err(StatusCode::BAD_REQUEST, "quantity must be > 0"));
    }

    let ack = match payload.order_type {
        OrderType::Limit => {
            let Some(price) = payload.price.filter(|&p| p > 0) else {
                log_rejected(&payload, "limit order requires a positive price");
                return Err(err(
                    StatusCode::BAD_REQUEST,
                    "limit order requires a positive price",
                ));
            };
            let (order_id, trades) = state
                .exchange
                .place_limit_order(&payload.pair, payload.side, price, payload.quantity, payload.user_id)
                .map_err(|e| {
                    log_rejected(&payload, &e.to_string());
                    engine_err(&e)
                })?;
            OrderAck {
                order_id,
                trades,
                status: None,
            }
        }
        OrderType::Market => {
            let fill = state
                .exchange
                .place_market_order(&payload.pair, payload.side, payload.quantity, payload.user_id)
                .map_err(|e| {
                    log_rejected(&payload, &e.to_string());
                    engine_err(&e)
                })?;
            OrderAck {
                order_id: fill.order_id,
                trades: fill.trades,
                status: Some(fill.status),
            }
        }
    };

    // publish market data only after the book lock has been released
    for trade in &ack.trades {
        let _ = state.trade_tx.send(TradeEvent {
            pair: payload.pair,
            trade: trade.clone(),
        });
    }
    let _ = state.book_tx.send(payload.pair);

    info!(
        order_id = ack.order_id,
        trades = ack.trades.len(),
        side = ?payload.side,
        order_type = ?payload.order_type,
        market = %payload.pair,
        "order accepted"
    );
    Ok(Json(ack))
}

/// `DELETE /orders/{market}/{id}`
/// Cancels the resting order with the given id.
///
/// *Success:* 200, JSON `{ "status": "cancelled" }`
/// *Failure:* 404 if the id is not resting, 400 for an unknown market.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path((market, order_id)): Path<(String, OrderId)>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let pair = parse_market(&market)?;
    match state.exchange.cancel_order(&pair, order_id) {
        Ok(()) => {
            info!(order_id, market = %pair, "order cancelled");
            let _ = state.book_tx.send(pair);
            Ok(Json(json!({ "status": "cancelled" })))
        }
        Err(e) => {
            warn!(order_id, market = %pair, error = %e, "cancel failed");
            Err(engine_err(&e))
        }
    }
}

/// `GET /book/{market}`
/// Returns a JSON snapshot of the current order book with per-side totals.
pub async fn get_order_book(
    Path(market): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BookSnapshot>, ApiErr> {
    let pair = parse_market(&market)?;
    let snapshot = state.exchange.snapshot(&pair).map_err(|e| engine_err(&e))?;
    Ok(Json(snapshot))
}

/// `GET /book/{market}/bid`
/// Best bid price, or zero when the side is empty.
pub async fn get_best_bid(
    Path(market): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PriceResponse>, ApiErr> {
    let pair = parse_market(&market)?;
    let price = state
        .exchange
        .best_bid(&pair)
        .map_err(|e| engine_err(&e))?
        .unwrap_or(0);
    Ok(Json(PriceResponse { price }))
}

/// `GET /book/{market}/ask`
/// Best ask price, or zero when the side is empty.
pub async fn get_best_ask(
    Path(market): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PriceResponse>, ApiErr> {
    let pair = parse_market(&market)?;
    let price = state
        .exchange
        .best_ask(&pair)
        .map_err(|e| engine_err(&e))?
        .unwrap_or(0);
    Ok(Json(PriceResponse { price }))
}

/// `GET /trades/{market}?limit=N`
/// Returns the most recent trades for the market, oldest first. `limit`
/// defaults to 100 and is capped at 1000.
pub async fn get_trade_log(
    Path(market): Path<String>,
    State(state): State<AppState>,
    Query(q): Query<TradesQuery>,
) -> Result<Json<Vec<Trade>>, ApiErr> {
    let pair = parse_market(&market)?;
    let trades = state.exchange.trades(&pair).map_err(|e| engine_err(&e))?;
    let limit = q.limit.min(1000);
    let start = trades.len().saturating_sub(limit);
    Ok(Json(trades[start..].to_vec()))
}

/// `GET /orders/user/{user_id}`
/// Live orders of one user across all markets, grouped by side.
pub async fn get_user_orders(
    Path(user_id): Path<UserId>,
    State(state): State<AppState>,
) -> Json<UserOrdersResponse> {
    let (bids, asks) = state
        .exchange
        .user_orders(user_id)
        .into_iter()
        .partition(|o| o.order.side == Side::Buy);
    Json(UserOrdersResponse { bids, asks })
}

/// `GET /ws/{market}`
/// Upgrades to a WebSocket and streams order book snapshots and trade events
/// for one market.
pub async fn ws_handler(
    Path(market): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiErr> {
    let pair = parse_market(&market)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, pair)))
}

/// Drives one upgraded socket: sends an initial snapshot, then forwards
/// trade and book-update broadcasts for the subscribed market.
pub async fn handle_socket(mut socket: WebSocket, state: AppState, pair: Pair) {
    let mut trade_rx = state.trade_tx.subscribe();
    let mut book_rx = state.book_tx.subscribe();

    let initial = state
        .exchange
        .snapshot(&pair)
        .unwrap_or_else(|_| BookSnapshot::empty(pair));
    if let Err(e) = send_frame(&mut socket, &WsFrame::BookSnapshot(initial)).await {
        error!(market = %pair, "failed to send initial snapshot: {e:?}");
        return;
    }

    loop {
        tokio::select! {
            Ok(event) = trade_rx.recv() => {
                if event.pair == pair
                    && send_frame(&mut socket, &WsFrame::Trade(event)).await.is_err()
                {
                    break;
                }
            }
            Ok(updated) = book_rx.recv() => {
                if updated == pair {
                    let Ok(snap) = state.exchange.snapshot(&pair) else { break };
                    if send_frame(&mut socket, &WsFrame::BookSnapshot(snap)).await.is_err() {
                        break;
                    }
                }
            }
            else => break,
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &WsFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).expect("ws frames serialize");
    socket.send(Message::Text(text.into())).await
}

/// Constructs the application's `Router` with all routes and shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/{market}/{id}", delete(cancel_order))
        .route("/orders/user/{user_id}", get(get_user_orders))
        .route("/trades/{market}", get(get_trade_log))
        .route("/book/{market}", get(get_order_book))
        .route("/book/{market}/bid", get(get_best_bid))
        .route("/book/{market}/ask", get(get_best_ask))
        .route("/ws/{market}", get(ws_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(false)
                        .level(tracing::Level::TRACE),
                )
                .on_response(DefaultOnResponse::new().level(tracing::Level::TRACE)),
        )
        .with_state(state)
}
