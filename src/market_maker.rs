//! Two-sided quoting bot.
//!
//! Listens to the engine's WebSocket feed for book snapshots, tracks the
//! midpoint between best bid and best ask, and keeps a fresh buy quote just
//! below it and a sell quote just above it, cancelling the previous pair
//! whenever the mid moves. The spread between the two quotes is the maker's
//! edge; requoting only on real mid moves keeps the cancel/post churn down.

use futures_util::StreamExt;
use tokio::{sync::watch, time};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMsg};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    api::{NewOrder, OrderAck, WsFrame},
    errors::MarketMakerError,
    instrument::Pair,
    orders::{OrderId, OrderType, Price, Side, UserId},
};

/// User id the maker quotes under.
const MM_USER: UserId = 1;
/// How far from mid to quote.
const SPREAD: Price = 2;
/// How many milliseconds between quote refreshes.
const PACE_MS: u64 = 500;
/// WebSocket connect attempts before giving up.
const MAX_CONNECT_ATTEMPTS: u32 = 50;

async fn post_quote(
    client: &reqwest::Client,
    api_base: &str,
    pair: Pair,
    side: Side,
    price: Price,
) -> Result<Option<OrderId>, MarketMakerError> {
    let resp = client
        .post(format!("{api_base}/orders"))
        .json(&NewOrder {
            user_id: MM_USER,
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity: 1,
            pair,
        })
        .send()
        .await?;
    if !resp.status().is_success() {
        warn!(market = %pair, ?side, price, status = %resp.status(), "quote rejected");
        return Ok(None);
    }
    let ack = resp.json::<OrderAck>().await?;
    Ok(Some(ack.order_id))
}

/// Runs the market maker loop against a REST+WS API at `api_base`.
///
/// 1. Connects to `ws://{api_base}/ws/{pair}` (retrying while the server
///    comes up) and spawns a task that folds each book snapshot into a
///    mid-price `watch` channel.
/// 2. Ticks every [`PACE_MS`] ms: when the mid has moved since the last
///    quote, cancels the outstanding pair via `DELETE /orders/{pair}/{id}`
///    and posts fresh size-1 limit quotes at `mid - SPREAD` / `mid + SPREAD`,
///    remembering the returned ids for the next cycle.
pub async fn run_market_maker(
    api_base: &str,
    target_pair: Pair,
    token: CancellationToken,
) -> Result<(), MarketMakerError> {
    let ws_url = format!(
        "ws://{host}/ws/{pair}",
        host = api_base.trim_start_matches("http://"),
        pair = target_pair.code()
    );
    info!(%ws_url, "market maker: connecting");

    let ws_stream = {
        let mut attempts = 0;
        loop {
            match connect_async(&ws_url).await {
                Ok((stream, _)) => {
                    info!("market maker: ws connected");
                    break stream;
                }
                Err(e) if attempts < MAX_CONNECT_ATTEMPTS => {
                    attempts += 1;
                    warn!(error = %e, attempts, "market maker: ws connect failed; retrying...");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    let (_write, read) = ws_stream.split();

    let (mid_tx, mid_rx) = watch::channel(None::<Price>);

    // parse snapshots -> update `mid_tx`
    let frames = read.filter_map(|msg| async move {
        match msg {
            Ok(WsMsg::Text(txt)) => match serde_json::from_str::<WsFrame>(&txt) {
                Ok(frame) => Some(frame),
                Err(err) => {
                    warn!("invalid WS frame: {err}");
                    None
                }
            },
            _ => None,
        }
    });
    let subscribed = target_pair;
    tokio::spawn(async move {
        tokio::pin!(frames);
        while let Some(frame) = frames.next().await {
            if let WsFrame::BookSnapshot(snap) = frame {
                if snap.pair != subscribed {
                    continue;
                }
                if let (Some(bid), Some(ask)) = (snap.bids.first(), snap.asks.first()) {
                    let _ = mid_tx.send(Some((bid.price + ask.price) / 2));
                }
            }
        }
    });

    let client = reqwest::Client::new();
    let mut outstanding: Vec<OrderId> = Vec::new();
    let mut interval = time::interval(time::Duration::from_millis(PACE_MS));
    let mut last_mid = None;

    loop {
        tokio::select! {
            //cancellation wins instantly
            _ = token.cancelled() => {
                info!("market maker: shutdown requested, tearing down...");
                break;
            }
            _ = interval.tick() => {
                let mid_opt: Option<Price> = *mid_rx.borrow();
                let Some(mid) = mid_opt else { continue };
                if Some(mid) == last_mid {
                    continue;
                }

                // the market moved: drop stale quotes, post a fresh pair
                for id in outstanding.drain(..) {
                    let _ = client
                        .delete(format!("{}/orders/{}/{}", api_base, target_pair.code(), id))
                        .send()
                        .await;
                }

                let bid = mid.saturating_sub(SPREAD).max(1);
                let ask = mid.saturating_add(SPREAD);
                info!(bid, ask, "refreshing quotes");
                for (side, price) in [(Side::Buy, bid), (Side::Sell, ask)] {
                    match post_quote(&client, api_base, target_pair, side, price).await {
                        Ok(Some(id)) => outstanding.push(id),
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, ?side, "failed to post quote"),
                    }
                }
                last_mid = Some(mid);
            }
        }
    }
    Ok(())
}
