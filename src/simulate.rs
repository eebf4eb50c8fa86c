//! Simulation harness for noisy order flow against the engine.

use rand::Rng;
use rand_distr::{Distribution, Exp, Exp1, Normal};
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::instrument::Pair;

#[derive(Clone)]
pub struct SimConfig {
    pub api_base: String,
    pub pair: Pair,
    pub run_secs: Option<u64>,
    /// Poisson arrival rate λ of submissions per second.
    pub attack_rate_hz: f64,
    /// N(0, σ) drift applied to the quoted mid each tick.
    pub noise_sigma: f64,
    /// Average order size (unit-exponential * mean_qty, rounded up to 1).
    pub mean_qty: f64,
    /// Probability that a tick fires a market order instead of a limit.
    pub market_order_p: f64,
}

#[derive(Deserialize)]
struct Ack {
    #[serde(default)]
    trades: Vec<AckTrade>,
}

#[derive(Deserialize)]
struct AckTrade {
    price: u64,
    quantity: u64,
}

/// Noisy order-flow loop: exponential inter-arrival times, a drifting mid,
/// limit quotes around the mid with the occasional market order, and running
/// inventory / P&L bookkeeping from the acked trades.
pub async fn run_simulation(cfg: SimConfig, cancel_token: CancellationToken) -> anyhow::Result<()> {
    // a small client timeout is helpful under load
    let client: Client = ClientBuilder::new()
        .timeout(Duration::from_secs(5))
        .build()?;

    let ia = Exp::new(cfg.attack_rate_hz).expect("attack_rate_hz must be > 0");
    let drift = Normal::new(0.0, cfg.noise_sigma).expect("noise_sigma >= 0");
    let size = Exp1;

    let mut inventory: i64 = 0;
    let mut pnl: f64 = 0.0;
    let mut mid: f64 = 50.0;
    let start = Instant::now();
    let spread = 1.0_f64;

    loop {
        if let Some(max_secs) = cfg.run_secs {
            if start.elapsed().as_secs() >= max_secs {
                break;
            }
        }

        // exponential inter-arrival
        let wait_secs: f64 = ia.sample(&mut rand::rng());
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("received shutdown; exiting simulation loop");
                break;
            }
            _ = sleep(Duration::from_secs_f64(wait_secs)) => {}
        }

        let unit: f64 = size.sample(&mut rand::rng());
        let qty = (unit * cfg.mean_qty).max(1.0).round() as u64;
        let user_id: u64 = rand::rng().random_range(2..5);

        mid += drift.sample(&mut rand::rng());
        mid = mid.max(2.0);

        let is_buy = rand::rng().random_bool(0.5);
        let side = if is_buy { "Buy" } else { "Sell" };

        let body = if rand::rng().random_bool(cfg.market_order_p) {
            json!({
                "user_id": user_id,
                "side": side,
                "order_type": "Market",
                "quantity": qty,
                "symbol": cfg.pair.code(),
            })
        } else {
            let price = if is_buy { mid - spread } else { mid + spread };
            json!({
                "user_id": user_id,
                "side": side,
                "order_type": "Limit",
                "price": price.max(1.0).round() as u64,
                "quantity": qty,
                "symbol": cfg.pair.code(),
            })
        };

        // place the order; on failure, warn and continue
        match client
            .post(format!("{}/orders", cfg.api_base))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => {
                if let Err(e) = resp.error_for_status_ref() {
                    // market orders into a drained book are expected to bounce
                    warn!(error = %e, side, "order post returned non-success");
                    continue;
                }
                match resp.json::<Ack>().await {
                    Ok(ack) => {
                        for t in ack.trades {
                            let px = t.price as f64;
                            let q = t.quantity as f64;
                            if is_buy {
                                inventory += q as i64;
                                pnl -= px * q;
                            } else {
                                inventory -= q as i64;
                                pnl += px * q;
                            }
                        }
                        info!(
                            elapsed = format_args!("{:.1}s", start.elapsed().as_secs_f64()),
                            side,
                            qty,
                            mid = format_args!("{:.2}", mid),
                            inventory,
                            pnl = format_args!("{:.2}", pnl),
                            "sim tick"
                        );
                    }
                    Err(e) => warn!(error = %e, "failed to parse Ack JSON"),
                }
            }
            Err(e) => {
                warn!(error = %e, "HTTP request failed");
                continue;
            }
        }
    }

    info!(
        inventory,
        pnl = format_args!("{:.2}", pnl),
        "simulation done"
    );
    Ok(())
}
