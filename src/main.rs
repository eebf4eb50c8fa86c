use axum::Router;
use clap::{Parser, Subcommand};
use matching_engine::instrument::ETH_USD;
use matching_engine::state::AppState;
use matching_engine::utils::shutdown_token;
use matching_engine::{api, market_maker, simulate};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "matching-engine")]
#[command(version = "0.1", about = "A continuous double-auction matching engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP/WS gateway
    Server { port: u16 },
    /// Serve the gateway plus a market maker and a noisy-flow simulator
    Simulate { port: u16, secs: u64 },
}

async fn wait_for_server(api_base: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    loop {
        match client
            .get(format!("{}/book/{}", api_base, ETH_USD.code()))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => break,
            _ => tokio::time::sleep(Duration::from_millis(25)).await,
        }
    }
    Ok(())
}

/// Seed the book with a resting bid @48 and ask @52 so the maker has a mid.
async fn seed_book(api_base: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    for (side, price) in [("Buy", 48u64), ("Sell", 52)] {
        client
            .post(format!("{api_base}/orders"))
            .json(&json!({
                "user_id": 0,
                "side": side,
                "order_type": "Limit",
                "price": price,
                "quantity": 10,
                "symbol": ETH_USD.code(),
            }))
            .send()
            .await?
            .error_for_status()?;
        tracing::info!(side, price, "seeded resting order");
    }
    Ok(())
}

async fn app_listener(port: u16, state: AppState) -> anyhow::Result<(TcpListener, Router)> {
    let app = api::router(state);
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    Ok((listener, app))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let state = AppState::new();
    let token = shutdown_token();
    let server_token = token.clone();
    let mm_token = token.clone();
    let sim_token = token.clone();

    let cli = Cli::parse();
    let base = "http://127.0.0.1".to_string();
    match cli.command {
        //runs the server together with the market maker bot and flow simulator
        Commands::Simulate { port, secs } => {
            let mut handlers = tokio::task::JoinSet::new();
            let (listener, app) = app_listener(port, state).await?;
            handlers.spawn(async move {
                tracing::info!(port, "HTTP/WS server listening");
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(server_token.cancelled_owned())
                    .await
                {
                    tracing::error!(error = %e, "server exited");
                }
            });

            let ep = format!("{base}:{port}");
            wait_for_server(&ep).await?;
            seed_book(&ep).await?;

            let mm_base = ep.clone();
            handlers.spawn(async move {
                if let Err(e) = market_maker::run_market_maker(&mm_base, ETH_USD, mm_token).await {
                    tracing::error!("market maker exited: {e:?}");
                }
            });

            handlers.spawn(async move {
                let cfg = simulate::SimConfig {
                    api_base: ep,
                    pair: ETH_USD,
                    run_secs: if secs == 0 { None } else { Some(secs) },
                    attack_rate_hz: 5.0,
                    noise_sigma: 0.5,
                    mean_qty: 3.0,
                    market_order_p: 0.2,
                };
                if let Err(e) = simulate::run_simulation(cfg, sim_token).await {
                    tracing::error!("simulation error: {e:?}");
                }
            });

            handlers.join_all().await;
        }
        Commands::Server { port } => {
            let (listener, app) = app_listener(port, state).await?;
            tracing::info!(port, "HTTP/WS server listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(server_token.cancelled_owned())
                .await?;
        }
    };
    Ok(())
}
